//!
//! Careflow Core - workflow orchestration for a healthcare practice
//!
//! This crate drives named business processes (appointment scheduling,
//! patient intake) as ordered sequences of steps, each delegated to a step
//! handler. Per-step state is persisted, every handler invocation is recorded
//! for audit, and the failure of any step stops the workflow.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - core business models, entities, and rules
pub mod domain;

/// Application services - orchestration and audit recording
pub mod application;

/// Step handlers
pub mod handlers;

/// Configuration
pub mod config;

/// Logging setup
pub mod logging;

/// Error types
pub mod error;

/// Test doubles
#[cfg(feature = "testing")]
pub mod test_utils;

// Re-export key types
pub use error::{CoreError, HandlerError};

// Re-export main API types for easy use
pub use application::interaction_recorder::InteractionRecorder;
pub use application::workflow_orchestrator::{
    DomainEventHandler, TracingEventHandler, WorkflowOrchestrator, WorkflowRequest,
};
pub use config::OrchestratorConfig;
pub use domain::interaction::{AgentInteraction, InteractionId, InteractionStatus, InteractionType};
pub use domain::orchestration::{
    ErrorDetails, OrchestrationId, OrchestrationStatus, RelatedId, StepStatus, SubjectId,
    WorkflowOrchestration,
};
pub use domain::repository::{InteractionRepository, OrchestrationRepository};
pub use domain::step_output::StepOutput;
pub use domain::workflow_definition::{
    DefinitionRegistry, HandlerKind, StepName, WorkflowDefinition, WorkflowType,
};
pub use handlers::{HandlerRegistry, StepContext, StepHandler, StepHandlerBase};
