/// Workflow types, step names and their definitions
pub mod workflow_definition;

/// Workflow orchestration aggregate
pub mod orchestration;

/// Agent interaction audit records
pub mod interaction;

/// Typed step outputs
pub mod step_output;

/// Domain events
pub mod events;

/// External collaborator interfaces
pub mod collaborators;

/// Repository interfaces
pub mod repository;
