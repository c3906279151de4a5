//! Step handlers
//!
//! One handler per task type. The orchestrator looks handlers up by
//! [`HandlerKind`] and calls [`StepHandler::execute`] once per step.

use crate::domain::collaborators::CollaboratorError;
use crate::domain::orchestration::{OrchestrationId, RelatedId, SubjectId};
use crate::domain::step_output::{CandidateSlots, StepOutput, SubjectDetails, TriageAssessment};
use crate::domain::workflow_definition::{DefinitionRegistry, HandlerKind, StepName, WorkflowType};
use crate::{CoreError, HandlerError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Eligibility verification handler
pub mod eligibility;

/// Intake forms and patient instructions handler
pub mod intake;

/// Slot search and booking handler
pub mod scheduling;

/// Urgency assessment handler
pub mod triage;

pub use eligibility::EligibilityHandler;
pub use intake::IntakeHandler;
pub use scheduling::SchedulingHandler;
pub use triage::TriageHandler;

/// Everything a handler may read while executing one step
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Orchestration being executed
    pub orchestration_id: OrchestrationId,

    /// Workflow type
    pub workflow_type: WorkflowType,

    /// Step to execute
    pub step: StepName,

    /// Subject of the workflow
    pub subject_id: SubjectId,

    /// Related entity
    pub related_id: Option<RelatedId>,

    /// Caller's original input
    pub input: Map<String, Value>,

    /// Outputs of the steps completed so far
    pub results: BTreeMap<StepName, StepOutput>,
}

impl StepContext {
    /// Output of an earlier step
    pub fn result(&self, step: StepName) -> Result<&StepOutput, HandlerError> {
        self.results
            .get(&step)
            .ok_or_else(|| HandlerError::MissingStepOutput(step.to_string()))
    }

    /// Output of `collect_subject_details`
    pub fn subject_details(&self) -> Result<&SubjectDetails, HandlerError> {
        let step = StepName::CollectSubjectDetails;
        self.result(step)?
            .as_subject_details()
            .ok_or_else(|| HandlerError::MissingStepOutput(step.to_string()))
    }

    /// Output of `find_candidate_slots`
    pub fn candidate_slots(&self) -> Result<&CandidateSlots, HandlerError> {
        let step = StepName::FindCandidateSlots;
        self.result(step)?
            .as_candidate_slots()
            .ok_or_else(|| HandlerError::MissingStepOutput(step.to_string()))
    }

    /// Output of `perform_triage`
    pub fn triage(&self) -> Result<&TriageAssessment, HandlerError> {
        let step = StepName::PerformTriage;
        self.result(step)?
            .as_triage()
            .ok_or_else(|| HandlerError::MissingStepOutput(step.to_string()))
    }

    /// Input value rendered for a prompt, or `"not provided"`
    pub(crate) fn input_text(&self, key: &str) -> String {
        match self.input.get(key) {
            None | Some(Value::Null) => "not provided".to_string(),
            Some(Value::String(s)) if s.trim().is_empty() => "not provided".to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

/// Non-async base trait for step handlers
pub trait StepHandlerBase: Send + Sync {
    /// Kind this handler registers under
    fn kind(&self) -> HandlerKind;

    /// Whether the handler knows how to execute a step
    fn supports(&self, step: StepName) -> bool;
}

/// A handler that executes workflow steps
#[async_trait]
pub trait StepHandler: StepHandlerBase {
    /// Execute one step
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutput, HandlerError>;
}

/// Handlers keyed by kind
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<HandlerKind, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any handler of the same kind
    pub fn register(mut self, handler: Arc<dyn StepHandler>) -> Self {
        self.handlers.insert(handler.kind(), handler);
        self
    }

    /// Handler registered for a kind
    pub fn get(&self, kind: HandlerKind) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Check that every step of every definition has a handler that supports it
    pub fn verify(&self, definitions: &DefinitionRegistry) -> Result<(), CoreError> {
        for definition in definitions.definitions() {
            for step in &definition.steps {
                let handler = self.handlers.get(&step.handler).ok_or_else(|| {
                    CoreError::ConfigurationError(format!(
                        "No {} handler registered for step {} of workflow {}",
                        step.handler, step.name, definition.workflow_type
                    ))
                })?;

                if !handler.supports(step.name) {
                    return Err(CoreError::ConfigurationError(format!(
                        "Handler {} does not support step {} of workflow {}",
                        step.handler, step.name, definition.workflow_type
                    )));
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("HandlerRegistry").field("handlers", &kinds).finish()
    }
}

impl From<CollaboratorError> for HandlerError {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::Transport(msg) => HandlerError::Transport(msg),
            CollaboratorError::Conflict(msg) => HandlerError::BookingConflict(msg),
        }
    }
}

/// Run a collaborator call under a timeout
pub(crate) async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, HandlerError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(HandlerError::from),
        Err(_) => Err(HandlerError::Timeout(timeout.as_millis() as u64)),
    }
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line, if any
    let body = rest.split_once('\n').map_or(rest, |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse model output into a structure, tolerating markdown code fences
pub(crate) fn parse_model_json<T: DeserializeOwned>(raw: &str) -> Result<T, HandlerError> {
    let body = strip_code_fences(raw);
    if body.is_empty() {
        return Err(HandlerError::ParseFailure("model returned no content".to_string()));
    }
    serde_json::from_str(body).map_err(|e| HandlerError::ParseFailure(e.to_string()))
}
