use crate::{
    domain::events::{
        DomainEvent, StepCompleted, StepFailed, StepStarted, WorkflowCompleted, WorkflowFailed,
        WorkflowInitiated, WorkflowStarted,
    },
    domain::interaction::InteractionId,
    domain::step_output::StepOutput,
    domain::workflow_definition::{HandlerKind, StepName, WorkflowDefinition, WorkflowType},
    CoreError, HandlerError,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Value object: Orchestration ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrchestrationId(pub String);

/// Value object: Subject ID (the entity the workflow acts on)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectId(pub String);

/// Value object: Related ID (secondary entity, e.g. an appointment)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelatedId(pub String);

impl fmt::Display for OrchestrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(s: &str) -> Self {
        SubjectId(s.to_string())
    }
}

impl From<&str> for RelatedId {
    fn from(s: &str) -> Self {
        RelatedId(s.to_string())
    }
}

/// Orchestration status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationStatus {
    /// Record created, no step started
    Initiated,

    /// Steps are executing
    InProgress,

    /// Every step completed
    Completed,

    /// A step failed
    Failed,
}

impl OrchestrationStatus {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrchestrationStatus::Completed | OrchestrationStatus::Failed)
    }
}

/// Status of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not started
    Pending,

    /// Handler running
    InProgress,

    /// Handler succeeded
    Completed,

    /// Handler failed
    Failed,
}

impl StepStatus {
    /// Position in the `pending < in_progress < {completed, failed}` order
    pub fn rank(&self) -> u8 {
        match self {
            StepStatus::Pending => 0,
            StepStatus::InProgress => 1,
            StepStatus::Completed | StepStatus::Failed => 2,
        }
    }

    /// Whether the step reached a final status
    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }
}

/// Per-step progress record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepState {
    /// Step name
    pub name: StepName,

    /// Handler responsible for the step
    pub handler: HandlerKind,

    /// Current status
    pub status: StepStatus,

    /// When the step started
    pub started_at: Option<DateTime<Utc>>,

    /// When the step reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
}

/// Why a workflow failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Step that failed
    pub step: StepName,

    /// Human-readable cause
    pub message: String,

    /// Stable error code
    pub kind: String,

    /// Whether an external retry is sensible
    pub retryable: bool,
}

impl ErrorDetails {
    /// Details for a handler failure on a step
    pub fn from_handler_error(step: StepName, error: &HandlerError) -> Self {
        Self {
            step,
            message: error.to_string(),
            kind: error.kind().to_string(),
            retryable: error.is_retryable(),
        }
    }
}

/// Aggregate: one running or finished workflow instance
#[derive(Debug, Serialize, Deserialize)]
pub struct WorkflowOrchestration {
    /// Unique identifier
    pub id: OrchestrationId,

    /// Entity the workflow acts on
    pub subject_id: SubjectId,

    /// Secondary entity
    pub related_id: Option<RelatedId>,

    /// Workflow type
    pub workflow_type: WorkflowType,

    /// Current status
    pub status: OrchestrationStatus,

    /// Step currently executing or last attempted
    pub current_step: Option<StepName>,

    /// One entry per step of the definition, in order
    pub steps: Vec<StepState>,

    /// Handler names invoked, in first-use order
    pub agents_involved: Vec<String>,

    /// Output of every completed step
    pub results: BTreeMap<StepName, StepOutput>,

    /// Present only when failed
    pub error_details: Option<ErrorDetails>,

    /// Audit records created by this run
    pub interactions: Vec<InteractionId>,

    /// Creation timestamp
    pub started_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,

    /// When a terminal status was reached
    pub completed_at: Option<DateTime<Utc>>,

    /// Domain events
    #[serde(skip)]
    pub events: Vec<Box<dyn DomainEvent>>,
}

// Events are not cloned
impl Clone for WorkflowOrchestration {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            subject_id: self.subject_id.clone(),
            related_id: self.related_id.clone(),
            workflow_type: self.workflow_type,
            status: self.status,
            current_step: self.current_step,
            steps: self.steps.clone(),
            agents_involved: self.agents_involved.clone(),
            results: self.results.clone(),
            error_details: self.error_details.clone(),
            interactions: self.interactions.clone(),
            started_at: self.started_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            events: Vec::new(),
        }
    }
}

impl WorkflowOrchestration {
    /// Create a new orchestration with every step pending
    pub fn new(
        definition: &WorkflowDefinition,
        subject_id: SubjectId,
        related_id: Option<RelatedId>,
    ) -> Self {
        let id = OrchestrationId(Uuid::new_v4().to_string());
        let now = Utc::now();

        let steps = definition
            .steps
            .iter()
            .map(|s| StepState {
                name: s.name,
                handler: s.handler,
                status: StepStatus::Pending,
                started_at: None,
                completed_at: None,
            })
            .collect();

        let mut orchestration = Self {
            id: id.clone(),
            subject_id,
            related_id,
            workflow_type: definition.workflow_type,
            status: OrchestrationStatus::Initiated,
            current_step: None,
            steps,
            agents_involved: Vec::new(),
            results: BTreeMap::new(),
            error_details: None,
            interactions: Vec::new(),
            started_at: now,
            updated_at: now,
            completed_at: None,
            events: Vec::with_capacity(8),
        };

        orchestration.record_event(Box::new(WorkflowInitiated {
            orchestration_id: id,
            workflow_type: definition.workflow_type,
            timestamp: now,
        }));

        orchestration
    }

    /// Move from initiated to in_progress
    pub fn start(&mut self) -> Result<(), CoreError> {
        if self.status != OrchestrationStatus::Initiated {
            return Err(CoreError::InvalidTransition(format!(
                "Cannot start orchestration in state: {:?}",
                self.status
            )));
        }

        self.status = OrchestrationStatus::InProgress;
        self.touch();
        self.record_event(Box::new(WorkflowStarted {
            orchestration_id: self.id.clone(),
            timestamp: self.updated_at,
        }));

        Ok(())
    }

    /// Mark a step in_progress. Every earlier step must be completed.
    pub fn begin_step(&mut self, step: StepName) -> Result<HandlerKind, CoreError> {
        self.ensure_in_progress("begin step")?;
        let index = self.step_index(step)?;

        if let Some(blocking) = self.steps[..index]
            .iter()
            .find(|s| s.status != StepStatus::Completed)
        {
            return Err(CoreError::InvalidTransition(format!(
                "Cannot begin step {} while step {} is {:?}",
                step, blocking.name, blocking.status
            )));
        }

        let now = Utc::now();
        let state = &mut self.steps[index];
        if state.status != StepStatus::Pending {
            return Err(CoreError::InvalidTransition(format!(
                "Cannot begin step {} in state: {:?}",
                step, state.status
            )));
        }
        state.status = StepStatus::InProgress;
        state.started_at = Some(now);
        let handler = state.handler;

        self.current_step = Some(step);
        if !self.agents_involved.iter().any(|a| a == handler.as_str()) {
            self.agents_involved.push(handler.as_str().to_string());
        }
        self.touch();
        self.record_event(Box::new(StepStarted {
            orchestration_id: self.id.clone(),
            step,
            timestamp: now,
        }));

        Ok(handler)
    }

    /// Mark a running step completed and store its output
    pub fn complete_step(&mut self, step: StepName, output: StepOutput) -> Result<(), CoreError> {
        self.ensure_in_progress("complete step")?;
        let now = Utc::now();
        self.finish_step(step, StepStatus::Completed, now)?;
        self.results.insert(step, output);
        self.touch();
        self.record_event(Box::new(StepCompleted {
            orchestration_id: self.id.clone(),
            step,
            timestamp: now,
        }));

        Ok(())
    }

    /// Mark a running step failed and terminate the orchestration
    pub fn fail_step(&mut self, step: StepName, error: &HandlerError) -> Result<(), CoreError> {
        self.fail(ErrorDetails::from_handler_error(step, error))
    }

    /// Terminate as failed. The step named in `details` is marked failed if it is running.
    pub fn fail(&mut self, details: ErrorDetails) -> Result<(), CoreError> {
        if self.status.is_terminal() {
            return Err(CoreError::InvalidTransition(format!(
                "Cannot fail orchestration in state: {:?}",
                self.status
            )));
        }

        let now = Utc::now();
        let step = details.step;
        let step_running = self
            .steps
            .iter()
            .any(|s| s.name == step && s.status == StepStatus::InProgress);
        if step_running {
            self.finish_step(step, StepStatus::Failed, now)?;
            self.record_event(Box::new(StepFailed {
                orchestration_id: self.id.clone(),
                step,
                error: details.message.clone(),
                timestamp: now,
            }));
        }

        self.status = OrchestrationStatus::Failed;
        self.completed_at = Some(now);
        self.record_event(Box::new(WorkflowFailed {
            orchestration_id: self.id.clone(),
            error: details.message.clone(),
            timestamp: now,
        }));
        self.error_details = Some(details);
        self.touch();

        Ok(())
    }

    /// Terminate as completed. Every step must be completed.
    pub fn complete(&mut self) -> Result<(), CoreError> {
        self.ensure_in_progress("complete orchestration")?;
        if let Some(open) = self.steps.iter().find(|s| s.status != StepStatus::Completed) {
            return Err(CoreError::InvalidTransition(format!(
                "Cannot complete orchestration while step {} is {:?}",
                open.name, open.status
            )));
        }

        let now = Utc::now();
        self.status = OrchestrationStatus::Completed;
        self.completed_at = Some(now);
        self.touch();
        self.record_event(Box::new(WorkflowCompleted {
            orchestration_id: self.id.clone(),
            timestamp: now,
        }));

        Ok(())
    }

    /// Remember an audit record created for this run
    pub fn attach_interaction(&mut self, id: InteractionId) {
        self.interactions.push(id);
        self.touch();
    }

    /// First pending step, if the orchestration can still make progress
    pub fn next_step(&self) -> Option<&StepState> {
        if self.status != OrchestrationStatus::InProgress {
            return None;
        }
        self.steps.iter().find(|s| s.status == StepStatus::Pending)
    }

    /// Progress record of a step
    pub fn step(&self, name: StepName) -> Option<&StepState> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Whether the orchestration reached a terminal status
    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Record a domain event
    pub fn record_event(&mut self, event: Box<dyn DomainEvent>) {
        self.events.push(event);
    }

    /// Get and clear all domain events
    pub fn take_events(&mut self) -> Vec<Box<dyn DomainEvent>> {
        std::mem::take(&mut self.events)
    }

    #[inline]
    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn ensure_in_progress(&self, action: &str) -> Result<(), CoreError> {
        if self.status != OrchestrationStatus::InProgress {
            return Err(CoreError::InvalidTransition(format!(
                "Cannot {} while orchestration is in state: {:?}",
                action, self.status
            )));
        }
        Ok(())
    }

    fn step_index(&self, step: StepName) -> Result<usize, CoreError> {
        self.steps
            .iter()
            .position(|s| s.name == step)
            .ok_or_else(|| {
                CoreError::InvalidTransition(format!(
                    "Step {} is not part of workflow {}",
                    step, self.workflow_type
                ))
            })
    }

    fn finish_step(
        &mut self,
        step: StepName,
        status: StepStatus,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let index = self.step_index(step)?;
        let state = &mut self.steps[index];
        if state.status != StepStatus::InProgress {
            return Err(CoreError::InvalidTransition(format!(
                "Cannot move step {} from {:?} to {:?}",
                step, state.status, status
            )));
        }
        state.status = status;
        state.completed_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::step_output::{IntakeForms, PatientInstructions};
    use crate::domain::workflow_definition::WorkflowDefinition;

    fn intake_orchestration() -> WorkflowOrchestration {
        WorkflowOrchestration::new(
            &WorkflowDefinition::for_type(WorkflowType::Intake),
            SubjectId::from("7"),
            None,
        )
    }

    // Helper function to create a running orchestration with no pending events
    fn running_orchestration() -> WorkflowOrchestration {
        let mut orchestration = intake_orchestration();
        orchestration.start().unwrap();
        orchestration.take_events();
        orchestration
    }

    fn forms() -> StepOutput {
        StepOutput::IntakeForms(IntakeForms { forms: vec![] })
    }

    #[test]
    fn test_orchestration_creation() {
        let orchestration = intake_orchestration();

        assert_eq!(orchestration.status, OrchestrationStatus::Initiated);
        assert_eq!(orchestration.workflow_type, WorkflowType::Intake);
        assert_eq!(orchestration.steps.len(), 3);
        assert!(orchestration.steps.iter().all(|s| s.status == StepStatus::Pending));
        assert!(orchestration.results.is_empty());
        assert!(orchestration.current_step.is_none());
        assert!(orchestration.error_details.is_none());
        assert!(!orchestration.id.0.is_empty());
        assert_eq!(orchestration.events.len(), 1);
        assert_eq!(orchestration.events[0].event_type(), "workflow.initiated");
    }

    #[test]
    fn test_start_invalid_state() {
        let mut orchestration = running_orchestration();

        match orchestration.start() {
            Err(CoreError::InvalidTransition(msg)) => {
                assert!(msg.contains("Cannot start orchestration in state"));
            }
            other => panic!("Expected InvalidTransition, got {:?}", other),
        }
    }

    #[test]
    fn test_begin_step_requires_running() {
        let mut orchestration = intake_orchestration();
        assert!(orchestration.begin_step(StepName::PrepareForms).is_err());
    }

    #[test]
    fn test_begin_and_complete_step() {
        let mut orchestration = running_orchestration();

        let handler = orchestration.begin_step(StepName::PrepareForms).unwrap();
        assert_eq!(handler, HandlerKind::Intake);
        assert_eq!(orchestration.current_step, Some(StepName::PrepareForms));
        assert_eq!(orchestration.agents_involved, vec!["intake".to_string()]);

        let state = orchestration.step(StepName::PrepareForms).unwrap();
        assert_eq!(state.status, StepStatus::InProgress);
        assert!(state.started_at.is_some());

        orchestration.complete_step(StepName::PrepareForms, forms()).unwrap();
        let state = orchestration.step(StepName::PrepareForms).unwrap();
        assert_eq!(state.status, StepStatus::Completed);
        assert!(state.completed_at.is_some());
        assert!(orchestration.results.contains_key(&StepName::PrepareForms));

        let types: Vec<_> = orchestration.take_events().iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec!["step.started", "step.completed"]);
    }

    #[test]
    fn test_steps_cannot_be_skipped() {
        let mut orchestration = running_orchestration();

        match orchestration.begin_step(StepName::PerformTriage) {
            Err(CoreError::InvalidTransition(msg)) => {
                assert!(msg.contains("while step prepare_forms is Pending"));
            }
            other => panic!("Expected InvalidTransition, got {:?}", other),
        }
        assert_eq!(
            orchestration.step(StepName::PerformTriage).unwrap().status,
            StepStatus::Pending
        );
    }

    #[test]
    fn test_step_cannot_regress() {
        let mut orchestration = running_orchestration();
        orchestration.begin_step(StepName::PrepareForms).unwrap();
        orchestration.complete_step(StepName::PrepareForms, forms()).unwrap();

        assert!(orchestration.begin_step(StepName::PrepareForms).is_err());
        assert!(orchestration.complete_step(StepName::PrepareForms, forms()).is_err());
        assert_eq!(
            orchestration.step(StepName::PrepareForms).unwrap().status,
            StepStatus::Completed
        );
    }

    #[test]
    fn test_step_outside_definition_is_rejected() {
        let mut orchestration = running_orchestration();
        let err = orchestration.begin_step(StepName::Book).unwrap_err();
        assert!(err.to_string().contains("not part of workflow intake"));
    }

    #[test]
    fn test_fail_step_terminates() {
        let mut orchestration = running_orchestration();
        orchestration.begin_step(StepName::PrepareForms).unwrap();

        let error = HandlerError::ParseFailure("not json".to_string());
        orchestration.fail_step(StepName::PrepareForms, &error).unwrap();

        assert_eq!(orchestration.status, OrchestrationStatus::Failed);
        assert!(orchestration.completed_at.is_some());
        assert_eq!(
            orchestration.step(StepName::PrepareForms).unwrap().status,
            StepStatus::Failed
        );

        let details = orchestration.error_details.as_ref().unwrap();
        assert_eq!(details.step, StepName::PrepareForms);
        assert_eq!(details.kind, "parse_failure");
        assert!(!details.retryable);
        assert!(details.message.contains("not json"));

        // Nothing after a failure may start
        assert!(orchestration.next_step().is_none());
        assert!(orchestration.begin_step(StepName::PerformTriage).is_err());
        assert!(orchestration.complete().is_err());
        assert!(orchestration.fail_step(StepName::PrepareForms, &error).is_err());

        let types: Vec<_> = orchestration.take_events().iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec!["step.started", "step.failed", "workflow.failed"]);
    }

    #[test]
    fn test_complete_requires_all_steps() {
        let mut orchestration = running_orchestration();
        orchestration.begin_step(StepName::PrepareForms).unwrap();
        orchestration.complete_step(StepName::PrepareForms, forms()).unwrap();

        match orchestration.complete() {
            Err(CoreError::InvalidTransition(msg)) => {
                assert!(msg.contains("perform_triage"));
            }
            other => panic!("Expected InvalidTransition, got {:?}", other),
        }
    }

    #[test]
    fn test_full_run_completes() {
        let mut orchestration = running_orchestration();
        let outputs = vec![
            (StepName::PrepareForms, forms()),
            (
                StepName::PerformTriage,
                StepOutput::Triage(crate::domain::step_output::TriageAssessment {
                    urgency: crate::domain::step_output::Urgency::Low,
                    summary: "routine".to_string(),
                    recommended_specialty: None,
                    red_flags: vec![],
                    confidence: 0.9,
                }),
            ),
            (
                StepName::GenerateInstructions,
                StepOutput::Instructions(PatientInstructions {
                    instructions: vec!["Bring ID".to_string()],
                    follow_up: None,
                }),
            ),
        ];

        while let Some(next) = orchestration.next_step().map(|s| s.name) {
            let (_, output) = outputs.iter().find(|(n, _)| *n == next).unwrap();
            orchestration.begin_step(next).unwrap();
            orchestration.complete_step(next, output.clone()).unwrap();
        }
        orchestration.complete().unwrap();

        assert_eq!(orchestration.status, OrchestrationStatus::Completed);
        assert_eq!(orchestration.results.len(), 3);
        assert_eq!(
            orchestration.agents_involved,
            vec!["intake".to_string(), "triage".to_string()]
        );
        assert!(orchestration.fail(ErrorDetails {
            step: StepName::PrepareForms,
            message: "late".to_string(),
            kind: "x".to_string(),
            retryable: false,
        })
        .is_err());
    }

    #[test]
    fn test_serialization_skips_events() {
        let mut orchestration = running_orchestration();
        orchestration.begin_step(StepName::PrepareForms).unwrap();
        orchestration.complete_step(StepName::PrepareForms, forms()).unwrap();

        let value = serde_json::to_value(&orchestration).unwrap();
        assert_eq!(value["status"], "in_progress");
        assert_eq!(value["steps"][0]["status"], "completed");
        assert_eq!(value["results"]["prepare_forms"]["type"], "intake_forms");
        assert!(value.get("events").is_none());

        let back: WorkflowOrchestration = serde_json::from_value(value).unwrap();
        assert_eq!(back.id, orchestration.id);
        assert_eq!(back.steps, orchestration.steps);
        assert!(back.events.is_empty());
    }

    #[test]
    fn test_clone_drops_events() {
        let orchestration = intake_orchestration();
        let cloned = orchestration.clone();
        assert_eq!(cloned.id, orchestration.id);
        assert!(cloned.events.is_empty());
        assert!(!orchestration.events.is_empty());
    }

    #[test]
    fn test_step_status_rank() {
        assert!(StepStatus::Pending.rank() < StepStatus::InProgress.rank());
        assert!(StepStatus::InProgress.rank() < StepStatus::Completed.rank());
        assert_eq!(StepStatus::Completed.rank(), StepStatus::Failed.rank());
        assert!(StepStatus::Failed.is_terminal());
        assert!(!StepStatus::InProgress.is_terminal());
    }
}
