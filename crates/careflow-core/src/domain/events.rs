use crate::domain::orchestration::OrchestrationId;
use crate::domain::workflow_definition::{StepName, WorkflowType};
use chrono::{DateTime, Utc};
use std::fmt::Debug;

/// Domain event trait for all events raised by an orchestration
pub trait DomainEvent: Debug + Send + Sync {
    /// Returns the type of the event as a string
    fn event_type(&self) -> &'static str;

    /// Returns the orchestration this event belongs to
    fn orchestration_id(&self) -> &OrchestrationId;

    /// Returns the timestamp when the event occurred
    fn timestamp(&self) -> DateTime<Utc>;

    /// Step the event concerns, if any
    fn step(&self) -> Option<StepName> {
        None
    }
}

macro_rules! impl_domain_event {
    ($ty:ty, $name:literal) => {
        impl DomainEvent for $ty {
            fn event_type(&self) -> &'static str {
                $name
            }

            fn orchestration_id(&self) -> &OrchestrationId {
                &self.orchestration_id
            }

            fn timestamp(&self) -> DateTime<Utc> {
                self.timestamp
            }
        }
    };
    ($ty:ty, $name:literal, step) => {
        impl DomainEvent for $ty {
            fn event_type(&self) -> &'static str {
                $name
            }

            fn orchestration_id(&self) -> &OrchestrationId {
                &self.orchestration_id
            }

            fn timestamp(&self) -> DateTime<Utc> {
                self.timestamp
            }

            fn step(&self) -> Option<StepName> {
                Some(self.step)
            }
        }
    };
}

/// Event: orchestration record created
#[derive(Debug)]
pub struct WorkflowInitiated {
    /// The orchestration
    pub orchestration_id: OrchestrationId,

    /// The workflow type
    pub workflow_type: WorkflowType,

    /// When it happened
    pub timestamp: DateTime<Utc>,
}

impl_domain_event!(WorkflowInitiated, "workflow.initiated");

/// Event: orchestration moved to in_progress
#[derive(Debug)]
pub struct WorkflowStarted {
    /// The orchestration
    pub orchestration_id: OrchestrationId,

    /// When it happened
    pub timestamp: DateTime<Utc>,
}

impl_domain_event!(WorkflowStarted, "workflow.started");

/// Event: step started
#[derive(Debug)]
pub struct StepStarted {
    /// The orchestration
    pub orchestration_id: OrchestrationId,

    /// The step
    pub step: StepName,

    /// When it happened
    pub timestamp: DateTime<Utc>,
}

impl_domain_event!(StepStarted, "step.started", step);

/// Event: step completed
#[derive(Debug)]
pub struct StepCompleted {
    /// The orchestration
    pub orchestration_id: OrchestrationId,

    /// The step
    pub step: StepName,

    /// When it happened
    pub timestamp: DateTime<Utc>,
}

impl_domain_event!(StepCompleted, "step.completed", step);

/// Event: step failed
#[derive(Debug)]
pub struct StepFailed {
    /// The orchestration
    pub orchestration_id: OrchestrationId,

    /// The step
    pub step: StepName,

    /// Failure message
    pub error: String,

    /// When it happened
    pub timestamp: DateTime<Utc>,
}

impl_domain_event!(StepFailed, "step.failed", step);

/// Event: every step completed
#[derive(Debug)]
pub struct WorkflowCompleted {
    /// The orchestration
    pub orchestration_id: OrchestrationId,

    /// When it happened
    pub timestamp: DateTime<Utc>,
}

impl_domain_event!(WorkflowCompleted, "workflow.completed");

/// Event: the workflow terminated as failed
#[derive(Debug)]
pub struct WorkflowFailed {
    /// The orchestration
    pub orchestration_id: OrchestrationId,

    /// Failure message
    pub error: String,

    /// When it happened
    pub timestamp: DateTime<Utc>,
}

impl_domain_event!(WorkflowFailed, "workflow.failed");
