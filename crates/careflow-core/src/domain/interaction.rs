//! Audit record of a single handler invocation

use crate::domain::orchestration::{OrchestrationId, RelatedId, SubjectId};
use crate::domain::workflow_definition::{HandlerKind, StepName};
use crate::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Value object: Interaction ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InteractionId(pub String);

impl fmt::Display for InteractionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Interaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionStatus {
    /// Handler running
    InProgress,
    /// Handler returned an output
    Completed,
    /// Handler returned an error
    Failed,
}

impl InteractionStatus {
    /// Whether terminal fields have been written
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InteractionStatus::InProgress)
    }
}

/// What kind of work the handler did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    /// Slot search, request validation or booking
    SchedulingRequest,
    /// Payer eligibility check
    EligibilityVerification,
    /// Intake form generation
    IntakeFormGeneration,
    /// Urgency assessment
    TriageAssessment,
    /// Patient instruction generation
    InstructionGeneration,
}

impl From<StepName> for InteractionType {
    fn from(step: StepName) -> Self {
        match step {
            StepName::CollectSubjectDetails | StepName::FindCandidateSlots | StepName::Book => {
                InteractionType::SchedulingRequest
            }
            StepName::VerifyEligibility => InteractionType::EligibilityVerification,
            StepName::PrepareForms => InteractionType::IntakeFormGeneration,
            StepName::PerformTriage => InteractionType::TriageAssessment,
            StepName::GenerateInstructions => InteractionType::InstructionGeneration,
        }
    }
}

/// Data needed to open an interaction record
#[derive(Debug, Clone)]
pub struct NewInteraction {
    /// Handler being invoked
    pub handler: HandlerKind,
    /// Orchestration the invocation belongs to
    pub orchestration_id: Option<OrchestrationId>,
    /// Subject of the workflow
    pub subject_id: SubjectId,
    /// Related entity
    pub related_id: Option<RelatedId>,
    /// Kind of work
    pub interaction_type: InteractionType,
    /// Handler input
    pub input: Value,
    /// Free-form context
    pub metadata: Value,
}

/// Append-only audit record of one handler invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInteraction {
    /// Unique identifier, never reused
    pub id: InteractionId,

    /// Handler that ran
    #[serde(rename = "handler_name")]
    pub handler: HandlerKind,

    /// Orchestration the invocation belongs to
    pub orchestration_id: Option<OrchestrationId>,

    /// Subject of the workflow
    pub subject_id: SubjectId,

    /// Related entity
    pub related_id: Option<RelatedId>,

    /// Kind of work
    pub interaction_type: InteractionType,

    /// Current status
    pub status: InteractionStatus,

    /// Handler input
    pub input: Value,

    /// Handler output, once completed
    pub output: Option<Value>,

    /// Failure message, once failed
    pub error: Option<String>,

    /// Free-form context (workflow type, step, workflow id)
    pub metadata: Value,

    /// Producer-reported confidence in 0..=1
    pub confidence: Option<f64>,

    /// When the invocation started
    pub started_at: DateTime<Utc>,

    /// When the invocation finished
    pub completed_at: Option<DateTime<Utc>>,
}

impl AgentInteraction {
    /// Open a new in-progress record with a fresh id
    pub fn start(new: NewInteraction) -> Self {
        Self {
            id: InteractionId(Uuid::new_v4().to_string()),
            handler: new.handler,
            orchestration_id: new.orchestration_id,
            subject_id: new.subject_id,
            related_id: new.related_id,
            interaction_type: new.interaction_type,
            status: InteractionStatus::InProgress,
            input: new.input,
            output: None,
            error: None,
            metadata: new.metadata,
            confidence: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Write the output and close the record
    pub fn complete(&mut self, output: Value, confidence: Option<f64>) -> Result<(), CoreError> {
        self.ensure_open()?;
        if let Some(c) = confidence {
            if !(0.0..=1.0).contains(&c) {
                return Err(CoreError::ValidationError(format!(
                    "Confidence {} outside 0..=1 for interaction {}",
                    c, self.id
                )));
            }
        }

        self.status = InteractionStatus::Completed;
        self.output = Some(output);
        self.confidence = confidence;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Write the failure and close the record
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), CoreError> {
        self.ensure_open()?;
        self.status = InteractionStatus::Failed;
        self.error = Some(message.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), CoreError> {
        if self.status.is_terminal() {
            return Err(CoreError::InteractionAlreadyFinalized(self.id.0.clone()));
        }
        Ok(())
    }
}
