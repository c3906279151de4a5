//! Typed outputs produced by each workflow step

use crate::domain::collaborators::{Slot, SubjectPolicy};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Normalised scheduling request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectDetails {
    /// Subject the appointment is for
    pub subject_id: String,

    /// Provider to book with; any provider when absent
    pub provider_id: Option<String>,

    /// Earliest date the subject wants
    pub preferred_date: Option<NaiveDate>,

    /// Preferred start time, if any
    pub preferred_time: Option<NaiveTime>,

    /// Reason for the visit
    pub reason: Option<String>,

    /// Insurance identifiers, if supplied
    pub policy: Option<SubjectPolicy>,
}

/// Open slots, best candidate first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSlots {
    /// Candidate slots
    pub slots: Vec<Slot>,
}

/// Internal eligibility status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityStatus {
    /// Coverage confirmed active
    Verified,
    /// Payer has not decided yet
    Pending,
    /// Coverage inactive or refused
    Denied,
    /// Outcome unknown
    Error,
}

/// Result of an eligibility check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityOutcome {
    /// Mapped status
    pub status: EligibilityStatus,

    /// True only when the status is `verified`
    pub is_active: bool,

    /// Status string as reported by the payer
    pub payer_status: Option<String>,

    /// Copay amount
    pub copay: Option<f64>,

    /// Remaining deductible
    pub deductible: Option<f64>,

    /// Coinsurance as a fraction (0.2 = 20%)
    pub coinsurance: Option<f64>,

    /// Whether the visit needs prior authorization
    pub prior_authorization_required: Option<bool>,

    /// Why the outcome is `error`, when known
    pub reason: Option<String>,
}

impl EligibilityOutcome {
    /// Fail-safe outcome used whenever the payer answer cannot be trusted
    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            status: EligibilityStatus::Error,
            is_active: false,
            payer_status: None,
            copay: None,
            deductible: None,
            coinsurance: None,
            prior_authorization_required: None,
            reason: Some(reason.into()),
        }
    }
}

/// Slot reserved by the booking step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookedSlot {
    /// Booking store identifier
    pub booking_id: String,

    /// Provider booked
    pub provider_id: String,

    /// Calendar date
    pub date: NaiveDate,

    /// Start time
    pub time: NaiveTime,

    /// Length in minutes
    pub duration_minutes: u32,
}

/// One generated intake form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeForm {
    /// Form title
    pub title: String,

    /// Questions on the form
    pub questions: Vec<String>,
}

/// Forms generated for the subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeForms {
    /// Generated forms
    pub forms: Vec<IntakeForm>,
}

/// Triage urgency level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    /// Routine
    Low,
    /// Within days
    Medium,
    /// Same day
    High,
    /// Immediate care
    Emergency,
}

/// Triage result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageAssessment {
    /// Urgency level
    pub urgency: Urgency,

    /// Short clinical summary
    pub summary: String,

    /// Specialty the subject should see
    #[serde(default)]
    pub recommended_specialty: Option<String>,

    /// Findings that need attention
    #[serde(default)]
    pub red_flags: Vec<String>,

    /// Model confidence in 0..=1
    pub confidence: f64,
}

/// Instructions handed to the subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientInstructions {
    /// Ordered instructions
    pub instructions: Vec<String>,

    /// Follow-up guidance
    #[serde(default)]
    pub follow_up: Option<String>,
}

/// Output of a single step, tagged by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepOutput {
    /// `collect_subject_details`
    SubjectDetails(SubjectDetails),
    /// `find_candidate_slots`
    CandidateSlots(CandidateSlots),
    /// `verify_eligibility`
    Eligibility(EligibilityOutcome),
    /// `book`
    Booking(BookedSlot),
    /// `prepare_forms`
    IntakeForms(IntakeForms),
    /// `perform_triage`
    Triage(TriageAssessment),
    /// `generate_instructions`
    Instructions(PatientInstructions),
}

impl StepOutput {
    /// Confidence attached to the output, if the producer reports one
    pub fn confidence(&self) -> Option<f64> {
        match self {
            StepOutput::Triage(t) => Some(t.confidence),
            _ => None,
        }
    }

    /// Subject details, if this is that variant
    pub fn as_subject_details(&self) -> Option<&SubjectDetails> {
        match self {
            StepOutput::SubjectDetails(v) => Some(v),
            _ => None,
        }
    }

    /// Candidate slots, if this is that variant
    pub fn as_candidate_slots(&self) -> Option<&CandidateSlots> {
        match self {
            StepOutput::CandidateSlots(v) => Some(v),
            _ => None,
        }
    }

    /// Eligibility outcome, if this is that variant
    pub fn as_eligibility(&self) -> Option<&EligibilityOutcome> {
        match self {
            StepOutput::Eligibility(v) => Some(v),
            _ => None,
        }
    }

    /// Booked slot, if this is that variant
    pub fn as_booking(&self) -> Option<&BookedSlot> {
        match self {
            StepOutput::Booking(v) => Some(v),
            _ => None,
        }
    }

    /// Intake forms, if this is that variant
    pub fn as_intake_forms(&self) -> Option<&IntakeForms> {
        match self {
            StepOutput::IntakeForms(v) => Some(v),
            _ => None,
        }
    }

    /// Triage assessment, if this is that variant
    pub fn as_triage(&self) -> Option<&TriageAssessment> {
        match self {
            StepOutput::Triage(v) => Some(v),
            _ => None,
        }
    }

    /// Patient instructions, if this is that variant
    pub fn as_instructions(&self) -> Option<&PatientInstructions> {
        match self {
            StepOutput::Instructions(v) => Some(v),
            _ => None,
        }
    }
}
