use thiserror::Error;

/// Core error type for the Careflow orchestration engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// No workflow definition exists for the requested type
    #[error("Unknown workflow type: {0}")]
    UnknownWorkflowType(String),

    /// Orchestration record not found
    #[error("Workflow orchestration not found: {0}")]
    OrchestrationNotFound(String),

    /// Interaction record not found
    #[error("Agent interaction not found: {0}")]
    InteractionNotFound(String),

    /// Interaction already reached a terminal status
    #[error("Agent interaction already finalized: {0}")]
    InteractionAlreadyFinalized(String),

    /// The audit trail could not be written
    #[error("Interaction recorder failure: {0}")]
    RecorderFailure(String),

    /// State store error
    #[error("State store error: {0}")]
    StateStoreError(String),

    /// Illegal state transition on an aggregate
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl CoreError {
    /// Stable machine-readable code for this error
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::UnknownWorkflowType(_) => "unknown_workflow_type",
            CoreError::OrchestrationNotFound(_) => "orchestration_not_found",
            CoreError::InteractionNotFound(_) => "interaction_not_found",
            CoreError::InteractionAlreadyFinalized(_) => "interaction_already_finalized",
            CoreError::RecorderFailure(_) => "recorder_failure",
            CoreError::StateStoreError(_) => "state_store_error",
            CoreError::InvalidTransition(_) => "invalid_transition",
            CoreError::ValidationError(_) => "validation_error",
            CoreError::ConfigurationError(_) => "configuration_error",
            CoreError::SerializationError(_) => "serialization_error",
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

/// Error raised by a step handler.
///
/// These never escape the orchestrator: they are recorded on the interaction
/// and on the orchestration's `error_details`, and the workflow stops.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Caller input is missing or malformed
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A step ran without the output of a step it depends on
    #[error("Missing output of step {0}")]
    MissingStepOutput(String),

    /// Collaborator output could not be parsed into the expected structure
    #[error("Parse failure: {0}")]
    ParseFailure(String),

    /// No open slot matched the request
    #[error("No slot available: {0}")]
    NoSlotAvailable(String),

    /// The slot was taken by another writer
    #[error("Booking conflict: {0}")]
    BookingConflict(String),

    /// Network or protocol failure talking to a collaborator
    #[error("Transport error: {0}")]
    Transport(String),

    /// A collaborator call exceeded its time budget
    #[error("Collaborator call timed out after {0} ms")]
    Timeout(u64),
}

impl HandlerError {
    /// Stable machine-readable code for this error
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerError::InvalidInput(_) => "invalid_input",
            HandlerError::MissingStepOutput(_) => "missing_step_output",
            HandlerError::ParseFailure(_) => "parse_failure",
            HandlerError::NoSlotAvailable(_) => "no_slot_available",
            HandlerError::BookingConflict(_) => "booking_conflict",
            HandlerError::Transport(_) => "transport",
            HandlerError::Timeout(_) => "timeout",
        }
    }

    /// Whether a caller may sensibly retry the whole workflow later.
    /// The orchestrator itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HandlerError::BookingConflict(_) | HandlerError::Transport(_) | HandlerError::Timeout(_)
        )
    }
}
