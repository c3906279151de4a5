/// Audit trail recording service
pub mod interaction_recorder;

/// Workflow execution service
pub mod workflow_orchestrator;
