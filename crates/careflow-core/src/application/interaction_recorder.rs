use crate::{
    domain::interaction::{AgentInteraction, InteractionId, NewInteraction},
    domain::orchestration::{OrchestrationId, SubjectId},
    domain::repository::InteractionRepository,
    CoreError,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};

/// Service persisting the audit trail of handler invocations.
///
/// Records are opened once, closed once, and never re-opened.
#[derive(Clone)]
pub struct InteractionRecorder {
    repository: Arc<dyn InteractionRepository>,
}

impl InteractionRecorder {
    /// Create a new interaction recorder
    pub fn new(repository: Arc<dyn InteractionRepository>) -> Self {
        Self { repository }
    }

    /// Open an in-progress record
    pub async fn record(&self, invocation: NewInteraction) -> Result<AgentInteraction, CoreError> {
        let interaction = AgentInteraction::start(invocation);
        self.repository
            .insert(&interaction)
            .await
            .map_err(|e| storage_failure(&interaction.id, e))?;

        debug!(
            interaction_id = %interaction.id,
            handler = %interaction.handler,
            "Interaction recorded"
        );
        Ok(interaction)
    }

    /// Close a record with the handler output
    pub async fn complete(
        &self,
        id: &InteractionId,
        output: Value,
        confidence: Option<f64>,
    ) -> Result<AgentInteraction, CoreError> {
        let mut interaction = self.load(id).await?;
        interaction.complete(output, confidence)?;
        self.store(interaction).await
    }

    /// Close a record with a failure message
    pub async fn fail(
        &self,
        id: &InteractionId,
        message: impl Into<String>,
    ) -> Result<AgentInteraction, CoreError> {
        let mut interaction = self.load(id).await?;
        interaction.fail(message)?;
        self.store(interaction).await
    }

    /// Find a record by ID
    pub async fn find(&self, id: &InteractionId) -> Result<AgentInteraction, CoreError> {
        self.load(id).await
    }

    /// Records created by one orchestration, oldest first
    pub async fn find_by_orchestration(
        &self,
        orchestration_id: &OrchestrationId,
    ) -> Result<Vec<AgentInteraction>, CoreError> {
        self.repository
            .find_by_orchestration(orchestration_id)
            .await
            .map_err(|e| CoreError::RecorderFailure(e.to_string()))
    }

    /// Records of one subject, oldest first
    pub async fn find_by_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Vec<AgentInteraction>, CoreError> {
        self.repository
            .find_by_subject(subject_id)
            .await
            .map_err(|e| CoreError::RecorderFailure(e.to_string()))
    }

    async fn load(&self, id: &InteractionId) -> Result<AgentInteraction, CoreError> {
        self.repository
            .find_by_id(id)
            .await
            .map_err(|e| storage_failure(id, e))?
            .ok_or_else(|| CoreError::InteractionNotFound(id.0.clone()))
    }

    async fn store(&self, interaction: AgentInteraction) -> Result<AgentInteraction, CoreError> {
        self.repository
            .update(&interaction)
            .await
            .map_err(|e| storage_failure(&interaction.id, e))?;

        debug!(
            interaction_id = %interaction.id,
            status = ?interaction.status,
            "Interaction finalized"
        );
        Ok(interaction)
    }
}

fn storage_failure(id: &InteractionId, err: CoreError) -> CoreError {
    match err {
        CoreError::InteractionNotFound(_) | CoreError::InteractionAlreadyFinalized(_) => err,
        other => {
            error!(interaction_id = %id, error = %other, "Interaction store failure");
            CoreError::RecorderFailure(other.to_string())
        }
    }
}
