//! Repository traits for Careflow
//!
//! The orchestrator and the interaction recorder only talk to storage through
//! these traits. External crates can implement them to provide different
//! persistence mechanisms.

use async_trait::async_trait;

use super::interaction::{AgentInteraction, InteractionId};
use super::orchestration::{OrchestrationId, OrchestrationStatus, SubjectId, WorkflowOrchestration};
use super::workflow_definition::WorkflowType;
use crate::CoreError;

/// Workflow state store
///
/// `save` must be atomic per record and must reject writes over a record
/// whose stored status is terminal.
#[async_trait]
pub trait OrchestrationRepository: Send + Sync {
    /// Find an orchestration by ID
    async fn find_by_id(
        &self,
        id: &OrchestrationId,
    ) -> Result<Option<WorkflowOrchestration>, CoreError>;

    /// Insert or replace an orchestration
    async fn save(&self, orchestration: &WorkflowOrchestration) -> Result<(), CoreError>;

    /// Every orchestration of a subject
    async fn find_by_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Vec<WorkflowOrchestration>, CoreError>;

    /// List orchestrations with optional filters
    async fn list(
        &self,
        workflow_type: Option<WorkflowType>,
        status: Option<OrchestrationStatus>,
    ) -> Result<Vec<WorkflowOrchestration>, CoreError>;
}

/// Audit trail store
#[async_trait]
pub trait InteractionRepository: Send + Sync {
    /// Insert a new record; an existing id is rejected
    async fn insert(&self, interaction: &AgentInteraction) -> Result<(), CoreError>;

    /// Replace a stored record that is still in progress.
    /// `InteractionAlreadyFinalized` if the stored record is terminal.
    async fn update(&self, interaction: &AgentInteraction) -> Result<(), CoreError>;

    /// Find a record by ID
    async fn find_by_id(&self, id: &InteractionId) -> Result<Option<AgentInteraction>, CoreError>;

    /// Records of one orchestration, oldest first
    async fn find_by_orchestration(
        &self,
        orchestration_id: &OrchestrationId,
    ) -> Result<Vec<AgentInteraction>, CoreError>;

    /// Records of one subject, oldest first
    async fn find_by_subject(&self, subject_id: &SubjectId)
        -> Result<Vec<AgentInteraction>, CoreError>;
}

/// Memory implementations for testing
#[cfg(feature = "testing")]
pub mod memory {
    use super::*;
    use dashmap::mapref::entry::Entry;
    use dashmap::DashMap;
    use std::sync::Arc;

    fn push_unique(index: &DashMap<String, Vec<String>>, key: &str, id: &str) {
        let mut ids = index.entry(key.to_string()).or_default();
        if !ids.iter().any(|i| i == id) {
            ids.push(id.to_string());
        }
    }

    /// In-memory workflow state store using concurrent maps
    #[derive(Clone)]
    pub struct MemoryOrchestrationRepository {
        orchestrations: Arc<DashMap<String, WorkflowOrchestration>>,
        subjects: Arc<DashMap<String, Vec<String>>>,
    }

    impl MemoryOrchestrationRepository {
        /// Create a new memory orchestration repository
        pub fn new() -> Self {
            Self {
                orchestrations: Arc::new(DashMap::with_capacity(64)),
                subjects: Arc::new(DashMap::with_capacity(32)),
            }
        }
    }

    impl Default for MemoryOrchestrationRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl OrchestrationRepository for MemoryOrchestrationRepository {
        async fn find_by_id(
            &self,
            id: &OrchestrationId,
        ) -> Result<Option<WorkflowOrchestration>, CoreError> {
            Ok(self.orchestrations.get(&id.0).map(|o| o.clone()))
        }

        async fn save(&self, orchestration: &WorkflowOrchestration) -> Result<(), CoreError> {
            match self.orchestrations.entry(orchestration.id.0.clone()) {
                Entry::Occupied(mut stored) => {
                    if stored.get().is_terminal() {
                        return Err(CoreError::StateStoreError(format!(
                            "Orchestration {} is {:?} and can no longer be written",
                            orchestration.id,
                            stored.get().status
                        )));
                    }
                    stored.insert(orchestration.clone());
                }
                Entry::Vacant(slot) => {
                    slot.insert(orchestration.clone());
                }
            }

            push_unique(&self.subjects, &orchestration.subject_id.0, &orchestration.id.0);
            Ok(())
        }

        async fn find_by_subject(
            &self,
            subject_id: &SubjectId,
        ) -> Result<Vec<WorkflowOrchestration>, CoreError> {
            let ids = match self.subjects.get(&subject_id.0) {
                Some(ids) => ids.clone(),
                None => return Ok(Vec::new()),
            };

            Ok(ids
                .iter()
                .filter_map(|id| self.orchestrations.get(id).map(|o| o.clone()))
                .collect())
        }

        async fn list(
            &self,
            workflow_type: Option<WorkflowType>,
            status: Option<OrchestrationStatus>,
        ) -> Result<Vec<WorkflowOrchestration>, CoreError> {
            let mut result: Vec<WorkflowOrchestration> = self
                .orchestrations
                .iter()
                .filter(|o| workflow_type.map_or(true, |t| o.workflow_type == t))
                .filter(|o| status.map_or(true, |s| o.status == s))
                .map(|o| o.clone())
                .collect();

            result.sort_by(|a, b| a.started_at.cmp(&b.started_at));
            Ok(result)
        }
    }

    /// In-memory audit trail using concurrent maps
    #[derive(Clone)]
    pub struct MemoryInteractionRepository {
        interactions: Arc<DashMap<String, AgentInteraction>>,
        orchestrations: Arc<DashMap<String, Vec<String>>>,
        subjects: Arc<DashMap<String, Vec<String>>>,
    }

    impl MemoryInteractionRepository {
        /// Create a new memory interaction repository
        pub fn new() -> Self {
            Self {
                interactions: Arc::new(DashMap::with_capacity(128)),
                orchestrations: Arc::new(DashMap::with_capacity(64)),
                subjects: Arc::new(DashMap::with_capacity(32)),
            }
        }

        fn collect(&self, ids: Option<Vec<String>>) -> Vec<AgentInteraction> {
            ids.unwrap_or_default()
                .iter()
                .filter_map(|id| self.interactions.get(id).map(|i| i.clone()))
                .collect()
        }
    }

    impl Default for MemoryInteractionRepository {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl InteractionRepository for MemoryInteractionRepository {
        async fn insert(&self, interaction: &AgentInteraction) -> Result<(), CoreError> {
            match self.interactions.entry(interaction.id.0.clone()) {
                Entry::Occupied(_) => {
                    return Err(CoreError::StateStoreError(format!(
                        "Interaction id {} already exists",
                        interaction.id
                    )));
                }
                Entry::Vacant(slot) => {
                    slot.insert(interaction.clone());
                }
            }

            if let Some(orchestration_id) = &interaction.orchestration_id {
                push_unique(&self.orchestrations, &orchestration_id.0, &interaction.id.0);
            }
            push_unique(&self.subjects, &interaction.subject_id.0, &interaction.id.0);
            Ok(())
        }

        async fn update(&self, interaction: &AgentInteraction) -> Result<(), CoreError> {
            match self.interactions.get_mut(&interaction.id.0) {
                None => Err(CoreError::InteractionNotFound(interaction.id.0.clone())),
                Some(stored) if stored.status.is_terminal() => {
                    Err(CoreError::InteractionAlreadyFinalized(interaction.id.0.clone()))
                }
                Some(mut stored) => {
                    *stored = interaction.clone();
                    Ok(())
                }
            }
        }

        async fn find_by_id(
            &self,
            id: &InteractionId,
        ) -> Result<Option<AgentInteraction>, CoreError> {
            Ok(self.interactions.get(&id.0).map(|i| i.clone()))
        }

        async fn find_by_orchestration(
            &self,
            orchestration_id: &OrchestrationId,
        ) -> Result<Vec<AgentInteraction>, CoreError> {
            let ids = self.orchestrations.get(&orchestration_id.0).map(|ids| ids.clone());
            Ok(self.collect(ids))
        }

        async fn find_by_subject(
            &self,
            subject_id: &SubjectId,
        ) -> Result<Vec<AgentInteraction>, CoreError> {
            let ids = self.subjects.get(&subject_id.0).map(|ids| ids.clone());
            Ok(self.collect(ids))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::domain::interaction::{InteractionType, NewInteraction};
        use crate::domain::workflow_definition::{HandlerKind, StepName, WorkflowDefinition};
        use serde_json::json;

        fn orchestration(subject: &str, workflow_type: WorkflowType) -> WorkflowOrchestration {
            WorkflowOrchestration::new(
                &WorkflowDefinition::for_type(workflow_type),
                SubjectId::from(subject),
                None,
            )
        }

        fn interaction(orchestration_id: &OrchestrationId) -> AgentInteraction {
            AgentInteraction::start(NewInteraction {
                handler: HandlerKind::Intake,
                orchestration_id: Some(orchestration_id.clone()),
                subject_id: SubjectId::from("7"),
                related_id: None,
                interaction_type: InteractionType::IntakeFormGeneration,
                input: json!({}),
                metadata: json!({"step": StepName::PrepareForms}),
            })
        }

        #[tokio::test]
        async fn test_save_and_find() {
            let repo = MemoryOrchestrationRepository::new();
            let o = orchestration("42", WorkflowType::Scheduling);

            repo.save(&o).await.unwrap();
            repo.save(&o).await.unwrap();

            let found = repo.find_by_id(&o.id).await.unwrap().unwrap();
            assert_eq!(found.id, o.id);
            assert_eq!(repo.find_by_subject(&SubjectId::from("42")).await.unwrap().len(), 1);
            assert!(repo.find_by_subject(&SubjectId::from("43")).await.unwrap().is_empty());
            assert!(repo
                .find_by_id(&OrchestrationId("missing".to_string()))
                .await
                .unwrap()
                .is_none());
        }

        #[tokio::test]
        async fn test_terminal_record_is_immutable() {
            let repo = MemoryOrchestrationRepository::new();
            let mut o = orchestration("42", WorkflowType::Intake);
            o.start().unwrap();
            o.begin_step(StepName::PrepareForms).unwrap();
            o.fail_step(
                StepName::PrepareForms,
                &crate::HandlerError::ParseFailure("bad".to_string()),
            )
            .unwrap();
            repo.save(&o).await.unwrap();

            let mut tampered = o.clone();
            tampered.agents_involved.push("triage".to_string());
            match repo.save(&tampered).await {
                Err(CoreError::StateStoreError(msg)) => assert!(msg.contains("can no longer be written")),
                other => panic!("Expected StateStoreError, got {:?}", other),
            }

            let stored = repo.find_by_id(&o.id).await.unwrap().unwrap();
            assert_eq!(stored.agents_involved, vec!["intake".to_string()]);
        }

        #[tokio::test]
        async fn test_list_filters() {
            let repo = MemoryOrchestrationRepository::new();
            let mut running = orchestration("1", WorkflowType::Scheduling);
            running.start().unwrap();
            repo.save(&running).await.unwrap();
            repo.save(&orchestration("2", WorkflowType::Intake)).await.unwrap();

            assert_eq!(repo.list(None, None).await.unwrap().len(), 2);
            assert_eq!(
                repo.list(Some(WorkflowType::Intake), None).await.unwrap().len(),
                1
            );
            let stranded = repo
                .list(None, Some(OrchestrationStatus::InProgress))
                .await
                .unwrap();
            assert_eq!(stranded.len(), 1);
            assert_eq!(stranded[0].id, running.id);
        }

        #[tokio::test]
        async fn test_interaction_ids_are_never_reused() {
            let repo = MemoryInteractionRepository::new();
            let owner = OrchestrationId("o-1".to_string());
            let record = interaction(&owner);

            repo.insert(&record).await.unwrap();
            assert!(matches!(
                repo.insert(&record).await,
                Err(CoreError::StateStoreError(_))
            ));
            assert_eq!(repo.find_by_orchestration(&owner).await.unwrap().len(), 1);
            assert_eq!(repo.find_by_subject(&SubjectId::from("7")).await.unwrap().len(), 1);
        }

        #[tokio::test]
        async fn test_update_rejects_finalized() {
            let repo = MemoryInteractionRepository::new();
            let mut record = interaction(&OrchestrationId("o-1".to_string()));
            repo.insert(&record).await.unwrap();

            record.complete(json!({"forms": []}), None).unwrap();
            repo.update(&record).await.unwrap();

            let mut rewritten = record.clone();
            rewritten.output = Some(json!({"forms": ["other"]}));
            assert!(matches!(
                repo.update(&rewritten).await,
                Err(CoreError::InteractionAlreadyFinalized(_))
            ));

            let stored = repo.find_by_id(&record.id).await.unwrap().unwrap();
            assert_eq!(stored.output, Some(json!({"forms": []})));
        }

        #[tokio::test]
        async fn test_update_unknown_interaction() {
            let repo = MemoryInteractionRepository::new();
            let record = interaction(&OrchestrationId("o-1".to_string()));
            assert!(matches!(
                repo.update(&record).await,
                Err(CoreError::InteractionNotFound(_))
            ));
        }
    }
}
