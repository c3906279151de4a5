//! Scripted collaborator and storage fakes

use async_trait::async_trait;
use chrono::{Days, NaiveDate, NaiveTime};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::domain::collaborators::{
    CollaboratorError, DateRange, EligibilityCheckService, Slot, SlotAvailabilityService,
    SubjectPolicy, TextGenerationService,
};
use crate::domain::interaction::{AgentInteraction, InteractionId};
use crate::domain::orchestration::{
    OrchestrationId, OrchestrationStatus, SubjectId, WorkflowOrchestration,
};
use crate::domain::repository::memory::{MemoryInteractionRepository, MemoryOrchestrationRepository};
use crate::domain::repository::{InteractionRepository, OrchestrationRepository};
use crate::domain::workflow_definition::WorkflowType;
use crate::CoreError;

fn poisoned() -> CollaboratorError {
    CollaboratorError::Transport("fake state poisoned".to_string())
}

/// Text generation fake answering by prompt content.
///
/// The first scripted needle contained in the prompt selects the response.
#[derive(Default)]
pub struct FakeTextGeneration {
    responses: Vec<(String, Result<String, CollaboratorError>)>,
    delay: Option<Duration>,
    prompts: Mutex<Vec<String>>,
}

impl FakeTextGeneration {
    /// Creates a fake with no scripted responses
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer prompts containing `needle` with `response`
    pub fn with_response(mut self, needle: &str, response: impl Into<String>) -> Self {
        self.responses.push((needle.to_string(), Ok(response.into())));
        self
    }

    /// Fail prompts containing `needle`
    pub fn with_error(mut self, needle: &str, error: CollaboratorError) -> Self {
        self.responses.push((needle.to_string(), Err(error)));
        self
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Prompts received so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl fmt::Debug for FakeTextGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeTextGeneration")
            .field("responses", &self.responses.len())
            .finish()
    }
}

#[async_trait]
impl TextGenerationService for FakeTextGeneration {
    async fn complete(&self, prompt: &str) -> Result<String, CollaboratorError> {
        self.prompts.lock().map_err(|_| poisoned())?.push(prompt.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.responses
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| {
                Err(CollaboratorError::Transport(
                    "no scripted response for prompt".to_string(),
                ))
            })
    }
}

/// Eligibility fake keyed by policy number
#[derive(Debug)]
pub struct FakeEligibilityService {
    payloads: HashMap<String, Result<Value, CollaboratorError>>,
    default_payload: Value,
    calls: AtomicUsize,
}

impl FakeEligibilityService {
    /// Creates a fake answering every policy with an active status
    pub fn new() -> Self {
        Self {
            payloads: HashMap::new(),
            default_payload: json!({"status": "active", "copay": 25.0}),
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer a policy with a raw payload
    pub fn with_payload(mut self, policy_number: &str, payload: Value) -> Self {
        self.payloads.insert(policy_number.to_string(), Ok(payload));
        self
    }

    /// Fail a policy with a collaborator error
    pub fn with_error(mut self, policy_number: &str, error: CollaboratorError) -> Self {
        self.payloads.insert(policy_number.to_string(), Err(error));
        self
    }

    /// Number of `verify` calls received
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for FakeEligibilityService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EligibilityCheckService for FakeEligibilityService {
    async fn verify(&self, policy: &SubjectPolicy) -> Result<Value, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        debug!(payer_id = %policy.payer_id, "Fake eligibility check");
        self.payloads
            .get(&policy.policy_number)
            .cloned()
            .unwrap_or_else(|| Ok(self.default_payload.clone()))
    }
}

/// Slot availability fake serving a fixed calendar
#[derive(Debug, Default, Clone)]
pub struct FakeSlotAvailability {
    slots: Vec<Slot>,
}

impl FakeSlotAvailability {
    /// Calendar holding exactly these slots
    pub fn new(slots: Vec<Slot>) -> Self {
        Self { slots }
    }

    /// Calendar with the same start times on `days` consecutive days
    pub fn daily(provider_id: &str, start: NaiveDate, days: u64, times: &[NaiveTime]) -> Self {
        let slots = (0..days)
            .filter_map(|offset| start.checked_add_days(Days::new(offset)))
            .flat_map(|date| {
                times.iter().map(move |time| Slot {
                    provider_id: provider_id.to_string(),
                    date,
                    time: *time,
                    duration_minutes: 30,
                })
            })
            .collect();
        Self { slots }
    }
}

#[async_trait]
impl SlotAvailabilityService for FakeSlotAvailability {
    async fn list_slots(
        &self,
        provider_id: Option<&str>,
        range: DateRange,
    ) -> Result<Vec<Slot>, CollaboratorError> {
        Ok(self
            .slots
            .iter()
            .filter(|s| {
                provider_id.map_or(true, |p| s.provider_id == p)
                    && s.date >= range.start
                    && s.date <= range.end
            })
            .cloned()
            .collect())
    }
}

/// Audit store that stops accepting inserts after a number of successes
#[derive(Default)]
pub struct FailingInteractionRepository {
    inner: MemoryInteractionRepository,
    remaining: AtomicUsize,
}

impl FailingInteractionRepository {
    /// Rejects every insert
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts `n` inserts, then rejects the rest
    pub fn failing_after(n: usize) -> Self {
        Self {
            inner: MemoryInteractionRepository::new(),
            remaining: AtomicUsize::new(n),
        }
    }
}

#[async_trait]
impl InteractionRepository for FailingInteractionRepository {
    async fn insert(&self, interaction: &AgentInteraction) -> Result<(), CoreError> {
        let admitted = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !admitted {
            return Err(CoreError::StateStoreError("audit store unavailable".to_string()));
        }
        self.inner.insert(interaction).await
    }

    async fn update(&self, interaction: &AgentInteraction) -> Result<(), CoreError> {
        self.inner.update(interaction).await
    }

    async fn find_by_id(&self, id: &InteractionId) -> Result<Option<AgentInteraction>, CoreError> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_orchestration(
        &self,
        orchestration_id: &OrchestrationId,
    ) -> Result<Vec<AgentInteraction>, CoreError> {
        self.inner.find_by_orchestration(orchestration_id).await
    }

    async fn find_by_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Vec<AgentInteraction>, CoreError> {
        self.inner.find_by_subject(subject_id).await
    }
}

/// State store keeping a copy of every successful save
#[derive(Default)]
pub struct RecordingOrchestrationRepository {
    inner: MemoryOrchestrationRepository,
    snapshots: Mutex<Vec<WorkflowOrchestration>>,
}

impl RecordingOrchestrationRepository {
    /// Creates an empty recording store
    pub fn new() -> Self {
        Self::default()
    }

    /// Saved snapshots of one orchestration, in save order
    pub fn snapshots(&self, id: &OrchestrationId) -> Vec<WorkflowOrchestration> {
        self.snapshots
            .lock()
            .map(|s| s.iter().filter(|o| &o.id == id).cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl OrchestrationRepository for RecordingOrchestrationRepository {
    async fn find_by_id(
        &self,
        id: &OrchestrationId,
    ) -> Result<Option<WorkflowOrchestration>, CoreError> {
        self.inner.find_by_id(id).await
    }

    async fn save(&self, orchestration: &WorkflowOrchestration) -> Result<(), CoreError> {
        self.inner.save(orchestration).await?;
        self.snapshots
            .lock()
            .map_err(|e| CoreError::StateStoreError(e.to_string()))?
            .push(orchestration.clone());
        Ok(())
    }

    async fn find_by_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Vec<WorkflowOrchestration>, CoreError> {
        self.inner.find_by_subject(subject_id).await
    }

    async fn list(
        &self,
        workflow_type: Option<WorkflowType>,
        status: Option<OrchestrationStatus>,
    ) -> Result<Vec<WorkflowOrchestration>, CoreError> {
        self.inner.list(workflow_type, status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_text_generation_script() {
        let fake = FakeTextGeneration::new()
            .with_response("intake paperwork", "{\"forms\": []}")
            .with_error("triage", CollaboratorError::Transport("down".to_string()));

        assert_eq!(
            fake.complete("You prepare patient intake paperwork").await.unwrap(),
            "{\"forms\": []}"
        );
        assert!(fake.complete("You triage patients").await.is_err());
        assert!(fake.complete("unrelated").await.is_err());
        assert_eq!(fake.prompts().len(), 3);
    }

    #[tokio::test]
    async fn test_daily_calendar() {
        let start = NaiveDate::from_ymd_opt(2024, 3, 25).unwrap();
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let fake = FakeSlotAvailability::daily("dr-lee", start, 3, &[nine]);

        let range = DateRange {
            start,
            end: start.checked_add_days(Days::new(1)).unwrap(),
        };
        assert_eq!(fake.list_slots(Some("dr-lee"), range).await.unwrap().len(), 2);
        assert!(fake.list_slots(Some("dr-kim"), range).await.unwrap().is_empty());
        assert_eq!(fake.list_slots(None, range).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failing_after() {
        use crate::domain::interaction::{InteractionType, NewInteraction};
        use crate::domain::workflow_definition::HandlerKind;

        let repo = FailingInteractionRepository::failing_after(1);
        let record = || {
            AgentInteraction::start(NewInteraction {
                handler: HandlerKind::Intake,
                orchestration_id: None,
                subject_id: SubjectId::from("7"),
                related_id: None,
                interaction_type: InteractionType::IntakeFormGeneration,
                input: json!({}),
                metadata: json!({}),
            })
        };

        assert!(repo.insert(&record()).await.is_ok());
        assert!(matches!(
            repo.insert(&record()).await,
            Err(CoreError::StateStoreError(_))
        ));
    }
}
