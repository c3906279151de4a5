#![allow(dead_code)]

use careflow_core::domain::collaborators::memory::InMemoryBookingStore;
use careflow_core::domain::collaborators::{BookingStore, Slot};
use careflow_core::domain::repository::memory::MemoryInteractionRepository;
use careflow_core::handlers::{EligibilityHandler, IntakeHandler, SchedulingHandler, TriageHandler};
use careflow_core::test_utils::fakes::{
    FakeEligibilityService, FakeSlotAvailability, FakeTextGeneration,
    RecordingOrchestrationRepository,
};
use careflow_core::{
    DefinitionRegistry, HandlerRegistry, InteractionRepository, OrchestratorConfig,
    TracingEventHandler, WorkflowOrchestrator, WorkflowRequest,
};
use chrono::{NaiveDate, NaiveTime};
use serde_json::json;
use std::sync::Arc;

pub const FORMS: &str = r#"```json
{"forms": [{"title": "Medical history", "questions": ["Known allergies?"]}]}
```"#;

pub const TRIAGE: &str = r#"{"urgency": "medium", "summary": "Persistent cough", "recommended_specialty": "pulmonology", "red_flags": [], "confidence": 0.82}"#;

pub const INSTRUCTIONS: &str =
    r#"{"instructions": ["Bring your inhaler"], "follow_up": "Call if breathing worsens"}"#;

pub fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
}

pub fn time(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

pub fn slot(day: u32, hour: u32, minute: u32) -> Slot {
    Slot {
        provider_id: "dr-lee".to_string(),
        date: date(day),
        time: time(hour, minute),
        duration_minutes: 30,
    }
}

/// Text generation answering every intake and triage prompt with valid JSON
pub fn standard_text() -> FakeTextGeneration {
    FakeTextGeneration::new()
        .with_response("intake paperwork", FORMS)
        .with_response("You triage patients", TRIAGE)
        .with_response("pre-visit instructions", INSTRUCTIONS)
}

pub fn scheduling_request() -> WorkflowRequest {
    WorkflowRequest::new("42")
        .with_related("appointment-1")
        .with_input("provider_id", json!("dr-lee"))
        .with_input("preferred_date", json!("2024-03-25"))
        .with_input("reason", json!("annual physical"))
        .with_input(
            "policy",
            json!({"payer_id": "acme", "policy_number": "P-1"}),
        )
}

pub fn intake_request() -> WorkflowRequest {
    WorkflowRequest::new("7")
        .with_input("symptoms", json!("dry cough for two weeks"))
        .with_input("history", json!("mild asthma"))
}

pub struct Parts {
    pub slots: FakeSlotAvailability,
    pub bookings: Arc<dyn BookingStore>,
    pub eligibility: Arc<FakeEligibilityService>,
    pub text: Arc<FakeTextGeneration>,
    pub interactions: Arc<dyn InteractionRepository>,
    pub config: OrchestratorConfig,
}

impl Default for Parts {
    fn default() -> Self {
        Self {
            slots: FakeSlotAvailability::new(vec![slot(25, 9, 0)]),
            bookings: Arc::new(InMemoryBookingStore::new()),
            eligibility: Arc::new(FakeEligibilityService::new()),
            text: Arc::new(standard_text()),
            interactions: Arc::new(MemoryInteractionRepository::new()),
            config: OrchestratorConfig::default(),
        }
    }
}

pub struct Harness {
    pub orchestrator: WorkflowOrchestrator,
    pub store: Arc<RecordingOrchestrationRepository>,
    pub interactions: Arc<dyn InteractionRepository>,
}

pub fn build(parts: Parts) -> Harness {
    let config = parts.config;
    let handlers = HandlerRegistry::new()
        .register(Arc::new(SchedulingHandler::new(
            Arc::new(parts.slots),
            parts.bookings,
            &config,
        )))
        .register(Arc::new(EligibilityHandler::new(parts.eligibility, &config)))
        .register(Arc::new(IntakeHandler::new(parts.text.clone(), &config)))
        .register(Arc::new(TriageHandler::new(parts.text, &config)));

    let store = Arc::new(RecordingOrchestrationRepository::new());
    let orchestrator = WorkflowOrchestrator::new(
        DefinitionRegistry::standard(),
        handlers,
        store.clone(),
        parts.interactions.clone(),
        Arc::new(TracingEventHandler),
    )
    .unwrap();

    Harness {
        orchestrator,
        store,
        interactions: parts.interactions,
    }
}

pub fn harness() -> Harness {
    build(Parts::default())
}
