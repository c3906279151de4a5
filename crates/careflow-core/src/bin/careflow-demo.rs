//! Runs a scheduling and an intake workflow against in-memory stores and
//! scripted collaborators, then prints the final snapshots as JSON.

use anyhow::{Context, Result};
use careflow_core::domain::collaborators::memory::InMemoryBookingStore;
use careflow_core::domain::repository::memory::{
    MemoryInteractionRepository, MemoryOrchestrationRepository,
};
use careflow_core::handlers::{EligibilityHandler, IntakeHandler, SchedulingHandler, TriageHandler};
use careflow_core::logging::init_logging;
use careflow_core::test_utils::fakes::{
    FakeEligibilityService, FakeSlotAvailability, FakeTextGeneration,
};
use careflow_core::{
    DefinitionRegistry, HandlerRegistry, OrchestratorConfig, TracingEventHandler,
    WorkflowOrchestrator, WorkflowRequest, WorkflowType,
};
use chrono::{Days, NaiveTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

fn text_generation() -> FakeTextGeneration {
    FakeTextGeneration::new()
        .with_response(
            "intake paperwork",
            r#"```json
{"forms": [{"title": "Medical history", "questions": ["Current medications?", "Known allergies?"]}]}
```"#,
        )
        .with_response(
            "You triage patients",
            r#"{"urgency": "medium", "summary": "Persistent cough for two weeks", "recommended_specialty": "pulmonology", "red_flags": [], "confidence": 0.82}"#,
        )
        .with_response(
            "pre-visit instructions",
            r#"{"instructions": ["Bring your inhaler", "Arrive 15 minutes early"], "follow_up": "Call if breathing worsens"}"#,
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = OrchestratorConfig::load();
    init_logging(&config).context("Failed to initialize logging")?;

    let tomorrow = Utc::now()
        .date_naive()
        .checked_add_days(Days::new(1))
        .context("Date out of range")?;
    let times = [
        NaiveTime::from_hms_opt(9, 0, 0).context("Invalid slot time")?,
        NaiveTime::from_hms_opt(14, 30, 0).context("Invalid slot time")?,
    ];

    let generator = Arc::new(text_generation());
    let handlers = HandlerRegistry::new()
        .register(Arc::new(SchedulingHandler::new(
            Arc::new(FakeSlotAvailability::daily("dr-lee", tomorrow, 5, &times)),
            Arc::new(InMemoryBookingStore::new()),
            &config,
        )))
        .register(Arc::new(EligibilityHandler::new(
            Arc::new(FakeEligibilityService::new()),
            &config,
        )))
        .register(Arc::new(IntakeHandler::new(generator.clone(), &config)))
        .register(Arc::new(TriageHandler::new(generator, &config)));

    let orchestrator = WorkflowOrchestrator::new(
        DefinitionRegistry::standard(),
        handlers,
        Arc::new(MemoryOrchestrationRepository::new()),
        Arc::new(MemoryInteractionRepository::new()),
        Arc::new(TracingEventHandler),
    )
    .context("Failed to build orchestrator")?;

    let scheduling = WorkflowRequest::new("patient-42")
        .with_related("appointment-7")
        .with_input("provider_id", json!("dr-lee"))
        .with_input("preferred_date", json!(tomorrow.to_string()))
        .with_input("preferred_time", json!("14:30"))
        .with_input("reason", json!("persistent cough"))
        .with_input(
            "policy",
            json!({"payer_id": "acme-health", "policy_number": "AH-1001"}),
        );

    let intake = WorkflowRequest::new("patient-42")
        .with_input("symptoms", json!("dry cough for two weeks"))
        .with_input("history", json!("mild asthma"))
        .with_input("reason", json!("persistent cough"));

    let (scheduled, intake) = futures::future::join(
        orchestrator.initiate(WorkflowType::Scheduling, scheduling),
        orchestrator.initiate(WorkflowType::Intake, intake),
    )
    .await;
    let scheduled = scheduled.context("Scheduling workflow aborted")?;
    let intake = intake.context("Intake workflow aborted")?;

    for orchestration in [&scheduled, &intake] {
        info!(
            orchestration_id = %orchestration.id,
            workflow_type = %orchestration.workflow_type,
            status = ?orchestration.status,
            "Workflow finished"
        );
        println!(
            "{}",
            serde_json::to_string_pretty(orchestration).context("Failed to render snapshot")?
        );
    }

    let audit = orchestrator
        .interactions(&scheduled.id)
        .await
        .context("Failed to load audit trail")?;
    info!(interactions = audit.len(), "Audit trail loaded");

    Ok(())
}
