use super::{bounded, parse_model_json, StepContext, StepHandler, StepHandlerBase};
use crate::config::OrchestratorConfig;
use crate::domain::collaborators::TextGenerationService;
use crate::domain::step_output::{StepOutput, TriageAssessment, Urgency};
use crate::domain::workflow_definition::{HandlerKind, StepName};
use crate::HandlerError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Assesses urgency with a text-completion service
pub struct TriageHandler {
    generator: Arc<dyn TextGenerationService>,
    timeout: Duration,
}

impl TriageHandler {
    /// Create a new triage handler
    pub fn new(generator: Arc<dyn TextGenerationService>, config: &OrchestratorConfig) -> Self {
        Self {
            generator,
            timeout: config.collaborator_timeout(),
        }
    }

    fn prompt(ctx: &StepContext) -> String {
        let answered_forms = ctx
            .results
            .get(&StepName::PrepareForms)
            .and_then(StepOutput::as_intake_forms)
            .map(|f| {
                f.forms
                    .iter()
                    .map(|form| form.title.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .filter(|titles| !titles.is_empty())
            .unwrap_or_else(|| "none".to_string());

        format!(
            "You triage patients for a medical practice.\n\
             Subject: {subject}\n\
             Symptoms: {symptoms}\n\
             Medical history: {history}\n\
             Intake forms on file: {forms}\n\n\
             Respond with JSON only, in the form \
             {{\"urgency\": \"low\"|\"medium\"|\"high\"|\"emergency\", \"summary\": string, \
             \"recommended_specialty\": string or null, \"red_flags\": [string], \
             \"confidence\": number between 0 and 1}}.",
            subject = ctx.subject_id,
            symptoms = ctx.input_text("symptoms"),
            history = ctx.input_text("history"),
            forms = answered_forms,
        )
    }
}

impl StepHandlerBase for TriageHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Triage
    }

    fn supports(&self, step: StepName) -> bool {
        step == StepName::PerformTriage
    }
}

#[async_trait]
impl StepHandler for TriageHandler {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutput, HandlerError> {
        if ctx.step != StepName::PerformTriage {
            return Err(HandlerError::InvalidInput(format!(
                "triage handler cannot execute step {}",
                ctx.step
            )));
        }

        let prompt = Self::prompt(ctx);
        let raw = bounded(self.timeout, self.generator.complete(&prompt)).await?;
        let assessment: TriageAssessment = parse_model_json(&raw)?;

        if !(0.0..=1.0).contains(&assessment.confidence) {
            return Err(HandlerError::ParseFailure(format!(
                "confidence {} is outside 0..1",
                assessment.confidence
            )));
        }

        if assessment.urgency >= Urgency::High {
            warn!(
                orchestration_id = %ctx.orchestration_id,
                subject_id = %ctx.subject_id,
                urgency = ?assessment.urgency,
                red_flags = ?assessment.red_flags,
                "High urgency triage result"
            );
        } else {
            info!(
                orchestration_id = %ctx.orchestration_id,
                urgency = ?assessment.urgency,
                confidence = assessment.confidence,
                "Triage completed"
            );
        }

        Ok(StepOutput::Triage(assessment))
    }
}
