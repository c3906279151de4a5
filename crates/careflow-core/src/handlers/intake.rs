use super::{bounded, parse_model_json, StepContext, StepHandler, StepHandlerBase};
use crate::config::OrchestratorConfig;
use crate::domain::collaborators::TextGenerationService;
use crate::domain::step_output::{IntakeForms, PatientInstructions, StepOutput};
use crate::domain::workflow_definition::{HandlerKind, StepName};
use crate::HandlerError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Generates intake forms and patient instructions with a text-completion service
pub struct IntakeHandler {
    generator: Arc<dyn TextGenerationService>,
    timeout: Duration,
}

impl IntakeHandler {
    /// Create a new intake handler
    pub fn new(generator: Arc<dyn TextGenerationService>, config: &OrchestratorConfig) -> Self {
        Self {
            generator,
            timeout: config.collaborator_timeout(),
        }
    }

    fn forms_prompt(ctx: &StepContext) -> String {
        format!(
            "You prepare patient intake paperwork for a medical practice.\n\
             Subject: {subject}\n\
             Reason for visit: {reason}\n\
             Medical history: {history}\n\
             Current medications: {medications}\n\n\
             Respond with JSON only, in the form \
             {{\"forms\": [{{\"title\": string, \"questions\": [string]}}]}}.",
            subject = ctx.subject_id,
            reason = ctx.input_text("reason"),
            history = ctx.input_text("history"),
            medications = ctx.input_text("medications"),
        )
    }

    fn instructions_prompt(ctx: &StepContext) -> Result<String, HandlerError> {
        let triage = ctx.triage()?;
        let red_flags = if triage.red_flags.is_empty() {
            "none".to_string()
        } else {
            triage.red_flags.join("; ")
        };

        Ok(format!(
            "You write pre-visit instructions for a patient.\n\
             Subject: {subject}\n\
             Reason for visit: {reason}\n\
             Triage urgency: {urgency:?}\n\
             Triage summary: {summary}\n\
             Red flags: {red_flags}\n\n\
             Respond with JSON only, in the form \
             {{\"instructions\": [string], \"follow_up\": string or null}}.",
            subject = ctx.subject_id,
            reason = ctx.input_text("reason"),
            urgency = triage.urgency,
            summary = triage.summary,
            red_flags = red_flags,
        ))
    }

    async fn prepare_forms(&self, ctx: &StepContext) -> Result<IntakeForms, HandlerError> {
        let prompt = Self::forms_prompt(ctx);
        let raw = bounded(self.timeout, self.generator.complete(&prompt)).await?;
        let forms: IntakeForms = parse_model_json(&raw)?;

        if forms.forms.is_empty() {
            return Err(HandlerError::ParseFailure("model returned no forms".to_string()));
        }

        debug!(
            orchestration_id = %ctx.orchestration_id,
            forms = forms.forms.len(),
            "Generated intake forms"
        );
        Ok(forms)
    }

    async fn generate_instructions(
        &self,
        ctx: &StepContext,
    ) -> Result<PatientInstructions, HandlerError> {
        let prompt = Self::instructions_prompt(ctx)?;
        let raw = bounded(self.timeout, self.generator.complete(&prompt)).await?;
        let instructions: PatientInstructions = parse_model_json(&raw)?;

        if instructions.instructions.is_empty() {
            return Err(HandlerError::ParseFailure(
                "model returned no instructions".to_string(),
            ));
        }
        Ok(instructions)
    }
}

impl StepHandlerBase for IntakeHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Intake
    }

    fn supports(&self, step: StepName) -> bool {
        matches!(step, StepName::PrepareForms | StepName::GenerateInstructions)
    }
}

#[async_trait]
impl StepHandler for IntakeHandler {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutput, HandlerError> {
        match ctx.step {
            StepName::PrepareForms => self.prepare_forms(ctx).await.map(StepOutput::IntakeForms),
            StepName::GenerateInstructions => self
                .generate_instructions(ctx)
                .await
                .map(StepOutput::Instructions),
            other => Err(HandlerError::InvalidInput(format!(
                "intake handler cannot execute step {}",
                other
            ))),
        }
    }
}
