use crate::{
    application::interaction_recorder::InteractionRecorder,
    domain::events::DomainEvent,
    domain::interaction::{AgentInteraction, NewInteraction},
    domain::orchestration::{
        ErrorDetails, OrchestrationId, OrchestrationStatus, RelatedId, SubjectId,
        WorkflowOrchestration,
    },
    domain::repository::{InteractionRepository, OrchestrationRepository},
    domain::workflow_definition::{DefinitionRegistry, StepDefinition, StepName, WorkflowType},
    handlers::{HandlerRegistry, StepContext},
    CoreError,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Request to start a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRequest {
    /// Entity the workflow acts on
    pub subject_id: SubjectId,

    /// Secondary entity
    #[serde(default)]
    pub related_id: Option<RelatedId>,

    /// Caller input handed to every step
    #[serde(default)]
    pub input: Map<String, Value>,
}

impl WorkflowRequest {
    /// Request for a subject with no input
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: SubjectId(subject_id.into()),
            related_id: None,
            input: Map::new(),
        }
    }

    /// Set the related entity
    pub fn with_related(mut self, related_id: impl Into<String>) -> Self {
        self.related_id = Some(RelatedId(related_id.into()));
        self
    }

    /// Add an input value
    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.input.insert(key.into(), value);
        self
    }
}

/// Outcome of a single step
enum StepFlow {
    Continue,
    Stop,
}

/// Service that drives workflows step by step
pub struct WorkflowOrchestrator {
    /// Workflow definitions
    definitions: DefinitionRegistry,

    /// Step handlers
    handlers: HandlerRegistry,

    /// Workflow state store
    orchestration_repo: Arc<dyn OrchestrationRepository>,

    /// Audit trail
    recorder: InteractionRecorder,

    /// Event handler
    event_handler: Arc<dyn DomainEventHandler>,
}

impl WorkflowOrchestrator {
    /// Create a new orchestrator.
    ///
    /// Fails with `ConfigurationError` if a step of any definition has no
    /// handler able to execute it.
    pub fn new(
        definitions: DefinitionRegistry,
        handlers: HandlerRegistry,
        orchestration_repo: Arc<dyn OrchestrationRepository>,
        interaction_repo: Arc<dyn InteractionRepository>,
        event_handler: Arc<dyn DomainEventHandler>,
    ) -> Result<Self, CoreError> {
        handlers.verify(&definitions)?;

        Ok(Self {
            definitions,
            handlers,
            orchestration_repo,
            recorder: InteractionRecorder::new(interaction_repo),
            event_handler,
        })
    }

    /// Start a workflow by type name
    pub async fn initiate_named(
        &self,
        workflow_type: &str,
        request: WorkflowRequest,
    ) -> Result<WorkflowOrchestration, CoreError> {
        let workflow_type: WorkflowType = workflow_type.parse()?;
        self.initiate(workflow_type, request).await
    }

    /// Run a workflow to completion or failure and return the final snapshot.
    ///
    /// A step failure is reported through the snapshot's status and
    /// `error_details`. `Err` means the state store or the audit trail could
    /// not be written.
    pub async fn initiate(
        &self,
        workflow_type: WorkflowType,
        request: WorkflowRequest,
    ) -> Result<WorkflowOrchestration, CoreError> {
        let definition = self.definitions.resolve(workflow_type)?.clone();

        if request.subject_id.0.trim().is_empty() {
            return Err(CoreError::ValidationError("subject_id is required".to_string()));
        }

        let mut orchestration = WorkflowOrchestration::new(
            &definition,
            request.subject_id.clone(),
            request.related_id.clone(),
        );

        info!(
            orchestration_id = %orchestration.id,
            workflow_type = %workflow_type,
            subject_id = %orchestration.subject_id,
            "Initiating workflow"
        );

        self.persist(&mut orchestration).await?;

        if let Err(e) = self.run(&definition.steps, &mut orchestration, &request).await {
            self.abandon(&mut orchestration, &e).await;
            return Err(e);
        }

        Ok(orchestration)
    }

    async fn run(
        &self,
        steps: &[StepDefinition],
        orchestration: &mut WorkflowOrchestration,
        request: &WorkflowRequest,
    ) -> Result<(), CoreError> {
        orchestration.start()?;
        self.persist(orchestration).await?;

        for step in steps {
            if let StepFlow::Stop = self.run_step(step, orchestration, request).await? {
                return Ok(());
            }
        }

        orchestration.complete()?;
        self.persist(orchestration).await?;

        info!(
            orchestration_id = %orchestration.id,
            steps = orchestration.steps.len(),
            "Workflow completed"
        );
        Ok(())
    }

    async fn run_step(
        &self,
        step: &StepDefinition,
        orchestration: &mut WorkflowOrchestration,
        request: &WorkflowRequest,
    ) -> Result<StepFlow, CoreError> {
        let handler = self.handlers.get(step.handler).ok_or_else(|| {
            CoreError::ConfigurationError(format!("No {} handler registered", step.handler))
        })?;

        orchestration.begin_step(step.name)?;
        self.persist(orchestration).await?;

        let ctx = StepContext {
            orchestration_id: orchestration.id.clone(),
            workflow_type: orchestration.workflow_type,
            step: step.name,
            subject_id: orchestration.subject_id.clone(),
            related_id: orchestration.related_id.clone(),
            input: request.input.clone(),
            results: orchestration.results.clone(),
        };

        let interaction = self
            .recorder
            .record(NewInteraction {
                handler: step.handler,
                orchestration_id: Some(orchestration.id.clone()),
                subject_id: orchestration.subject_id.clone(),
                related_id: orchestration.related_id.clone(),
                interaction_type: step.name.into(),
                input: json!({
                    "input": ctx.input,
                    "prior_results": ctx.results,
                }),
                metadata: json!({
                    "workflow_type": orchestration.workflow_type,
                    "workflow_id": orchestration.id,
                    "step": step.name,
                }),
            })
            .await?;
        orchestration.attach_interaction(interaction.id.clone());

        debug!(
            orchestration_id = %orchestration.id,
            step = %step.name,
            handler = %step.handler,
            interaction_id = %interaction.id,
            "Executing step"
        );

        match handler.execute(&ctx).await {
            Ok(output) => {
                let recorded = serde_json::to_value(&output)?;
                self.recorder
                    .complete(&interaction.id, recorded, output.confidence())
                    .await?;

                orchestration.complete_step(step.name, output)?;
                self.persist(orchestration).await?;

                debug!(
                    orchestration_id = %orchestration.id,
                    step = %step.name,
                    "Step completed"
                );
                Ok(StepFlow::Continue)
            }
            Err(handler_error) => {
                warn!(
                    orchestration_id = %orchestration.id,
                    step = %step.name,
                    handler = %step.handler,
                    kind = handler_error.kind(),
                    error = %handler_error,
                    "Step failed, stopping workflow"
                );

                self.recorder
                    .fail(&interaction.id, handler_error.to_string())
                    .await?;

                orchestration.fail_step(step.name, &handler_error)?;
                self.persist(orchestration).await?;
                Ok(StepFlow::Stop)
            }
        }
    }

    /// Best-effort: mark the orchestration failed after a fatal error
    async fn abandon(&self, orchestration: &mut WorkflowOrchestration, cause: &CoreError) {
        error!(
            orchestration_id = %orchestration.id,
            step = ?orchestration.current_step,
            kind = cause.kind(),
            error = %cause,
            "Workflow aborted"
        );

        if orchestration.is_terminal() {
            return;
        }

        let step = orchestration
            .current_step
            .or_else(|| orchestration.steps.first().map(|s| s.name))
            .unwrap_or(StepName::CollectSubjectDetails);
        let details = ErrorDetails {
            step,
            message: cause.to_string(),
            kind: cause.kind().to_string(),
            retryable: false,
        };

        if orchestration.status == OrchestrationStatus::Initiated {
            if let Err(e) = orchestration.start() {
                warn!(orchestration_id = %orchestration.id, error = %e, "Could not start aborted workflow");
                return;
            }
        }
        if let Err(e) = orchestration.fail(details) {
            warn!(orchestration_id = %orchestration.id, error = %e, "Could not mark workflow failed");
            return;
        }
        if let Err(e) = self.persist(orchestration).await {
            warn!(orchestration_id = %orchestration.id, error = %e, "Could not persist aborted workflow");
        }
    }

    /// Save and publish pending events
    async fn persist(&self, orchestration: &mut WorkflowOrchestration) -> Result<(), CoreError> {
        self.orchestration_repo.save(orchestration).await?;
        self.handle_events(orchestration).await;
        Ok(())
    }

    async fn handle_events(&self, orchestration: &mut WorkflowOrchestration) {
        for event in orchestration.take_events() {
            let event_type = event.event_type();
            if let Err(e) = self.event_handler.handle_event(event).await {
                warn!(
                    orchestration_id = %orchestration.id,
                    event_type,
                    error = %e,
                    "Event handler failed"
                );
            }
        }
    }

    /// Find an orchestration by ID
    pub async fn find(&self, id: &OrchestrationId) -> Result<WorkflowOrchestration, CoreError> {
        self.orchestration_repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::OrchestrationNotFound(id.0.clone()))
    }

    /// Every orchestration of a subject
    pub async fn find_by_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Vec<WorkflowOrchestration>, CoreError> {
        self.orchestration_repo.find_by_subject(subject_id).await
    }

    /// List orchestrations with optional filters.
    ///
    /// `status = InProgress` finds runs stranded by a crash.
    pub async fn list(
        &self,
        workflow_type: Option<WorkflowType>,
        status: Option<OrchestrationStatus>,
    ) -> Result<Vec<WorkflowOrchestration>, CoreError> {
        self.orchestration_repo.list(workflow_type, status).await
    }

    /// Audit trail of an orchestration
    pub async fn interactions(
        &self,
        id: &OrchestrationId,
    ) -> Result<Vec<AgentInteraction>, CoreError> {
        self.recorder.find_by_orchestration(id).await
    }
}

/// Handler for domain events
#[async_trait]
pub trait DomainEventHandler: Send + Sync {
    /// Handle a domain event
    async fn handle_event(&self, event: Box<dyn DomainEvent>) -> Result<(), CoreError>;
}

/// Event handler that logs every event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventHandler;

#[async_trait]
impl DomainEventHandler for TracingEventHandler {
    async fn handle_event(&self, event: Box<dyn DomainEvent>) -> Result<(), CoreError> {
        match event.step() {
            Some(step) => info!(
                event_type = event.event_type(),
                orchestration_id = %event.orchestration_id(),
                step = %step,
                timestamp = %event.timestamp(),
                "Domain event"
            ),
            None => info!(
                event_type = event.event_type(),
                orchestration_id = %event.orchestration_id(),
                timestamp = %event.timestamp(),
                "Domain event"
            ),
        }
        Ok(())
    }
}
