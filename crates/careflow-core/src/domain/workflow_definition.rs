use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Kind of business process a workflow drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    /// Schedule an appointment
    Scheduling,

    /// Complete patient intake
    Intake,
}

impl WorkflowType {
    /// Every known workflow type
    pub const ALL: [WorkflowType; 2] = [WorkflowType::Scheduling, WorkflowType::Intake];

    /// Wire name of the workflow type
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowType::Scheduling => "scheduling",
            WorkflowType::Intake => "intake",
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::UnknownWorkflowType(s.to_string()))
    }
}

/// Name of a step within a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    /// Validate and normalise the caller's scheduling request
    CollectSubjectDetails,
    /// Ask the availability service for open slots
    FindCandidateSlots,
    /// Check insurance eligibility
    VerifyEligibility,
    /// Reserve a slot in the booking store
    Book,
    /// Generate intake forms from subject history
    PrepareForms,
    /// Assess urgency
    PerformTriage,
    /// Produce instructions for the patient
    GenerateInstructions,
}

impl StepName {
    /// Wire name of the step
    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::CollectSubjectDetails => "collect_subject_details",
            StepName::FindCandidateSlots => "find_candidate_slots",
            StepName::VerifyEligibility => "verify_eligibility",
            StepName::Book => "book",
            StepName::PrepareForms => "prepare_forms",
            StepName::PerformTriage => "perform_triage",
            StepName::GenerateInstructions => "generate_instructions",
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handler responsible for a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    /// Slot search and booking
    Scheduling,
    /// Insurance eligibility verification
    Eligibility,
    /// Intake forms and patient instructions
    Intake,
    /// Urgency assessment
    Triage,
}

impl HandlerKind {
    /// Name recorded in `agents_involved` and on interaction records
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::Scheduling => "scheduling",
            HandlerKind::Eligibility => "eligibility",
            HandlerKind::Intake => "intake",
            HandlerKind::Triage => "triage",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A step in a workflow definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step name
    pub name: StepName,

    /// Handler that executes the step
    pub handler: HandlerKind,
}

impl StepDefinition {
    const fn new(name: StepName, handler: HandlerKind) -> Self {
        Self { name, handler }
    }
}

/// Ordered list of steps for one workflow type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow type this definition drives
    pub workflow_type: WorkflowType,

    /// Steps in execution order
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    /// Built-in definition for a workflow type
    pub fn for_type(workflow_type: WorkflowType) -> Self {
        let steps = match workflow_type {
            WorkflowType::Scheduling => vec![
                StepDefinition::new(StepName::CollectSubjectDetails, HandlerKind::Scheduling),
                StepDefinition::new(StepName::FindCandidateSlots, HandlerKind::Scheduling),
                StepDefinition::new(StepName::VerifyEligibility, HandlerKind::Eligibility),
                StepDefinition::new(StepName::Book, HandlerKind::Scheduling),
            ],
            WorkflowType::Intake => vec![
                StepDefinition::new(StepName::PrepareForms, HandlerKind::Intake),
                StepDefinition::new(StepName::PerformTriage, HandlerKind::Triage),
                StepDefinition::new(StepName::GenerateInstructions, HandlerKind::Intake),
            ],
        };

        Self {
            workflow_type,
            steps,
        }
    }

    /// Validate the workflow definition
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.steps.is_empty() {
            return Err(CoreError::ValidationError(format!(
                "Workflow {} must have at least one step",
                self.workflow_type
            )));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name) {
                return Err(CoreError::ValidationError(format!(
                    "Duplicate step {} in workflow {}",
                    step.name, self.workflow_type
                )));
            }
        }

        Ok(())
    }

    /// Step names in order
    pub fn step_names(&self) -> impl Iterator<Item = StepName> + '_ {
        self.steps.iter().map(|s| s.name)
    }
}

/// Workflow definitions keyed by type, resolved once at startup
#[derive(Debug, Clone)]
pub struct DefinitionRegistry {
    definitions: HashMap<WorkflowType, WorkflowDefinition>,
}

impl DefinitionRegistry {
    /// Empty registry
    pub fn empty() -> Self {
        Self {
            definitions: HashMap::new(),
        }
    }

    /// Registry holding the built-in definition of every workflow type
    pub fn standard() -> Self {
        let definitions = WorkflowType::ALL
            .into_iter()
            .map(|t| (t, WorkflowDefinition::for_type(t)))
            .collect();
        Self { definitions }
    }

    /// Register or replace a definition after validating it
    pub fn with_definition(mut self, definition: WorkflowDefinition) -> Result<Self, CoreError> {
        definition.validate()?;
        self.definitions.insert(definition.workflow_type, definition);
        Ok(self)
    }

    /// Look up the definition for a workflow type
    pub fn resolve(&self, workflow_type: WorkflowType) -> Result<&WorkflowDefinition, CoreError> {
        self.definitions
            .get(&workflow_type)
            .ok_or_else(|| CoreError::UnknownWorkflowType(workflow_type.to_string()))
    }

    /// Every registered definition
    pub fn definitions(&self) -> impl Iterator<Item = &WorkflowDefinition> {
        self.definitions.values()
    }
}

impl Default for DefinitionRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduling_definition_order() {
        let definition = WorkflowDefinition::for_type(WorkflowType::Scheduling);
        let names: Vec<_> = definition.step_names().collect();

        assert_eq!(
            names,
            vec![
                StepName::CollectSubjectDetails,
                StepName::FindCandidateSlots,
                StepName::VerifyEligibility,
                StepName::Book,
            ]
        );
        assert_eq!(definition.steps[2].handler, HandlerKind::Eligibility);
        assert!(definition.validate().is_ok());
    }

    #[test]
    fn test_intake_definition_order() {
        let definition = WorkflowDefinition::for_type(WorkflowType::Intake);
        let handlers: Vec<_> = definition.steps.iter().map(|s| s.handler).collect();

        assert_eq!(
            handlers,
            vec![HandlerKind::Intake, HandlerKind::Triage, HandlerKind::Intake]
        );
        assert_eq!(definition.steps[0].name, StepName::PrepareForms);
    }

    #[test]
    fn test_definition_is_deterministic() {
        for t in WorkflowType::ALL {
            assert_eq!(WorkflowDefinition::for_type(t), WorkflowDefinition::for_type(t));
        }
    }

    #[test]
    fn test_parse_workflow_type() {
        assert_eq!("scheduling".parse::<WorkflowType>().unwrap(), WorkflowType::Scheduling);
        assert_eq!("intake".parse::<WorkflowType>().unwrap(), WorkflowType::Intake);

        match "unknown_type".parse::<WorkflowType>() {
            Err(CoreError::UnknownWorkflowType(name)) => assert_eq!(name, "unknown_type"),
            other => panic!("Expected UnknownWorkflowType, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_rejects_empty_and_duplicates() {
        let empty = WorkflowDefinition {
            workflow_type: WorkflowType::Intake,
            steps: vec![],
        };
        assert!(matches!(empty.validate(), Err(CoreError::ValidationError(_))));

        let duplicated = WorkflowDefinition {
            workflow_type: WorkflowType::Intake,
            steps: vec![
                StepDefinition::new(StepName::PrepareForms, HandlerKind::Intake),
                StepDefinition::new(StepName::PrepareForms, HandlerKind::Intake),
            ],
        };
        let err = duplicated.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate step prepare_forms"));
    }

    #[test]
    fn test_registry_resolution() {
        let registry = DefinitionRegistry::standard();
        assert_eq!(registry.definitions().count(), 2);
        assert!(registry.resolve(WorkflowType::Scheduling).is_ok());

        let registry = DefinitionRegistry::empty()
            .with_definition(WorkflowDefinition::for_type(WorkflowType::Intake))
            .unwrap();
        assert!(matches!(
            registry.resolve(WorkflowType::Scheduling),
            Err(CoreError::UnknownWorkflowType(_))
        ));
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&StepName::CollectSubjectDetails).unwrap(), "\"collect_subject_details\"");
        assert_eq!(serde_json::to_string(&WorkflowType::Intake).unwrap(), "\"intake\"");
        for step in WorkflowDefinition::for_type(WorkflowType::Scheduling).step_names() {
            assert_eq!(serde_json::to_value(step).unwrap(), serde_json::json!(step.as_str()));
        }
    }
}
