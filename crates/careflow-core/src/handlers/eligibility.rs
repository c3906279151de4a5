use super::{bounded, StepContext, StepHandler, StepHandlerBase};
use crate::config::OrchestratorConfig;
use crate::domain::collaborators::EligibilityCheckService;
use crate::domain::step_output::{EligibilityOutcome, EligibilityStatus, StepOutput};
use crate::domain::workflow_definition::{HandlerKind, StepName};
use crate::HandlerError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Verifies insurance eligibility with the payer.
///
/// Anything other than a clear payer answer maps to
/// [`EligibilityStatus::Error`] with `is_active = false`. Only transport
/// faults and timeouts fail the step.
pub struct EligibilityHandler {
    service: Arc<dyn EligibilityCheckService>,
    timeout: Duration,
}

impl EligibilityHandler {
    /// Create a new eligibility handler
    pub fn new(service: Arc<dyn EligibilityCheckService>, config: &OrchestratorConfig) -> Self {
        Self {
            service,
            timeout: config.collaborator_timeout(),
        }
    }
}

fn map_status(raw: &str) -> Option<EligibilityStatus> {
    match raw.trim().to_lowercase().as_str() {
        "active" | "verified" | "eligible" => Some(EligibilityStatus::Verified),
        "pending" | "in_review" => Some(EligibilityStatus::Pending),
        "inactive" | "denied" | "terminated" | "ineligible" => Some(EligibilityStatus::Denied),
        _ => None,
    }
}

fn number(payload: &Value, key: &str) -> Option<f64> {
    match payload.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_start_matches('$').parse().ok(),
        _ => None,
    }
}

fn has_fault(payload: &Value) -> Option<&Value> {
    ["error", "errors", "fault"]
        .iter()
        .filter_map(|key| payload.get(*key))
        .find(|v| match v {
            Value::Null | Value::Bool(false) => false,
            Value::Array(items) => !items.is_empty(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        })
}

/// Map a raw payer payload to an outcome
pub fn map_payload(payload: &Value) -> EligibilityOutcome {
    if !payload.is_object() {
        return EligibilityOutcome::error("payer response is not an object");
    }

    if let Some(fault) = has_fault(payload) {
        return EligibilityOutcome::error(format!("payer reported a fault: {}", fault));
    }

    let raw_status = match payload.get("status").and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => s,
        _ => return EligibilityOutcome::error("payer response has no status"),
    };

    let status = match map_status(raw_status) {
        Some(status) => status,
        None => {
            let mut outcome =
                EligibilityOutcome::error(format!("unrecognised payer status {:?}", raw_status));
            outcome.payer_status = Some(raw_status.to_string());
            return outcome;
        }
    };

    EligibilityOutcome {
        status,
        is_active: status == EligibilityStatus::Verified,
        payer_status: Some(raw_status.to_string()),
        copay: number(payload, "copay"),
        deductible: number(payload, "deductible"),
        coinsurance: number(payload, "coinsurance"),
        prior_authorization_required: payload
            .get("prior_authorization_required")
            .and_then(Value::as_bool),
        reason: None,
    }
}

impl StepHandlerBase for EligibilityHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Eligibility
    }

    fn supports(&self, step: StepName) -> bool {
        step == StepName::VerifyEligibility
    }
}

#[async_trait]
impl StepHandler for EligibilityHandler {
    async fn execute(&self, ctx: &StepContext) -> Result<StepOutput, HandlerError> {
        if ctx.step != StepName::VerifyEligibility {
            return Err(HandlerError::InvalidInput(format!(
                "eligibility handler cannot execute step {}",
                ctx.step
            )));
        }

        let details = ctx.subject_details()?;
        let policy = details
            .policy
            .as_ref()
            .filter(|p| !p.payer_id.trim().is_empty() && !p.policy_number.trim().is_empty());

        let Some(policy) = policy else {
            warn!(
                orchestration_id = %ctx.orchestration_id,
                subject_id = %ctx.subject_id,
                "No policy identifiers, skipping payer check"
            );
            return Ok(StepOutput::Eligibility(EligibilityOutcome::error(
                "missing policy identifiers",
            )));
        };

        let payload = bounded(self.timeout, self.service.verify(policy)).await?;
        let outcome = map_payload(&payload);

        info!(
            orchestration_id = %ctx.orchestration_id,
            payer_id = %policy.payer_id,
            status = ?outcome.status,
            is_active = outcome.is_active,
            "Eligibility verified"
        );

        Ok(StepOutput::Eligibility(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::collaborators::{CollaboratorError, MockEligibilityCheckService, SubjectPolicy};
    use crate::domain::orchestration::{OrchestrationId, SubjectId};
    use crate::domain::step_output::SubjectDetails;
    use crate::domain::workflow_definition::WorkflowType;
    use serde_json::{json, Map};
    use std::collections::BTreeMap;

    fn context(policy: Option<SubjectPolicy>) -> StepContext {
        let mut results = BTreeMap::new();
        results.insert(
            StepName::CollectSubjectDetails,
            StepOutput::SubjectDetails(SubjectDetails {
                subject_id: "42".to_string(),
                provider_id: Some("dr-lee".to_string()),
                preferred_date: None,
                preferred_time: None,
                reason: None,
                policy,
            }),
        );
        StepContext {
            orchestration_id: OrchestrationId("o-1".to_string()),
            workflow_type: WorkflowType::Scheduling,
            step: StepName::VerifyEligibility,
            subject_id: SubjectId::from("42"),
            related_id: None,
            input: Map::new(),
            results,
        }
    }

    fn policy() -> SubjectPolicy {
        SubjectPolicy {
            payer_id: "acme".to_string(),
            policy_number: "P-1".to_string(),
            group_number: None,
        }
    }

    fn outcome(output: StepOutput) -> EligibilityOutcome {
        output.as_eligibility().cloned().unwrap()
    }

    #[test]
    fn test_status_mapping() {
        let cases = vec![
            ("active", EligibilityStatus::Verified),
            ("Eligible", EligibilityStatus::Verified),
            ("in_review", EligibilityStatus::Pending),
            ("terminated", EligibilityStatus::Denied),
            ("ineligible", EligibilityStatus::Denied),
            ("maybe", EligibilityStatus::Error),
        ];

        for (raw, expected) in cases {
            let mapped = map_payload(&json!({"status": raw}));
            assert_eq!(mapped.status, expected, "status {}", raw);
            assert_eq!(mapped.is_active, expected == EligibilityStatus::Verified);
        }
    }

    #[test]
    fn test_benefits_are_copied() {
        let mapped = map_payload(&json!({
            "status": "active",
            "copay": 25,
            "deductible": "$500.00",
            "coinsurance": 0.2,
            "prior_authorization_required": true
        }));

        assert_eq!(mapped.copay, Some(25.0));
        assert_eq!(mapped.deductible, Some(500.0));
        assert_eq!(mapped.coinsurance, Some(0.2));
        assert_eq!(mapped.prior_authorization_required, Some(true));
        assert_eq!(mapped.payer_status.as_deref(), Some("active"));
    }

    #[test]
    fn test_faults_and_garbage_are_never_active() {
        let payloads = vec![
            json!({"status": "active", "error": "upstream timeout"}),
            json!({"status": "active", "errors": [{"code": "AAA"}]}),
            json!({"fault": {"code": 500}}),
            json!({"status": ""}),
            json!({}),
            json!("active"),
            Value::Null,
        ];

        for payload in payloads {
            let mapped = map_payload(&payload);
            assert_eq!(mapped.status, EligibilityStatus::Error, "payload {}", payload);
            assert!(!mapped.is_active);
            assert!(mapped.copay.is_none());
        }

        // Empty error collections are not faults
        let mapped = map_payload(&json!({"status": "active", "errors": []}));
        assert_eq!(mapped.status, EligibilityStatus::Verified);
    }

    #[tokio::test]
    async fn test_missing_policy_skips_payer() {
        let mut service = MockEligibilityCheckService::new();
        service.expect_verify().times(0);
        let handler = EligibilityHandler::new(Arc::new(service), &OrchestratorConfig::default());

        let result = outcome(handler.execute(&context(None)).await.unwrap());
        assert_eq!(result.status, EligibilityStatus::Error);
        assert!(!result.is_active);
        assert_eq!(result.reason.as_deref(), Some("missing policy identifiers"));

        let blank = SubjectPolicy {
            payer_id: "acme".to_string(),
            policy_number: "  ".to_string(),
            group_number: None,
        };
        let result = outcome(handler.execute(&context(Some(blank))).await.unwrap());
        assert_eq!(result.status, EligibilityStatus::Error);
    }

    #[tokio::test]
    async fn test_verified_policy() {
        let mut service = MockEligibilityCheckService::new();
        service
            .expect_verify()
            .withf(|p| p.policy_number == "P-1")
            .times(1)
            .returning(|_| Ok(json!({"status": "active", "copay": 20})));
        let handler = EligibilityHandler::new(Arc::new(service), &OrchestratorConfig::default());

        let result = outcome(handler.execute(&context(Some(policy()))).await.unwrap());
        assert_eq!(result.status, EligibilityStatus::Verified);
        assert!(result.is_active);
        assert_eq!(result.copay, Some(20.0));
    }

    #[tokio::test]
    async fn test_transport_fault_fails_step() {
        let mut service = MockEligibilityCheckService::new();
        service
            .expect_verify()
            .returning(|_| Err(CollaboratorError::Transport("connection reset".to_string())));
        let handler = EligibilityHandler::new(Arc::new(service), &OrchestratorConfig::default());

        let result = handler.execute(&context(Some(policy()))).await;
        assert_eq!(
            result,
            Err(HandlerError::Transport("connection reset".to_string()))
        );
    }
}
