use crate::insights::{Insight, InsightGenerator, ResourceMetrics};
use crate::process::HealthSnapshot;
use crate::security::approval::{ApprovalRegistry, OperationRequest};
use crate::security::risk::{Classification, OperationParams, RiskClassifier, RiskLevel, RiskPolicy};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Why a gate decision came out the way it did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionKind {
    /// Safe or low tier, no approval needed
    Permitted,
    /// Gated tier unlocked by an approved request
    Approved { approval_id: String },
    /// Target server is restricted; no remediation path exists
    Restricted,
    /// Gated tier with no usable approval; request one and wait
    ApprovalRequired,
}

/// Answer to "may this action proceed now?"
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateDecision {
    pub allowed: bool,
    pub reason: String,
    pub risk: RiskLevel,
    pub kind: DecisionKind,
}

impl GateDecision {
    /// Approval id that unlocked this decision, if any
    pub fn approval_id(&self) -> Option<&str> {
        match &self.kind {
            DecisionKind::Approved { approval_id } => Some(approval_id),
            _ => None,
        }
    }

    pub fn is_restricted(&self) -> bool {
        self.kind == DecisionKind::Restricted
    }

    pub fn requires_approval(&self) -> bool {
        self.kind == DecisionKind::ApprovalRequired
    }
}

/// Risk classification plus approval tracking behind one decision surface
#[derive(Debug, Default)]
pub struct SecurityGate {
    classifier: RiskClassifier,
    registry: ApprovalRegistry,
}

impl SecurityGate {
    pub fn new(policy: RiskPolicy) -> Self {
        Self {
            classifier: RiskClassifier::new(policy),
            registry: ApprovalRegistry::new(),
        }
    }

    pub fn policy(&self) -> &RiskPolicy {
        self.classifier.policy()
    }

    pub fn classify(&self, operation_type: &str, parameters: &OperationParams) -> Classification {
        self.classifier.classify(operation_type, parameters)
    }

    /// Decide whether an operation may run now. Reads policy and registry only.
    pub fn can_perform(&self, operation_type: &str, parameters: &OperationParams) -> GateDecision {
        let classification = self.classifier.classify(operation_type, parameters);

        if let Some(server) = classification.restricted_target {
            return GateDecision {
                allowed: false,
                reason: format!(
                    "Server '{}' is restricted; {} is never permitted on it",
                    server, operation_type
                ),
                risk: RiskLevel::Critical,
                kind: DecisionKind::Restricted,
            };
        }

        let risk = classification.risk;
        if risk.is_auto_allowed() {
            return GateDecision {
                allowed: true,
                reason: format!("{} is {} risk and needs no approval", operation_type, risk),
                risk,
                kind: DecisionKind::Permitted,
            };
        }

        match self.registry.find_usable(operation_type, parameters) {
            Some(approval_id) => GateDecision {
                allowed: true,
                reason: format!("{} approved by request {}", operation_type, approval_id),
                risk,
                kind: DecisionKind::Approved { approval_id },
            },
            None => GateDecision {
                allowed: false,
                reason: format!(
                    "{} is {} risk and requires approval before it can run",
                    operation_type, risk
                ),
                risk,
                kind: DecisionKind::ApprovalRequired,
            },
        }
    }

    /// Record a new pending request. Never deduplicates.
    pub fn create_approval_request(
        &self,
        operation_type: &str,
        parameters: OperationParams,
        requester: &str,
        reasoning: Option<String>,
    ) -> OperationRequest {
        let risk = self.classifier.classify(operation_type, &parameters).risk;
        let request = self
            .registry
            .create(operation_type, parameters, risk, requester, reasoning);
        info!(
            approval_id = %request.id,
            operation = %request.operation_type,
            risk = %request.risk_level,
            requester = %request.requester,
            "Approval request created"
        );
        request
    }

    pub fn approve(&self, id: &str, approver: &str) -> bool {
        let approved = self.registry.approve(id, approver);
        if approved {
            info!(approval_id = %id, approver = %approver, "Operation approved");
        } else {
            debug!(approval_id = %id, "Approve ignored: unknown or not pending");
        }
        approved
    }

    pub fn reject(&self, id: &str, approver: &str) -> bool {
        let rejected = self.registry.reject(id, approver);
        if rejected {
            info!(approval_id = %id, approver = %approver, "Operation rejected");
        }
        rejected
    }

    pub fn is_approved(&self, id: &str) -> bool {
        self.registry.is_approved(id)
    }

    pub fn list_pending(&self) -> Vec<OperationRequest> {
        self.registry.list_pending()
    }

    pub fn find_pending(
        &self,
        operation_type: &str,
        parameters: &OperationParams,
    ) -> Option<OperationRequest> {
        self.registry.find_pending(operation_type, parameters)
    }

    pub fn get_request(&self, id: &str) -> Option<OperationRequest> {
        self.registry.get(id)
    }

    /// Mark an approval as spent by the execution it authorised
    pub fn consume_approval(&self, id: &str) -> bool {
        self.registry.consume(id)
    }

    /// Insights with the default thresholds
    pub fn derive_insights(
        &self,
        fleet_status: &BTreeMap<String, HealthSnapshot>,
        metrics: &ResourceMetrics,
    ) -> Vec<Insight> {
        InsightGenerator::default().derive(self, fleet_status, metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::risk::{server_params, RESTART_SERVER, SERVER_LOGS, SYSTEM_HEALTH_CHECK};

    fn gate() -> SecurityGate {
        SecurityGate::new(RiskPolicy::default().with_restricted(["payments"]))
    }

    #[test]
    fn test_safe_and_low_allowed() {
        let gate = gate();

        let d = gate.can_perform(SYSTEM_HEALTH_CHECK, &OperationParams::new());
        assert!(d.allowed);
        assert_eq!(d.risk, RiskLevel::Safe);
        assert_eq!(d.kind, DecisionKind::Permitted);

        let d = gate.can_perform(SERVER_LOGS, &OperationParams::new());
        assert!(d.allowed);
        assert_eq!(d.risk, RiskLevel::Low);
    }

    #[test]
    fn test_restricted_overrides_approval() {
        let gate = gate();
        let params = server_params("payments");

        let request = gate.create_approval_request(RESTART_SERVER, params.clone(), "ops", None);
        assert_eq!(request.risk_level, RiskLevel::Critical);
        assert!(gate.approve(&request.id, "alice"));

        let d = gate.can_perform(RESTART_SERVER, &params);
        assert!(!d.allowed);
        assert_eq!(d.risk, RiskLevel::Critical);
        assert!(d.reason.contains("restrict"));
        assert!(d.is_restricted());
    }

    #[test]
    fn test_high_requires_approval_then_allowed() {
        let gate = gate();
        let params = server_params("files");

        let d = gate.can_perform(RESTART_SERVER, &params);
        assert!(!d.allowed);
        assert_eq!(d.risk, RiskLevel::High);
        assert!(d.requires_approval());
        assert!(d.reason.contains("requires approval"));

        let request = gate.create_approval_request(RESTART_SERVER, params.clone(), "ops", None);
        assert!(!gate.can_perform(RESTART_SERVER, &params).allowed);

        gate.approve(&request.id, "alice");
        let d = gate.can_perform(RESTART_SERVER, &params);
        assert!(d.allowed);
        assert_eq!(d.risk, RiskLevel::High);
        assert_eq!(d.approval_id(), Some(request.id.as_str()));
    }

    #[test]
    fn test_approval_scoped_to_parameters() {
        let gate = gate();
        let request =
            gate.create_approval_request(RESTART_SERVER, server_params("files"), "ops", None);
        gate.approve(&request.id, "alice");

        assert!(!gate.can_perform(RESTART_SERVER, &server_params("search")).allowed);
    }

    #[test]
    fn test_consumed_approval_no_longer_allows() {
        let gate = gate();
        let params = server_params("files");
        let request = gate.create_approval_request(RESTART_SERVER, params.clone(), "ops", None);
        gate.approve(&request.id, "alice");

        assert!(gate.consume_approval(&request.id));
        assert!(!gate.can_perform(RESTART_SERVER, &params).allowed);
        assert!(gate.is_approved(&request.id));
    }

    #[test]
    fn test_can_perform_has_no_side_effects() {
        let gate = gate();
        let params = server_params("files");
        for _ in 0..3 {
            gate.can_perform(RESTART_SERVER, &params);
        }
        assert!(gate.list_pending().is_empty());
    }
}
