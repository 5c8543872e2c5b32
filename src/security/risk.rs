use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Parameters scoping an operation, e.g. `{"server": "files"}`.
///
/// Ordered so that two parameter sets compare and print deterministically.
pub type OperationParams = BTreeMap<String, String>;

/// Parameter key naming the target server of an operation
pub const SERVER_PARAM: &str = "server";

pub const RESTART_SERVER: &str = "restart-server";
pub const START_SERVER: &str = "start-server";
pub const STOP_SERVER: &str = "stop-server";
pub const SYSTEM_HEALTH_CHECK: &str = "system_health_check";
pub const SERVER_STATUS: &str = "mcp_server_status";
pub const SERVER_LOGS: &str = "mcp_server_logs";
pub const SERVER_CONFIG_UPDATE: &str = "mcp_server_config_update";

/// Build the parameter map for an operation targeting one server
pub fn server_params(server: &str) -> OperationParams {
    let mut params = OperationParams::new();
    params.insert(SERVER_PARAM.to_string(), server.to_string());
    params
}

/// Coarse classification of how disruptive an operation is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Safe,
    Low,
    High,
    Critical,
}

impl RiskLevel {
    /// Whether operations at this tier may run without an approval
    pub fn is_auto_allowed(self) -> bool {
        matches!(self, RiskLevel::Safe | RiskLevel::Low)
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Safe => write!(f, "safe"),
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Static, process-wide risk table: operation tiers plus restricted servers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskPolicy {
    /// Operation type -> base tier
    pub operations: HashMap<String, RiskLevel>,

    /// Servers that never receive automated remediation
    pub restricted_servers: HashSet<String>,

    /// Tier applied to operation types missing from `operations`
    pub default_tier: RiskLevel,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        let operations = [
            (SYSTEM_HEALTH_CHECK, RiskLevel::Safe),
            (SERVER_STATUS, RiskLevel::Safe),
            (SERVER_LOGS, RiskLevel::Low),
            (RESTART_SERVER, RiskLevel::High),
            (START_SERVER, RiskLevel::High),
            (STOP_SERVER, RiskLevel::High),
            (SERVER_CONFIG_UPDATE, RiskLevel::Critical),
        ]
        .into_iter()
        .map(|(op, tier)| (op.to_string(), tier))
        .collect();

        Self {
            operations,
            restricted_servers: HashSet::new(),
            default_tier: RiskLevel::High,
        }
    }
}

impl RiskPolicy {
    /// Mark servers as restricted
    pub fn with_restricted<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.restricted_servers
            .extend(servers.into_iter().map(Into::into));
        self
    }

    pub fn is_restricted(&self, server: &str) -> bool {
        self.restricted_servers.contains(server)
    }

    pub fn base_tier(&self, operation_type: &str) -> RiskLevel {
        self.operations
            .get(operation_type)
            .copied()
            .unwrap_or(self.default_tier)
    }
}

/// Result of classifying one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub risk: RiskLevel,
    /// Name of the restricted target server, if the operation hits one
    pub restricted_target: Option<String>,
}

/// Pure lookup over a [`RiskPolicy`]
#[derive(Debug, Clone, Default)]
pub struct RiskClassifier {
    policy: RiskPolicy,
}

impl RiskClassifier {
    pub fn new(policy: RiskPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RiskPolicy {
        &self.policy
    }

    /// Classify an operation. A restricted target always lifts the tier to
    /// `Critical`, whatever the operation's base tier.
    pub fn classify(&self, operation_type: &str, parameters: &OperationParams) -> Classification {
        if let Some(server) = parameters.get(SERVER_PARAM) {
            if self.policy.is_restricted(server) {
                return Classification {
                    risk: RiskLevel::Critical,
                    restricted_target: Some(server.clone()),
                };
            }
        }

        Classification {
            risk: self.policy.base_tier(operation_type),
            restricted_target: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_tiers() {
        let policy = RiskPolicy::default();
        assert_eq!(policy.base_tier(SYSTEM_HEALTH_CHECK), RiskLevel::Safe);
        assert_eq!(policy.base_tier(SERVER_LOGS), RiskLevel::Low);
        assert_eq!(policy.base_tier(RESTART_SERVER), RiskLevel::High);
        assert_eq!(policy.base_tier(SERVER_CONFIG_UPDATE), RiskLevel::Critical);
        assert_eq!(policy.base_tier("drop-database"), RiskLevel::High);
    }

    #[test]
    fn test_restricted_server_lifts_to_critical() {
        let classifier =
            RiskClassifier::new(RiskPolicy::default().with_restricted(["payments"]));

        let c = classifier.classify(SERVER_LOGS, &server_params("payments"));
        assert_eq!(c.risk, RiskLevel::Critical);
        assert_eq!(c.restricted_target.as_deref(), Some("payments"));

        let c = classifier.classify(SERVER_LOGS, &server_params("files"));
        assert_eq!(c.risk, RiskLevel::Low);
        assert!(c.restricted_target.is_none());
    }

    #[test]
    fn test_operation_without_server_param() {
        let classifier = RiskClassifier::default();
        let c = classifier.classify(SYSTEM_HEALTH_CHECK, &OperationParams::new());
        assert_eq!(c.risk, RiskLevel::Safe);
    }

    #[test]
    fn test_risk_level_ordering_and_display() {
        assert!(RiskLevel::Safe < RiskLevel::Low);
        assert!(RiskLevel::High < RiskLevel::Critical);
        assert!(RiskLevel::Low.is_auto_allowed());
        assert!(!RiskLevel::High.is_auto_allowed());
        assert_eq!(RiskLevel::Critical.to_string(), "critical");
    }
}
