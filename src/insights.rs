// Insights - Actionable findings from fleet health and host resource usage

use crate::process::HealthSnapshot;
use crate::security::risk::{server_params, RESTART_SERVER};
use crate::security::{DecisionKind, RiskLevel, SecurityGate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Host resource usage, as percentages
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetrics {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for InsightType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InsightType::Info => write!(f, "info"),
            InsightType::Warning => write!(f, "warning"),
            InsightType::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightCategory {
    ServerHealth,
    Cpu,
    Memory,
    Disk,
}

/// What it would take to act on an insight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Remediation {
    /// The fix is permitted right now
    AutoFix,
    /// The fix becomes permitted once an approval is granted
    AwaitingApproval,
    /// The target is restricted; no automated fix exists
    Blocked,
    /// Nothing the supervisor can do; needs an operator
    Manual,
}

impl std::fmt::Display for Remediation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Remediation::AutoFix => write!(f, "auto-fix"),
            Remediation::AwaitingApproval => write!(f, "awaiting approval"),
            Remediation::Blocked => write!(f, "blocked"),
            Remediation::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    #[serde(rename = "type")]
    pub insight_type: InsightType,
    pub category: InsightCategory,
    pub message: String,
    pub risk_level: RiskLevel,
    pub can_auto_fix: bool,
    pub remediation: Remediation,
    pub server_name: Option<String>,
}

/// Resource thresholds, in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InsightThresholds {
    pub cpu_warning: f64,
    pub memory_error: f64,
    pub disk_warning: f64,
}

impl Default for InsightThresholds {
    fn default() -> Self {
        Self {
            cpu_warning: 80.0,
            memory_error: 85.0,
            disk_warning: 90.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InsightGenerator {
    thresholds: InsightThresholds,
}

impl InsightGenerator {
    pub fn new(thresholds: InsightThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &InsightThresholds {
        &self.thresholds
    }

    /// One insight per unhealthy server, then one per resource over its threshold
    pub fn derive(
        &self,
        gate: &SecurityGate,
        fleet_status: &BTreeMap<String, HealthSnapshot>,
        metrics: &ResourceMetrics,
    ) -> Vec<Insight> {
        let mut insights: Vec<Insight> = fleet_status
            .iter()
            .filter(|(_, snapshot)| snapshot.is_unhealthy())
            .map(|(name, _)| Self::server_insight(gate, name))
            .collect();

        if metrics.cpu_percent > self.thresholds.cpu_warning {
            insights.push(Self::resource_insight(
                InsightType::Warning,
                InsightCategory::Cpu,
                format!(
                    "CPU usage is {:.1}% (threshold {:.0}%)",
                    metrics.cpu_percent, self.thresholds.cpu_warning
                ),
            ));
        }

        if metrics.memory_percent > self.thresholds.memory_error {
            insights.push(Self::resource_insight(
                InsightType::Error,
                InsightCategory::Memory,
                format!(
                    "Memory usage is {:.1}% (threshold {:.0}%)",
                    metrics.memory_percent, self.thresholds.memory_error
                ),
            ));
        }

        if metrics.disk_percent > self.thresholds.disk_warning {
            insights.push(Self::resource_insight(
                InsightType::Warning,
                InsightCategory::Disk,
                format!(
                    "Disk usage is {:.1}% (threshold {:.0}%)",
                    metrics.disk_percent, self.thresholds.disk_warning
                ),
            ));
        }

        insights
    }

    fn server_insight(gate: &SecurityGate, name: &str) -> Insight {
        let params = server_params(name);
        let decision = gate.can_perform(RESTART_SERVER, &params);

        let (remediation, message) = match decision.kind {
            DecisionKind::Permitted | DecisionKind::Approved { .. } => (
                Remediation::AutoFix,
                format!("Server '{}' is offline; a restart can be applied now", name),
            ),
            DecisionKind::ApprovalRequired => {
                let pending = gate
                    .find_pending(RESTART_SERVER, &params)
                    .map(|r| format!(" (pending request {})", r.id))
                    .unwrap_or_default();
                (
                    Remediation::AwaitingApproval,
                    format!(
                        "Server '{}' is offline; a restart can fix it once approved{}",
                        name, pending
                    ),
                )
            }
            DecisionKind::Restricted => (
                Remediation::Blocked,
                format!(
                    "Server '{}' is offline and restricted; automated restart is never permitted, manual intervention required",
                    name
                ),
            ),
        };

        Insight {
            insight_type: InsightType::Error,
            category: InsightCategory::ServerHealth,
            message,
            risk_level: decision.risk,
            can_auto_fix: decision.allowed,
            remediation,
            server_name: Some(name.to_string()),
        }
    }

    fn resource_insight(insight_type: InsightType, category: InsightCategory, message: String) -> Insight {
        Insight {
            insight_type,
            category,
            message,
            risk_level: RiskLevel::Low,
            can_auto_fix: false,
            remediation: Remediation::Manual,
            server_name: None,
        }
    }
}
