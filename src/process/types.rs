use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of one supervised server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// Expected to be running but not found alive
    Offline,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Stopped => write!(f, "stopped"),
            ProcessState::Starting => write!(f, "starting"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Stopping => write!(f, "stopping"),
            ProcessState::Offline => write!(f, "offline"),
        }
    }
}

/// Result of the most recent health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Offline,
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Offline => write!(f, "offline"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Point-in-time health view of one server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub name: String,
    pub status: HealthStatus,
    pub state: ProcessState,
    /// Seconds since the last successful start; 0 when not running
    pub uptime_secs: u64,
    pub restart_count: u64,
    pub pid: Option<u32>,
    pub checked_at: DateTime<Utc>,
}

impl HealthSnapshot {
    pub fn is_unhealthy(&self) -> bool {
        self.status == HealthStatus::Offline
    }
}
