// Operations exposed to callers outside the core (HTTP layer, CLI, tests)

use crate::error::{Result, StewardError};
use crate::insights::{Insight, ResourceMetrics};
use crate::process::HealthSnapshot;
use crate::security::risk::{server_params, RESTART_SERVER, SERVER_LOGS, STOP_SERVER};
use crate::security::{DecisionKind, OperationRequest, RiskLevel};
use crate::supervisor::fleet::{execute_restart, FleetSupervisor};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Outcome of a manually requested, risk-gated action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionResponse {
    /// The gate allowed the action and it was executed
    pub accepted: bool,
    /// Pending approval to surface to an approver when not accepted
    pub approval_id: Option<String>,
    pub reason: Option<String>,
    pub risk: RiskLevel,
    /// Set when the action ran but failed
    pub error: Option<String>,
}

/// Tail of a server's log file, if the gate allowed reading it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogsResponse {
    pub allowed: bool,
    pub reason: String,
    pub lines: Vec<String>,
}

impl FleetSupervisor {
    pub async fn get_fleet_status(&self) -> BTreeMap<String, HealthSnapshot> {
        self.get_status().await
    }

    /// Restart a server on behalf of `requester`.
    ///
    /// When approval is required the existing pending request for this
    /// server is returned, or a new one is created. Restricted servers get a
    /// refusal with no approval id, since no approval can unlock them.
    pub async fn request_restart(&self, server: &str, requester: &str) -> Result<ActionResponse> {
        let handle = self.handle(server).await?;
        let mut handle = handle.lock().await;

        let params = server_params(server);
        let decision = self.gate().can_perform(RESTART_SERVER, &params);

        match decision.kind {
            DecisionKind::Permitted | DecisionKind::Approved { .. } => {
                info!(server = %server, requester = %requester, "Manual restart accepted");
                let error = execute_restart(self.gate(), &mut handle, &decision)
                    .await
                    .err()
                    .map(|e| e.to_string());
                Ok(ActionResponse {
                    accepted: true,
                    approval_id: decision.approval_id().map(str::to_string),
                    reason: Some(decision.reason),
                    risk: decision.risk,
                    error,
                })
            }
            DecisionKind::Restricted => {
                warn!(server = %server, requester = %requester, "Manual restart refused: {}", decision.reason);
                Ok(ActionResponse {
                    accepted: false,
                    approval_id: None,
                    reason: Some(decision.reason),
                    risk: decision.risk,
                    error: None,
                })
            }
            DecisionKind::ApprovalRequired => {
                let request = self.pending_or_create(RESTART_SERVER, server, requester);
                Ok(ActionResponse {
                    accepted: false,
                    approval_id: Some(request.id),
                    reason: Some(decision.reason),
                    risk: decision.risk,
                    error: None,
                })
            }
        }
    }

    /// Stop a server on behalf of `requester`, gated like a restart
    pub async fn request_stop(&self, server: &str, requester: &str) -> Result<ActionResponse> {
        let handle = self.handle(server).await?;
        let mut handle = handle.lock().await;

        let params = server_params(server);
        let decision = self.gate().can_perform(STOP_SERVER, &params);

        if !decision.allowed {
            let approval_id = decision
                .requires_approval()
                .then(|| self.pending_or_create(STOP_SERVER, server, requester).id);
            return Ok(ActionResponse {
                accepted: false,
                approval_id,
                reason: Some(decision.reason),
                risk: decision.risk,
                error: None,
            });
        }

        if let Some(approval_id) = decision.approval_id() {
            self.gate().consume_approval(approval_id);
        }
        let grace = handle.spec().stop_timeout();
        let error = handle.stop(grace).await.err().map(|e| e.to_string());

        Ok(ActionResponse {
            accepted: true,
            approval_id: decision.approval_id().map(str::to_string),
            reason: Some(decision.reason),
            risk: decision.risk,
            error,
        })
    }

    pub fn list_pending_approvals(&self) -> Vec<OperationRequest> {
        self.gate().list_pending()
    }

    pub fn approve_operation(&self, id: &str, approver: &str) -> bool {
        self.gate().approve(id, approver)
    }

    pub fn reject_operation(&self, id: &str, approver: &str) -> bool {
        self.gate().reject(id, approver)
    }

    /// Insights for the current fleet status and the supplied host metrics
    pub async fn get_insights(&self, metrics: &ResourceMetrics) -> Vec<Insight> {
        let status = self.get_status().await;
        self.insights.derive(self.gate(), &status, metrics)
    }

    /// Last `lines` lines of a server's log file
    pub async fn get_logs(&self, server: &str, lines: usize) -> Result<LogsResponse> {
        let log_file = {
            let handle = self.handle(server).await?;
            let handle = handle.lock().await;
            handle.log_file().map(|p| p.to_path_buf())
        };

        let decision = self.gate().can_perform(SERVER_LOGS, &server_params(server));
        if !decision.allowed {
            return Ok(LogsResponse {
                allowed: false,
                reason: decision.reason,
                lines: Vec::new(),
            });
        }

        let path = log_file.ok_or_else(|| StewardError::LogUnavailable(server.to_string()))?;
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(LogsResponse {
            allowed: true,
            reason: decision.reason,
            lines: tail_lines(&contents, lines),
        })
    }

    fn pending_or_create(&self, operation_type: &str, server: &str, requester: &str) -> OperationRequest {
        let params = server_params(server);
        match self.gate().find_pending(operation_type, &params) {
            Some(existing) => existing,
            None => self.gate().create_approval_request(
                operation_type,
                params,
                requester,
                Some(format!("{} requested {} for '{}'", requester, operation_type, server)),
            ),
        }
    }
}

fn tail_lines(contents: &str, count: usize) -> Vec<String> {
    let all: Vec<&str> = contents.lines().collect();
    let skip = all.len().saturating_sub(count);
    all[skip..].iter().map(|l| l.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_lines() {
        assert_eq!(tail_lines("a\nb\nc\n", 2), vec!["b", "c"]);
        assert_eq!(tail_lines("a\nb", 10), vec!["a", "b"]);
        assert!(tail_lines("", 5).is_empty());
        assert!(tail_lines("a\nb", 0).is_empty());
    }
}
