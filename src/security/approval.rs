use crate::security::risk::{OperationParams, RiskLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Lifecycle status of an approval request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalStatus::Pending => write!(f, "pending"),
            ApprovalStatus::Approved => write!(f, "approved"),
            ApprovalStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// One risk-gated action awaiting, or resolved by, a human decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    /// Unique record identifier
    pub id: String,
    pub operation_type: String,
    pub parameters: OperationParams,
    /// Fixed at creation
    pub risk_level: RiskLevel,
    pub status: ApprovalStatus,
    pub requester: String,
    /// Free-text justification, e.g. from an automated diagnosis
    pub reasoning: Option<String>,
    /// Identity that approved or rejected the request
    pub resolved_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Set once the approved action has been executed
    pub consumed_at: Option<DateTime<Utc>>,
}

impl OperationRequest {
    fn new(
        operation_type: &str,
        parameters: OperationParams,
        risk_level: RiskLevel,
        requester: &str,
        reasoning: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation_type: operation_type.to_string(),
            parameters,
            risk_level,
            status: ApprovalStatus::Pending,
            requester: requester.to_string(),
            reasoning,
            resolved_by: None,
            created_at: Utc::now(),
            resolved_at: None,
            consumed_at: None,
        }
    }

    /// Same operation type and parameter map
    pub fn matches(&self, operation_type: &str, parameters: &OperationParams) -> bool {
        self.operation_type == operation_type && &self.parameters == parameters
    }

    /// Approved and not yet spent on an execution
    pub fn is_usable(&self) -> bool {
        self.status == ApprovalStatus::Approved && self.consumed_at.is_none()
    }
}

/// In-memory store of approval requests.
///
/// Every mutation happens under one mutex, so creates and resolutions observe
/// a single total order. Records are kept in insertion order.
#[derive(Debug, Default)]
pub struct ApprovalRegistry {
    records: Mutex<Vec<OperationRequest>>,
}

impl ApprovalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave a record half-written, so a
    // poisoned lock is still safe to use.
    fn records(&self) -> MutexGuard<'_, Vec<OperationRequest>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Always creates a fresh pending record with its own id
    pub fn create(
        &self,
        operation_type: &str,
        parameters: OperationParams,
        risk_level: RiskLevel,
        requester: &str,
        reasoning: Option<String>,
    ) -> OperationRequest {
        let request = OperationRequest::new(
            operation_type,
            parameters,
            risk_level,
            requester,
            reasoning,
        );
        self.records().push(request.clone());
        request
    }

    /// Resolve a pending record. Returns false for unknown or already resolved ids.
    fn resolve(&self, id: &str, approver: &str, status: ApprovalStatus) -> bool {
        let mut records = self.records();
        match records
            .iter_mut()
            .find(|r| r.id == id && r.status == ApprovalStatus::Pending)
        {
            Some(record) => {
                record.status = status;
                record.resolved_by = Some(approver.to_string());
                record.resolved_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    pub fn approve(&self, id: &str, approver: &str) -> bool {
        self.resolve(id, approver, ApprovalStatus::Approved)
    }

    pub fn reject(&self, id: &str, approver: &str) -> bool {
        self.resolve(id, approver, ApprovalStatus::Rejected)
    }

    pub fn is_approved(&self, id: &str) -> bool {
        self.records()
            .iter()
            .any(|r| r.id == id && r.status == ApprovalStatus::Approved)
    }

    pub fn get(&self, id: &str) -> Option<OperationRequest> {
        self.records().iter().find(|r| r.id == id).cloned()
    }

    pub fn list_pending(&self) -> Vec<OperationRequest> {
        self.records()
            .iter()
            .filter(|r| r.status == ApprovalStatus::Pending)
            .cloned()
            .collect()
    }

    /// Oldest pending request for this exact operation identity
    pub fn find_pending(
        &self,
        operation_type: &str,
        parameters: &OperationParams,
    ) -> Option<OperationRequest> {
        self.records()
            .iter()
            .find(|r| r.status == ApprovalStatus::Pending && r.matches(operation_type, parameters))
            .cloned()
    }

    /// Id of the oldest approved, unconsumed request for this operation identity
    pub fn find_usable(&self, operation_type: &str, parameters: &OperationParams) -> Option<String> {
        self.records()
            .iter()
            .find(|r| r.is_usable() && r.matches(operation_type, parameters))
            .map(|r| r.id.clone())
    }

    /// Spend an approval on an execution. False if it is not approved or already spent.
    pub fn consume(&self, id: &str) -> bool {
        let mut records = self.records();
        match records.iter_mut().find(|r| r.id == id && r.is_usable()) {
            Some(record) => {
                record.consumed_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}
