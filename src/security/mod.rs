// Security module - Risk classification and the approval gate

pub mod approval;
pub mod gate;
pub mod risk;

pub use approval::{ApprovalRegistry, ApprovalStatus, OperationRequest};
pub use gate::{DecisionKind, GateDecision, SecurityGate};
pub use risk::{
    server_params, Classification, OperationParams, RiskClassifier, RiskLevel, RiskPolicy,
};
