use docflow_store::StoreError;
use docflow_types::{OrderStatus, PhaseId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("phase {phase} failed: {reason}")]
    PhaseExecution { phase: PhaseId, reason: String },

    #[error("phase {phase} produced unparsable output: {reason}")]
    Serialization { phase: PhaseId, reason: String },

    #[error("phase {phase} output incomplete: {reason}")]
    IncompleteOutput { phase: PhaseId, reason: String },

    #[error("gate violation: cannot enter {target}, missing prerequisites {missing:?}")]
    GateViolation { target: PhaseId, missing: Vec<PhaseId> },

    #[error("order not found: {order_id}")]
    OrderNotFound { order_id: String },

    #[error("workflow not found: {workflow_id}")]
    WorkflowNotFound { workflow_id: String },

    #[error("order {order_id} cannot be orchestrated in status {status}")]
    InvalidOrderStatus { order_id: String, status: OrderStatus },

    #[error("workflow {workflow_id} has a blocking checkpoint pending")]
    CheckpointPending { workflow_id: String },

    #[error("order {order_id} is already being orchestrated")]
    AlreadyRunning { order_id: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Rejections raised by the gate validator
#[derive(Debug, Error)]
pub enum GateError {
    #[error("cannot enter {target}: missing prerequisites {missing:?}")]
    Violation { target: PhaseId, missing: Vec<PhaseId> },

    #[error("phase {phase} output incomplete: {reason}")]
    Incomplete { phase: PhaseId, reason: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<GateError> for OrchestratorError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Violation { target, missing } => {
                OrchestratorError::GateViolation { target, missing }
            }
            GateError::Incomplete { phase, reason } => {
                OrchestratorError::IncompleteOutput { phase, reason }
            }
            GateError::Store(e) => OrchestratorError::Store(e),
        }
    }
}
