//! Workflow orchestration for document-generation orders.
//!
//! The [`WorkflowOrchestrator`] runs an order's workflow one phase at a
//! time. It enforces phase gates, detects HOLD conditions, caps the
//! grade/revise loop and raises review checkpoints.

pub mod checkpoint;
pub mod error;
pub mod executor;
pub mod guard;
pub mod hold;
pub mod orchestrator;
pub mod review;
pub mod validator;


// Re-export main types
pub use checkpoint::{CheckpointManager, CheckpointResolution};
pub use error::{GateError, OrchestratorError};
pub use executor::{PhaseExecutor, PhaseInput, PhaseResult};
pub use guard::OrderLocks;
pub use hold::{HoldDecision, HoldDetectionConfig, HoldDetector, Signal};
pub use orchestrator::{
    BuilderError, HoldResolution, OrchestrationOutcome, OrchestratorConfig, WorkflowOrchestrator,
    WorkflowOrchestratorBuilder,
};
pub use review::ExternalReviewGate;
pub use validator::{GateDecision, GateValidator};
