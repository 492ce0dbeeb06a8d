//! docflow: durable workflow orchestration for document-generation orders
//!
//! The [`WorkflowEngine`] ties together the component crates:
//!
//! - [`docflow_orchestrator`] runs phases in registry order behind the gate
//!   validator, detects HOLDs, and drives the bounded revision loop and
//!   review checkpoints.
//! - [`docflow_cascade`] schedules and fires timeout cascades for HOLD,
//!   external review and final approval, settles refunds, and recovers
//!   stuck cascades.
//! - [`docflow_store`] persists orders and workflow state with conditional
//!   status updates; [`docflow_effects`] delivers events and timers.
//!
//! [`bootstrap`] builds an engine from a [`docflow_config::AppConfig`].
//!
//! # Example
//!
//! ```no_run
//! use docflow::bootstrap::{self, Collaborators};
//! # async fn run(collaborators: Collaborators) -> anyhow::Result<()> {
//! let config = bootstrap::load_config(Some(std::path::Path::new("config/production.toml")))?;
//! docflow_telemetry::init_tracing(&bootstrap::logging_settings(&config.service))?;
//!
//! let engine = bootstrap::build_engine(&config, collaborators).await?;
//! engine.orchestrate("order-1").await?;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod engine;

pub use engine::{DispatchOutcome, EngineError, FiredStep, WorkflowEngine, WorkflowEngineBuilder};

pub use docflow_cascade::{
    GatewayError, PaymentGateway, RefundOutcome, RefundPolicy, StandardRefundPolicy, StepOutcome,
};
pub use docflow_orchestrator::{
    CheckpointResolution, HoldResolution, OrchestrationOutcome, OrchestratorConfig, PhaseExecutor,
    PhaseInput, PhaseResult,
};
pub use docflow_types::{CheckpointAction, OrderStatus, Tier};
