//! Tracing and log context for docflow
//!
//! - Subscriber setup with an env filter and plain or JSON output
//! - A layer counting `severity = "CRITICAL"` events for alerting
//! - Correlation ids and per-order workflow spans
//! - Error context enrichment for `Result`s

pub mod context;
pub mod subscriber;

pub use context::{CorrelationId, ErrorContext, WorkflowSpan};
pub use subscriber::{
    init_tracing, init_tracing_with_alerts, CriticalEventLayer, CriticalEvents, LoggingSettings,
    TracingError, DEFAULT_FILTER,
};
