pub mod backoff;
pub mod bus;
pub mod runner;

pub use backoff::ExponentialBackoff;
pub use bus::{BusError, EventBus, InMemoryEventBus};
pub use runner::{retry_with_backoff, EffectReport, EffectRunner, FailedEffect, RetryPolicy};
