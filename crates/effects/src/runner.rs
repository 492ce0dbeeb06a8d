use docflow_types::{EffectList, PendingEffect};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::backoff::ExponentialBackoff;
use crate::bus::{BusError, EventBus};

/// Per-effect retry budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    /// Delay schedule for the retries that follow the first attempt
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.initial_delay, self.max_delay)
            .with_max_attempts(self.max_attempts.saturating_sub(1))
    }
}

/// Run `op` until it succeeds or the policy's attempts are spent
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut backoff = policy.backoff();
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        operation = label,
                        attempt = backoff.current_attempt(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(e),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedEffect {
    pub effect: PendingEffect,
    pub error: BusError,
}

/// What happened to one batch of effects
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectReport {
    pub applied: usize,
    pub failed: Vec<FailedEffect>,
}

impl EffectReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Executes the effects a step returned, after the step's state has been committed.
///
/// Each effect gets its own retry budget; a failure is reported and never
/// blocks the effects after it.
#[derive(Clone)]
pub struct EffectRunner {
    bus: Arc<dyn EventBus>,
    policy: RetryPolicy,
}

impl EffectRunner {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            bus,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    pub async fn run(&self, effects: EffectList) -> EffectReport {
        let mut report = EffectReport::default();

        for effect in effects.into_vec() {
            let label = effect.describe();
            match retry_with_backoff(&self.policy, &label, || self.apply(&effect)).await {
                Ok(()) => {
                    debug!(effect = %label, "Effect applied");
                    report.applied += 1;
                }
                Err(error) => {
                    warn!(effect = %label, error = %error, "Effect failed after retries");
                    report.failed.push(FailedEffect { effect, error });
                }
            }
        }

        report
    }

    async fn apply(&self, effect: &PendingEffect) -> Result<(), BusError> {
        match effect {
            PendingEffect::Emit(event) => self.bus.emit(event).await,
            PendingEffect::Schedule(entry) => self.bus.schedule_delayed(entry).await,
            PendingEffect::CancelScheduled(key) => {
                let cancelled = self.bus.cancel_scheduled(key).await?;
                debug!(key = %key, cancelled, "Cascade steps cancelled");
                Ok(())
            }
        }
    }
}
