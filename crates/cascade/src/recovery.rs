use chrono::Duration;
use docflow_effects::EffectRunner;
use docflow_store::WorkflowStore;
use docflow_types::{CascadeTimings, Clock, EffectList, WaitCondition, WorkflowEvent};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::scheduler::{CascadeError, CascadeScheduler};

/// Recovery sweeper settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweeperConfig {
    /// Extra idle time beyond a cascade's horizon before it counts as stuck
    pub safety_margin: Duration,
    /// Most recoveries per sweep
    pub batch_size: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            safety_margin: Duration::hours(24),
            batch_size: 50,
        }
    }
}

impl SweeperConfig {
    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Finds orders whose cascade never started, or stalled, and restarts it
pub struct RecoverySweeper {
    store: Arc<dyn WorkflowStore>,
    scheduler: Arc<CascadeScheduler>,
    effects: EffectRunner,
    clock: Arc<dyn Clock>,
    timings: CascadeTimings,
    config: SweeperConfig,
}

impl RecoverySweeper {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        scheduler: Arc<CascadeScheduler>,
        effects: EffectRunner,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let timings = *scheduler.timings();
        Self {
            store,
            scheduler,
            effects,
            clock,
            timings,
            config: SweeperConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SweeperConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    /// One scan over every waiting status. Returns the number of cascades restarted.
    pub async fn sweep_stuck(&self) -> Result<usize, CascadeError> {
        let now = self.clock.now();
        let mut recovered = 0;

        for condition in WaitCondition::ALL {
            let remaining = self.config.batch_size.saturating_sub(recovered);
            if remaining == 0 {
                break;
            }

            let idle_since = now - self.timings.horizon(condition) - self.config.safety_margin;
            let stuck = self
                .store
                .list_waiting(condition.waiting_status(), idle_since, remaining)
                .await?;

            for order in stuck {
                // One bad order never stops the sweep
                match self.recover(&order.id, condition).await {
                    Ok(true) => recovered += 1,
                    Ok(false) => {}
                    Err(e) => {
                        error!(order_id = %order.id, condition = %condition, error = %e, "Recovery failed");
                    }
                }
            }
        }

        if recovered > 0 {
            info!(recovered, "Recovery sweep restarted stuck cascades");
        } else {
            debug!("Recovery sweep found nothing stuck");
        }
        Ok(recovered)
    }

    async fn recover(&self, order_id: &str, condition: WaitCondition) -> Result<bool, CascadeError> {
        // Re-read: a resolution may have landed since the scan
        let order = match self.store.get_order(order_id).await? {
            Some(order) if order.status == condition.waiting_status() => order,
            _ => {
                debug!(order_id = %order_id, condition = %condition, "Order resolved before recovery");
                return Ok(false);
            }
        };

        let now = self.clock.now();
        let mut event = WorkflowEvent::new(condition.initiating_event(), order_id, now).with_payload(
            json!({
                "recovered": true,
                "waiting_since": order.status_changed_at,
                "last_cascade_activity": order.last_cascade_activity_at,
            }),
        );
        if let Some(state) = self.store.get_workflow_by_order(order_id).await? {
            event = event.with_workflow(state.id);
        }

        let mut effects = EffectList::new();
        effects.emit(event);
        self.effects.run(effects).await;

        self.scheduler.start_cascade(order_id, condition).await?;

        warn!(
            order_id = %order_id,
            condition = %condition,
            waiting_since = %order.status_changed_at,
            "Restarted stuck cascade"
        );
        Ok(true)
    }

    /// Sweep every `interval` until a shutdown signal arrives
    pub async fn run(&self, interval: std::time::Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        info!(interval_secs = interval.as_secs(), "Recovery sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_stuck().await {
                        error!(error = %e, "Recovery sweep failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Recovery sweeper stopping");
                    break;
                }
            }
        }
    }
}
