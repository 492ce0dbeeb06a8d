use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docflow_types::{CancelKey, EventName, TimeoutCascadeEntry, WorkflowEvent};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("bus unavailable: {0}")]
    Unavailable(String),

    #[error("event rejected: {0}")]
    Rejected(String),
}

/// Event bus with delayed, cancellable delivery
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event immediately
    async fn emit(&self, event: &WorkflowEvent) -> Result<(), BusError>;

    /// Deliver a cascade step at its scheduled fire time
    async fn schedule_delayed(&self, entry: &TimeoutCascadeEntry) -> Result<(), BusError>;

    /// Suppress every unfired entry sharing `key`. Returns how many were removed.
    async fn cancel_scheduled(&self, key: &CancelKey) -> Result<usize, BusError>;
}

/// Process-local bus; timer entries fire when the host calls [`take_due`](Self::take_due)
#[derive(Debug, Default, Clone)]
pub struct InMemoryEventBus {
    emitted: Arc<RwLock<Vec<WorkflowEvent>>>,
    scheduled: Arc<RwLock<Vec<TimeoutCascadeEntry>>>,
    failures_remaining: Arc<AtomicU32>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` bus calls fail with `Unavailable` (for testing)
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Remove and return entries due at `now`, earliest first
    pub async fn take_due(&self, now: DateTime<Utc>) -> Vec<TimeoutCascadeEntry> {
        let mut scheduled = self.scheduled.write().await;
        let (mut due, pending): (Vec<_>, Vec<_>) =
            scheduled.drain(..).partition(|entry| entry.is_due(now));
        *scheduled = pending;

        due.sort_by_key(|entry| entry.scheduled_fire_time);
        due
    }

    pub async fn emitted(&self) -> Vec<WorkflowEvent> {
        self.emitted.read().await.clone()
    }

    pub async fn emitted_named(&self, name: EventName) -> Vec<WorkflowEvent> {
        self.emitted
            .read()
            .await
            .iter()
            .filter(|event| event.name == name)
            .cloned()
            .collect()
    }

    pub async fn pending(&self) -> Vec<TimeoutCascadeEntry> {
        self.scheduled.read().await.clone()
    }

    pub async fn clear_emitted(&self) {
        self.emitted.write().await.clear();
    }

    fn injected_failure(&self) -> Option<BusError> {
        let took = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        took.ok()
            .map(|_| BusError::Unavailable("injected failure".to_string()))
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn emit(&self, event: &WorkflowEvent) -> Result<(), BusError> {
        if let Some(err) = self.injected_failure() {
            return Err(err);
        }

        debug!(event = %event.name, order_id = %event.order_id, "Event emitted");
        self.emitted.write().await.push(event.clone());
        Ok(())
    }

    async fn schedule_delayed(&self, entry: &TimeoutCascadeEntry) -> Result<(), BusError> {
        if let Some(err) = self.injected_failure() {
            return Err(err);
        }

        debug!(
            step = %entry.step,
            order_id = %entry.order_id,
            fire_at = %entry.scheduled_fire_time,
            "Cascade step scheduled"
        );
        self.scheduled.write().await.push(entry.clone());
        Ok(())
    }

    async fn cancel_scheduled(&self, key: &CancelKey) -> Result<usize, BusError> {
        if let Some(err) = self.injected_failure() {
            return Err(err);
        }

        let mut scheduled = self.scheduled.write().await;
        let before = scheduled.len();
        scheduled.retain(|entry| &entry.cancel_condition != key);
        Ok(before - scheduled.len())
    }
}
