use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-order mutual exclusion within one process.
///
/// A single order executes strictly sequentially; different orders never
/// contend.
#[derive(Clone, Default)]
pub struct OrderLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl OrderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire without waiting; `None` while another task holds the order
    pub async fn try_acquire(&self, order_id: &str) -> Option<OwnedMutexGuard<()>> {
        self.lock_for(order_id).await.try_lock_owned().ok()
    }

    /// Wait until the order is free
    pub async fn acquire(&self, order_id: &str) -> OwnedMutexGuard<()> {
        self.lock_for(order_id).await.lock_owned().await
    }

    async fn lock_for(&self, order_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        // Drop entries nobody holds
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(order_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
