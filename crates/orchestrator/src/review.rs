use docflow_effects::EffectRunner;
use docflow_store::WorkflowStore;
use docflow_types::{
    CancelKey, CascadeTimings, Clock, EffectList, EventName, OrderStatus, WaitCondition,
    WorkflowEvent,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::OrchestratorError;

/// External review of a submitted order, before any phase runs
pub struct ExternalReviewGate {
    store: Arc<dyn WorkflowStore>,
    effects: EffectRunner,
    clock: Arc<dyn Clock>,
    timings: CascadeTimings,
}

impl ExternalReviewGate {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        effects: EffectRunner,
        clock: Arc<dyn Clock>,
        timings: CascadeTimings,
    ) -> Self {
        Self {
            store,
            effects,
            clock,
            timings,
        }
    }

    /// SUBMITTED -> PENDING_REVIEW and start the review timeout.
    /// Returns `false` when the order was not in SUBMITTED.
    pub async fn begin(&self, order_id: &str) -> Result<bool, OrchestratorError> {
        let now = self.clock.now();
        let moved = self
            .store
            .transition_order(
                order_id,
                OrderStatus::Submitted,
                OrderStatus::PendingReview,
                now,
                Some("external review started".to_string()),
            )
            .await?;

        if !moved {
            debug!(order_id = %order_id, "External review not started; order not submitted");
            return Ok(false);
        }

        let mut effects = EffectList::new();
        effects.emit(WorkflowEvent::new(EventName::ExternalReviewStarted, order_id, now));
        effects.start_cascade(
            CancelKey::new(order_id, WaitCondition::ExternalReview),
            self.timings.plan(order_id, WaitCondition::ExternalReview, now),
        );
        self.store.touch_cascade_activity(order_id, now).await?;
        self.effects.run(effects).await;

        info!(order_id = %order_id, "External review started");
        Ok(true)
    }

    /// Close the review. Approval returns the order to SUBMITTED so the
    /// workflow can start; rejection cancels it without a refund.
    /// Returns `false` when no review was pending.
    pub async fn complete(
        &self,
        order_id: &str,
        approved: bool,
        notes: Option<String>,
    ) -> Result<bool, OrchestratorError> {
        let now = self.clock.now();
        let target = if approved {
            OrderStatus::Submitted
        } else {
            OrderStatus::Cancelled
        };

        let moved = self
            .store
            .transition_order(
                order_id,
                OrderStatus::PendingReview,
                target,
                now,
                notes.clone().or_else(|| Some("external review resolved".to_string())),
            )
            .await?;

        if !moved {
            debug!(order_id = %order_id, "No external review pending");
            return Ok(false);
        }

        let mut effects = EffectList::new();
        effects.cancel(CancelKey::new(order_id, WaitCondition::ExternalReview));
        effects.emit(
            WorkflowEvent::new(EventName::ExternalReviewResolved, order_id, now)
                .with_payload(json!({ "approved": approved, "notes": notes })),
        );
        if !approved {
            effects.emit(
                WorkflowEvent::new(EventName::OrderCancelled, order_id, now)
                    .with_payload(json!({ "trigger": "external_review_rejected" })),
            );
        }
        self.effects.run(effects).await;

        info!(order_id = %order_id, approved, "External review resolved");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use docflow_effects::InMemoryEventBus;
    use docflow_store::InMemoryStore;
    use docflow_types::{ManualClock, Order, Tier};

    fn setup() -> (Arc<InMemoryStore>, Arc<InMemoryEventBus>, ExternalReviewGate) {
        let store = Arc::new(InMemoryStore::new());
        let bus = Arc::new(InMemoryEventBus::new());
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let gate = ExternalReviewGate::new(
            store.clone(),
            EffectRunner::new(bus.clone()),
            clock,
            CascadeTimings::default(),
        );
        (store, bus, gate)
    }

    async fn submitted_order(store: &InMemoryStore) {
        let order = Order::new("order-1", Tier::A, Default::default(), Utc::now());
        store.create_order(&order).await.unwrap();
    }

    #[tokio::test]
    async fn test_begin_schedules_timeout() {
        let (store, bus, gate) = setup();
        submitted_order(&store).await;

        assert!(gate.begin("order-1").await.unwrap());
        assert!(!gate.begin("order-1").await.unwrap());

        let order = store.get_order("order-1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::PendingReview);

        let pending = bus.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending[0].scheduled_fire_time,
            Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::days(7)
        );
        assert_eq!(bus.emitted_named(EventName::ExternalReviewStarted).await.len(), 1);
    }

    #[tokio::test]
    async fn test_approval_returns_to_submitted_and_cancels_timer() {
        let (store, bus, gate) = setup();
        submitted_order(&store).await;
        gate.begin("order-1").await.unwrap();

        assert!(gate.complete("order-1", true, None).await.unwrap());
        assert!(bus.pending().await.is_empty());

        let order = store.get_order("order-1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Submitted);

        // Second resolution is a no-op
        assert!(!gate.complete("order-1", false, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejection_cancels_order() {
        let (store, bus, gate) = setup();
        submitted_order(&store).await;
        gate.begin("order-1").await.unwrap();

        gate.complete("order-1", false, Some("out of scope".to_string()))
            .await
            .unwrap();

        let order = store.get_order("order-1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(bus.emitted_named(EventName::OrderCancelled).await.len(), 1);
    }
}
