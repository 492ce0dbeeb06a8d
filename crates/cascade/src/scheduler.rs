use chrono::{DateTime, Utc};
use docflow_effects::{retry_with_backoff, BusError, EffectRunner, RetryPolicy};
use docflow_store::{SettlementEvent, SettlementStatus, StoreError, WorkflowStore};
use docflow_types::{
    CancelKey, CancellationTrigger, CascadeStep, CascadeTimings, Clock, EffectList, EventName,
    HoldReason, Order, OrderStatus, PhaseStatus, WaitCondition, WorkflowEvent,
};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::refund::{PaymentGateway, RefundContext, RefundOutcome, RefundPolicy};

// ═══════════════════════════════════════════════════════════════════════════
// OUTCOMES AND ERRORS
// ═══════════════════════════════════════════════════════════════════════════

/// Result of one fired cascade step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Reminded,
    Escalated,
    Cancelled { refund: RefundOutcome },
    /// The order left the waiting state before the step fired
    NoOp,
    /// The order is already terminal
    Skipped,
}

#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("unknown cascade step: {step_id}")]
    UnknownStep { step_id: String },

    #[error("order not found: {order_id}")]
    OrderNotFound { order_id: String },

    #[error("refund for order {order_id} failed: {reason}")]
    RefundGateway { order_id: String, reason: String },

    #[error("event bus error: {0}")]
    Bus(#[from] BusError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

// ═══════════════════════════════════════════════════════════════════════════
// SCHEDULER
// ═══════════════════════════════════════════════════════════════════════════

/// Schedules and executes the delayed steps of each waiting condition.
///
/// Every step re-reads the order before acting. A step that finds the order
/// no longer waiting does nothing; terminal actions cancel through the
/// store's conditional update so a concurrent human resolution always wins
/// or loses cleanly.
pub struct CascadeScheduler {
    store: Arc<dyn WorkflowStore>,
    effects: EffectRunner,
    refund_policy: Arc<dyn RefundPolicy>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    timings: CascadeTimings,
    refund_retry: RetryPolicy,
}

impl CascadeScheduler {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        effects: EffectRunner,
        refund_policy: Arc<dyn RefundPolicy>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            effects,
            refund_policy,
            gateway,
            clock,
            timings: CascadeTimings::default(),
            refund_retry: RetryPolicy::default(),
        }
    }

    pub fn with_timings(mut self, timings: CascadeTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_refund_retry(mut self, policy: RetryPolicy) -> Self {
        self.refund_retry = policy;
        self
    }

    pub fn timings(&self) -> &CascadeTimings {
        &self.timings
    }

    /// Replace any pending steps of (order, condition) with a fresh cascade from now.
    /// Returns the number of steps scheduled.
    pub async fn start_cascade(
        &self,
        order_id: &str,
        condition: WaitCondition,
    ) -> Result<usize, CascadeError> {
        let now = self.clock.now();
        let entries = self.timings.plan(order_id, condition, now);
        let scheduled = entries.len();

        let mut effects = EffectList::new();
        effects.start_cascade(CancelKey::new(order_id, condition), entries);

        self.store.touch_cascade_activity(order_id, now).await?;
        let report = self.effects.run(effects).await;
        if !report.is_clean() {
            warn!(
                order_id = %order_id,
                condition = %condition,
                failed = report.failed.len(),
                "Cascade only partially scheduled"
            );
        }

        info!(order_id = %order_id, condition = %condition, steps = scheduled, "Cascade started");
        Ok(scheduled)
    }

    /// Suppress unfired steps. Idempotent; returns how many were removed.
    pub async fn cancel_cascade(
        &self,
        order_id: &str,
        condition: WaitCondition,
    ) -> Result<usize, CascadeError> {
        let key = CancelKey::new(order_id, condition);
        let cancelled = self.effects.bus().cancel_scheduled(&key).await?;
        debug!(key = %key, cancelled, "Cascade cancelled");
        Ok(cancelled)
    }

    /// Entry point for the timer bus
    pub async fn handle_cascade_step(
        &self,
        order_id: &str,
        step_id: &str,
    ) -> Result<StepOutcome, CascadeError> {
        let step = CascadeStep::parse(step_id).ok_or_else(|| CascadeError::UnknownStep {
            step_id: step_id.to_string(),
        })?;
        self.handle_step(order_id, step).await
    }

    pub async fn handle_step(
        &self,
        order_id: &str,
        step: CascadeStep,
    ) -> Result<StepOutcome, CascadeError> {
        // 1. Authoritative status
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| CascadeError::OrderNotFound {
                order_id: order_id.to_string(),
            })?;

        if order.status.is_terminal() {
            if let Some(outcome) = self.resume_cancellation(&order, step).await? {
                return Ok(outcome);
            }
            debug!(order_id = %order_id, step = %step, status = %order.status, "Cascade step skipped");
            return Ok(StepOutcome::Skipped);
        }

        let condition = step.condition();
        if order.status != condition.waiting_status() {
            info!(
                order_id = %order_id,
                step = %step,
                status = %order.status,
                "Cascade step lost race with resolution"
            );
            return Ok(StepOutcome::NoOp);
        }

        // 2. Act
        let now = self.clock.now();
        let outcome = match step {
            CascadeStep::HoldReminder => {
                let mut effects = EffectList::new();
                effects.emit(
                    WorkflowEvent::new(EventName::HoldReminder, order_id, now)
                        .with_payload(json!({ "since": order.status_changed_at })),
                );
                self.store.touch_cascade_activity(order_id, now).await?;
                self.effects.run(effects).await;
                StepOutcome::Reminded
            }
            CascadeStep::HoldEscalation => {
                self.escalate(&order, step, None, now).await?;
                StepOutcome::Escalated
            }
            CascadeStep::HoldTerminal => {
                // The reason may have changed since the cascade started
                let reason = self
                    .store
                    .get_workflow_by_order(order_id)
                    .await?
                    .and_then(|state| state.hold_reason);

                match reason {
                    Some(HoldReason::EvidenceGap) => {
                        self.cancel_order(&order, CancellationTrigger::HoldTimeout, now)
                            .await?
                    }
                    other => {
                        self.escalate(&order, step, other, now).await?;
                        StepOutcome::Escalated
                    }
                }
            }
            CascadeStep::ExternalReviewTimeout => {
                self.cancel_order(&order, CancellationTrigger::ExternalReviewTimeout, now)
                    .await?
            }
            CascadeStep::FinalApprovalTimeout => {
                self.cancel_order(&order, CancellationTrigger::FinalApprovalTimeout, now)
                    .await?
            }
        };

        info!(order_id = %order_id, step = %step, outcome = ?outcome, "Cascade step handled");
        Ok(outcome)
    }

    async fn escalate(
        &self,
        order: &Order,
        step: CascadeStep,
        reason: Option<HoldReason>,
        now: DateTime<Utc>,
    ) -> Result<(), CascadeError> {
        let mut effects = EffectList::new();
        effects.emit(
            WorkflowEvent::new(EventName::HoldEscalated, &order.id, now).with_payload(json!({
                "step": step.step_id(),
                "reason": reason,
                "terminal": step.is_terminal(),
            })),
        );
        effects.emit(
            WorkflowEvent::new(EventName::OperatorAlert, &order.id, now).with_payload(json!({
                "alert": "hold_escalation",
                "step": step.step_id(),
            })),
        );

        self.store.touch_cascade_activity(&order.id, now).await?;
        self.effects.run(effects).await;

        warn!(order_id = %order.id, step = %step, reason = ?reason, "Hold escalated to operator");
        Ok(())
    }

    async fn cancel_order(
        &self,
        order: &Order,
        trigger: CancellationTrigger,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome, CascadeError> {
        // 1. Conditional cancel; a concurrent resolution makes this a no-op
        let cancelled = self
            .store
            .transition_order(
                &order.id,
                order.status,
                OrderStatus::Cancelled,
                now,
                Some(cancel_details(trigger)),
            )
            .await?;

        if !cancelled {
            let current = self.store.get_order(&order.id).await?;
            let outcome = match current {
                Some(current) if !current.status.is_terminal() => StepOutcome::NoOp,
                _ => StepOutcome::Skipped,
            };
            info!(order_id = %order.id, trigger = %trigger, "Cancellation lost race");
            return Ok(outcome);
        }

        self.finish_cancellation(order, order.status, trigger, now).await
    }

    /// Redelivery of a step whose cancel landed but whose refund was never
    /// recorded. The settlement key and the gateway idempotency key make the
    /// second attempt safe.
    async fn resume_cancellation(
        &self,
        order: &Order,
        step: CascadeStep,
    ) -> Result<Option<StepOutcome>, CascadeError> {
        let Some(trigger) = CancellationTrigger::for_step(step) else {
            return Ok(None);
        };
        if order.status != OrderStatus::Cancelled {
            return Ok(None);
        }

        let details = cancel_details(trigger);
        let history = self.store.get_history(&order.id).await?;
        let Some(cancel) = history.iter().rev().find(|transition| {
            transition.to_status == OrderStatus::Cancelled
                && transition.details.as_deref() == Some(details.as_str())
        }) else {
            return Ok(None);
        };

        let settled = self
            .store
            .list_settlements(&order.id)
            .await?
            .iter()
            .any(|event| event.trigger == trigger);
        if settled {
            return Ok(None);
        }

        warn!(order_id = %order.id, trigger = %trigger, "Finishing interrupted cancellation");
        let outcome = self
            .finish_cancellation(order, cancel.from_status, trigger, self.clock.now())
            .await?;
        Ok(Some(outcome))
    }

    /// Close the workflow, suppress every cascade and settle the refund
    async fn finish_cancellation(
        &self,
        order: &Order,
        cancelled_from: OrderStatus,
        trigger: CancellationTrigger,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome, CascadeError> {
        let workflow = self.store.get_workflow_by_order(&order.id).await?;
        let phase = workflow.as_ref().map(|state| state.current_phase);
        if let Some(mut state) = workflow {
            if !state.is_terminal() {
                state.phase_status = PhaseStatus::Cancelled;
                state.clear_checkpoint();
                state.updated_at = now;
                self.store.save_workflow(&state).await?;
            }
        }

        let mut effects = EffectList::new();
        for condition in WaitCondition::ALL {
            effects.cancel(CancelKey::new(&order.id, condition));
        }
        effects.emit(
            WorkflowEvent::new(EventName::OrderCancelled, &order.id, now)
                .with_payload(json!({ "trigger": trigger })),
        );

        let context = RefundContext {
            amount_paid: order.amount_paid,
            status: cancelled_from,
            phase,
            trigger,
        };
        let refund = self.settle_refund(order, &context, now, &mut effects).await?;

        self.store.touch_cascade_activity(&order.id, now).await?;
        self.effects.run(effects).await;

        info!(order_id = %order.id, trigger = %trigger, refund = ?refund, "Order auto-cancelled");
        Ok(StepOutcome::Cancelled { refund })
    }

    async fn settle_refund(
        &self,
        order: &Order,
        context: &RefundContext,
        now: DateTime<Utc>,
        effects: &mut EffectList,
    ) -> Result<RefundOutcome, CascadeError> {
        let decision = self.refund_policy.calculate(context);
        let trigger = context.trigger;

        if decision.skip || decision.amount <= Decimal::ZERO {
            self.record(order, trigger, Decimal::ZERO, None, SettlementStatus::SkippedZero, now)
                .await?;
            debug!(order_id = %order.id, trigger = %trigger, "No refund due");
            return Ok(RefundOutcome::SkippedZero);
        }

        let idempotency_key = format!("{}:{}", order.id, trigger);
        let result = match order.payment_ref.as_deref() {
            Some(payment_ref) => retry_with_backoff(&self.refund_retry, "refund", || {
                self.gateway.refund(payment_ref, decision.amount, &idempotency_key)
            })
            .await
            .map_err(|e| CascadeError::RefundGateway {
                order_id: order.id.clone(),
                reason: e.to_string(),
            }),
            None => Err(CascadeError::RefundGateway {
                order_id: order.id.clone(),
                reason: "order has no payment reference".to_string(),
            }),
        };

        match result {
            Ok(settlement_id) => {
                self.record(
                    order,
                    trigger,
                    decision.amount,
                    Some(settlement_id.clone()),
                    SettlementStatus::Settled,
                    now,
                )
                .await?;
                effects.emit(
                    WorkflowEvent::new(EventName::RefundSettled, &order.id, now).with_payload(
                        json!({
                            "settlement_id": settlement_id,
                            "amount": decision.amount,
                            "trigger": trigger,
                        }),
                    ),
                );
                Ok(RefundOutcome::Settled {
                    settlement_id,
                    amount: decision.amount,
                })
            }
            Err(err) => {
                // The order stays cancelled; the refund goes to an operator
                error!(order_id = %order.id, trigger = %trigger, error = %err, "Refund failed, flagging for manual retry");

                if let Some(mut current) = self.store.get_order(&order.id).await? {
                    current.refund_pending_manual = true;
                    current.updated_at = now;
                    self.store.update_order(&current).await?;
                }
                self.record(order, trigger, decision.amount, None, SettlementStatus::ManualRetry, now)
                    .await?;
                effects.emit(
                    WorkflowEvent::new(EventName::RefundFlaggedForRetry, &order.id, now)
                        .with_payload(json!({
                            "amount": decision.amount,
                            "trigger": trigger,
                            "error": err.to_string(),
                        })),
                );
                Ok(RefundOutcome::FlaggedForRetry {
                    amount: decision.amount,
                    reason: err.to_string(),
                })
            }
        }
    }

    async fn record(
        &self,
        order: &Order,
        trigger: CancellationTrigger,
        amount: Decimal,
        settlement_id: Option<String>,
        status: SettlementStatus,
        now: DateTime<Utc>,
    ) -> Result<(), CascadeError> {
        let inserted = self
            .store
            .record_settlement(&SettlementEvent {
                order_id: order.id.clone(),
                trigger,
                amount,
                settlement_id,
                status,
                recorded_at: now,
            })
            .await?;

        if !inserted {
            warn!(order_id = %order.id, trigger = %trigger, "Settlement already recorded");
        }
        Ok(())
    }
}

fn cancel_details(trigger: CancellationTrigger) -> String {
    format!("auto-cancelled: {trigger}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refund::{GatewayError, StandardRefundPolicy};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use docflow_effects::InMemoryEventBus;
    use docflow_store::InMemoryStore;
    use docflow_types::{ManualClock, Tier, WorkflowState};
    use std::str::FromStr;
    use tokio::sync::RwLock;

    #[derive(Default)]
    struct RecordingGateway {
        calls: Arc<RwLock<Vec<(String, Decimal, String)>>>,
        fail: bool,
    }

    #[async_trait]
    impl PaymentGateway for RecordingGateway {
        async fn refund(
            &self,
            payment_ref: &str,
            amount: Decimal,
            idempotency_key: &str,
        ) -> Result<String, GatewayError> {
            self.calls.write().await.push((
                payment_ref.to_string(),
                amount,
                idempotency_key.to_string(),
            ));
            if self.fail {
                return Err(GatewayError::Unavailable("connection reset".to_string()));
            }
            Ok(format!("stl-{idempotency_key}"))
        }
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        bus: Arc<InMemoryEventBus>,
        gateway: Arc<RecordingGateway>,
        scheduler: CascadeScheduler,
    }

    fn fixture(fail_gateway: bool) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let bus = Arc::new(InMemoryEventBus::new());
        let gateway = Arc::new(RecordingGateway {
            fail: fail_gateway,
            ..Default::default()
        });
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let scheduler = CascadeScheduler::new(
            store.clone(),
            EffectRunner::new(bus.clone()),
            Arc::new(StandardRefundPolicy::default()),
            gateway.clone(),
            clock,
        )
        .with_refund_retry(
            RetryPolicy::default()
                .with_delays(std::time::Duration::from_millis(1), std::time::Duration::from_millis(2)),
        );
        Fixture {
            store,
            bus,
            gateway,
            scheduler,
        }
    }

    async fn order_in(store: &InMemoryStore, status: OrderStatus, amount: &str) {
        let order = Order::new("order-1", Tier::A, Decimal::from_str(amount).unwrap(), Utc::now())
            .with_payment_ref("pay-1")
            .with_status(status);
        store.create_order(&order).await.unwrap();
    }

    async fn held_workflow(store: &InMemoryStore, reason: HoldReason) {
        let mut state = WorkflowState::new("wf-1", "order-1", Tier::A, Utc::now());
        state.phase_status = PhaseStatus::Hold;
        state.hold_reason = Some(reason);
        store.create_workflow(&state).await.unwrap();
    }

    #[tokio::test]
    async fn test_start_cascade_replaces_pending_steps() {
        let f = fixture(false);
        order_in(&f.store, OrderStatus::Hold, "100").await;

        assert_eq!(f.scheduler.start_cascade("order-1", WaitCondition::Hold).await.unwrap(), 3);
        assert_eq!(f.scheduler.start_cascade("order-1", WaitCondition::Hold).await.unwrap(), 3);
        assert_eq!(f.bus.pending().await.len(), 3);

        let order = f.store.get_order("order-1").await.unwrap().unwrap();
        assert!(order.last_cascade_activity_at.is_some());

        assert_eq!(f.scheduler.cancel_cascade("order-1", WaitCondition::Hold).await.unwrap(), 3);
        assert_eq!(f.scheduler.cancel_cascade("order-1", WaitCondition::Hold).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_hold_reminder_and_escalation() {
        let f = fixture(false);
        order_in(&f.store, OrderStatus::Hold, "100").await;

        assert_eq!(
            f.scheduler.handle_cascade_step("order-1", "hold.reminder").await.unwrap(),
            StepOutcome::Reminded
        );
        assert_eq!(
            f.scheduler.handle_cascade_step("order-1", "hold.escalation").await.unwrap(),
            StepOutcome::Escalated
        );
        assert_eq!(f.bus.emitted_named(EventName::HoldReminder).await.len(), 1);
        assert_eq!(f.bus.emitted_named(EventName::OperatorAlert).await.len(), 1);
    }

    #[tokio::test]
    async fn test_evidence_gap_terminal_cancels_with_full_refund() {
        let f = fixture(false);
        order_in(&f.store, OrderStatus::Hold, "180.00").await;
        held_workflow(&f.store, HoldReason::EvidenceGap).await;

        let outcome = f
            .scheduler
            .handle_cascade_step("order-1", "hold.terminal")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Cancelled {
                refund: RefundOutcome::Settled {
                    settlement_id: "stl-order-1:hold_timeout".to_string(),
                    amount: Decimal::from_str("180.00").unwrap(),
                }
            }
        );

        let order = f.store.get_order("order-1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        let workflow = f.store.get_workflow("wf-1").await.unwrap().unwrap();
        assert_eq!(workflow.phase_status, PhaseStatus::Cancelled);

        let settlements = f.store.list_settlements("order-1").await.unwrap();
        assert_eq!(settlements.len(), 1);
        assert_eq!(settlements[0].status, SettlementStatus::Settled);

        // Redelivery of the same step is harmless
        assert_eq!(
            f.scheduler.handle_cascade_step("order-1", "hold.terminal").await.unwrap(),
            StepOutcome::Skipped
        );
        assert_eq!(f.gateway.calls.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_revision_stall_terminal_escalates() {
        let f = fixture(false);
        order_in(&f.store, OrderStatus::Hold, "180.00").await;
        held_workflow(&f.store, HoldReason::RevisionStall).await;

        assert_eq!(
            f.scheduler.handle_cascade_step("order-1", "hold.terminal").await.unwrap(),
            StepOutcome::Escalated
        );
        let order = f.store.get_order("order-1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Hold);
        assert!(f.gateway.calls.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_step_after_resolution_is_noop() {
        let f = fixture(false);
        order_in(&f.store, OrderStatus::InProgress, "100").await;

        assert_eq!(
            f.scheduler.handle_step("order-1", CascadeStep::HoldTerminal).await.unwrap(),
            StepOutcome::NoOp
        );
        assert_eq!(
            f.scheduler
                .handle_step("order-1", CascadeStep::FinalApprovalTimeout)
                .await
                .unwrap(),
            StepOutcome::NoOp
        );
        assert!(f.store.list_settlements("order-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_external_review_timeout_never_calls_gateway() {
        let f = fixture(false);
        order_in(&f.store, OrderStatus::PendingReview, "500").await;

        let outcome = f
            .scheduler
            .handle_step("order-1", CascadeStep::ExternalReviewTimeout)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Cancelled {
                refund: RefundOutcome::SkippedZero
            }
        );
        assert!(f.gateway.calls.read().await.is_empty());

        let settlements = f.store.list_settlements("order-1").await.unwrap();
        assert_eq!(settlements[0].status, SettlementStatus::SkippedZero);
        assert_eq!(settlements[0].amount, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_final_approval_timeout_partial_refund() {
        let f = fixture(false);
        order_in(&f.store, OrderStatus::AwaitingApproval, "300.00").await;

        let outcome = f
            .scheduler
            .handle_step("order-1", CascadeStep::FinalApprovalTimeout)
            .await
            .unwrap();
        match outcome {
            StepOutcome::Cancelled {
                refund: RefundOutcome::Settled { amount, .. },
            } => assert_eq!(amount, Decimal::from_str("150.00").unwrap()),
            other => panic!("unexpected outcome: {other:?}"),
        }

        let calls = f.gateway.calls.read().await;
        assert_eq!(calls[0].2, "order-1:final_approval_timeout");
    }

    #[tokio::test]
    async fn test_gateway_failure_flags_manual_retry() {
        let f = fixture(true);
        order_in(&f.store, OrderStatus::AwaitingApproval, "300.00").await;

        let outcome = f
            .scheduler
            .handle_step("order-1", CascadeStep::FinalApprovalTimeout)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            StepOutcome::Cancelled {
                refund: RefundOutcome::FlaggedForRetry { .. }
            }
        ));

        let order = f.store.get_order("order-1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert!(order.refund_pending_manual);

        // Retried under the same idempotency key
        let calls = f.gateway.calls.read().await;
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|(_, _, key)| key == "order-1:final_approval_timeout"));

        assert_eq!(
            f.bus.emitted_named(EventName::RefundFlaggedForRetry).await.len(),
            1
        );
    }

    #[tokio::test]
    async fn test_redelivery_finishes_unsettled_cancellation() {
        let f = fixture(false);
        order_in(&f.store, OrderStatus::AwaitingApproval, "300.00").await;

        // Cancel landed, nothing after it did
        f.store
            .transition_order(
                "order-1",
                OrderStatus::AwaitingApproval,
                OrderStatus::Cancelled,
                Utc::now(),
                Some(cancel_details(CancellationTrigger::FinalApprovalTimeout)),
            )
            .await
            .unwrap();

        let outcome = f
            .scheduler
            .handle_step("order-1", CascadeStep::FinalApprovalTimeout)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Cancelled {
                refund: RefundOutcome::Settled {
                    settlement_id: "stl-order-1:final_approval_timeout".to_string(),
                    amount: Decimal::from_str("150.00").unwrap(),
                }
            }
        );

        // A different trigger's step does not claim the cancellation
        assert_eq!(
            f.scheduler
                .handle_step("order-1", CascadeStep::ExternalReviewTimeout)
                .await
                .unwrap(),
            StepOutcome::Skipped
        );
        assert_eq!(
            f.scheduler
                .handle_step("order-1", CascadeStep::FinalApprovalTimeout)
                .await
                .unwrap(),
            StepOutcome::Skipped
        );
        assert_eq!(f.gateway.calls.read().await.len(), 1);
        assert_eq!(f.store.list_settlements("order-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_suppresses_every_cascade() {
        let f = fixture(false);
        order_in(&f.store, OrderStatus::AwaitingApproval, "0").await;
        f.scheduler
            .start_cascade("order-1", WaitCondition::FinalApproval)
            .await
            .unwrap();

        f.scheduler
            .handle_step("order-1", CascadeStep::FinalApprovalTimeout)
            .await
            .unwrap();
        assert!(f.bus.pending().await.is_empty());
        assert!(f.gateway.calls.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_step() {
        let f = fixture(false);
        assert!(matches!(
            f.scheduler.handle_cascade_step("order-1", "hold.never").await,
            Err(CascadeError::UnknownStep { .. })
        ));
    }

    #[tokio::test]
    async fn test_plan_uses_configured_timings() {
        let f = fixture(false);
        let timings = CascadeTimings {
            final_approval_timeout: Duration::days(3),
            ..CascadeTimings::default()
        };
        let scheduler = CascadeScheduler::new(
            f.store.clone(),
            EffectRunner::new(f.bus.clone()),
            Arc::new(StandardRefundPolicy::default()),
            f.gateway.clone(),
            Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap())),
        )
        .with_timings(timings);
        order_in(&f.store, OrderStatus::AwaitingApproval, "10").await;

        scheduler
            .start_cascade("order-1", WaitCondition::FinalApproval)
            .await
            .unwrap();
        let pending = f.bus.pending().await;
        assert_eq!(
            pending[0].scheduled_fire_time,
            Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::days(3)
        );
    }
}
