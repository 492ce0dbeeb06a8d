use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docflow_types::{
    CancellationTrigger, GateViolationRecord, Order, OrderStatus, WorkflowState,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

// ═══════════════════════════════════════════════════════════════════════════
// CORE TYPES
// ═══════════════════════════════════════════════════════════════════════════

/// Order status transition record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusTransition {
    pub from_status: OrderStatus,
    pub to_status: OrderStatus,
    pub timestamp: DateTime<Utc>,
    pub details: Option<String>,
}

impl StatusTransition {
    pub fn new(from_status: OrderStatus, to_status: OrderStatus, timestamp: DateTime<Utc>) -> Self {
        Self {
            from_status,
            to_status,
            timestamp,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Outcome recorded for a cancellation's refund
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStatus {
    /// Gateway confirmed the refund
    Settled,
    /// Nothing to refund; the gateway was not called
    SkippedZero,
    /// Gateway failed; an operator must retry
    ManualRetry,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Settled => "SETTLED",
            SettlementStatus::SkippedZero => "SKIPPED_ZERO",
            SettlementStatus::ManualRetry => "MANUAL_RETRY",
        }
    }

    pub fn parse(s: &str) -> Option<SettlementStatus> {
        match s {
            "SETTLED" => Some(SettlementStatus::Settled),
            "SKIPPED_ZERO" => Some(SettlementStatus::SkippedZero),
            "MANUAL_RETRY" => Some(SettlementStatus::ManualRetry),
            _ => None,
        }
    }
}

/// Exactly one per (order, trigger)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettlementEvent {
    pub order_id: String,
    pub trigger: CancellationTrigger,
    pub amount: Decimal,
    pub settlement_id: Option<String>,
    pub status: SettlementStatus,
    pub recorded_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════
// ERROR TYPES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate record ID: {0}")]
    DuplicateId(String),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),
}

// ═══════════════════════════════════════════════════════════════════════════
// STORE TRAIT
// ═══════════════════════════════════════════════════════════════════════════

/// Durable store for orders and workflow state - can be implemented for different backends
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Store a new order
    async fn create_order(&self, order: &Order) -> Result<(), StoreError>;

    /// Get order by ID
    async fn get_order(&self, id: &str) -> Result<Option<Order>, StoreError>;

    /// Update full order record (status changes go through `transition_order`)
    async fn update_order(&self, order: &Order) -> Result<(), StoreError>;

    /// Conditional status update: applies only while the order is in `expected`.
    /// Returns whether the update was applied.
    async fn transition_order(
        &self,
        id: &str,
        expected: OrderStatus,
        new_status: OrderStatus,
        at: DateTime<Utc>,
        details: Option<String>,
    ) -> Result<bool, StoreError>;

    /// Record that a cascade step ran (or was started) for this order
    async fn touch_cascade_activity(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Orders in `status` whose status and cascade activity are both no newer than `idle_since`
    async fn list_waiting(
        &self,
        status: OrderStatus,
        idle_since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>, StoreError>;

    /// Status transition history for an order
    async fn get_history(&self, order_id: &str) -> Result<Vec<StatusTransition>, StoreError>;

    /// Store a new workflow; fails with `DuplicateId` if the order already has one
    async fn create_workflow(&self, state: &WorkflowState) -> Result<(), StoreError>;

    async fn get_workflow(&self, id: &str) -> Result<Option<WorkflowState>, StoreError>;

    async fn get_workflow_by_order(
        &self,
        order_id: &str,
    ) -> Result<Option<WorkflowState>, StoreError>;

    /// Durably commit the workflow state
    async fn save_workflow(&self, state: &WorkflowState) -> Result<(), StoreError>;

    /// Record a rejected phase entry
    async fn record_violation(&self, record: &GateViolationRecord) -> Result<(), StoreError>;

    async fn list_violations(&self, workflow_id: &str)
        -> Result<Vec<GateViolationRecord>, StoreError>;

    /// Insert-once settlement record. Returns `false` when one already exists
    /// for the same (order, trigger).
    async fn record_settlement(&self, event: &SettlementEvent) -> Result<bool, StoreError>;

    async fn list_settlements(&self, order_id: &str) -> Result<Vec<SettlementEvent>, StoreError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY STORE (for testing)
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct InMemoryStore {
    orders: Arc<RwLock<HashMap<String, Order>>>,
    transitions: Arc<RwLock<HashMap<String, Vec<StatusTransition>>>>,
    workflows: Arc<RwLock<HashMap<String, WorkflowState>>>,
    violations: Arc<RwLock<Vec<GateViolationRecord>>>,
    settlements: Arc<RwLock<Vec<SettlementEvent>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of orders (for testing)
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    /// Number of workflows (for testing)
    pub async fn workflow_count(&self) -> usize {
        self.workflows.read().await.len()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn create_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(StoreError::DuplicateId(order.id.clone()));
        }
        orders.insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn get_order(&self, id: &str) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.read().await.get(id).cloned())
    }

    async fn update_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut orders = self.orders.write().await;
        if !orders.contains_key(&order.id) {
            return Err(StoreError::NotFound(order.id.clone()));
        }
        orders.insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn transition_order(
        &self,
        id: &str,
        expected: OrderStatus,
        new_status: OrderStatus,
        at: DateTime<Utc>,
        details: Option<String>,
    ) -> Result<bool, StoreError> {
        // Check and write under one lock, like a conditional UPDATE
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if order.status != expected {
            return Ok(false);
        }

        order.status = new_status;
        order.status_changed_at = at;
        order.updated_at = at;

        let transition = StatusTransition {
            from_status: expected,
            to_status: new_status,
            timestamp: at,
            details,
        };
        self.transitions
            .write()
            .await
            .entry(id.to_string())
            .or_default()
            .push(transition);

        Ok(true)
    }

    async fn touch_cascade_activity(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        order.last_cascade_activity_at = Some(at);
        Ok(())
    }

    async fn list_waiting(
        &self,
        status: OrderStatus,
        idle_since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>, StoreError> {
        let orders = self.orders.read().await;
        let mut results: Vec<_> = orders
            .values()
            .filter(|o| o.status == status && o.status_changed_at <= idle_since)
            .filter(|o| {
                o.last_cascade_activity_at
                    .map_or(true, |activity| activity <= idle_since)
            })
            .cloned()
            .collect();

        results.sort_by_key(|o| o.status_changed_at);
        results.truncate(limit);
        Ok(results)
    }

    async fn get_history(&self, order_id: &str) -> Result<Vec<StatusTransition>, StoreError> {
        Ok(self
            .transitions
            .read()
            .await
            .get(order_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_workflow(&self, state: &WorkflowState) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write().await;
        if workflows.contains_key(&state.id)
            || workflows.values().any(|w| w.order_id == state.order_id)
        {
            return Err(StoreError::DuplicateId(state.id.clone()));
        }
        workflows.insert(state.id.clone(), state.clone());
        Ok(())
    }

    async fn get_workflow(&self, id: &str) -> Result<Option<WorkflowState>, StoreError> {
        Ok(self.workflows.read().await.get(id).cloned())
    }

    async fn get_workflow_by_order(
        &self,
        order_id: &str,
    ) -> Result<Option<WorkflowState>, StoreError> {
        Ok(self
            .workflows
            .read()
            .await
            .values()
            .find(|w| w.order_id == order_id)
            .cloned())
    }

    async fn save_workflow(&self, state: &WorkflowState) -> Result<(), StoreError> {
        let mut workflows = self.workflows.write().await;
        if !workflows.contains_key(&state.id) {
            return Err(StoreError::NotFound(state.id.clone()));
        }
        workflows.insert(state.id.clone(), state.clone());
        Ok(())
    }

    async fn record_violation(&self, record: &GateViolationRecord) -> Result<(), StoreError> {
        self.violations.write().await.push(record.clone());
        Ok(())
    }

    async fn list_violations(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<GateViolationRecord>, StoreError> {
        Ok(self
            .violations
            .read()
            .await
            .iter()
            .filter(|v| v.workflow_id == workflow_id)
            .cloned()
            .collect())
    }

    async fn record_settlement(&self, event: &SettlementEvent) -> Result<bool, StoreError> {
        let mut settlements = self.settlements.write().await;
        if settlements
            .iter()
            .any(|s| s.order_id == event.order_id && s.trigger == event.trigger)
        {
            return Ok(false);
        }
        settlements.push(event.clone());
        Ok(true)
    }

    async fn list_settlements(&self, order_id: &str) -> Result<Vec<SettlementEvent>, StoreError> {
        Ok(self
            .settlements
            .read()
            .await
            .iter()
            .filter(|s| s.order_id == order_id)
            .cloned()
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use docflow_types::{PhaseId, Tier};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn create_test_order() -> Order {
        Order::new("order-1", Tier::B, Decimal::new(50000, 2), at(0)).with_payment_ref("pay-1")
    }

    #[tokio::test]
    async fn test_create_order() {
        let store = InMemoryStore::new();
        let order = create_test_order();

        store.create_order(&order).await.unwrap();

        let retrieved = store.get_order("order-1").await.unwrap();
        assert_eq!(retrieved, Some(order));
        assert_eq!(store.order_count().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_order_error() {
        let store = InMemoryStore::new();
        let order = create_test_order();

        store.create_order(&order).await.unwrap();
        let result = store.create_order(&order).await;

        assert!(matches!(result, Err(StoreError::DuplicateId(_))));
    }

    #[tokio::test]
    async fn test_conditional_transition() {
        let store = InMemoryStore::new();
        store.create_order(&create_test_order()).await.unwrap();

        let applied = store
            .transition_order(
                "order-1",
                OrderStatus::Submitted,
                OrderStatus::InProgress,
                at(10),
                Some("workflow started".to_string()),
            )
            .await
            .unwrap();
        assert!(applied);

        // Stale expectation is refused and leaves the record untouched
        let applied = store
            .transition_order("order-1", OrderStatus::Hold, OrderStatus::Cancelled, at(20), None)
            .await
            .unwrap();
        assert!(!applied);

        let order = store.get_order("order-1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::InProgress);
        assert_eq!(order.status_changed_at, at(10));

        let history = store.get_history("order-1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from_status, OrderStatus::Submitted);
        assert_eq!(history[0].details.as_deref(), Some("workflow started"));
    }

    #[tokio::test]
    async fn test_transition_missing_order() {
        let store = InMemoryStore::new();
        let result = store
            .transition_order("nope", OrderStatus::Hold, OrderStatus::Cancelled, at(0), None)
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_waiting_respects_activity() {
        let store = InMemoryStore::new();

        let mut idle = create_test_order();
        idle.status = OrderStatus::Hold;
        store.create_order(&idle).await.unwrap();

        let mut active = create_test_order();
        active.id = "order-2".to_string();
        active.status = OrderStatus::Hold;
        store.create_order(&active).await.unwrap();
        store
            .touch_cascade_activity("order-2", at(0) + Duration::days(5))
            .await
            .unwrap();

        let mut other = create_test_order();
        other.id = "order-3".to_string();
        other.status = OrderStatus::InProgress;
        store.create_order(&other).await.unwrap();

        let waiting = store
            .list_waiting(OrderStatus::Hold, at(0) + Duration::days(1), 10)
            .await
            .unwrap();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].id, "order-1");

        let waiting = store.list_waiting(OrderStatus::Hold, at(0), 0).await.unwrap();
        assert!(waiting.is_empty());
    }

    #[tokio::test]
    async fn test_workflow_once_per_order() {
        let store = InMemoryStore::new();
        let state = WorkflowState::new("wf-1", "order-1", Tier::A, at(0));
        store.create_workflow(&state).await.unwrap();

        let again = WorkflowState::new("wf-2", "order-1", Tier::A, at(0));
        let result = store.create_workflow(&again).await;
        assert!(matches!(result, Err(StoreError::DuplicateId(_))));

        let found = store.get_workflow_by_order("order-1").await.unwrap().unwrap();
        assert_eq!(found.id, "wf-1");
        assert_eq!(store.workflow_count().await, 1);
    }

    #[tokio::test]
    async fn test_save_workflow() {
        let store = InMemoryStore::new();
        let mut state = WorkflowState::new("wf-1", "order-1", Tier::A, at(0));
        store.create_workflow(&state).await.unwrap();

        state.record_output(PhaseId::Intake, serde_json::json!({"facts": "..."}));
        state.current_phase = PhaseId::Analysis;
        store.save_workflow(&state).await.unwrap();

        let loaded = store.get_workflow("wf-1").await.unwrap().unwrap();
        assert_eq!(loaded.current_phase, PhaseId::Analysis);
        assert!(loaded.is_completed(PhaseId::Intake));

        let missing = WorkflowState::new("wf-9", "order-9", Tier::A, at(0));
        assert!(matches!(
            store.save_workflow(&missing).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_settlement_recorded_once() {
        let store = InMemoryStore::new();
        let event = SettlementEvent {
            order_id: "order-1".to_string(),
            trigger: CancellationTrigger::HoldTimeout,
            amount: Decimal::new(50000, 2),
            settlement_id: Some("re_1".to_string()),
            status: SettlementStatus::Settled,
            recorded_at: at(0),
        };

        assert!(store.record_settlement(&event).await.unwrap());
        assert!(!store.record_settlement(&event).await.unwrap());

        let mut other = event.clone();
        other.trigger = CancellationTrigger::FinalApprovalTimeout;
        assert!(store.record_settlement(&other).await.unwrap());

        assert_eq!(store.list_settlements("order-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_violations_by_workflow() {
        let store = InMemoryStore::new();
        let record = GateViolationRecord::critical(
            "wf-1",
            "order-1",
            PhaseId::Intake,
            PhaseId::Drafting,
            vec![PhaseId::Research],
            at(0),
        );
        store.record_violation(&record).await.unwrap();

        assert_eq!(store.list_violations("wf-1").await.unwrap(), vec![record]);
        assert!(store.list_violations("wf-2").await.unwrap().is_empty());
    }
}
