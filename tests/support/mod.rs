//! Mocks and harness shared by the engine scenario suites

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use docflow::{
    GatewayError, PaymentGateway, PhaseExecutor, PhaseInput, PhaseResult, Tier, WorkflowEngine,
};
use docflow_effects::InMemoryEventBus;
use docflow_store::{InMemoryStore, SettlementEvent, StatusTransition, StoreError, WorkflowStore};
use docflow_types::{
    Clock, GateViolationRecord, ManualClock, Order, OrderStatus, PhaseId, WorkflowState,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

// ═══════════════════════════════════════════════════════════════════════════
// MOCK IMPLEMENTATIONS FOR TESTING
// ═══════════════════════════════════════════════════════════════════════════

/// Plays back queued outputs per phase, otherwise produces a passing result
#[derive(Default)]
pub struct ScriptedExecutor {
    scripted: RwLock<HashMap<PhaseId, VecDeque<Value>>>,
    pub calls: Arc<RwLock<Vec<PhaseInput>>>,
}

impl ScriptedExecutor {
    pub async fn script(&self, phase: PhaseId, output: Value) {
        self.scripted
            .write()
            .await
            .entry(phase)
            .or_default()
            .push_back(output);
    }

    pub async fn count(&self, phase: PhaseId) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|input| input.phase == phase)
            .count()
    }

    pub async fn last_input(&self, phase: PhaseId) -> Option<PhaseInput> {
        self.calls
            .read()
            .await
            .iter()
            .rev()
            .find(|input| input.phase == phase)
            .cloned()
    }
}

#[async_trait]
impl PhaseExecutor for ScriptedExecutor {
    async fn execute(&self, phase: PhaseId, input: &PhaseInput) -> PhaseResult {
        self.calls.write().await.push(input.clone());

        if let Some(output) = self
            .scripted
            .write()
            .await
            .get_mut(&phase)
            .and_then(VecDeque::pop_front)
        {
            return PhaseResult::ok_json(&output);
        }

        let output = match phase {
            PhaseId::Analysis => json!({"issues": ["unpaid invoice"], "hold_required": false}),
            PhaseId::Drafting => json!({"draft": "draft v0"}),
            PhaseId::Grading => json!({"score": 92.0}),
            PhaseId::Revision => json!({
                "draft": format!("draft v{}", input.revision_loop_count + 1),
                "new_references": false,
            }),
            PhaseId::FinalAssembly => json!({"document": "assembled"}),
            _ => json!({"phase": phase.as_str(), "ok": true}),
        };
        PhaseResult::ok_json(&output)
    }
}

/// Records every refund request; optionally refuses them all
#[derive(Default)]
pub struct RecordingGateway {
    pub refunds: Arc<RwLock<Vec<(String, Decimal)>>>,
    pub refuse: bool,
}

impl RecordingGateway {
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Default::default()
        }
    }

    pub async fn calls(&self) -> Vec<(String, Decimal)> {
        self.refunds.read().await.clone()
    }
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn refund(
        &self,
        _payment_ref: &str,
        amount: Decimal,
        idempotency_key: &str,
    ) -> Result<String, GatewayError> {
        self.refunds
            .write()
            .await
            .push((idempotency_key.to_string(), amount));
        if self.refuse {
            return Err(GatewayError::Unavailable("gateway maintenance".to_string()));
        }
        Ok(format!("stl-{idempotency_key}"))
    }
}

/// Store calls that [`FlakyStore`] can be told to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreCall {
    GetOrder,
    UpdateOrder,
    TransitionOrder,
    GetWorkflowByOrder,
    SaveWorkflow,
    RecordSettlement,
}

/// In-memory store that fails chosen calls a set number of times
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryStore,
    failures: RwLock<HashMap<StoreCall, usize>>,
    pub injected: Arc<RwLock<Vec<StoreCall>>>,
}

impl FlakyStore {
    pub async fn fail_next(&self, call: StoreCall) {
        *self.failures.write().await.entry(call).or_default() += 1;
    }

    async fn check(&self, call: StoreCall) -> Result<(), StoreError> {
        let mut failures = self.failures.write().await;
        match failures.get_mut(&call) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                self.injected.write().await.push(call);
                Err(StoreError::ConnectionError(format!("{call:?} interrupted")))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl WorkflowStore for FlakyStore {
    async fn create_order(&self, order: &Order) -> Result<(), StoreError> {
        self.inner.create_order(order).await
    }

    async fn get_order(&self, id: &str) -> Result<Option<Order>, StoreError> {
        self.check(StoreCall::GetOrder).await?;
        self.inner.get_order(id).await
    }

    async fn update_order(&self, order: &Order) -> Result<(), StoreError> {
        self.check(StoreCall::UpdateOrder).await?;
        self.inner.update_order(order).await
    }

    async fn transition_order(
        &self,
        id: &str,
        expected: OrderStatus,
        new_status: OrderStatus,
        at: DateTime<Utc>,
        details: Option<String>,
    ) -> Result<bool, StoreError> {
        self.check(StoreCall::TransitionOrder).await?;
        self.inner
            .transition_order(id, expected, new_status, at, details)
            .await
    }

    async fn touch_cascade_activity(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.touch_cascade_activity(id, at).await
    }

    async fn list_waiting(
        &self,
        status: OrderStatus,
        idle_since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>, StoreError> {
        self.inner.list_waiting(status, idle_since, limit).await
    }

    async fn get_history(&self, order_id: &str) -> Result<Vec<StatusTransition>, StoreError> {
        self.inner.get_history(order_id).await
    }

    async fn create_workflow(&self, state: &WorkflowState) -> Result<(), StoreError> {
        self.inner.create_workflow(state).await
    }

    async fn get_workflow(&self, id: &str) -> Result<Option<WorkflowState>, StoreError> {
        self.inner.get_workflow(id).await
    }

    async fn get_workflow_by_order(
        &self,
        order_id: &str,
    ) -> Result<Option<WorkflowState>, StoreError> {
        self.check(StoreCall::GetWorkflowByOrder).await?;
        self.inner.get_workflow_by_order(order_id).await
    }

    async fn save_workflow(&self, state: &WorkflowState) -> Result<(), StoreError> {
        self.check(StoreCall::SaveWorkflow).await?;
        self.inner.save_workflow(state).await
    }

    async fn record_violation(&self, record: &GateViolationRecord) -> Result<(), StoreError> {
        self.inner.record_violation(record).await
    }

    async fn list_violations(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<GateViolationRecord>, StoreError> {
        self.inner.list_violations(workflow_id).await
    }

    async fn record_settlement(&self, event: &SettlementEvent) -> Result<bool, StoreError> {
        self.check(StoreCall::RecordSettlement).await?;
        self.inner.record_settlement(event).await
    }

    async fn list_settlements(&self, order_id: &str) -> Result<Vec<SettlementEvent>, StoreError> {
        self.inner.list_settlements(order_id).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HARNESS
// ═══════════════════════════════════════════════════════════════════════════

pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

pub struct Harness {
    pub store: Arc<dyn WorkflowStore>,
    pub bus: Arc<InMemoryEventBus>,
    pub clock: Arc<ManualClock>,
    pub executor: Arc<ScriptedExecutor>,
    pub gateway: Arc<RecordingGateway>,
    pub engine: WorkflowEngine,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_parts(Arc::new(InMemoryStore::new()), RecordingGateway::default()).await
    }

    pub async fn with_gateway(gateway: RecordingGateway) -> Self {
        Self::with_parts(Arc::new(InMemoryStore::new()), gateway).await
    }

    /// Harness over a store whose calls can be made to fail
    pub async fn flaky() -> (Self, Arc<FlakyStore>) {
        let store = Arc::new(FlakyStore::default());
        let harness = Self::with_parts(store.clone(), RecordingGateway::default()).await;
        (harness, store)
    }

    pub async fn with_parts(store: Arc<dyn WorkflowStore>, gateway: RecordingGateway) -> Self {
        let bus = Arc::new(InMemoryEventBus::new());
        let clock = Arc::new(ManualClock::new(epoch()));
        let executor = Arc::new(ScriptedExecutor::default());
        let gateway = Arc::new(gateway);

        let engine = WorkflowEngine::builder()
            .with_store(store.clone())
            .with_executor(executor.clone())
            .with_in_memory_bus(bus.clone())
            .with_payment_gateway(gateway.clone())
            .with_clock(clock.clone())
            .build()
            .unwrap();

        Self {
            store,
            bus,
            clock,
            executor,
            gateway,
            engine,
        }
    }

    pub async fn add_order(&self, id: &str, tier: Tier, amount: &str) {
        let order = Order::new(id, tier, amount.parse().unwrap(), self.clock.now())
            .with_payment_ref(format!("pay-{id}"));
        self.store.create_order(&order).await.unwrap();
    }

    pub async fn status(&self, id: &str) -> OrderStatus {
        self.store.get_order(id).await.unwrap().unwrap().status
    }

    pub async fn workflow(&self, order_id: &str) -> WorkflowState {
        self.store
            .get_workflow_by_order(order_id)
            .await
            .unwrap()
            .unwrap()
    }

    /// Advance the clock and fire what became due
    pub async fn advance_and_fire(&self, by: chrono::Duration) -> Vec<docflow::StepOutcome> {
        self.clock.advance(by);
        self.engine
            .fire_due(self.clock.now())
            .await
            .unwrap()
            .into_iter()
            .map(|fired| fired.outcome.unwrap())
            .collect()
    }
}
