use chrono::{DateTime, Utc};
use docflow_cascade::{
    CascadeError, CascadeScheduler, PaymentGateway, RecoverySweeper, RefundPolicy,
    StandardRefundPolicy, StepOutcome, SweeperConfig,
};
use docflow_effects::{EffectRunner, EventBus, InMemoryEventBus, RetryPolicy};
use docflow_orchestrator::{
    BuilderError, CheckpointResolution, HoldDetectionConfig, HoldResolution,
    OrchestrationOutcome, OrchestratorConfig, OrchestratorError, PhaseExecutor,
    WorkflowOrchestrator,
};
use docflow_store::{StoreError, WorkflowStore};
use docflow_telemetry::{ErrorContext, WorkflowSpan};
use docflow_types::{
    CheckpointAction, Clock, EventName, SystemClock, TimeoutCascadeEntry, WaitCondition,
    WorkflowEvent,
};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, Instrument};

// ═══════════════════════════════════════════════════════════════════════════
// ERRORS AND OUTCOMES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("cascade error: {0}")]
    Cascade(#[from] CascadeError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("orchestrator builder error: {0}")]
    Builder(#[from] BuilderError),

    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("no in-process timer configured; timers are delivered by the external bus")]
    NoTimer,
}

/// What [`WorkflowEngine::dispatch`] did with an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    CascadeStarted { condition: WaitCondition, steps: usize },
    CascadeCancelled {
        conditions: Vec<WaitCondition>,
        cancelled: usize,
    },
    /// The event owns no cascade, or the order already left the waiting state
    Ignored,
}

/// One timer entry fired by [`WorkflowEngine::fire_due`]
#[derive(Debug)]
pub struct FiredStep {
    pub entry: TimeoutCascadeEntry,
    pub outcome: Result<StepOutcome, CascadeError>,
}

// ═══════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════

/// Builder for [`WorkflowEngine`]
pub struct WorkflowEngineBuilder {
    store: Option<Arc<dyn WorkflowStore>>,
    executor: Option<Arc<dyn PhaseExecutor>>,
    bus: Option<Arc<dyn EventBus>>,
    timer: Option<Arc<InMemoryEventBus>>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    refund_policy: Arc<dyn RefundPolicy>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    hold_detection: HoldDetectionConfig,
    retry_policy: RetryPolicy,
    sweeper: SweeperConfig,
}

impl Default for WorkflowEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowEngineBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            executor: None,
            bus: None,
            timer: None,
            gateway: None,
            refund_policy: Arc::new(StandardRefundPolicy::default()),
            clock: Arc::new(SystemClock),
            config: OrchestratorConfig::default(),
            hold_detection: HoldDetectionConfig::default(),
            retry_policy: RetryPolicy::default(),
            sweeper: SweeperConfig::default(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn WorkflowStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn PhaseExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// External bus; timers are delivered back through [`WorkflowEngine::handle_cascade_step`]
    pub fn with_event_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = Some(bus);
        self.timer = None;
        self
    }

    /// Process-local bus whose timers fire through [`WorkflowEngine::fire_due`]
    pub fn with_in_memory_bus(mut self, bus: Arc<InMemoryEventBus>) -> Self {
        self.bus = Some(bus.clone());
        self.timer = Some(bus);
        self
    }

    pub fn with_payment_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_refund_policy(mut self, policy: Arc<dyn RefundPolicy>) -> Self {
        self.refund_policy = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_hold_detection(mut self, config: HoldDetectionConfig) -> Self {
        self.hold_detection = config;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_sweeper_config(mut self, config: SweeperConfig) -> Self {
        self.sweeper = config;
        self
    }

    pub fn build(self) -> Result<WorkflowEngine, EngineError> {
        let store = self.store.ok_or_else(|| EngineError::MissingField {
            field: "store".to_string(),
        })?;
        let executor = self.executor.ok_or_else(|| EngineError::MissingField {
            field: "executor".to_string(),
        })?;
        let bus = self.bus.ok_or_else(|| EngineError::MissingField {
            field: "bus".to_string(),
        })?;
        let gateway = self.gateway.ok_or_else(|| EngineError::MissingField {
            field: "gateway".to_string(),
        })?;

        let timings = self.config.cascade;
        let effects = EffectRunner::new(bus.clone()).with_policy(self.retry_policy.clone());

        let orchestrator = WorkflowOrchestrator::builder()
            .with_store(store.clone())
            .with_executor(executor)
            .with_event_bus(bus)
            .with_clock(self.clock.clone())
            .with_config(self.config)
            .with_hold_detection(self.hold_detection)
            .with_retry_policy(self.retry_policy.clone())
            .build()?;

        let scheduler = Arc::new(
            CascadeScheduler::new(
                store.clone(),
                effects.clone(),
                self.refund_policy,
                gateway,
                self.clock.clone(),
            )
            .with_timings(timings)
            .with_refund_retry(self.retry_policy),
        );

        let sweeper = RecoverySweeper::new(store.clone(), scheduler.clone(), effects, self.clock.clone())
            .with_config(self.sweeper);

        Ok(WorkflowEngine {
            store,
            orchestrator,
            scheduler,
            sweeper,
            timer: self.timer,
            clock: self.clock,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════

/// Single entry point for hosts: phase execution, review gates, HOLDs,
/// timeout cascades and recovery, all sharing one store, bus and clock.
pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    orchestrator: WorkflowOrchestrator,
    scheduler: Arc<CascadeScheduler>,
    sweeper: RecoverySweeper,
    timer: Option<Arc<InMemoryEventBus>>,
    clock: Arc<dyn Clock>,
}

impl WorkflowEngine {
    pub fn builder() -> WorkflowEngineBuilder {
        WorkflowEngineBuilder::new()
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    pub fn orchestrator(&self) -> &WorkflowOrchestrator {
        &self.orchestrator
    }

    pub fn scheduler(&self) -> &Arc<CascadeScheduler> {
        &self.scheduler
    }

    pub fn sweeper(&self) -> &RecoverySweeper {
        &self.sweeper
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub async fn orchestrate(&self, order_id: &str) -> Result<OrchestrationOutcome, EngineError> {
        let span = WorkflowSpan::new(order_id, "orchestrate");
        let outcome = self
            .orchestrator
            .orchestrate(order_id)
            .instrument(span.span())
            .await
            .with_correlation_id(span.correlation_id)?;
        Ok(outcome)
    }

    pub async fn orchestrate_batch(
        &self,
        order_ids: &[String],
    ) -> Vec<(String, Result<OrchestrationOutcome, OrchestratorError>)> {
        self.orchestrator.orchestrate_batch(order_ids).await
    }

    pub async fn resolve_checkpoint(
        &self,
        workflow_id: &str,
        action: CheckpointAction,
    ) -> Result<CheckpointResolution, EngineError> {
        let resolution = self
            .orchestrator
            .resolve_checkpoint(workflow_id, action)
            .await
            .with_workflow_id(workflow_id)?;
        Ok(resolution)
    }

    pub async fn resolve_hold(
        &self,
        order_id: &str,
        resolution: Value,
    ) -> Result<HoldResolution, EngineError> {
        let span = WorkflowSpan::new(order_id, "resolve_hold");
        let outcome = self
            .orchestrator
            .resolve_hold(order_id, resolution)
            .instrument(span.span())
            .await
            .with_order_id(order_id)?;
        Ok(outcome)
    }

    pub async fn begin_external_review(&self, order_id: &str) -> Result<bool, EngineError> {
        Ok(self.orchestrator.external_review().begin(order_id).await?)
    }

    pub async fn complete_external_review(
        &self,
        order_id: &str,
        approved: bool,
        notes: Option<String>,
    ) -> Result<bool, EngineError> {
        Ok(self
            .orchestrator
            .external_review()
            .complete(order_id, approved, notes)
            .await?)
    }

    pub async fn handle_cascade_step(
        &self,
        order_id: &str,
        step_id: &str,
    ) -> Result<StepOutcome, EngineError> {
        let span = WorkflowSpan::new(order_id, "cascade_step");
        let outcome = self
            .scheduler
            .handle_cascade_step(order_id, step_id)
            .instrument(span.span())
            .await
            .with_order_id(order_id)?;
        Ok(outcome)
    }

    /// Route a bus event to the scheduler.
    ///
    /// Waiting-state events (re)start their cascade while the order is still
    /// waiting; resolution and terminal events cancel it.
    pub async fn dispatch(&self, event: &WorkflowEvent) -> Result<DispatchOutcome, EngineError> {
        let order_id = event.order_id.as_str();

        let condition = match event.name {
            EventName::HoldStarted => Some(WaitCondition::Hold),
            EventName::ExternalReviewStarted => Some(WaitCondition::ExternalReview),
            EventName::FinalApprovalRequested => Some(WaitCondition::FinalApproval),
            _ => None,
        };
        if let Some(condition) = condition {
            // 1. Re-read; a resolution may have landed since the event was published
            let waiting = self
                .store
                .get_order(order_id)
                .await?
                .is_some_and(|order| order.status == condition.waiting_status());
            if !waiting {
                debug!(order_id = %order_id, event = %event.name, "Dispatch ignored; order not waiting");
                return Ok(DispatchOutcome::Ignored);
            }

            // 2. Restart from now
            let steps = self.scheduler.start_cascade(order_id, condition).await?;
            return Ok(DispatchOutcome::CascadeStarted { condition, steps });
        }

        let cancel: &[WaitCondition] = match event.name {
            EventName::HoldResolved => &[WaitCondition::Hold],
            EventName::ExternalReviewResolved => &[WaitCondition::ExternalReview],
            EventName::OrderCancelled | EventName::OrderCompleted => &WaitCondition::ALL,
            _ => &[],
        };
        if cancel.is_empty() {
            return Ok(DispatchOutcome::Ignored);
        }

        let mut cancelled = 0;
        for condition in cancel {
            cancelled += self.scheduler.cancel_cascade(order_id, *condition).await?;
        }
        Ok(DispatchOutcome::CascadeCancelled {
            conditions: cancel.to_vec(),
            cancelled,
        })
    }

    /// Fire every in-process timer entry due at `now`, earliest first.
    /// A failing step is logged and reported; the rest still fire.
    pub async fn fire_due(&self, now: DateTime<Utc>) -> Result<Vec<FiredStep>, EngineError> {
        let timer = self.timer.as_ref().ok_or(EngineError::NoTimer)?;

        let due = timer.take_due(now).await;
        let mut fired = Vec::with_capacity(due.len());
        for entry in due {
            let outcome = self
                .scheduler
                .handle_step(&entry.order_id, entry.step)
                .instrument(WorkflowSpan::new(&entry.order_id, "cascade_step").span())
                .await;

            match &outcome {
                Ok(result) => {
                    debug!(order_id = %entry.order_id, step = %entry.step, outcome = ?result, "Timer fired")
                }
                Err(e) => {
                    error!(order_id = %entry.order_id, step = %entry.step, error = %e, "Timer step failed")
                }
            }
            fired.push(FiredStep { entry, outcome });
        }

        if !fired.is_empty() {
            info!(count = fired.len(), "Fired due cascade steps");
        }
        Ok(fired)
    }

    pub async fn sweep_stuck(&self) -> Result<usize, EngineError> {
        Ok(self.sweeper.sweep_stuck().await?)
    }

    /// Sweep on an interval until shutdown
    pub async fn run_sweeper(
        &self,
        interval: std::time::Duration,
        shutdown: broadcast::Receiver<()>,
    ) {
        self.sweeper.run(interval, shutdown).await
    }
}
