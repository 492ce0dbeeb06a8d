use docflow_effects::{EffectRunner, EventBus, RetryPolicy};
use docflow_store::{StoreError, WorkflowStore};
use docflow_types::{
    CancelKey, CascadeTimings, Checkpoint, CheckpointAction, CheckpointType, Clock, EffectList,
    EventName, HoldReason, Order, OrderStatus, PhaseId, PhaseRegistry, PhaseStatus,
    RevisionSource, SystemClock, WaitCondition, WorkflowEvent, WorkflowState, MAX_REVISION_LOOPS,
};
use futures::future::join_all;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::checkpoint::{CheckpointManager, CheckpointResolution};
use crate::error::OrchestratorError;
use crate::executor::{PhaseExecutor, PhaseInput};
use crate::guard::OrderLocks;
use crate::hold::{HoldDecision, HoldDetectionConfig, HoldDetector};
use crate::review::ExternalReviewGate;
use crate::validator::GateValidator;

/// Configuration for the orchestrator
#[derive(Clone, Debug, PartialEq)]
pub struct OrchestratorConfig {
    /// Minimum grade that ends the revision loop
    pub passing_score: f64,

    /// Revision passes allowed before escalating (never above `MAX_REVISION_LOOPS`)
    pub max_revision_loops: u8,

    /// Delays of the cascades started by HOLD and final review
    pub cascade: CascadeTimings,
}

impl OrchestratorConfig {
    pub fn with_passing_score(mut self, score: f64) -> Self {
        self.passing_score = score;
        self
    }

    pub fn with_max_revision_loops(mut self, loops: u8) -> Self {
        self.max_revision_loops = loops.min(MAX_REVISION_LOOPS);
        self
    }

    pub fn with_cascade_timings(mut self, timings: CascadeTimings) -> Self {
        self.cascade = timings;
        self
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            passing_score: 87.0,
            max_revision_loops: MAX_REVISION_LOOPS,
            cascade: CascadeTimings::default(),
        }
    }
}

/// Where a run stopped
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestrationOutcome {
    /// Delivery finished; order COMPLETED
    Completed,
    /// Waiting on external input
    Held { reason: HoldReason },
    /// Waiting on a blocking review
    AwaitingCheckpoint { checkpoint: Checkpoint },
    /// Nothing left to do
    AlreadyTerminal { status: OrderStatus },
}

/// Result of the HOLD resolved signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldResolution {
    Resumed { resume_at: PhaseId },
    /// The order was not on HOLD (already resolved or cancelled)
    NotHeld,
}

/// Decision taken after a phase commits
#[derive(Debug)]
enum Transition {
    Advance(PhaseId),
    Hold {
        decision: HoldDecision,
        resume_at: PhaseId,
    },
    Checkpoint {
        checkpoint_type: CheckpointType,
        payload: Value,
        /// Phase to continue with while an advisory checkpoint is pending
        resume_at: Option<PhaseId>,
    },
    Complete,
}

/// Builder error
#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("missing required field: {field}")]
    MissingField { field: String },
}

/// Builder for WorkflowOrchestrator
pub struct WorkflowOrchestratorBuilder {
    store: Option<Arc<dyn WorkflowStore>>,
    executor: Option<Arc<dyn PhaseExecutor>>,
    bus: Option<Arc<dyn EventBus>>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    hold_detection: HoldDetectionConfig,
    retry_policy: RetryPolicy,
    locks: OrderLocks,
}

impl WorkflowOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            executor: None,
            bus: None,
            clock: Arc::new(SystemClock),
            config: OrchestratorConfig::default(),
            hold_detection: HoldDetectionConfig::default(),
            retry_policy: RetryPolicy::default(),
            locks: OrderLocks::new(),
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

    pub fn with_event_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = Some(bus);
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

    /// Share per-order locks with other components of the same process
    pub fn with_locks(mut self, locks: OrderLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Build the WorkflowOrchestrator, validating that all required fields are set
    pub fn build(self) -> Result<WorkflowOrchestrator, BuilderError> {
        let store = self.store.ok_or_else(|| BuilderError::MissingField {
            field: "store".to_string(),
        })?;

        let executor = self.executor.ok_or_else(|| BuilderError::MissingField {
            field: "executor".to_string(),
        })?;

        let bus = self.bus.ok_or_else(|| BuilderError::MissingField {
            field: "event_bus".to_string(),
        })?;

        let effects = EffectRunner::new(bus).with_policy(self.retry_policy);
        let validator = Arc::new(GateValidator::new(store.clone(), self.clock.clone()));
        let checkpoints = Arc::new(CheckpointManager::new(
            store.clone(),
            effects.clone(),
            validator.clone(),
            self.clock.clone(),
            self.locks.clone(),
            self.config.cascade,
        ));
        let external_review = Arc::new(ExternalReviewGate::new(
            store.clone(),
            effects.clone(),
            self.clock.clone(),
            self.config.cascade,
        ));

        Ok(WorkflowOrchestrator {
            store,
            executor,
            effects,
            validator,
            hold_detector: HoldDetector::new(self.hold_detection),
            checkpoints,
            external_review,
            clock: self.clock,
            locks: self.locks,
            config: self.config,
        })
    }
}

impl Default for WorkflowOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives each order's workflow through the phase sequence
pub struct WorkflowOrchestrator {
    store: Arc<dyn WorkflowStore>,
    executor: Arc<dyn PhaseExecutor>,
    effects: EffectRunner,
    validator: Arc<GateValidator>,
    hold_detector: HoldDetector,
    checkpoints: Arc<CheckpointManager>,
    external_review: Arc<ExternalReviewGate>,
    clock: Arc<dyn Clock>,
    locks: OrderLocks,
    config: OrchestratorConfig,
}

impl WorkflowOrchestrator {
    pub fn builder() -> WorkflowOrchestratorBuilder {
        WorkflowOrchestratorBuilder::new()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn external_review(&self) -> &ExternalReviewGate {
        &self.external_review
    }

    pub fn locks(&self) -> &OrderLocks {
        &self.locks
    }

    /// Run the order's workflow until it completes, holds, or waits on a
    /// blocking checkpoint. Every phase is committed before the next starts.
    pub async fn orchestrate(&self, order_id: &str) -> Result<OrchestrationOutcome, OrchestratorError> {
        let _guard = self.locks.try_acquire(order_id).await.ok_or_else(|| {
            OrchestratorError::AlreadyRunning {
                order_id: order_id.to_string(),
            }
        })?;

        let span = info_span!("orchestrate", order_id = %order_id);
        self.drive(order_id).instrument(span).await
    }

    /// Orchestrate several orders concurrently
    pub async fn orchestrate_batch(
        &self,
        order_ids: &[String],
    ) -> Vec<(String, Result<OrchestrationOutcome, OrchestratorError>)> {
        info!(batch_size = order_ids.len(), "Orchestrating batch");

        join_all(order_ids.iter().map(|order_id| async move {
            (order_id.clone(), self.orchestrate(order_id).await)
        }))
        .await
    }

    pub async fn resolve_checkpoint(
        &self,
        workflow_id: &str,
        action: CheckpointAction,
    ) -> Result<CheckpointResolution, OrchestratorError> {
        self.checkpoints.resolve(workflow_id, action).await
    }

    /// The HOLD resolved signal: release the order, clear the reason and
    /// cancel the pending HOLD cascade. Repeated calls are no-ops; a call that
    /// finds the order released but the workflow still held finishes the clear.
    pub async fn resolve_hold(
        &self,
        order_id: &str,
        resolution: Value,
    ) -> Result<HoldResolution, OrchestratorError> {
        let _guard = self.locks.acquire(order_id).await;
        let now = self.clock.now();

        // 1. The order status decides races with the HOLD terminal step
        let released = self
            .store
            .transition_order(
                order_id,
                OrderStatus::Hold,
                OrderStatus::InProgress,
                now,
                Some("hold resolved".to_string()),
            )
            .await?;

        let workflow = self.store.get_workflow_by_order(order_id).await?;

        if !released {
            let order = self.store.get_order(order_id).await?;
            let interrupted = workflow
                .as_ref()
                .map_or(false, |state| state.phase_status == PhaseStatus::Hold)
                && order.map(|o| o.status) == Some(OrderStatus::InProgress);
            if !interrupted {
                debug!(order_id = %order_id, "Hold resolution ignored; order not on hold");
                return Ok(HoldResolution::NotHeld);
            }
            warn!(order_id = %order_id, "Finishing interrupted hold resolution");
        }

        let mut state = workflow.ok_or_else(|| OrchestratorError::WorkflowNotFound {
            workflow_id: format!("for order {order_id}"),
        })?;

        // 2. Clear the workflow hold and suppress the remaining cascade steps
        self.release_hold(&mut state, Some(resolution), now).await?;

        info!(order_id = %order_id, resume_at = %state.current_phase, "Hold resolved");
        Ok(HoldResolution::Resumed {
            resume_at: state.current_phase,
        })
    }

    async fn release_hold(
        &self,
        state: &mut WorkflowState,
        resolution: Option<Value>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), OrchestratorError> {
        let previous_reason = state.hold_reason.clone();
        state.clear_hold();
        state.hold_resolution = resolution;
        if state.phase_status == PhaseStatus::Hold {
            state.phase_status = PhaseStatus::Pending;
        }
        state.updated_at = now;
        self.store.save_workflow(state).await?;

        let mut effects = EffectList::new();
        effects.cancel(CancelKey::new(&state.order_id, WaitCondition::Hold));
        effects.emit(
            WorkflowEvent::new(EventName::HoldResolved, &state.order_id, now)
                .with_workflow(&state.id)
                .with_payload(json!({ "previous_reason": previous_reason })),
        );
        self.effects.run(effects).await;
        Ok(())
    }

    async fn drive(&self, order_id: &str) -> Result<OrchestrationOutcome, OrchestratorError> {
        // 1. Load the order; terminal orders are never touched
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| OrchestratorError::OrderNotFound {
                order_id: order_id.to_string(),
            })?;

        if order.status.is_terminal() {
            return Ok(OrchestrationOutcome::AlreadyTerminal {
                status: order.status,
            });
        }
        if order.status == OrderStatus::PendingReview {
            return Err(OrchestratorError::InvalidOrderStatus {
                order_id: order.id.clone(),
                status: order.status,
            });
        }

        // 2. One workflow per order
        let mut state = self.load_or_create(&order).await?;

        // 3. Resume waiting states without running anything
        match state.phase_status {
            PhaseStatus::Complete => return self.finish_order(&state).await,
            PhaseStatus::Cancelled => {
                return Ok(OrchestrationOutcome::AlreadyTerminal {
                    status: order.status,
                })
            }
            PhaseStatus::Hold => {
                if self.hold_released(&order).await? {
                    // A resolution moved the order but never cleared the workflow
                    warn!(order_id = %order.id, "Clearing workflow hold after release");
                    self.release_hold(&mut state, None, self.clock.now()).await?;
                } else {
                    self.reapply_hold(&order, &state).await?;
                    return Ok(OrchestrationOutcome::Held {
                        reason: current_hold_reason(&state),
                    });
                }
            }
            PhaseStatus::Checkpoint if state.checkpoint_pending => {
                self.checkpoints.reapply_blocking(&order, &state).await?;
                return Ok(OrchestrationOutcome::AwaitingCheckpoint {
                    checkpoint: pending_checkpoint(&state),
                });
            }
            _ => {}
        }

        if order.status == OrderStatus::Submitted {
            self.store
                .transition_order(
                    &order.id,
                    OrderStatus::Submitted,
                    OrderStatus::InProgress,
                    self.clock.now(),
                    Some("workflow started".to_string()),
                )
                .await?;
        }

        // 4. Phase loop
        loop {
            let phase = state.current_phase;

            // 4a. Gate check; a rejection leaves the state untouched
            self.validator.check_entry(&state, phase).await?;

            // 4b. Commit RUNNING so a crash re-runs this phase
            state.phase_status = PhaseStatus::Running;
            state.updated_at = self.clock.now();
            self.store.save_workflow(&state).await?;
            debug!(phase = %phase, "Phase started");

            // 4c. Execute
            let input = PhaseInput::from_state(&state, phase);
            let result = self.executor.execute(phase, &input).await;
            if !result.success {
                let reason = result
                    .error
                    .unwrap_or_else(|| "phase reported failure".to_string());
                return Err(self
                    .fail_phase(&mut state, OrchestratorError::PhaseExecution { phase, reason })
                    .await);
            }

            let output = match result.parse_output(phase) {
                Ok(output) => output,
                Err(e) => return Err(self.fail_phase(&mut state, e).await),
            };

            // 4d. Completion requirements, then commit the output
            if let Err(e) = GateValidator::mark_complete(&mut state, phase, output.clone()) {
                return Err(self.fail_phase(&mut state, e.into()).await);
            }
            state.last_error = None;

            // 4e. Route
            let mut effects = EffectList::new();
            let transition = self.route(&mut state, phase, &output, &mut effects);
            state.updated_at = self.clock.now();

            match transition {
                Transition::Advance(next) => {
                    state.current_phase = next;
                    state.phase_status = PhaseStatus::Pending;
                    self.store.save_workflow(&state).await?;
                    self.effects.run(effects).await;
                    info!(phase = %phase, next = %next, loops = state.revision_loop_count, "Phase committed");
                }
                Transition::Checkpoint {
                    checkpoint_type,
                    payload,
                    resume_at,
                } => {
                    if let Some(next) = resume_at {
                        state.current_phase = next;
                        state.phase_status = PhaseStatus::Pending;
                    }
                    let checkpoint = self
                        .checkpoints
                        .trigger(&mut state, checkpoint_type, payload)
                        .await?;
                    self.effects.run(effects).await;

                    if checkpoint.blocking {
                        info!(phase = %phase, checkpoint = %checkpoint_type, "Awaiting blocking checkpoint");
                        return Ok(OrchestrationOutcome::AwaitingCheckpoint { checkpoint });
                    }
                }
                Transition::Hold {
                    decision,
                    resume_at,
                } => {
                    return self.enter_hold(&mut state, decision, resume_at, effects).await;
                }
                Transition::Complete => {
                    state.phase_status = PhaseStatus::Complete;
                    self.store.save_workflow(&state).await?;
                    self.effects.run(effects).await;
                    return self.finish_order(&state).await;
                }
            }
        }
    }

    /// Post-phase hooks
    fn route(
        &self,
        state: &mut WorkflowState,
        phase: PhaseId,
        output: &Value,
        effects: &mut EffectList,
    ) -> Transition {
        match phase {
            PhaseId::Analysis => {
                let resume_at = self.next_phase(state, phase).unwrap_or(PhaseId::Research);
                match self.hold_detector.detect(output) {
                    Some(decision) => Transition::Hold {
                        decision,
                        resume_at,
                    },
                    None => Transition::Advance(resume_at),
                }
            }
            PhaseId::Research => Transition::Checkpoint {
                checkpoint_type: CheckpointType::ResearchReview,
                payload: output.clone(),
                resume_at: self.next_phase(state, phase),
            },
            PhaseId::Grading => self.after_grading(state, output, effects),
            PhaseId::Revision => self.after_revision(state, output),
            PhaseId::ReferenceRecheck => self.after_reverification(state, output, effects),
            PhaseId::FinalAssembly => {
                state.revision_source = None;
                Transition::Checkpoint {
                    checkpoint_type: CheckpointType::FinalReview,
                    payload: json!({
                        "document": output.get("document"),
                        "manual_review": state.manual_review,
                        "revision_loop_count": state.revision_loop_count,
                    }),
                    resume_at: None,
                }
            }
            PhaseId::Delivery => Transition::Complete,
            PhaseId::Intake
            | PhaseId::Drafting
            | PhaseId::CitationVerify
            | PhaseId::OppositionAnalysis => match self.next_phase(state, phase) {
                Some(next) => Transition::Advance(next),
                None => Transition::Complete,
            },
        }
    }

    fn after_grading(
        &self,
        state: &mut WorkflowState,
        output: &Value,
        effects: &mut EffectList,
    ) -> Transition {
        let now = self.clock.now();
        let score = output.get("score").and_then(Value::as_f64).unwrap_or(0.0);

        // A grade following a loop revision counts that pass, in the same commit
        if state.revision_source == Some(RevisionSource::GradeLoop) {
            state.revision_loop_count = (state.revision_loop_count + 1).min(MAX_REVISION_LOOPS);
            state.revision_source = None;
        }

        let max_loops = self.config.max_revision_loops.min(MAX_REVISION_LOOPS);
        let passed = score >= self.config.passing_score;

        if passed {
            if state.revision_loop_count == 0 {
                state.final_draft = drafting_draft(state);
            }
            info!(score, loops = state.revision_loop_count, "Grade passed");
        } else if state.revision_loop_count < max_loops {
            state.revision_source = Some(RevisionSource::GradeLoop);
            info!(
                score,
                passing = self.config.passing_score,
                loops = state.revision_loop_count,
                "Grade below threshold, revising"
            );
            return Transition::Advance(PhaseId::Revision);
        } else {
            let reason = format!("revision limit of {max_loops} reached with score {score}");
            warn!(order_id = %state.order_id, score, "Revision loop exhausted, flagging for manual review");
            if state.final_draft.is_none() {
                state.final_draft = drafting_draft(state);
            }
            self.flag_manual_review(state, &reason, now, effects);
        }

        Transition::Checkpoint {
            checkpoint_type: CheckpointType::GradeReview,
            payload: json!({
                "score": score,
                "passed": passed,
                "revision_loop_count": state.revision_loop_count,
            }),
            resume_at: Some(PhaseId::FinalAssembly),
        }
    }

    fn after_revision(&self, state: &mut WorkflowState, output: &Value) -> Transition {
        state.final_draft = output.get("draft").cloned();
        state.new_references_introduced = introduces_references(output);
        // Any earlier re-verification covered an older draft
        state.invalidate(PhaseId::ReferenceRecheck);

        if state.new_references_introduced {
            Transition::Advance(PhaseId::ReferenceRecheck)
        } else {
            Transition::Advance(self.after_revision_pass(state))
        }
    }

    fn after_reverification(
        &self,
        state: &mut WorkflowState,
        output: &Value,
        effects: &mut EffectList,
    ) -> Transition {
        let escalate = output.get("escalate").and_then(Value::as_bool).unwrap_or(false);
        if escalate {
            // Stop looping and go ahead with the latest revised draft
            warn!(order_id = %state.order_id, "Reference re-verification escalated");
            state.revision_source = None;
            let now = self.clock.now();
            self.flag_manual_review(state, "reference re-verification escalated", now, effects);
            return Transition::Advance(PhaseId::FinalAssembly);
        }

        Transition::Advance(self.after_revision_pass(state))
    }

    /// Loop revisions go back to grading; operator revisions go to assembly
    fn after_revision_pass(&self, state: &WorkflowState) -> PhaseId {
        match state.revision_source {
            Some(RevisionSource::GradeLoop) => PhaseId::Grading,
            Some(RevisionSource::OperatorRequest) | None => PhaseId::FinalAssembly,
        }
    }

    fn next_phase(&self, state: &WorkflowState, phase: PhaseId) -> Option<PhaseId> {
        PhaseRegistry::next_in_sequence(phase, state.tier, state.new_references_introduced)
    }

    fn flag_manual_review(
        &self,
        state: &mut WorkflowState,
        reason: &str,
        now: chrono::DateTime<chrono::Utc>,
        effects: &mut EffectList,
    ) {
        state.flag_manual_review(reason, now);
        effects.emit(
            WorkflowEvent::new(EventName::ManualReviewRequired, &state.order_id, now)
                .with_workflow(&state.id)
                .with_payload(json!({ "reason": reason })),
        );
    }

    async fn enter_hold(
        &self,
        state: &mut WorkflowState,
        decision: HoldDecision,
        resume_at: PhaseId,
        mut effects: EffectList,
    ) -> Result<OrchestrationOutcome, OrchestratorError> {
        let now = self.clock.now();

        state.current_phase = resume_at;
        state.phase_status = PhaseStatus::Hold;
        state.hold_reason = Some(decision.reason.clone());
        state.hold_detection = Some(decision.link.clone());
        state.hold_started_at = Some(now);
        state.hold_resolution = None;
        self.store.save_workflow(state).await?;

        let moved = self
            .store
            .transition_order(
                &state.order_id,
                OrderStatus::InProgress,
                OrderStatus::Hold,
                now,
                Some(format!("hold: {}", decision.reason)),
            )
            .await?;
        if !moved {
            warn!(order_id = %state.order_id, "Order was not in progress when entering hold");
        }

        effects.extend(self.hold_effects(state, now));
        self.store.touch_cascade_activity(&state.order_id, now).await?;
        self.effects.run(effects).await;

        info!(
            order_id = %state.order_id,
            reason = %decision.reason,
            link = ?decision.link,
            "Workflow on hold"
        );
        Ok(OrchestrationOutcome::Held {
            reason: decision.reason,
        })
    }

    /// Whether the order's latest status change is a hold release
    async fn hold_released(&self, order: &Order) -> Result<bool, OrchestratorError> {
        if order.status != OrderStatus::InProgress {
            return Ok(false);
        }
        let history = self.store.get_history(&order.id).await?;
        Ok(history.last().map_or(false, |last| {
            last.from_status == OrderStatus::Hold && last.to_status == OrderStatus::InProgress
        }))
    }

    /// Repair a HOLD whose order transition never landed
    async fn reapply_hold(&self, order: &Order, state: &WorkflowState) -> Result<(), OrchestratorError> {
        if order.status != OrderStatus::InProgress {
            return Ok(());
        }

        let now = self.clock.now();
        let moved = self
            .store
            .transition_order(
                &order.id,
                OrderStatus::InProgress,
                OrderStatus::Hold,
                now,
                Some("hold re-applied".to_string()),
            )
            .await?;

        if moved {
            warn!(order_id = %order.id, "Re-applied workflow hold to order status");
            self.store.touch_cascade_activity(&order.id, now).await?;
            self.effects.run(self.hold_effects(state, now)).await;
        }
        Ok(())
    }

    fn hold_effects(&self, state: &WorkflowState, now: chrono::DateTime<chrono::Utc>) -> EffectList {
        let mut effects = EffectList::new();
        effects.emit(
            WorkflowEvent::new(EventName::HoldStarted, &state.order_id, now)
                .with_workflow(&state.id)
                .with_payload(json!({
                    "reason": state.hold_reason,
                    "detection": state.hold_detection,
                })),
        );
        effects.start_cascade(
            CancelKey::new(&state.order_id, WaitCondition::Hold),
            self.config.cascade.plan(&state.order_id, WaitCondition::Hold, now),
        );
        effects
    }

    async fn finish_order(&self, state: &WorkflowState) -> Result<OrchestrationOutcome, OrchestratorError> {
        let now = self.clock.now();
        let completed = self
            .store
            .transition_order(
                &state.order_id,
                OrderStatus::InProgress,
                OrderStatus::Completed,
                now,
                Some("delivered".to_string()),
            )
            .await?;

        if completed {
            let mut effects = EffectList::new();
            effects.emit(
                WorkflowEvent::new(EventName::OrderCompleted, &state.order_id, now)
                    .with_workflow(&state.id)
                    .with_payload(json!({ "manual_review": state.manual_review })),
            );
            self.effects.run(effects).await;
            info!(order_id = %state.order_id, "Order completed");
        }

        Ok(OrchestrationOutcome::Completed)
    }

    /// Move the workflow to ERROR, flag it and alert operators
    async fn fail_phase(&self, state: &mut WorkflowState, err: OrchestratorError) -> OrchestratorError {
        let now = self.clock.now();
        let phase = state.current_phase;

        error!(order_id = %state.order_id, phase = %phase, error = %err, "Phase failed");

        let mut effects = EffectList::new();
        state.phase_status = PhaseStatus::Error;
        state.last_error = Some(err.to_string());
        state.updated_at = now;
        self.flag_manual_review(state, &format!("phase {phase} failed"), now, &mut effects);
        effects.emit(
            WorkflowEvent::new(EventName::OperatorAlert, &state.order_id, now)
                .with_workflow(&state.id)
                .with_payload(json!({ "phase": phase, "error": err.to_string() })),
        );

        if let Err(save_err) = self.store.save_workflow(state).await {
            error!(order_id = %state.order_id, error = %save_err, "Failed to persist phase failure");
        }
        self.effects.run(effects).await;

        err
    }

    async fn load_or_create(&self, order: &Order) -> Result<WorkflowState, OrchestratorError> {
        if let Some(state) = self.store.get_workflow_by_order(&order.id).await? {
            return Ok(state);
        }

        let state = WorkflowState::new(
            format!("wf-{}", Uuid::new_v4()),
            order.id.clone(),
            order.tier,
            self.clock.now(),
        );

        match self.store.create_workflow(&state).await {
            Ok(()) => {
                info!(order_id = %order.id, workflow_id = %state.id, "Workflow created");
                Ok(state)
            }
            // Another process created it first
            Err(StoreError::DuplicateId(_)) => self
                .store
                .get_workflow_by_order(&order.id)
                .await?
                .ok_or_else(|| OrchestratorError::WorkflowNotFound {
                    workflow_id: format!("for order {}", order.id),
                }),
            Err(e) => Err(e.into()),
        }
    }
}

fn current_hold_reason(state: &WorkflowState) -> HoldReason {
    state
        .hold_reason
        .clone()
        .unwrap_or_else(|| HoldReason::Other("unspecified".to_string()))
}

fn pending_checkpoint(state: &WorkflowState) -> Checkpoint {
    let checkpoint_type = state.checkpoint_type.unwrap_or(CheckpointType::FinalReview);
    Checkpoint::new(
        checkpoint_type,
        state.checkpoint_payload.clone().unwrap_or(Value::Null),
    )
}

fn drafting_draft(state: &WorkflowState) -> Option<Value> {
    state
        .output(PhaseId::Drafting)
        .and_then(|output| output.get("draft"))
        .cloned()
}

/// `new_references` may be a flag or the list of added references
fn introduces_references(output: &Value) -> bool {
    match output.get("new_references") {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Array(items)) => !items.is_empty(),
        _ => false,
    }
}
