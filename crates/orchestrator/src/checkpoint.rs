use docflow_effects::EffectRunner;
use docflow_store::WorkflowStore;
use docflow_types::{
    CancelKey, CascadeTimings, Checkpoint, CheckpointAction, CheckpointType, Clock, EffectList,
    EventName, Order, OrderStatus, PhaseId, PhaseRegistry, PhaseStatus, RevisionSource,
    WaitCondition, WorkflowEvent, WorkflowState,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::OrchestratorError;
use crate::guard::OrderLocks;
use crate::validator::GateValidator;

/// What a resolve call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointResolution {
    /// Nothing was pending (or a racing timer already finished the order)
    AlreadyResolved,
    Approved {
        checkpoint_type: CheckpointType,
        /// Phase the workflow resumes at; `None` for advisory checkpoints
        next_phase: Option<PhaseId>,
    },
    ChangesRequested { checkpoint_type: CheckpointType },
    Cancelled { checkpoint_type: CheckpointType },
}

/// Creates and resolves review gates
pub struct CheckpointManager {
    store: Arc<dyn WorkflowStore>,
    effects: EffectRunner,
    validator: Arc<GateValidator>,
    clock: Arc<dyn Clock>,
    locks: OrderLocks,
    timings: CascadeTimings,
}

impl CheckpointManager {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        effects: EffectRunner,
        validator: Arc<GateValidator>,
        clock: Arc<dyn Clock>,
        locks: OrderLocks,
        timings: CascadeTimings,
    ) -> Self {
        Self {
            store,
            effects,
            validator,
            clock,
            locks,
            timings,
        }
    }

    /// Record a pending checkpoint on `state` and commit it.
    ///
    /// Callers must hold the order lock. A pending advisory checkpoint is
    /// superseded; a pending blocking one is an error.
    pub async fn trigger(
        &self,
        state: &mut WorkflowState,
        checkpoint_type: CheckpointType,
        payload: Value,
    ) -> Result<Checkpoint, OrchestratorError> {
        let superseded = match (state.checkpoint_pending, state.checkpoint_type) {
            (true, Some(pending)) if pending.is_blocking() => {
                return Err(OrchestratorError::CheckpointPending {
                    workflow_id: state.id.clone(),
                });
            }
            (true, pending) => pending,
            (false, _) => None,
        };

        if let Some(previous) = superseded {
            info!(
                workflow_id = %state.id,
                previous = %previous,
                checkpoint = %checkpoint_type,
                "Superseding pending advisory checkpoint"
            );
        }

        let now = self.clock.now();
        let checkpoint = Checkpoint::new(checkpoint_type, payload);

        state.checkpoint_pending = true;
        state.checkpoint_type = Some(checkpoint_type);
        state.checkpoint_payload = Some(checkpoint.payload.clone());
        if checkpoint.blocking {
            state.phase_status = PhaseStatus::Checkpoint;
        }
        state.updated_at = now;
        self.store.save_workflow(state).await?;

        let mut effects = EffectList::new();
        effects.emit(
            WorkflowEvent::new(EventName::CheckpointTriggered, &state.order_id, now)
                .with_workflow(&state.id)
                .with_payload(json!({
                    "checkpoint_type": checkpoint_type,
                    "blocking": checkpoint.blocking,
                    "superseded": superseded,
                    "payload": checkpoint.payload,
                })),
        );

        if checkpoint.blocking {
            let order_id = state.order_id.clone();
            let moved = self
                .store
                .transition_order(
                    &order_id,
                    OrderStatus::InProgress,
                    OrderStatus::AwaitingApproval,
                    now,
                    Some(format!("{checkpoint_type} requested")),
                )
                .await?;
            if !moved {
                warn!(order_id = %order_id, "Order was not in progress when final review was requested");
            }
            effects.extend(self.final_approval_effects(state, now));
            self.store.touch_cascade_activity(&order_id, now).await?;
        }

        info!(
            workflow_id = %state.id,
            checkpoint = %checkpoint_type,
            blocking = checkpoint.blocking,
            "Checkpoint triggered"
        );
        self.effects.run(effects).await;

        Ok(checkpoint)
    }

    /// Repair a blocking checkpoint whose order transition never landed
    pub async fn reapply_blocking(
        &self,
        order: &Order,
        state: &WorkflowState,
    ) -> Result<(), OrchestratorError> {
        if order.status != OrderStatus::InProgress {
            return Ok(());
        }

        let now = self.clock.now();
        let moved = self
            .store
            .transition_order(
                &order.id,
                OrderStatus::InProgress,
                OrderStatus::AwaitingApproval,
                now,
                Some("final review re-applied".to_string()),
            )
            .await?;

        if moved {
            warn!(order_id = %order.id, "Re-applied pending final review to order status");
            self.store.touch_cascade_activity(&order.id, now).await?;
            self.effects.run(self.final_approval_effects(state, now)).await;
        }
        Ok(())
    }

    /// Resolve the workflow's pending checkpoint
    pub async fn resolve(
        &self,
        workflow_id: &str,
        action: CheckpointAction,
    ) -> Result<CheckpointResolution, OrchestratorError> {
        let order_id = self
            .store
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| OrchestratorError::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            })?
            .order_id;

        let _guard = self.locks.acquire(&order_id).await;

        // Re-read under the lock
        let mut state = self
            .store
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| OrchestratorError::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            })?;

        let checkpoint_type = match state.checkpoint_type {
            Some(checkpoint_type) if state.checkpoint_pending && !state.is_terminal() => {
                checkpoint_type
            }
            _ => {
                debug!(workflow_id = %workflow_id, action = action.name(), "No checkpoint pending");
                return Ok(CheckpointResolution::AlreadyResolved);
            }
        };

        let now = self.clock.now();
        let blocking = checkpoint_type.is_blocking();
        let mut effects = EffectList::new();

        let resolution = match &action {
            CheckpointAction::Approve => {
                let mut next_phase = None;
                if blocking {
                    if !self.release_order(&order_id, now, "final review approved").await? {
                        return Ok(CheckpointResolution::AlreadyResolved);
                    }
                    effects.cancel(CancelKey::new(&order_id, WaitCondition::FinalApproval));

                    next_phase = PhaseRegistry::next_in_sequence(
                        checkpoint_type.after_phase(),
                        state.tier,
                        state.new_references_introduced,
                    );
                    match next_phase {
                        Some(phase) => {
                            state.current_phase = phase;
                            state.phase_status = PhaseStatus::Pending;
                        }
                        None => state.phase_status = PhaseStatus::Complete,
                    }
                    effects.emit(
                        WorkflowEvent::new(EventName::WorkflowResumed, &order_id, now)
                            .with_workflow(&state.id)
                            .with_payload(json!({ "next_phase": next_phase })),
                    );
                }
                CheckpointResolution::Approved {
                    checkpoint_type,
                    next_phase,
                }
            }
            CheckpointAction::RequestChanges { notes } => {
                // Rejected routes are recorded and leave the checkpoint pending
                self.validator.check_entry(&state, PhaseId::Revision).await?;

                if blocking {
                    if !self.release_order(&order_id, now, "changes requested").await? {
                        return Ok(CheckpointResolution::AlreadyResolved);
                    }
                    effects.cancel(CancelKey::new(&order_id, WaitCondition::FinalApproval));
                }

                state.operator_notes = notes.clone();
                state.revision_source = Some(RevisionSource::OperatorRequest);
                state.current_phase = PhaseId::Revision;
                state.phase_status = PhaseStatus::Pending;
                CheckpointResolution::ChangesRequested { checkpoint_type }
            }
            CheckpointAction::Cancel { reason } => {
                let order = self.store.get_order(&order_id).await?.ok_or_else(|| {
                    OrchestratorError::OrderNotFound {
                        order_id: order_id.clone(),
                    }
                })?;

                // A timeout that already finished the order owns its cancellation
                if order.status.is_terminal() {
                    info!(order_id = %order_id, status = %order.status, "Checkpoint cancel lost race with order timeout");
                    return Ok(CheckpointResolution::AlreadyResolved);
                }

                let details = reason.clone().unwrap_or_else(|| "cancelled by operator".to_string());
                let moved = self
                    .store
                    .transition_order(&order_id, order.status, OrderStatus::Cancelled, now, Some(details))
                    .await?;
                if !moved {
                    return Ok(CheckpointResolution::AlreadyResolved);
                }

                state.phase_status = PhaseStatus::Cancelled;
                for condition in WaitCondition::ALL {
                    effects.cancel(CancelKey::new(&order_id, condition));
                }
                effects.emit(
                    WorkflowEvent::new(EventName::OrderCancelled, &order_id, now)
                        .with_workflow(&state.id)
                        .with_payload(json!({
                            "trigger": "operator_cancel",
                            "reason": reason,
                        })),
                );
                CheckpointResolution::Cancelled { checkpoint_type }
            }
        };

        state.clear_checkpoint();
        state.updated_at = now;
        self.store.save_workflow(&state).await?;

        effects.emit(
            WorkflowEvent::new(EventName::CheckpointResolved, &order_id, now)
                .with_workflow(&state.id)
                .with_payload(json!({
                    "checkpoint_type": checkpoint_type,
                    "action": action.name(),
                })),
        );

        info!(
            workflow_id = %state.id,
            checkpoint = %checkpoint_type,
            action = action.name(),
            "Checkpoint resolved"
        );
        self.effects.run(effects).await;

        Ok(resolution)
    }

    /// Move the order out of AWAITING_APPROVAL. `false` when a racing
    /// timeout has already finished the order.
    async fn release_order(
        &self,
        order_id: &str,
        now: chrono::DateTime<chrono::Utc>,
        details: &str,
    ) -> Result<bool, OrchestratorError> {
        if self
            .store
            .transition_order(
                order_id,
                OrderStatus::AwaitingApproval,
                OrderStatus::InProgress,
                now,
                Some(details.to_string()),
            )
            .await?
        {
            return Ok(true);
        }

        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| OrchestratorError::OrderNotFound {
                order_id: order_id.to_string(),
            })?;

        if order.status.is_terminal() {
            info!(order_id = %order_id, status = %order.status, "Checkpoint lost race with order timeout");
            return Ok(false);
        }
        Ok(true)
    }

    fn final_approval_effects(
        &self,
        state: &WorkflowState,
        now: chrono::DateTime<chrono::Utc>,
    ) -> EffectList {
        let mut effects = EffectList::new();
        effects.emit(
            WorkflowEvent::new(EventName::FinalApprovalRequested, &state.order_id, now)
                .with_workflow(&state.id),
        );
        effects.start_cascade(
            CancelKey::new(&state.order_id, WaitCondition::FinalApproval),
            self.timings
                .plan(&state.order_id, WaitCondition::FinalApproval, now),
        );
        effects
    }
}
