use docflow_store::WorkflowStore;
use docflow_types::{Clock, GateViolationRecord, PhaseId, PhaseRegistry, WorkflowState};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::GateError;

/// Result of a phase entry check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDecision {
    pub allowed: bool,
    pub missing_prereqs: Vec<PhaseId>,
}

/// Enforces phase ordering. No phase may be entered before its prerequisites
/// and every applicable required phase ahead of it have completed.
pub struct GateValidator {
    store: Arc<dyn WorkflowStore>,
    clock: Arc<dyn Clock>,
}

impl GateValidator {
    pub fn new(store: Arc<dyn WorkflowStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Pure entry check against the static dependency graph
    pub fn can_enter(state: &WorkflowState, target: PhaseId) -> GateDecision {
        let mut missing: BTreeSet<PhaseId> =
            PhaseRegistry::missing_prerequisites(target, &state.completed_phases)
                .into_iter()
                .collect();

        missing.extend(
            PhaseRegistry::required_before(target, state.tier, state.new_references_introduced)
                .into_iter()
                .filter(|phase| !state.is_completed(*phase)),
        );

        GateDecision {
            allowed: missing.is_empty(),
            missing_prereqs: missing.into_iter().collect(),
        }
    }

    /// Check entry and persist a CRITICAL violation record on rejection.
    /// The workflow state is never modified here.
    pub async fn check_entry(&self, state: &WorkflowState, target: PhaseId) -> Result<(), GateError> {
        let decision = Self::can_enter(state, target);
        if decision.allowed {
            debug!(workflow_id = %state.id, phase = %target, "Gate passed");
            return Ok(());
        }

        error!(
            severity = "CRITICAL",
            workflow_id = %state.id,
            order_id = %state.order_id,
            current_phase = %state.current_phase,
            target_phase = %target,
            missing = ?decision.missing_prereqs,
            "Phase gate violation"
        );

        let record = GateViolationRecord::critical(
            state.id.clone(),
            state.order_id.clone(),
            state.current_phase,
            target,
            decision.missing_prereqs.clone(),
            self.clock.now(),
        );
        self.store.record_violation(&record).await?;

        Err(GateError::Violation {
            target,
            missing: decision.missing_prereqs,
        })
    }

    /// Check a phase's completion requirements, then commit its output
    pub fn mark_complete(
        state: &mut WorkflowState,
        phase: PhaseId,
        output: Value,
    ) -> Result<(), GateError> {
        Self::check_completion(phase, &output)?;
        state.record_output(phase, output);
        Ok(())
    }

    pub fn check_completion(phase: PhaseId, output: &Value) -> Result<(), GateError> {
        let incomplete = |reason: &str| GateError::Incomplete {
            phase,
            reason: reason.to_string(),
        };

        match phase {
            PhaseId::Drafting | PhaseId::Revision => {
                if !output.get("draft").map_or(false, is_non_empty) {
                    return Err(incomplete("missing draft"));
                }
            }
            PhaseId::Grading => {
                if output.get("score").and_then(Value::as_f64).is_none() {
                    return Err(incomplete("missing numeric score"));
                }
            }
            PhaseId::FinalAssembly => {
                if !output.get("document").map_or(false, is_non_empty) {
                    return Err(incomplete("missing assembled document"));
                }
            }
            PhaseId::Intake
            | PhaseId::Analysis
            | PhaseId::Research
            | PhaseId::CitationVerify
            | PhaseId::OppositionAnalysis
            | PhaseId::ReferenceRecheck
            | PhaseId::Delivery => {}
        }

        Ok(())
    }
}

fn is_non_empty(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use docflow_store::InMemoryStore;
    use docflow_types::{SystemClock, Tier};
    use serde_json::json;

    fn completed_through(tier: Tier, last: PhaseId) -> WorkflowState {
        let mut state = WorkflowState::new("wf-1", "order-1", tier, Utc::now());
        for phase in PhaseId::ALL.iter().copied().filter(|p| p.order() <= last.order()) {
            if PhaseRegistry::definition(phase).is_required(tier, false) {
                state.record_output(phase, json!({}));
            }
        }
        state
    }

    #[test]
    fn test_linear_entry_allowed() {
        let state = completed_through(Tier::A, PhaseId::Research);
        let decision = GateValidator::can_enter(&state, PhaseId::Drafting);
        assert!(decision.allowed);
        assert!(decision.missing_prereqs.is_empty());
    }

    #[test]
    fn test_skip_is_rejected() {
        let state = completed_through(Tier::A, PhaseId::Analysis);
        let decision = GateValidator::can_enter(&state, PhaseId::FinalAssembly);
        assert!(!decision.allowed);
        assert!(decision.missing_prereqs.contains(&PhaseId::Grading));
        assert!(decision.missing_prereqs.contains(&PhaseId::Research));
        assert!(!decision.missing_prereqs.contains(&PhaseId::OppositionAnalysis));
    }

    #[test]
    fn test_opposition_required_for_tier_c_only() {
        let mut state = completed_through(Tier::C, PhaseId::CitationVerify);
        let decision = GateValidator::can_enter(&state, PhaseId::Grading);
        assert_eq!(decision.missing_prereqs, vec![PhaseId::OppositionAnalysis]);

        state.tier = Tier::A;
        assert!(GateValidator::can_enter(&state, PhaseId::Grading).allowed);
    }

    #[test]
    fn test_reference_recheck_required_after_new_references() {
        let mut state = completed_through(Tier::A, PhaseId::Grading);
        state.record_output(PhaseId::Revision, json!({"draft": "v2"}));
        assert!(GateValidator::can_enter(&state, PhaseId::FinalAssembly).allowed);

        state.new_references_introduced = true;
        let decision = GateValidator::can_enter(&state, PhaseId::FinalAssembly);
        assert_eq!(decision.missing_prereqs, vec![PhaseId::ReferenceRecheck]);
    }

    #[tokio::test]
    async fn test_violation_recorded_and_state_untouched() {
        let store = Arc::new(InMemoryStore::new());
        let validator = GateValidator::new(store.clone(), Arc::new(SystemClock));
        let state = completed_through(Tier::B, PhaseId::Intake);
        let before = state.clone();

        let result = validator.check_entry(&state, PhaseId::Delivery).await;
        assert!(matches!(result, Err(GateError::Violation { target: PhaseId::Delivery, .. })));
        assert_eq!(state, before);

        let violations = store.list_violations("wf-1").await.unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, "CRITICAL");
        assert_eq!(violations[0].target_phase, PhaseId::Delivery);
    }

    #[test]
    fn test_completion_requirements() {
        let mut state = completed_through(Tier::A, PhaseId::Research);

        let err = GateValidator::mark_complete(&mut state, PhaseId::Drafting, json!({"draft": "  "}));
        assert!(matches!(err, Err(GateError::Incomplete { .. })));
        assert!(!state.is_completed(PhaseId::Drafting));

        GateValidator::mark_complete(&mut state, PhaseId::Drafting, json!({"draft": "Motion..."}))
            .unwrap();
        assert!(state.is_completed(PhaseId::Drafting));

        assert!(GateValidator::check_completion(PhaseId::Grading, &json!({"score": "high"})).is_err());
        assert!(GateValidator::check_completion(PhaseId::Grading, &json!({"score": 72.5})).is_ok());
        assert!(GateValidator::check_completion(PhaseId::FinalAssembly, &json!({})).is_err());
        assert!(GateValidator::check_completion(PhaseId::Intake, &json!(null)).is_ok());
    }
}
