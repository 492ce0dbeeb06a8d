use async_trait::async_trait;
use docflow_types::{PhaseId, Tier, WorkflowState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::OrchestratorError;

/// Context handed to the content-generation step of one phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseInput {
    pub order_id: String,
    pub workflow_id: String,
    pub tier: Tier,
    pub phase: PhaseId,
    /// Outputs of every phase committed so far
    pub outputs: BTreeMap<PhaseId, Value>,
    /// Latest accepted draft; set once grading has run
    pub final_draft: Option<Value>,
    pub revision_loop_count: u8,
    pub operator_notes: Option<String>,
    pub hold_resolution: Option<Value>,
}

impl PhaseInput {
    pub fn from_state(state: &WorkflowState, phase: PhaseId) -> Self {
        Self {
            order_id: state.order_id.clone(),
            workflow_id: state.id.clone(),
            tier: state.tier,
            phase,
            outputs: state.phase_outputs.clone(),
            final_draft: state.final_draft.clone(),
            revision_loop_count: state.revision_loop_count,
            operator_notes: state.operator_notes.clone(),
            hold_resolution: state.hold_resolution.clone(),
        }
    }
}

/// Raw result of a phase run. `output` is the JSON text produced by the step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseResult {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl PhaseResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn ok_json(output: &Value) -> Self {
        Self::ok(output.to_string())
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }

    /// Parse the output of a successful run
    pub fn parse_output(&self, phase: PhaseId) -> Result<Value, OrchestratorError> {
        let raw = self
            .output
            .as_deref()
            .ok_or_else(|| OrchestratorError::Serialization {
                phase,
                reason: "phase reported success without output".to_string(),
            })?;

        serde_json::from_str(raw).map_err(|e| OrchestratorError::Serialization {
            phase,
            reason: e.to_string(),
        })
    }
}

/// Runs the generative step of a phase
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    async fn execute(&self, phase: PhaseId, input: &PhaseInput) -> PhaseResult;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_parse_output() {
        let result = PhaseResult::ok_json(&json!({"score": 91}));
        assert_eq!(result.parse_output(PhaseId::Grading).unwrap()["score"], 91);
    }

    #[test]
    fn test_unparsable_output() {
        let result = PhaseResult::ok("{not json");
        assert!(matches!(
            result.parse_output(PhaseId::Drafting),
            Err(OrchestratorError::Serialization { phase: PhaseId::Drafting, .. })
        ));

        let missing = PhaseResult {
            success: true,
            output: None,
            error: None,
        };
        assert!(missing.parse_output(PhaseId::Drafting).is_err());
    }

    #[test]
    fn test_input_carries_accumulated_context() {
        let mut state = WorkflowState::new("wf-1", "order-1", Tier::B, Utc::now());
        state.record_output(PhaseId::Intake, json!({"facts": "lease dispute"}));
        state.operator_notes = Some("cite the 2019 amendment".to_string());

        let input = PhaseInput::from_state(&state, PhaseId::Analysis);
        assert_eq!(input.phase, PhaseId::Analysis);
        assert_eq!(input.outputs.len(), 1);
        assert_eq!(input.operator_notes.as_deref(), Some("cite the 2019 amendment"));
    }
}
