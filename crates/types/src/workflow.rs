use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::checkpoint::CheckpointType;
use crate::order::Tier;
use crate::phase::{PhaseId, PhaseRegistry};

/// Maximum number of grade/revise iterations
pub const MAX_REVISION_LOOPS: u8 = 3;

/// Execution status of the current phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseStatus {
    Pending,
    Running,
    Hold,
    Checkpoint,
    Error,
    Complete,
    Cancelled,
}

impl PhaseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PhaseStatus::Complete | PhaseStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Pending => "PENDING",
            PhaseStatus::Running => "RUNNING",
            PhaseStatus::Hold => "HOLD",
            PhaseStatus::Checkpoint => "CHECKPOINT",
            PhaseStatus::Error => "ERROR",
            PhaseStatus::Complete => "COMPLETE",
            PhaseStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a workflow is on HOLD
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum HoldReason {
    /// Supporting evidence is missing; auto-cancels with a full refund on timeout
    EvidenceGap,
    /// Revision cannot make progress without the customer
    RevisionStall,
    Other(String),
}

impl HoldReason {
    pub fn as_str(&self) -> &str {
        match self {
            HoldReason::EvidenceGap => "evidence_gap",
            HoldReason::RevisionStall => "revision_stall",
            HoldReason::Other(reason) => reason,
        }
    }

    pub fn parse(s: &str) -> HoldReason {
        match s {
            "evidence_gap" => HoldReason::EvidenceGap,
            "revision_stall" => HoldReason::RevisionStall,
            other => HoldReason::Other(other.to_string()),
        }
    }
}

impl From<String> for HoldReason {
    fn from(value: String) -> Self {
        HoldReason::parse(&value)
    }
}

impl From<HoldReason> for String {
    fn from(value: HoldReason) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for HoldReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which link of the HOLD detection chain fired
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "link", rename_all = "snake_case")]
pub enum HoldDetectionLink {
    StructuredSignal,
    CasedAlias { key: String },
    KeywordHeuristic { matched_terms: Vec<String> },
}

/// What started the current revision pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RevisionSource {
    GradeLoop,
    OperatorRequest,
}

/// Manual review flag raised for operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualReviewFlag {
    pub reason: String,
    pub flagged_at: DateTime<Utc>,
}

/// Durable per-order workflow record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub id: String,
    pub order_id: String,
    pub tier: Tier,
    pub current_phase: PhaseId,
    pub phase_status: PhaseStatus,
    pub phase_outputs: BTreeMap<PhaseId, Value>,
    pub completed_phases: BTreeSet<PhaseId>,
    pub revision_loop_count: u8,
    pub hold_reason: Option<HoldReason>,
    pub hold_detection: Option<HoldDetectionLink>,
    pub hold_started_at: Option<DateTime<Utc>>,
    pub hold_resolution: Option<Value>,
    pub checkpoint_pending: bool,
    pub checkpoint_type: Option<CheckpointType>,
    pub checkpoint_payload: Option<Value>,
    /// Canonical draft read by every phase after grading
    pub final_draft: Option<Value>,
    pub new_references_introduced: bool,
    pub revision_source: Option<RevisionSource>,
    pub manual_review: Option<ManualReviewFlag>,
    pub operator_notes: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(
        id: impl Into<String>,
        order_id: impl Into<String>,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            order_id: order_id.into(),
            tier,
            current_phase: PhaseRegistry::first(),
            phase_status: PhaseStatus::Pending,
            phase_outputs: BTreeMap::new(),
            completed_phases: BTreeSet::new(),
            revision_loop_count: 0,
            hold_reason: None,
            hold_detection: None,
            hold_started_at: None,
            hold_resolution: None,
            checkpoint_pending: false,
            checkpoint_type: None,
            checkpoint_payload: None,
            final_draft: None,
            new_references_introduced: false,
            revision_source: None,
            manual_review: None,
            operator_notes: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase_status.is_terminal()
    }

    pub fn is_completed(&self, phase: PhaseId) -> bool {
        self.completed_phases.contains(&phase)
    }

    pub fn output(&self, phase: PhaseId) -> Option<&Value> {
        self.phase_outputs.get(&phase)
    }

    /// Commit a phase output and extend the completed set
    pub fn record_output(&mut self, phase: PhaseId, output: Value) {
        self.phase_outputs.insert(phase, output);
        self.completed_phases.insert(phase);
    }

    /// Drop a phase's completion, e.g. a re-verification invalidated by a new revision
    pub fn invalidate(&mut self, phase: PhaseId) {
        self.phase_outputs.remove(&phase);
        self.completed_phases.remove(&phase);
    }

    pub fn flag_manual_review(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.manual_review = Some(ManualReviewFlag {
            reason: reason.into(),
            flagged_at: now,
        });
    }

    pub fn clear_checkpoint(&mut self) {
        self.checkpoint_pending = false;
        self.checkpoint_type = None;
        self.checkpoint_payload = None;
    }

    pub fn clear_hold(&mut self) {
        self.hold_reason = None;
        self.hold_detection = None;
        self.hold_started_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_workflow_starts_at_first_phase() {
        let state = WorkflowState::new("wf-1", "order-1", Tier::A, Utc::now());
        assert_eq!(state.current_phase, PhaseId::Intake);
        assert_eq!(state.phase_status, PhaseStatus::Pending);
        assert!(state.completed_phases.is_empty());
        assert_eq!(state.revision_loop_count, 0);
    }

    #[test]
    fn test_record_and_invalidate_output() {
        let mut state = WorkflowState::new("wf-1", "order-1", Tier::A, Utc::now());
        state.record_output(PhaseId::Intake, serde_json::json!({"ok": true}));
        assert!(state.is_completed(PhaseId::Intake));
        assert!(state.output(PhaseId::Intake).is_some());

        state.invalidate(PhaseId::Intake);
        assert!(!state.is_completed(PhaseId::Intake));
        assert!(state.output(PhaseId::Intake).is_none());
    }

    #[test]
    fn test_hold_reason_string_form() {
        assert_eq!(HoldReason::parse("evidence_gap"), HoldReason::EvidenceGap);
        assert_eq!(HoldReason::parse("revision_stall"), HoldReason::RevisionStall);
        assert_eq!(
            HoldReason::parse("client_unreachable"),
            HoldReason::Other("client_unreachable".to_string())
        );

        let json = serde_json::to_string(&HoldReason::EvidenceGap).unwrap();
        assert_eq!(json, "\"evidence_gap\"");
    }

    #[test]
    fn test_workflow_state_serializes_phase_keys() {
        let mut state = WorkflowState::new("wf-1", "order-1", Tier::B, Utc::now());
        state.record_output(PhaseId::CitationVerify, serde_json::json!({"verified": 12}));

        let json = serde_json::to_value(&state).unwrap();
        assert!(json["phase_outputs"]["citation_verify"].is_object());

        let back: WorkflowState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
