use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::phase::PhaseId;

/// Human review gates at fixed pipeline positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointType {
    ResearchReview,
    GradeReview,
    FinalReview,
}

impl CheckpointType {
    /// Blocking checkpoints halt progression until resolved
    pub fn is_blocking(&self) -> bool {
        matches!(self, CheckpointType::FinalReview)
    }

    /// Phase after which this checkpoint is raised
    pub fn after_phase(&self) -> PhaseId {
        match self {
            CheckpointType::ResearchReview => PhaseId::Research,
            CheckpointType::GradeReview => PhaseId::Grading,
            CheckpointType::FinalReview => PhaseId::FinalAssembly,
        }
    }

    /// Checkpoint raised once `phase` is finished, if any
    pub fn following(phase: PhaseId) -> Option<CheckpointType> {
        match phase {
            PhaseId::Research => Some(CheckpointType::ResearchReview),
            PhaseId::Grading => Some(CheckpointType::GradeReview),
            PhaseId::FinalAssembly => Some(CheckpointType::FinalReview),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointType::ResearchReview => "RESEARCH_REVIEW",
            CheckpointType::GradeReview => "GRADE_REVIEW",
            CheckpointType::FinalReview => "FINAL_REVIEW",
        }
    }
}

impl fmt::Display for CheckpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator decision on a pending checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointAction {
    Approve,
    RequestChanges { notes: Option<String> },
    Cancel { reason: Option<String> },
}

impl CheckpointAction {
    pub fn name(&self) -> &'static str {
        match self {
            CheckpointAction::Approve => "APPROVE",
            CheckpointAction::RequestChanges { .. } => "REQUEST_CHANGES",
            CheckpointAction::Cancel { .. } => "CANCEL",
        }
    }
}

/// A checkpoint raised for review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_type: CheckpointType,
    pub blocking: bool,
    pub payload: Value,
}

impl Checkpoint {
    pub fn new(checkpoint_type: CheckpointType, payload: Value) -> Self {
        Self {
            checkpoint_type,
            blocking: checkpoint_type.is_blocking(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_final_review_blocks() {
        assert!(!CheckpointType::ResearchReview.is_blocking());
        assert!(!CheckpointType::GradeReview.is_blocking());
        assert!(CheckpointType::FinalReview.is_blocking());
        assert!(Checkpoint::new(CheckpointType::FinalReview, Value::Null).blocking);
    }

    #[test]
    fn test_checkpoint_positions() {
        for checkpoint in [
            CheckpointType::ResearchReview,
            CheckpointType::GradeReview,
            CheckpointType::FinalReview,
        ] {
            assert_eq!(CheckpointType::following(checkpoint.after_phase()), Some(checkpoint));
        }
        assert_eq!(CheckpointType::following(PhaseId::Drafting), None);
    }

    #[test]
    fn test_action_wire_form() {
        let action: CheckpointAction =
            serde_json::from_str(r#"{"action":"REQUEST_CHANGES","notes":"tighten argument"}"#)
                .unwrap();
        assert_eq!(
            action,
            CheckpointAction::RequestChanges {
                notes: Some("tighten argument".to_string())
            }
        );
        assert_eq!(action.name(), "REQUEST_CHANGES");
    }
}
