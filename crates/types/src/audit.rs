use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::PhaseId;

/// Audit record of a rejected phase entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateViolationRecord {
    pub workflow_id: String,
    pub order_id: String,
    pub current_phase: PhaseId,
    pub target_phase: PhaseId,
    pub missing_prereqs: Vec<PhaseId>,
    /// Always "CRITICAL"; kept as a column so operators can filter audit exports
    pub severity: String,
    pub recorded_at: DateTime<Utc>,
}

impl GateViolationRecord {
    pub fn critical(
        workflow_id: impl Into<String>,
        order_id: impl Into<String>,
        current_phase: PhaseId,
        target_phase: PhaseId,
        missing_prereqs: Vec<PhaseId>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            order_id: order_id.into(),
            current_phase,
            target_phase,
            missing_prereqs,
            severity: "CRITICAL".to_string(),
            recorded_at,
        }
    }
}
