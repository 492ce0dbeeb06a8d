use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Events published on the event bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    #[serde(rename = "workflow.hold_started")]
    HoldStarted,
    #[serde(rename = "workflow.hold_resolved")]
    HoldResolved,
    #[serde(rename = "workflow.hold_reminder")]
    HoldReminder,
    #[serde(rename = "workflow.hold_escalated")]
    HoldEscalated,
    #[serde(rename = "order.external_review_started")]
    ExternalReviewStarted,
    #[serde(rename = "order.external_review_resolved")]
    ExternalReviewResolved,
    #[serde(rename = "workflow.final_approval_requested")]
    FinalApprovalRequested,
    #[serde(rename = "workflow.checkpoint_triggered")]
    CheckpointTriggered,
    #[serde(rename = "workflow.checkpoint_resolved")]
    CheckpointResolved,
    #[serde(rename = "workflow.resumed")]
    WorkflowResumed,
    #[serde(rename = "workflow.manual_review_required")]
    ManualReviewRequired,
    #[serde(rename = "ops.alert")]
    OperatorAlert,
    #[serde(rename = "order.cancelled")]
    OrderCancelled,
    #[serde(rename = "order.completed")]
    OrderCompleted,
    #[serde(rename = "refund.settled")]
    RefundSettled,
    #[serde(rename = "refund.flagged_for_retry")]
    RefundFlaggedForRetry,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::HoldStarted => "workflow.hold_started",
            EventName::HoldResolved => "workflow.hold_resolved",
            EventName::HoldReminder => "workflow.hold_reminder",
            EventName::HoldEscalated => "workflow.hold_escalated",
            EventName::ExternalReviewStarted => "order.external_review_started",
            EventName::ExternalReviewResolved => "order.external_review_resolved",
            EventName::FinalApprovalRequested => "workflow.final_approval_requested",
            EventName::CheckpointTriggered => "workflow.checkpoint_triggered",
            EventName::CheckpointResolved => "workflow.checkpoint_resolved",
            EventName::WorkflowResumed => "workflow.resumed",
            EventName::ManualReviewRequired => "workflow.manual_review_required",
            EventName::OperatorAlert => "ops.alert",
            EventName::OrderCancelled => "order.cancelled",
            EventName::OrderCompleted => "order.completed",
            EventName::RefundSettled => "refund.settled",
            EventName::RefundFlaggedForRetry => "refund.flagged_for_retry",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event together with its payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub name: EventName,
    pub order_id: String,
    pub workflow_id: Option<String>,
    pub payload: Value,
    pub emitted_at: DateTime<Utc>,
}

impl WorkflowEvent {
    pub fn new(name: EventName, order_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            name,
            order_id: order_id.into(),
            workflow_id: None,
            payload: Value::Null,
            emitted_at: now,
        }
    }

    pub fn with_workflow(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}
