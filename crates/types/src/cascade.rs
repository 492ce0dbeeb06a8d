use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::event::EventName;
use crate::order::OrderStatus;

/// A waiting condition that owns a timeout cascade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitCondition {
    Hold,
    ExternalReview,
    FinalApproval,
}

impl WaitCondition {
    pub const ALL: [WaitCondition; 3] = [
        WaitCondition::Hold,
        WaitCondition::ExternalReview,
        WaitCondition::FinalApproval,
    ];

    /// Order status while the condition is active
    pub fn waiting_status(&self) -> OrderStatus {
        match self {
            WaitCondition::Hold => OrderStatus::Hold,
            WaitCondition::ExternalReview => OrderStatus::PendingReview,
            WaitCondition::FinalApproval => OrderStatus::AwaitingApproval,
        }
    }

    pub fn from_status(status: OrderStatus) -> Option<WaitCondition> {
        WaitCondition::ALL
            .iter()
            .copied()
            .find(|c| c.waiting_status() == status)
    }

    /// Event that starts (or restarts) this condition's cascade
    pub fn initiating_event(&self) -> EventName {
        match self {
            WaitCondition::Hold => EventName::HoldStarted,
            WaitCondition::ExternalReview => EventName::ExternalReviewStarted,
            WaitCondition::FinalApproval => EventName::FinalApprovalRequested,
        }
    }

    /// Steps in firing order
    pub fn steps(&self) -> &'static [CascadeStep] {
        match self {
            WaitCondition::Hold => &[
                CascadeStep::HoldReminder,
                CascadeStep::HoldEscalation,
                CascadeStep::HoldTerminal,
            ],
            WaitCondition::ExternalReview => &[CascadeStep::ExternalReviewTimeout],
            WaitCondition::FinalApproval => &[CascadeStep::FinalApprovalTimeout],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WaitCondition::Hold => "hold",
            WaitCondition::ExternalReview => "external_review",
            WaitCondition::FinalApproval => "final_approval",
        }
    }
}

impl fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One delayed step of a cascade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeStep {
    HoldReminder,
    HoldEscalation,
    HoldTerminal,
    ExternalReviewTimeout,
    FinalApprovalTimeout,
}

impl CascadeStep {
    pub fn condition(&self) -> WaitCondition {
        match self {
            CascadeStep::HoldReminder | CascadeStep::HoldEscalation | CascadeStep::HoldTerminal => {
                WaitCondition::Hold
            }
            CascadeStep::ExternalReviewTimeout => WaitCondition::ExternalReview,
            CascadeStep::FinalApprovalTimeout => WaitCondition::FinalApproval,
        }
    }

    /// Terminal steps may cancel the order
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CascadeStep::HoldReminder | CascadeStep::HoldEscalation)
    }

    /// Stable identifier carried by the timer bus
    pub fn step_id(&self) -> &'static str {
        match self {
            CascadeStep::HoldReminder => "hold.reminder",
            CascadeStep::HoldEscalation => "hold.escalation",
            CascadeStep::HoldTerminal => "hold.terminal",
            CascadeStep::ExternalReviewTimeout => "external_review.timeout",
            CascadeStep::FinalApprovalTimeout => "final_approval.timeout",
        }
    }

    pub fn parse(step_id: &str) -> Option<CascadeStep> {
        match step_id {
            "hold.reminder" => Some(CascadeStep::HoldReminder),
            "hold.escalation" => Some(CascadeStep::HoldEscalation),
            "hold.terminal" => Some(CascadeStep::HoldTerminal),
            "external_review.timeout" => Some(CascadeStep::ExternalReviewTimeout),
            "final_approval.timeout" => Some(CascadeStep::FinalApprovalTimeout),
            _ => None,
        }
    }
}

impl fmt::Display for CascadeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.step_id())
    }
}

/// Shared cancellation signal for all steps of one (order, condition) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CancelKey {
    pub order_id: String,
    pub condition: WaitCondition,
}

impl CancelKey {
    pub fn new(order_id: impl Into<String>, condition: WaitCondition) -> Self {
        Self {
            order_id: order_id.into(),
            condition,
        }
    }
}

impl fmt::Display for CancelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.order_id, self.condition)
    }
}

/// A scheduled, cancellable cascade step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutCascadeEntry {
    pub trigger_event: EventName,
    pub order_id: String,
    pub step: CascadeStep,
    pub scheduled_fire_time: DateTime<Utc>,
    pub cancel_condition: CancelKey,
}

impl TimeoutCascadeEntry {
    pub fn new(order_id: impl Into<String>, step: CascadeStep, fire_at: DateTime<Utc>) -> Self {
        let order_id = order_id.into();
        let condition = step.condition();
        Self {
            trigger_event: condition.initiating_event(),
            cancel_condition: CancelKey::new(order_id.clone(), condition),
            order_id,
            step,
            scheduled_fire_time: fire_at,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_fire_time <= now
    }
}

/// Delay of every cascade step, measured from the moment the waiting condition started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeTimings {
    pub hold_reminder: Duration,
    pub hold_escalation: Duration,
    pub hold_terminal: Duration,
    pub external_review_timeout: Duration,
    pub final_approval_timeout: Duration,
}

impl Default for CascadeTimings {
    fn default() -> Self {
        Self {
            hold_reminder: Duration::hours(24),
            hold_escalation: Duration::hours(72),
            hold_terminal: Duration::days(7),
            external_review_timeout: Duration::days(7),
            final_approval_timeout: Duration::days(21),
        }
    }
}

impl CascadeTimings {
    pub fn delay(&self, step: CascadeStep) -> Duration {
        match step {
            CascadeStep::HoldReminder => self.hold_reminder,
            CascadeStep::HoldEscalation => self.hold_escalation,
            CascadeStep::HoldTerminal => self.hold_terminal,
            CascadeStep::ExternalReviewTimeout => self.external_review_timeout,
            CascadeStep::FinalApprovalTimeout => self.final_approval_timeout,
        }
    }

    /// Delay of the condition's last step
    pub fn horizon(&self, condition: WaitCondition) -> Duration {
        condition
            .steps()
            .iter()
            .map(|step| self.delay(*step))
            .max()
            .unwrap_or_else(Duration::zero)
    }

    /// Every step of the condition's cascade, scheduled from `started_at`
    pub fn plan(
        &self,
        order_id: &str,
        condition: WaitCondition,
        started_at: DateTime<Utc>,
    ) -> Vec<TimeoutCascadeEntry> {
        condition
            .steps()
            .iter()
            .map(|step| TimeoutCascadeEntry::new(order_id, *step, started_at + self.delay(*step)))
            .collect()
    }
}

/// Why an order was cancelled; keys refund idempotency together with the order id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationTrigger {
    HoldTimeout,
    ExternalReviewTimeout,
    FinalApprovalTimeout,
    OperatorCancel,
}

impl CancellationTrigger {
    pub fn for_step(step: CascadeStep) -> Option<CancellationTrigger> {
        match step {
            CascadeStep::HoldTerminal => Some(CancellationTrigger::HoldTimeout),
            CascadeStep::ExternalReviewTimeout => Some(CancellationTrigger::ExternalReviewTimeout),
            CascadeStep::FinalApprovalTimeout => Some(CancellationTrigger::FinalApprovalTimeout),
            CascadeStep::HoldReminder | CascadeStep::HoldEscalation => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CancellationTrigger::HoldTimeout => "hold_timeout",
            CancellationTrigger::ExternalReviewTimeout => "external_review_timeout",
            CancellationTrigger::FinalApprovalTimeout => "final_approval_timeout",
            CancellationTrigger::OperatorCancel => "operator_cancel",
        }
    }

    pub fn parse(s: &str) -> Option<CancellationTrigger> {
        match s {
            "hold_timeout" => Some(CancellationTrigger::HoldTimeout),
            "external_review_timeout" => Some(CancellationTrigger::ExternalReviewTimeout),
            "final_approval_timeout" => Some(CancellationTrigger::FinalApprovalTimeout),
            "operator_cancel" => Some(CancellationTrigger::OperatorCancel),
            _ => None,
        }
    }
}

impl fmt::Display for CancellationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
