use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Service tier of an order; higher tiers run additional phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    A,
    B,
    C,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::A => "A",
            Tier::B => "B",
            Tier::C => "C",
        }
    }

    pub fn parse(s: &str) -> Option<Tier> {
        match s {
            "A" => Some(Tier::A),
            "B" => Some(Tier::B),
            "C" => Some(Tier::C),
            _ => None,
        }
    }
}

/// Customer-facing order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Submitted,
    /// Waiting on external review before payment capture
    PendingReview,
    InProgress,
    Hold,
    /// Blocking final review checkpoint pending
    AwaitingApproval,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Submitted => "SUBMITTED",
            OrderStatus::PendingReview => "PENDING_REVIEW",
            OrderStatus::InProgress => "IN_PROGRESS",
            OrderStatus::Hold => "HOLD",
            OrderStatus::AwaitingApproval => "AWAITING_APPROVAL",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<OrderStatus> {
        match s {
            "SUBMITTED" => Some(OrderStatus::Submitted),
            "PENDING_REVIEW" => Some(OrderStatus::PendingReview),
            "IN_PROGRESS" => Some(OrderStatus::InProgress),
            "HOLD" => Some(OrderStatus::Hold),
            "AWAITING_APPROVAL" => Some(OrderStatus::AwaitingApproval),
            "COMPLETED" => Some(OrderStatus::Completed),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistent order record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub tier: Tier,
    pub status: OrderStatus,
    pub amount_paid: Decimal,
    pub payment_ref: Option<String>,
    /// Set when a refund could not be settled and needs an operator
    pub refund_pending_manual: bool,
    pub status_changed_at: DateTime<Utc>,
    pub last_cascade_activity_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(id: impl Into<String>, tier: Tier, amount_paid: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            tier,
            status: OrderStatus::Submitted,
            amount_paid,
            payment_ref: None,
            refund_pending_manual: false,
            status_changed_at: now,
            last_cascade_activity_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_payment_ref(mut self, payment_ref: impl Into<String>) -> Self {
        self.payment_ref = Some(payment_ref.into());
        self
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = status;
        self
    }
}
