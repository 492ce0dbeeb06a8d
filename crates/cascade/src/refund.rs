use async_trait::async_trait;
use docflow_types::{CancellationTrigger, OrderStatus, PhaseId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Inputs to a refund calculation
#[derive(Debug, Clone, PartialEq)]
pub struct RefundContext {
    pub amount_paid: Decimal,
    /// Order status the cancellation moved the order out of
    pub status: OrderStatus,
    /// Workflow phase at cancellation, if a workflow exists
    pub phase: Option<PhaseId>,
    pub trigger: CancellationTrigger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundDecision {
    pub amount: Decimal,
    /// Skip the gateway entirely
    pub skip: bool,
}

impl RefundDecision {
    pub fn none() -> Self {
        Self {
            amount: Decimal::ZERO,
            skip: true,
        }
    }

    pub fn of(amount: Decimal) -> Self {
        Self {
            amount,
            skip: amount <= Decimal::ZERO,
        }
    }
}

/// Computes how much of the paid amount goes back on cancellation
pub trait RefundPolicy: Send + Sync {
    fn calculate(&self, context: &RefundContext) -> RefundDecision;
}

/// Full refund on HOLD timeout, none on external review timeout, a fixed
/// share on final approval timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardRefundPolicy {
    /// Percentage refunded when a HOLD times out
    pub hold_timeout_pct: Decimal,
    /// Percentage refunded when final approval times out
    pub final_approval_pct: Decimal,
}

impl Default for StandardRefundPolicy {
    fn default() -> Self {
        Self {
            hold_timeout_pct: Decimal::ONE_HUNDRED,
            final_approval_pct: Decimal::from(50),
        }
    }
}

impl StandardRefundPolicy {
    pub fn with_final_approval_pct(mut self, pct: Decimal) -> Self {
        self.final_approval_pct = pct;
        self
    }

    pub fn with_hold_timeout_pct(mut self, pct: Decimal) -> Self {
        self.hold_timeout_pct = pct;
        self
    }

    fn share(amount: Decimal, pct: Decimal) -> Decimal {
        let pct = pct.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED);
        (amount * pct / Decimal::ONE_HUNDRED).round_dp(2)
    }
}

impl RefundPolicy for StandardRefundPolicy {
    fn calculate(&self, context: &RefundContext) -> RefundDecision {
        match context.trigger {
            CancellationTrigger::HoldTimeout => {
                RefundDecision::of(Self::share(context.amount_paid, self.hold_timeout_pct))
            }
            CancellationTrigger::FinalApprovalTimeout => {
                RefundDecision::of(Self::share(context.amount_paid, self.final_approval_pct))
            }
            CancellationTrigger::ExternalReviewTimeout | CancellationTrigger::OperatorCancel => {
                RefundDecision::none()
            }
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),

    #[error("refund rejected: {0}")]
    Rejected(String),
}

/// Issues refunds. Calls with the same idempotency key must settle at most once.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Returns the gateway's settlement id
    async fn refund(
        &self,
        payment_ref: &str,
        amount: Decimal,
        idempotency_key: &str,
    ) -> Result<String, GatewayError>;
}

/// What happened to the refund of a cancelled order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefundOutcome {
    Settled {
        settlement_id: String,
        amount: Decimal,
    },
    /// Zero amount; the gateway was never called
    SkippedZero,
    /// The gateway failed; the order stays cancelled and an operator retries
    FlaggedForRetry { amount: Decimal, reason: String },
}
