//! Timeout cascades for orders waiting on a human or an external party.
//!
//! - [`CascadeScheduler`] schedules and fires the delayed steps of each
//!   waiting condition, including the auto-cancel and refund at the end.
//! - [`RecoverySweeper`] restarts cascades that never started or stalled.
//! - [`RefundPolicy`] and [`PaymentGateway`] are the injected refund seams.

pub mod recovery;
pub mod refund;
pub mod scheduler;

pub use recovery::{RecoverySweeper, SweeperConfig};
pub use refund::{
    GatewayError, PaymentGateway, RefundContext, RefundDecision, RefundOutcome, RefundPolicy,
    StandardRefundPolicy,
};
pub use scheduler::{CascadeError, CascadeScheduler, StepOutcome};
