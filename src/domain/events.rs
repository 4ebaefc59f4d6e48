use super::payment::Payment;
use super::types::{PaymentStatus, PaymentType, RefundStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentEventKind {
    PaymentCreated,
    PaymentExecuted,
    PaymentCompleted,
    PaymentFailed,
    RefundExecuted,
    RefundCompleted,
    RefundFailed,
    /// Emitted in addition to `PaymentCompleted` when a credit repayment is
    /// fully paid, for the credit management system.
    CreditRepaymentCompleted,
    /// Freeze, unfreeze, stop, cancel or reopen.
    StatusChanged,
}

impl fmt::Display for PaymentEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PaymentEventKind::PaymentCreated => "payment_created",
            PaymentEventKind::PaymentExecuted => "payment_executed",
            PaymentEventKind::PaymentCompleted => "payment_completed",
            PaymentEventKind::PaymentFailed => "payment_failed",
            PaymentEventKind::RefundExecuted => "refund_executed",
            PaymentEventKind::RefundCompleted => "refund_completed",
            PaymentEventKind::RefundFailed => "refund_failed",
            PaymentEventKind::CreditRepaymentCompleted => "credit_repayment_completed",
            PaymentEventKind::StatusChanged => "status_changed",
        };
        f.write_str(name)
    }
}

/// Outbound notification for the order, finance and credit systems.
///
/// Carries a snapshot of the payment's amounts and statuses taken right after
/// the change was persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentEvent {
    pub kind: PaymentEventKind,
    pub payment_code: String,
    pub order_id: Option<String>,
    pub reseller_id: String,
    pub payment_type: PaymentType,
    pub status: PaymentStatus,
    pub refund_status: RefundStatus,
    pub target_amount: Decimal,
    pub paid_amount: Decimal,
    pub refunded_amount: Decimal,
    pub actual_amount: Decimal,
    pub correlation_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl PaymentEvent {
    pub fn from_payment(
        kind: PaymentEventKind,
        payment: &Payment,
        correlation_id: Option<&str>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            payment_code: payment.code().to_string(),
            order_id: payment.order_id().map(str::to_string),
            reseller_id: payment.reseller_id().to_string(),
            payment_type: payment.payment_type(),
            status: payment.status(),
            refund_status: payment.refund_status(),
            target_amount: payment.target_amount().value(),
            paid_amount: payment.paid_amount().value(),
            refunded_amount: payment.refunded_amount().value(),
            actual_amount: payment.actual_amount().value(),
            correlation_id: correlation_id.map(str::to_string),
            occurred_at,
        }
    }
}
