use super::engine::PaymentEngine;
use crate::domain::events::PaymentEventKind;
use crate::domain::payment::Payment;
use crate::domain::types::{PaymentChannel, PaymentStatus, PaymentType, TransactionType};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

/// Which side of the money flow a channel notification settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    Payment,
    Refund,
}

impl CallbackKind {
    pub fn transaction_type(self) -> TransactionType {
        match self {
            CallbackKind::Payment => TransactionType::Payment,
            CallbackKind::Refund => TransactionType::Refund,
        }
    }
}

/// Asynchronous result notification pushed by a channel.
#[derive(Debug, Clone)]
pub struct CallbackNotice {
    pub channel: PaymentChannel,
    pub kind: CallbackKind,
    pub correlation_id: String,
    /// Narrows the notice to one payment of a batch.
    pub payment_code: Option<String>,
    pub success: bool,
    pub completed_at: DateTime<Utc>,
    /// Raw body as received, checked against `signature`. The reference,
    /// kind and result above must agree with what it says.
    pub payload: Vec<u8>,
    pub signature: String,
}

#[derive(Debug, Default)]
pub struct CallbackOutcome {
    pub applied: Vec<String>,
    pub duplicates: Vec<String>,
    /// Payments of the batch that could not be settled. They stay
    /// processing and are picked up again by reconciliation.
    pub failed: Vec<(String, PaymentError)>,
}

/// What happened when a settlement was applied to one payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settlement {
    Applied,
    Duplicate,
}

impl PaymentEngine {
    /// Applies a channel's result notification to every payment carrying its
    /// correlation id.
    ///
    /// Only what the signed payload asserts is trusted: a notice whose
    /// reference, kind or result disagree with its body is rejected as
    /// `InvalidSignature`.
    ///
    /// Redelivery is expected: transactions that were already settled are
    /// left untouched and counted as duplicates. A payment of the batch that
    /// fails to settle does not stop the others; it is reported in
    /// `failed`. When nothing was applied the call returns the first
    /// failure, or `AlreadyProcessed` if every payment was a duplicate.
    pub async fn handle_callback(&self, notice: CallbackNotice) -> Result<CallbackOutcome> {
        let gateway = self.gateways.get(notice.channel)?;
        let verified = match gateway.parse_callback(&notice.payload, &notice.signature) {
            Ok(verified) => verified,
            Err(err) => {
                warn!(
                    channel = %notice.channel,
                    correlation_id = %notice.correlation_id,
                    error = %err,
                    "rejected callback that failed verification"
                );
                return Err(PaymentError::InvalidSignature(notice.channel.to_string()));
            }
        };
        if verified.correlation_id != notice.correlation_id
            || verified.kind != notice.kind.transaction_type()
            || verified.success != notice.success
        {
            warn!(
                channel = %notice.channel,
                correlation_id = %notice.correlation_id,
                signed_reference = %verified.correlation_id,
                "rejected callback whose fields differ from the signed payload"
            );
            return Err(PaymentError::InvalidSignature(notice.channel.to_string()));
        }

        let codes = match &notice.payment_code {
            Some(code) => vec![code.clone()],
            None => self.codes_for_correlation(&verified.correlation_id).await?,
        };
        if codes.is_empty() {
            return Err(PaymentError::NotFound(format!(
                "no payment references {}",
                verified.correlation_id
            )));
        }

        let mut outcome = CallbackOutcome::default();
        for code in codes {
            let settled = self
                .apply_settlement(
                    &code,
                    notice.kind,
                    &verified.correlation_id,
                    verified.success,
                    notice.completed_at,
                )
                .await;
            match settled {
                Ok(Settlement::Applied) => outcome.applied.push(code),
                Ok(Settlement::Duplicate) => outcome.duplicates.push(code),
                Err(err) => {
                    error!(
                        payment = %code,
                        correlation_id = %verified.correlation_id,
                        error = %err,
                        "failed to settle payment from callback"
                    );
                    outcome.failed.push((code, err));
                }
            }
        }

        if outcome.applied.is_empty() {
            if !outcome.failed.is_empty() {
                let (_, err) = outcome.failed.swap_remove(0);
                return Err(err);
            }
            return Err(PaymentError::AlreadyProcessed(format!(
                "callback {} was already applied",
                verified.correlation_id
            )));
        }
        Ok(outcome)
    }

    pub(crate) async fn codes_for_correlation(&self, correlation_id: &str) -> Result<Vec<String>> {
        let mut codes: Vec<String> = self
            .repository
            .find_by_correlation_id(correlation_id)
            .await?
            .iter()
            .map(|p| p.code().to_string())
            .collect();
        codes.sort();
        Ok(codes)
    }

    /// Settles the transaction of `code` that carries `correlation_id`, under
    /// the payment's lock. Shared by callbacks and reconciliation.
    pub(crate) async fn apply_settlement(
        &self,
        code: &str,
        kind: CallbackKind,
        correlation_id: &str,
        success: bool,
        at: DateTime<Utc>,
    ) -> Result<Settlement> {
        let _guard = self.locks.lock(code).await;
        let mut payment = self.get_payment(code).await?;

        let tx = payment.find_by_correlation(correlation_id).ok_or_else(|| {
            PaymentError::NotFound(format!(
                "payment {code} has no transaction for {correlation_id}"
            ))
        })?;
        if tx.r#type != kind.transaction_type() {
            return Err(PaymentError::InvalidArgument(format!(
                "{} is a {} transaction, not a {}",
                correlation_id,
                tx.r#type,
                kind.transaction_type()
            )));
        }
        let tx_id = tx.id;

        let applied = match kind {
            CallbackKind::Payment => payment.handle_payment_callback(tx_id, success, at),
            CallbackKind::Refund => payment.handle_refund_callback(tx_id, success, at),
        };
        match applied {
            Ok(()) => {}
            Err(PaymentError::AlreadyProcessed(message)) => {
                info!(payment = %code, correlation_id, "{}", message);
                return Ok(Settlement::Duplicate);
            }
            Err(err) => return Err(err),
        }

        self.repository.save(&mut payment).await?;
        info!(
            payment = %code,
            correlation_id,
            success,
            status = %payment.status(),
            refund_status = %payment.refund_status(),
            "transaction settled"
        );
        self.publish_settlement(&payment, kind, correlation_id, success);
        Ok(Settlement::Applied)
    }

    fn publish_settlement(
        &self,
        payment: &Payment,
        kind: CallbackKind,
        correlation_id: &str,
        success: bool,
    ) {
        let event = match (kind, success) {
            (CallbackKind::Payment, true) => PaymentEventKind::PaymentCompleted,
            (CallbackKind::Payment, false) => PaymentEventKind::PaymentFailed,
            (CallbackKind::Refund, true) => PaymentEventKind::RefundCompleted,
            (CallbackKind::Refund, false) => PaymentEventKind::RefundFailed,
        };
        self.publish(event, payment, Some(correlation_id));

        if kind == CallbackKind::Payment
            && payment.payment_type() == PaymentType::CreditRepayment
            && payment.status() == PaymentStatus::Paid
        {
            debug!(payment = %payment.code(), "credit repayment completed");
            self.publish(PaymentEventKind::CreditRepaymentCompleted, payment, Some(correlation_id));
        }
    }
}
