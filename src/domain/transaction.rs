use super::money::Amount;
use super::types::{PaymentChannel, TransactionStatus, TransactionType};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// One attempt to move money through a channel, either collecting a payment
/// or returning part of it.
///
/// Created `Processing` when the channel request is issued and settled
/// exactly once. After settlement only a missing channel correlation id may
/// still be filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub payment_code: String,
    pub r#type: TransactionType,
    pub status: TransactionStatus,
    /// Always positive; see [`PaymentTransaction::signed_amount`].
    pub amount: Amount,
    pub channel: PaymentChannel,
    pub correlation_id: Option<String>,
    /// The payment transaction a refund returns money from.
    pub original_transaction_id: Option<Uuid>,
    pub business_order_id: Option<String>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Only set on payment attempts.
    pub expires_at: Option<DateTime<Utc>>,
}

impl PaymentTransaction {
    pub fn new_payment(
        payment_code: &str,
        channel: PaymentChannel,
        amount: Amount,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_code: payment_code.to_string(),
            r#type: TransactionType::Payment,
            status: TransactionStatus::Processing,
            amount,
            channel,
            correlation_id: None,
            original_transaction_id: None,
            business_order_id: None,
            reason: None,
            created_at,
            completed_at: None,
            expires_at: Some(expires_at),
        }
    }

    pub fn new_refund(
        payment_code: &str,
        original: &PaymentTransaction,
        amount: Amount,
        business_order_id: Option<String>,
        reason: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_code: payment_code.to_string(),
            r#type: TransactionType::Refund,
            status: TransactionStatus::Processing,
            amount,
            channel: original.channel,
            correlation_id: None,
            original_transaction_id: Some(original.id),
            business_order_id,
            reason,
            created_at,
            completed_at: None,
            expires_at: None,
        }
    }

    pub fn is_processing(&self) -> bool {
        self.status == TransactionStatus::Processing
    }

    pub fn is_successful(&self, r#type: TransactionType) -> bool {
        self.r#type == r#type && self.status == TransactionStatus::Success
    }

    /// Positive for payments, negative for refunds.
    pub fn signed_amount(&self) -> Decimal {
        match self.r#type {
            TransactionType::Payment => self.amount.value(),
            TransactionType::Refund => -self.amount.value(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Moves a processing transaction to its final status.
    pub(crate) fn settle(&mut self, success: bool, completed_at: DateTime<Utc>) -> Result<()> {
        if !self.is_processing() {
            return Err(PaymentError::AlreadyProcessed(format!(
                "transaction {} is already {}",
                self.id, self.status
            )));
        }
        self.status = if success {
            TransactionStatus::Success
        } else {
            TransactionStatus::Failed
        };
        self.completed_at = Some(completed_at);
        Ok(())
    }

    /// Records the channel correlation id. Repeating the same id is a no-op.
    pub(crate) fn attach_correlation_id(&mut self, correlation_id: &str) -> Result<()> {
        match &self.correlation_id {
            Some(existing) if existing == correlation_id => Ok(()),
            Some(existing) => Err(PaymentError::InvalidState(format!(
                "transaction {} already carries correlation id {}",
                self.id, existing
            ))),
            None => {
                self.correlation_id = Some(correlation_id.to_string());
                Ok(())
            }
        }
    }
}
