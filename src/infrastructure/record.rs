//! Storage representation of payments.
//!
//! Records hold plain values and the stable enum codes, never the in-memory
//! enum layout, so stored data survives refactors of the domain types.
//! Converting a record back goes through [`Payment::rehydrate`], which
//! rejects records that break the aggregate invariants.

use crate::domain::money::{Amount, Money};
use crate::domain::payment::{Payment, PaymentParts, RelatedBusiness};
use crate::domain::transaction::PaymentTransaction;
use crate::domain::types::{
    PaymentChannel, PaymentStatus, PaymentType, RefundStatus, RelatedBusinessType,
    TransactionStatus, TransactionType,
};
use crate::error::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub code: String,
    pub order_id: Option<String>,
    pub reseller_id: String,
    pub currency: String,
    pub target_amount: Decimal,
    pub paid_amount: Decimal,
    pub refunded_amount: Decimal,
    pub payment_type: u8,
    pub status: u8,
    pub refund_status: u8,
    pub deadline: Option<DateTime<Utc>>,
    pub related_business_id: Option<String>,
    pub related_business_type: Option<u8>,
    pub related_business_expires_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub status_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
    pub transactions: Vec<TransactionRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub transaction_type: u8,
    pub status: u8,
    /// Signed: positive for payments, negative for refunds.
    pub amount: Decimal,
    pub channel: u8,
    pub correlation_id: Option<String>,
    pub original_transaction_id: Option<Uuid>,
    pub business_order_id: Option<String>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<&Payment> for PaymentRecord {
    fn from(payment: &Payment) -> Self {
        let related = payment.related_business();
        Self {
            code: payment.code().to_string(),
            order_id: payment.order_id().map(str::to_string),
            reseller_id: payment.reseller_id().to_string(),
            currency: payment.currency().to_string(),
            target_amount: payment.target_amount().value(),
            paid_amount: payment.paid_amount().value(),
            refunded_amount: payment.refunded_amount().value(),
            payment_type: payment.payment_type().code(),
            status: payment.status().code(),
            refund_status: payment.refund_status().code(),
            deadline: payment.deadline(),
            related_business_id: related.map(|b| b.id.clone()),
            related_business_type: related.map(|b| b.r#type.code()),
            related_business_expires_at: related.and_then(|b| b.expires_at),
            description: payment.description().map(str::to_string),
            status_reason: payment.status_reason().map(str::to_string),
            created_at: payment.created_at(),
            updated_at: payment.updated_at(),
            version: payment.version(),
            transactions: payment.transactions().map(TransactionRecord::from).collect(),
        }
    }
}

impl From<&PaymentTransaction> for TransactionRecord {
    fn from(tx: &PaymentTransaction) -> Self {
        Self {
            id: tx.id,
            transaction_type: tx.r#type.code(),
            status: tx.status.code(),
            amount: tx.signed_amount(),
            channel: tx.channel.code(),
            correlation_id: tx.correlation_id.clone(),
            original_transaction_id: tx.original_transaction_id,
            business_order_id: tx.business_order_id.clone(),
            reason: tx.reason.clone(),
            created_at: tx.created_at,
            completed_at: tx.completed_at,
            expires_at: tx.expires_at,
        }
    }
}

impl TransactionRecord {
    pub fn into_domain(self, payment_code: &str) -> Result<PaymentTransaction> {
        Ok(PaymentTransaction {
            id: self.id,
            payment_code: payment_code.to_string(),
            r#type: TransactionType::from_code(self.transaction_type)?,
            status: TransactionStatus::from_code(self.status)?,
            amount: Amount::new(self.amount.abs())?,
            channel: PaymentChannel::from_code(self.channel)?,
            correlation_id: self.correlation_id,
            original_transaction_id: self.original_transaction_id,
            business_order_id: self.business_order_id,
            reason: self.reason,
            created_at: self.created_at,
            completed_at: self.completed_at,
            expires_at: self.expires_at,
        })
    }
}

impl PaymentRecord {
    pub fn into_domain(self) -> Result<Payment> {
        let related_business = match (self.related_business_id, self.related_business_type) {
            (Some(id), Some(code)) => Some(RelatedBusiness {
                id,
                r#type: RelatedBusinessType::from_code(code)?,
                expires_at: self.related_business_expires_at,
            }),
            _ => None,
        };
        let transactions = self
            .transactions
            .into_iter()
            .map(|tx| tx.into_domain(&self.code))
            .collect::<Result<Vec<_>>>()?;

        Payment::rehydrate(PaymentParts {
            target_amount: Amount::new(self.target_amount)?,
            paid_amount: Money::new(self.paid_amount),
            refunded_amount: Money::new(self.refunded_amount),
            r#type: PaymentType::from_code(self.payment_type)?,
            status: PaymentStatus::from_code(self.status)?,
            refund_status: RefundStatus::from_code(self.refund_status)?,
            code: self.code,
            order_id: self.order_id,
            reseller_id: self.reseller_id,
            currency: self.currency,
            deadline: self.deadline,
            related_business,
            description: self.description,
            status_reason: self.status_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
            transactions,
        })
    }
}
