use super::engine::PaymentEngine;
use crate::domain::events::PaymentEventKind;
use crate::domain::money::Amount;
use crate::domain::payment::{Payment, RefundRequest};
use crate::domain::ports::ChannelRefundRequest;
use crate::domain::transaction::PaymentTransaction;
use crate::domain::types::TransactionType;
use crate::error::{PaymentError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{error, info};
use uuid::Uuid;

/// How a refund amount is spread over the payment transactions it returns
/// money from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefundSplit {
    /// The whole amount comes back from one transaction.
    #[default]
    SingleTransaction,
    /// Spread over every settled transaction by its share. Not supported yet.
    Proportional,
}

#[derive(Debug, Clone)]
pub struct RefundCommand {
    pub payment_code: String,
    pub amount: Decimal,
    /// Defaults to the latest settled payment transaction with money left.
    pub original_transaction_id: Option<Uuid>,
    pub business_order_id: Option<String>,
    pub reason: Option<String>,
    pub split: RefundSplit,
}

#[derive(Debug)]
pub struct RefundReceipt {
    pub payment_code: String,
    pub transaction_id: Uuid,
    pub original_transaction_id: Uuid,
    pub refund_correlation_id: String,
    pub amount: Decimal,
    /// Set when the channel accepted the refund but the payment could not be
    /// saved afterwards.
    pub persist_failure: Option<PaymentError>,
}

/// Picks the payment transaction a refund returns money from.
pub fn select_refund_transaction(
    payment: &Payment,
    requested: Option<Uuid>,
) -> Result<&PaymentTransaction> {
    match requested {
        Some(id) => payment
            .find_transaction(id)
            .filter(|tx| tx.is_successful(TransactionType::Payment))
            .ok_or_else(|| {
                PaymentError::InvalidArgument(format!(
                    "transaction {} is not a successful payment of {}",
                    id,
                    payment.code()
                ))
            }),
        None => payment.latest_refundable_payment().ok_or_else(|| {
            PaymentError::InvalidState(format!(
                "payment {} has no settled payment left to refund",
                payment.code()
            ))
        }),
    }
}

impl PaymentEngine {
    /// Returns part of what a payment collected through the channel of the
    /// original transaction.
    ///
    /// The refund is fully validated before the channel is asked; the result
    /// arrives later via callback or reconciliation.
    pub async fn execute_refund(&self, command: RefundCommand) -> Result<RefundReceipt> {
        if command.split == RefundSplit::Proportional {
            return Err(PaymentError::InvalidArgument(
                "proportional refund split is not supported".to_string(),
            ));
        }

        let _guard = self.locks.lock(&command.payment_code).await;
        let mut payment = self.get_payment(&command.payment_code).await?;

        if !payment.can_refund() {
            return Err(PaymentError::InvalidState(format!(
                "payment {} cannot be refunded in status {} (paid {}, refunded {})",
                payment.code(),
                payment.status(),
                payment.paid_amount(),
                payment.refunded_amount()
            )));
        }

        let original = select_refund_transaction(&payment, command.original_transaction_id)?;
        let request = RefundRequest {
            amount: command.amount,
            original_transaction_id: original.id,
            business_order_id: command.business_order_id,
            reason: command.reason,
        };
        payment.validate_refund(&request)?;

        let original_correlation_id = original.correlation_id.clone().ok_or_else(|| {
            PaymentError::InvalidState(format!(
                "transaction {} has no channel reference to refund against",
                original.id
            ))
        })?;
        let gateway = self.gateways.get(original.channel)?;
        let amount = Amount::new(request.amount)?;

        let refund_correlation_id = gateway
            .create_refund_request(ChannelRefundRequest {
                payment_code: payment.code().to_string(),
                original_correlation_id,
                amount,
                reason: request.reason.clone(),
            })
            .await?;

        let original_transaction_id = request.original_transaction_id;
        let transaction_id = payment.execute_refund(request, Utc::now())?;
        payment.attach_correlation_id(transaction_id, &refund_correlation_id)?;

        info!(
            payment = %payment.code(),
            correlation_id = %refund_correlation_id,
            amount = %amount,
            "channel accepted refund request"
        );

        let persist_failure = match self.repository.save(&mut payment).await {
            Ok(()) => {
                self.publish(
                    PaymentEventKind::RefundExecuted,
                    &payment,
                    Some(&refund_correlation_id),
                );
                None
            }
            Err(err) => {
                error!(
                    payment = %payment.code(),
                    correlation_id = %refund_correlation_id,
                    error = %err,
                    "refund not saved after channel accepted it, reconciliation required"
                );
                Some(err)
            }
        };

        Ok(RefundReceipt {
            payment_code: payment.code().to_string(),
            transaction_id,
            original_transaction_id,
            refund_correlation_id,
            amount: amount.value(),
            persist_failure,
        })
    }
}
