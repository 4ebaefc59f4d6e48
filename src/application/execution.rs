use super::engine::PaymentEngine;
use super::validation::{allocate_sequentially, ensure_distinct, validate_allocation, validate_payment_set};
use crate::domain::events::PaymentEventKind;
use crate::domain::money::Amount;
use crate::domain::payment::Payment;
use crate::domain::ports::ChannelPaymentRequest;
use crate::domain::types::PaymentChannel;
use crate::error::{PaymentError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{error, info, warn};
use uuid::Uuid;

/// One channel charge spread over one or more payments of a reseller.
#[derive(Debug, Clone)]
pub struct UnifiedPaymentCommand {
    pub payment_codes: Vec<String>,
    pub allocated_amounts: Vec<Decimal>,
    /// What the channel is asked to charge; must equal the allocations' sum.
    pub total_amount: Decimal,
    pub channel: PaymentChannel,
    pub params: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedPayment {
    pub payment_code: String,
    pub transaction_id: Uuid,
    pub amount: Decimal,
}

/// A payment whose local record could not be written after the channel had
/// already accepted the charge. Left for reconciliation.
#[derive(Debug)]
pub struct PersistFailure {
    pub payment_code: String,
    pub error: PaymentError,
}

/// Outcome of a channel charge: submitted, final result pending the
/// channel's callback or reconciliation.
#[derive(Debug)]
pub struct UnifiedPaymentReceipt {
    pub correlation_id: String,
    pub channel: PaymentChannel,
    pub total_amount: Decimal,
    pub submitted: Vec<SubmittedPayment>,
    pub persist_failures: Vec<PersistFailure>,
}

impl UnifiedPaymentReceipt {
    pub fn is_fully_recorded(&self) -> bool {
        self.persist_failures.is_empty()
    }
}

impl PaymentEngine {
    /// Charges the channel once for the summed allocations and opens a
    /// processing transaction on every payment, all sharing the channel's
    /// correlation id.
    ///
    /// Every check runs before the channel is contacted, so a rejected batch
    /// never leaves a charge behind. Once the channel has accepted, local
    /// write failures are reported in the receipt and not retried.
    pub async fn execute_unified_payment(
        &self,
        command: UnifiedPaymentCommand,
    ) -> Result<UnifiedPaymentReceipt> {
        ensure_distinct(&command.payment_codes)?;
        let _guard = self.locks.lock_many(&command.payment_codes).await;
        let payments = self.load_all(&command.payment_codes).await?;

        self.execute_batch_locked(
            payments,
            &command.allocated_amounts,
            command.total_amount,
            command.channel,
            command.params,
        )
        .await
    }

    /// Settles several payments with one channel charge of `total_amount`,
    /// filling pending amounts in the given order. Payments the total does
    /// not reach are left out of the batch.
    pub async fn execute_merged_payment(
        &self,
        payment_codes: &[String],
        total_amount: Decimal,
        channel: PaymentChannel,
    ) -> Result<UnifiedPaymentReceipt> {
        ensure_distinct(payment_codes)?;
        let _guard = self.locks.lock_many(payment_codes).await;
        let loaded = self.load_all(payment_codes).await?;

        let allocation = allocate_sequentially(&loaded, total_amount)?;
        let (payments, amounts): (Vec<Payment>, Vec<Decimal>) = loaded
            .into_iter()
            .zip(allocation)
            .filter(|(_, amount)| *amount > Decimal::ZERO)
            .unzip();

        self.execute_batch_locked(payments, &amounts, total_amount, channel, HashMap::new())
            .await
    }

    async fn load_all(&self, codes: &[String]) -> Result<Vec<Payment>> {
        let mut payments = Vec::with_capacity(codes.len());
        for code in codes {
            payments.push(self.get_payment(code).await?);
        }
        Ok(payments)
    }

    async fn execute_batch_locked(
        &self,
        mut payments: Vec<Payment>,
        allocated: &[Decimal],
        total: Decimal,
        channel: PaymentChannel,
        params: HashMap<String, String>,
    ) -> Result<UnifiedPaymentReceipt> {
        let reseller_id = validate_payment_set(&payments)?.to_string();
        let amounts = validate_allocation(&payments, allocated, total)?;
        let total_amount = Amount::new(total)?;

        let gateway = self.gateways.get(channel)?;
        if !gateway.is_available(&reseller_id).await {
            return Err(PaymentError::ChannelUnavailable(format!(
                "channel {channel} is not available for reseller {reseller_id}"
            )));
        }
        gateway
            .supports_amount(&reseller_id, total_amount)
            .await
            .map_err(|e| PaymentError::ChannelUnavailable(e.to_string()))?;

        let currency = payments[0].currency().to_string();
        let codes: Vec<String> = payments.iter().map(|p| p.code().to_string()).collect();
        let correlation_id = gateway
            .create_payment_request(ChannelPaymentRequest {
                total_amount,
                currency,
                reseller_id: reseller_id.clone(),
                payment_codes: codes,
                params,
            })
            .await?;

        info!(
            correlation_id = %correlation_id,
            channel = %channel,
            reseller = %reseller_id,
            total = %total_amount,
            payments = payments.len(),
            "channel accepted payment request"
        );

        let now = Utc::now();
        let mut receipt = UnifiedPaymentReceipt {
            correlation_id: correlation_id.clone(),
            channel,
            total_amount: total,
            submitted: Vec::with_capacity(payments.len()),
            persist_failures: Vec::new(),
        };

        for (payment, amount) in payments.iter_mut().zip(amounts) {
            let recorded = payment
                .execute_payment(channel, amount, now, self.config.payment_expiry)
                .and_then(|tx_id| {
                    payment.attach_correlation_id(tx_id, &correlation_id)?;
                    Ok(tx_id)
                });
            let tx_id = match recorded {
                Ok(tx_id) => tx_id,
                Err(err) => {
                    error!(
                        payment = %payment.code(),
                        correlation_id = %correlation_id,
                        error = %err,
                        "could not record accepted charge"
                    );
                    receipt.persist_failures.push(PersistFailure {
                        payment_code: payment.code().to_string(),
                        error: err,
                    });
                    continue;
                }
            };

            match self.repository.save(payment).await {
                Ok(()) => {
                    self.publish(PaymentEventKind::PaymentExecuted, payment, Some(&correlation_id));
                    receipt.submitted.push(SubmittedPayment {
                        payment_code: payment.code().to_string(),
                        transaction_id: tx_id,
                        amount: amount.value(),
                    });
                }
                Err(err) => {
                    error!(
                        payment = %payment.code(),
                        correlation_id = %correlation_id,
                        error = %err,
                        "payment not saved after channel accepted the charge, reconciliation required"
                    );
                    receipt.persist_failures.push(PersistFailure {
                        payment_code: payment.code().to_string(),
                        error: err,
                    });
                }
            }
        }

        if !receipt.is_fully_recorded() {
            warn!(
                correlation_id = %correlation_id,
                failed = receipt.persist_failures.len(),
                "batch partially recorded"
            );
        }
        Ok(receipt)
    }
}
