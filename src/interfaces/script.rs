//! Drives a [`PaymentEngine`] from script commands against simulated
//! channels.
//!
//! Scripts cannot know channel references in advance, so commands may name
//! a payment instead; the reference is then taken from that payment's most
//! recent transaction.

use super::csv::command_reader::{Command, Target};
use crate::application::callback::CallbackNotice;
use crate::application::engine::{CreatePayment, PaymentEngine};
use crate::application::execution::UnifiedPaymentCommand;
use crate::application::gateways::GatewayRegistry;
use crate::application::refund::{RefundCommand, RefundSplit};
use crate::config::EngineConfig;
use crate::domain::payment::Payment;
use crate::domain::ports::{EventNotifierRef, PaymentFilter, PaymentRepositoryRef};
use crate::domain::types::PaymentChannel;
use crate::error::{PaymentError, Result};
use crate::infrastructure::simulated::SimulatedGateway;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub struct ScriptRunner {
    engine: Arc<PaymentEngine>,
    channels: HashMap<PaymentChannel, Arc<SimulatedGateway>>,
}

impl ScriptRunner {
    /// Builds an engine with one simulated gateway per channel, all signing
    /// callbacks with `secret`.
    pub fn with_simulated_channels(
        repository: PaymentRepositoryRef,
        notifier: EventNotifierRef,
        config: EngineConfig,
        secret: &str,
    ) -> Self {
        let mut registry = GatewayRegistry::new();
        let mut channels = HashMap::new();
        for channel in PaymentChannel::ALL {
            let gateway = Arc::new(SimulatedGateway::new(*channel, secret));
            registry.register(gateway.clone());
            channels.insert(*channel, gateway);
        }

        Self {
            engine: Arc::new(PaymentEngine::new(repository, registry, notifier, config)),
            channels,
        }
    }

    pub fn engine(&self) -> &Arc<PaymentEngine> {
        &self.engine
    }

    pub async fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Create {
                code,
                reseller_id,
                amount,
                r#type,
                related_business,
            } => {
                self.engine
                    .create_payment(CreatePayment {
                        code: Some(code),
                        order_id: None,
                        reseller_id,
                        currency: None,
                        amount,
                        r#type,
                        deadline: None,
                        related_business,
                        description: None,
                    })
                    .await?;
            }
            Command::Pay {
                codes,
                amounts,
                channel,
            } => {
                let receipt = self
                    .engine
                    .execute_unified_payment(UnifiedPaymentCommand {
                        payment_codes: codes,
                        total_amount: amounts.iter().sum(),
                        allocated_amounts: amounts,
                        channel,
                        params: HashMap::new(),
                    })
                    .await?;
                info!(correlation_id = %receipt.correlation_id, "payment submitted");
            }
            Command::Merge {
                codes,
                total,
                channel,
            } => {
                let receipt = self
                    .engine
                    .execute_merged_payment(&codes, total, channel)
                    .await?;
                info!(correlation_id = %receipt.correlation_id, "merged payment submitted");
            }
            Command::Callback {
                kind,
                target,
                channel,
                success,
            } => {
                let (reference, channel) = self.resolve(&target, channel).await?;
                let payload =
                    SimulatedGateway::callback_payload(&reference, kind.transaction_type(), success);
                let signature = self.gateway(channel)?.sign(&payload);
                let mut outcome = self
                    .engine
                    .handle_callback(CallbackNotice {
                        channel,
                        kind,
                        correlation_id: reference,
                        payment_code: None,
                        success,
                        completed_at: Utc::now(),
                        payload,
                        signature,
                    })
                    .await?;
                info!(applied = ?outcome.applied, "callback applied");
                if !outcome.failed.is_empty() {
                    let (_, err) = outcome.failed.swap_remove(0);
                    return Err(err);
                }
            }
            Command::Refund {
                code,
                amount,
                reason,
            } => {
                let receipt = self
                    .engine
                    .execute_refund(RefundCommand {
                        payment_code: code,
                        amount,
                        original_transaction_id: None,
                        business_order_id: None,
                        reason,
                        split: RefundSplit::SingleTransaction,
                    })
                    .await?;
                if let Some(err) = receipt.persist_failure {
                    return Err(err);
                }
            }
            Command::Gateway {
                target,
                channel,
                status,
            } => {
                let (reference, channel) = self.resolve(&target, channel).await?;
                self.gateway(channel)?.set_remote_status(&reference, status);
            }
            Command::Reconcile { target } => {
                let (reference, _) = self.resolve(&target, None).await?;
                let report = self.engine.compensate_and_sync(&reference).await?;
                if report.needs_attention() {
                    warn!(
                        correlation_id = %reference,
                        entries = ?report.entries,
                        "reconciliation needs attention"
                    );
                }
                report.ensure_in_sync()?;
            }
            Command::Sweep { advance_minutes } => {
                self.engine
                    .sweep(Utc::now() + Duration::minutes(advance_minutes))
                    .await?;
            }
            Command::Freeze { code, reason } => {
                self.engine.freeze_payment(&code, &reason).await?;
            }
            Command::Unfreeze { code } => {
                self.engine.unfreeze_payment(&code).await?;
            }
            Command::Cancel { code, reason } => {
                self.engine.cancel_payment(&code, &reason).await?;
            }
            Command::Stop { code, reason } => {
                self.engine.stop_payment(&code, &reason).await?;
            }
            Command::Reopen { code } => {
                self.engine.reopen_payment(&code).await?;
            }
        }
        Ok(())
    }

    pub async fn payments(&self) -> Result<Vec<Payment>> {
        self.engine.all_payments().await
    }

    fn gateway(&self, channel: PaymentChannel) -> Result<&Arc<SimulatedGateway>> {
        self.channels.get(&channel).ok_or_else(|| {
            PaymentError::ChannelUnavailable(format!("no simulated channel {channel}"))
        })
    }

    /// Returns the channel reference a command is about and the channel it
    /// belongs to.
    async fn resolve(
        &self,
        target: &Target,
        channel: Option<PaymentChannel>,
    ) -> Result<(String, PaymentChannel)> {
        let (payment, reference) = match target {
            Target::Payment(code) => {
                let payment = self.engine.get_payment(code).await?;
                let reference = latest_reference(&payment).ok_or_else(|| {
                    PaymentError::NotFound(format!("payment {code} has no channel reference"))
                })?;
                (payment, reference)
            }
            Target::Reference(reference) => {
                let payment = self
                    .engine
                    .find_payments(&PaymentFilter {
                        correlation_id: Some(reference.clone()),
                        ..PaymentFilter::default()
                    })
                    .await?
                    .into_iter()
                    .next();
                match (payment, channel) {
                    (_, Some(channel)) => return Ok((reference.clone(), channel)),
                    (Some(payment), None) => (payment, reference.clone()),
                    (None, None) => {
                        return Err(PaymentError::NotFound(format!(
                            "no payment references {reference}"
                        )));
                    }
                }
            }
        };

        let channel = match channel {
            Some(channel) => channel,
            None => payment
                .find_by_correlation(&reference)
                .map(|tx| tx.channel)
                .ok_or_else(|| PaymentError::NotFound(format!("transaction {reference}")))?,
        };
        Ok((reference, channel))
    }
}

/// The running transaction's reference, else the most recent one recorded.
fn latest_reference(payment: &Payment) -> Option<String> {
    if let Some(tx) = payment.running_transaction()
        && let Some(reference) = &tx.correlation_id
    {
        return Some(reference.clone());
    }
    payment
        .transactions()
        .filter(|tx| tx.correlation_id.is_some())
        .max_by_key(|tx| tx.created_at)
        .and_then(|tx| tx.correlation_id.clone())
}
