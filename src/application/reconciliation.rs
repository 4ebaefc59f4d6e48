use super::callback::{CallbackKind, Settlement};
use super::engine::PaymentEngine;
use crate::domain::ports::{GatewayResult, GatewayStatus, PaymentFilter};
use crate::domain::transaction::PaymentTransaction;
use crate::domain::types::{PaymentChannel, TransactionStatus, TransactionType};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

/// What reconciliation did with one local transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileAction {
    /// The channel had a final answer and the processing transaction now
    /// carries it.
    Applied { success: bool },
    /// The channel is still working on it.
    StillProcessing,
    /// Local and remote agree.
    InSync,
    /// The channel could not tell; the transaction stays processing.
    Unresolved { reason: String },
    /// Settled locally, but the channel reports something else.
    Mismatch {
        local: TransactionStatus,
        remote: GatewayStatus,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileEntry {
    pub payment_code: String,
    pub transaction_id: Uuid,
    pub kind: TransactionType,
    pub action: ReconcileAction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationReport {
    pub correlation_id: String,
    pub entries: Vec<ReconcileEntry>,
}

impl ReconciliationReport {
    /// True when an operator has to look at this correlation id.
    pub fn needs_attention(&self) -> bool {
        self.entries.iter().any(|e| {
            matches!(
                e.action,
                ReconcileAction::Unresolved { .. } | ReconcileAction::Mismatch { .. }
            )
        })
    }

    /// Fails with `ReconciliationMismatch` if any entry disagrees with the
    /// channel.
    pub fn ensure_in_sync(&self) -> Result<()> {
        match self
            .entries
            .iter()
            .find(|e| matches!(e.action, ReconcileAction::Mismatch { .. }))
        {
            Some(entry) => Err(PaymentError::ReconciliationMismatch(format!(
                "transaction {} of payment {} disagrees with channel reference {}",
                entry.transaction_id, entry.payment_code, self.correlation_id
            ))),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepSummary {
    pub reports: Vec<ReconciliationReport>,
    /// Payments whose processing transaction never got a channel reference.
    pub missing_correlation: Vec<String>,
}

impl SweepSummary {
    pub fn applied(&self) -> usize {
        self.reports
            .iter()
            .flat_map(|r| &r.entries)
            .filter(|e| matches!(e.action, ReconcileAction::Applied { .. }))
            .count()
    }
}

/// A transaction as seen before the channel was asked about it.
struct Candidate {
    payment_code: String,
    transaction_id: Uuid,
    kind: TransactionType,
    channel: PaymentChannel,
    status: TransactionStatus,
}

impl Candidate {
    fn of(payment_code: &str, tx: &PaymentTransaction) -> Self {
        Self {
            payment_code: payment_code.to_string(),
            transaction_id: tx.id,
            kind: tx.r#type,
            channel: tx.channel,
            status: tx.status,
        }
    }
}

impl PaymentEngine {
    /// Asks the channel about `correlation_id` and brings every local
    /// transaction carrying it in line with the answer.
    ///
    /// Meant for operators, so it does not wait for the grace period.
    pub async fn compensate_and_sync(&self, correlation_id: &str) -> Result<ReconciliationReport> {
        let codes = self.codes_for_correlation(correlation_id).await?;
        if codes.is_empty() {
            return Err(PaymentError::NotFound(format!(
                "no transaction references {correlation_id}"
            )));
        }

        let mut candidates = Vec::with_capacity(codes.len());
        for code in &codes {
            let payment = self.get_payment(code).await?;
            if let Some(tx) = payment.find_by_correlation(correlation_id) {
                candidates.push(Candidate::of(code, tx));
            }
        }
        Ok(self.reconcile(correlation_id, candidates).await)
    }

    /// Reconciles every processing transaction that has waited long enough:
    /// payment attempts past their expiry, refunds older than the grace
    /// period. Only a failure to list the candidates fails the sweep.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepSummary> {
        let running = self
            .repository
            .filter(&PaymentFilter {
                has_running: Some(true),
                ..PaymentFilter::default()
            })
            .await?;

        let mut summary = SweepSummary::default();
        let mut by_correlation: BTreeMap<String, Vec<Candidate>> = BTreeMap::new();
        for payment in &running {
            let Some(tx) = payment.running_transaction() else {
                continue;
            };
            if !self.is_due(tx, now) {
                continue;
            }
            match &tx.correlation_id {
                Some(correlation_id) => by_correlation
                    .entry(correlation_id.clone())
                    .or_default()
                    .push(Candidate::of(payment.code(), tx)),
                None => {
                    warn!(
                        payment = %payment.code(),
                        transaction = %tx.id,
                        "processing transaction has no channel reference"
                    );
                    summary.missing_correlation.push(payment.code().to_string());
                }
            }
        }

        for (correlation_id, candidates) in by_correlation {
            summary
                .reports
                .push(self.reconcile(&correlation_id, candidates).await);
        }
        info!(
            checked = summary.reports.len(),
            applied = summary.applied(),
            missing_correlation = summary.missing_correlation.len(),
            "reconciliation sweep finished"
        );
        Ok(summary)
    }

    /// Runs [`PaymentEngine::sweep`] every `sweep_interval` until `shutdown`
    /// flips to true.
    pub async fn run_periodic(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let interval = self.config.sweep_interval;
        info!(interval_secs = interval.as_secs(), "reconciliation worker started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("reconciliation worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.sweep(Utc::now()).await {
                        error!(error = %e, "reconciliation sweep failed");
                    }
                }
            }
        }
    }

    fn is_due(&self, tx: &PaymentTransaction, now: DateTime<Utc>) -> bool {
        match tx.expires_at {
            Some(_) => tx.is_expired(now),
            None => tx.created_at + self.config.reconciliation_grace <= now,
        }
    }

    /// Never fails as a whole: a candidate that cannot be checked or
    /// settled is reported as `Unresolved` and the rest carry on.
    async fn reconcile(&self, correlation_id: &str, candidates: Vec<Candidate>) -> ReconciliationReport {
        let mut answers: HashMap<(PaymentChannel, TransactionType), GatewayResult<GatewayStatus>> =
            HashMap::new();
        let mut entries = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let action = match self
                .reconcile_one(&candidate, correlation_id, &mut answers)
                .await
            {
                Ok(action) => action,
                Err(e) => {
                    error!(
                        payment = %candidate.payment_code,
                        correlation_id,
                        error = %e,
                        "could not reconcile transaction"
                    );
                    ReconcileAction::Unresolved {
                        reason: e.to_string(),
                    }
                }
            };
            entries.push(ReconcileEntry {
                payment_code: candidate.payment_code,
                transaction_id: candidate.transaction_id,
                kind: candidate.kind,
                action,
            });
        }

        ReconciliationReport {
            correlation_id: correlation_id.to_string(),
            entries,
        }
    }

    /// One channel query per channel and kind is shared by the whole batch.
    async fn reconcile_one(
        &self,
        candidate: &Candidate,
        correlation_id: &str,
        answers: &mut HashMap<(PaymentChannel, TransactionType), GatewayResult<GatewayStatus>>,
    ) -> Result<ReconcileAction> {
        let key = (candidate.channel, candidate.kind);
        let remote = match answers.get(&key) {
            Some(answer) => answer.clone(),
            None => {
                let answer = self
                    .query_channel(candidate.channel, candidate.kind, correlation_id)
                    .await?;
                answers.insert(key, answer.clone());
                answer
            }
        };
        self.resolve(candidate, correlation_id, remote).await
    }

    async fn query_channel(
        &self,
        channel: PaymentChannel,
        kind: TransactionType,
        correlation_id: &str,
    ) -> Result<GatewayResult<GatewayStatus>> {
        let gateway = self.gateways.get(channel)?;
        Ok(match kind {
            TransactionType::Payment => gateway.query_payment_status(correlation_id).await,
            TransactionType::Refund => gateway.query_refund_status(correlation_id).await,
        })
    }

    async fn resolve(
        &self,
        candidate: &Candidate,
        correlation_id: &str,
        remote: GatewayResult<GatewayStatus>,
    ) -> Result<ReconcileAction> {
        let code = candidate.payment_code.as_str();
        let remote = match remote {
            Ok(GatewayStatus::Unknown) => {
                warn!(payment = %code, correlation_id, "channel does not know the transaction");
                return Ok(ReconcileAction::Unresolved {
                    reason: "channel reported unknown status".to_string(),
                });
            }
            Err(e) => {
                warn!(payment = %code, correlation_id, error = %e, "channel status query failed");
                return Ok(ReconcileAction::Unresolved {
                    reason: e.to_string(),
                });
            }
            Ok(status) => status,
        };

        if candidate.status != TransactionStatus::Processing {
            return Ok(compare_settled(code, correlation_id, candidate.status, remote));
        }

        let success = match remote {
            GatewayStatus::Success => true,
            GatewayStatus::Failed => false,
            _ => return Ok(ReconcileAction::StillProcessing),
        };
        let kind = match candidate.kind {
            TransactionType::Payment => CallbackKind::Payment,
            TransactionType::Refund => CallbackKind::Refund,
        };

        match self
            .apply_settlement(code, kind, correlation_id, success, Utc::now())
            .await?
        {
            Settlement::Applied => {
                info!(
                    payment = %code,
                    correlation_id,
                    success,
                    "transaction settled from channel status"
                );
                Ok(ReconcileAction::Applied { success })
            }
            // A callback settled it while the channel was being asked.
            Settlement::Duplicate => {
                let payment = self.get_payment(code).await?;
                let local = payment
                    .find_transaction(candidate.transaction_id)
                    .map_or(TransactionStatus::Processing, |tx| tx.status);
                Ok(compare_settled(code, correlation_id, local, remote))
            }
        }
    }
}

fn compare_settled(
    code: &str,
    correlation_id: &str,
    local: TransactionStatus,
    remote: GatewayStatus,
) -> ReconcileAction {
    let agrees = matches!(
        (local, remote),
        (TransactionStatus::Success, GatewayStatus::Success)
            | (TransactionStatus::Failed, GatewayStatus::Failed)
    );
    if agrees {
        ReconcileAction::InSync
    } else {
        error!(
            payment = %code,
            correlation_id,
            local = %local,
            remote = ?remote,
            "local transaction disagrees with channel"
        );
        ReconcileAction::Mismatch { local, remote }
    }
}
