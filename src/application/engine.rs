use super::gateways::GatewayRegistry;
use super::locks::PaymentLocks;
use crate::config::EngineConfig;
use crate::domain::events::{PaymentEvent, PaymentEventKind};
use crate::domain::payment::{NewPayment, Payment, RelatedBusiness};
use crate::domain::ports::{EventNotifierRef, PaymentFilter, PaymentRepositoryRef};
use crate::domain::types::PaymentType;
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

/// Request to open a new payment order.
#[derive(Debug, Clone)]
pub struct CreatePayment {
    /// Generated when absent.
    pub code: Option<String>,
    pub order_id: Option<String>,
    pub reseller_id: String,
    /// Falls back to the engine's default currency.
    pub currency: Option<String>,
    pub amount: Decimal,
    pub r#type: PaymentType,
    pub deadline: Option<DateTime<Utc>>,
    pub related_business: Option<RelatedBusiness>,
    pub description: Option<String>,
}

/// Entry point of the payment core.
///
/// `PaymentEngine` owns the collaborators (storage, channel gateways, event
/// notifier) and the per-payment lock table. Every operation that changes a
/// payment loads it under its lock, mutates the aggregate, saves it and only
/// then publishes events. Execution, refunds, callbacks and reconciliation
/// live in their own modules as further `impl PaymentEngine` blocks.
pub struct PaymentEngine {
    pub(crate) repository: PaymentRepositoryRef,
    pub(crate) gateways: GatewayRegistry,
    pub(crate) notifier: EventNotifierRef,
    pub(crate) locks: PaymentLocks,
    pub(crate) config: EngineConfig,
}

impl PaymentEngine {
    /// Creates a new `PaymentEngine`.
    ///
    /// # Arguments
    ///
    /// * `repository` - Storage for payment aggregates.
    /// * `gateways` - The channel gateways payments may be settled through.
    /// * `notifier` - Receives events after each successful save.
    /// * `config` - Expiry and reconciliation tunables.
    pub fn new(
        repository: PaymentRepositoryRef,
        gateways: GatewayRegistry,
        notifier: EventNotifierRef,
        config: EngineConfig,
    ) -> Self {
        Self {
            repository,
            gateways,
            notifier,
            locks: PaymentLocks::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn gateways(&self) -> &GatewayRegistry {
        &self.gateways
    }

    pub async fn create_payment(&self, request: CreatePayment) -> Result<Payment> {
        let code = request
            .code
            .unwrap_or_else(|| format!("PAY{}", Uuid::new_v4().simple()));
        let _guard = self.locks.lock(&code).await;

        if self.repository.find_by_code(&code).await?.is_some() {
            return Err(PaymentError::InvalidArgument(format!(
                "payment {code} already exists"
            )));
        }

        let now = Utc::now();
        let mut payment = Payment::create(
            NewPayment {
                code,
                order_id: request.order_id,
                reseller_id: request.reseller_id,
                currency: request
                    .currency
                    .unwrap_or_else(|| self.config.default_currency.clone()),
                amount: request.amount,
                r#type: request.r#type,
                deadline: request.deadline,
                related_business: request.related_business,
                description: request.description,
            },
            now,
        )?;
        self.repository.save(&mut payment).await?;

        info!(
            payment = %payment.code(),
            reseller = %payment.reseller_id(),
            amount = %payment.target_amount(),
            payment_type = %payment.payment_type(),
            "payment created"
        );
        self.publish(PaymentEventKind::PaymentCreated, &payment, None);
        Ok(payment)
    }

    pub async fn get_payment(&self, code: &str) -> Result<Payment> {
        self.repository
            .find_by_code(code)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("payment {code}")))
    }

    pub async fn find_payments(&self, filter: &PaymentFilter) -> Result<Vec<Payment>> {
        self.repository.filter(filter).await
    }

    /// Returns every stored payment ordered by code.
    pub async fn all_payments(&self) -> Result<Vec<Payment>> {
        let mut payments = self.repository.filter(&PaymentFilter::default()).await?;
        payments.sort_by(|a, b| a.code().cmp(b.code()));
        Ok(payments)
    }

    pub async fn cancel_payment(&self, code: &str, reason: &str) -> Result<Payment> {
        self.change_status(code, "cancel", |payment, now| payment.cancel(reason, now))
            .await
    }

    pub async fn freeze_payment(&self, code: &str, reason: &str) -> Result<Payment> {
        self.change_status(code, "freeze", |payment, now| payment.freeze(reason, now))
            .await
    }

    pub async fn unfreeze_payment(&self, code: &str) -> Result<Payment> {
        self.change_status(code, "unfreeze", |payment, now| payment.unfreeze(now))
            .await
    }

    pub async fn stop_payment(&self, code: &str, reason: &str) -> Result<Payment> {
        self.change_status(code, "stop", |payment, now| payment.stop(reason, now))
            .await
    }

    pub async fn reopen_payment(&self, code: &str) -> Result<Payment> {
        self.change_status(code, "reopen", |payment, now| payment.reopen(now))
            .await
    }

    async fn change_status<F>(&self, code: &str, action: &str, change: F) -> Result<Payment>
    where
        F: FnOnce(&mut Payment, DateTime<Utc>) -> Result<()>,
    {
        let _guard = self.locks.lock(code).await;
        let mut payment = self.get_payment(code).await?;
        let before = payment.status();

        change(&mut payment, Utc::now())?;
        self.repository.save(&mut payment).await?;

        info!(
            payment = %code,
            action,
            from = %before,
            to = %payment.status(),
            "payment status changed"
        );
        self.publish(PaymentEventKind::StatusChanged, &payment, None);
        Ok(payment)
    }

    pub(crate) fn publish(&self, kind: PaymentEventKind, payment: &Payment, correlation_id: Option<&str>) {
        debug!(payment = %payment.code(), event = %kind, "publishing payment event");
        self.notifier.publish(PaymentEvent::from_payment(
            kind,
            payment,
            correlation_id,
            Utc::now(),
        ));
    }
}
