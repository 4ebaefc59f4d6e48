//! Collaborator contracts the payment core depends on.
//!
//! Storage, payment channels and outbound notification are all reached
//! through these traits so the application layer never knows which concrete
//! adapter it is talking to.

use super::events::PaymentEvent;
use super::money::Amount;
use super::payment::Payment;
use super::types::{PaymentChannel, PaymentStatus, PaymentType, TransactionType};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// Query criteria for [`PaymentRepository::filter`]. Unset fields match
/// everything.
#[derive(Debug, Clone, Default)]
pub struct PaymentFilter {
    pub reseller_id: Option<String>,
    pub order_id: Option<String>,
    pub related_business_id: Option<String>,
    pub correlation_id: Option<String>,
    pub statuses: Option<Vec<PaymentStatus>>,
    pub types: Option<Vec<PaymentType>>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    /// Only payments with (or without) a processing transaction.
    pub has_running: Option<bool>,
}

impl PaymentFilter {
    pub fn matches(&self, payment: &Payment) -> bool {
        self.reseller_id
            .as_deref()
            .is_none_or(|r| payment.reseller_id() == r)
            && self
                .order_id
                .as_deref()
                .is_none_or(|o| payment.order_id() == Some(o))
            && self
                .related_business_id
                .as_deref()
                .is_none_or(|id| payment.related_business().is_some_and(|b| b.id == id))
            && self
                .correlation_id
                .as_deref()
                .is_none_or(|c| payment.find_by_correlation(c).is_some())
            && self
                .statuses
                .as_ref()
                .is_none_or(|s| s.contains(&payment.status()))
            && self
                .types
                .as_ref()
                .is_none_or(|t| t.contains(&payment.payment_type()))
            && self.created_from.is_none_or(|from| payment.created_at() >= from)
            && self.created_to.is_none_or(|to| payment.created_at() < to)
            && self
                .has_running
                .is_none_or(|running| payment.running_transaction().is_some() == running)
    }
}

/// Transactional storage for payment aggregates.
///
/// `save` persists a payment together with all of its transactions or
/// nothing at all. It compares the payment's version with the stored one,
/// fails with `ConcurrentModification` if another writer got there first,
/// and advances the version on success.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn save(&self, payment: &mut Payment) -> Result<()>;
    async fn find_by_code(&self, code: &str) -> Result<Option<Payment>>;
    async fn filter(&self, filter: &PaymentFilter) -> Result<Vec<Payment>>;

    async fn find_by_order_id(&self, order_id: &str) -> Result<Vec<Payment>> {
        self.filter(&PaymentFilter {
            order_id: Some(order_id.to_string()),
            ..Default::default()
        })
        .await
    }

    async fn find_by_reseller_id(&self, reseller_id: &str) -> Result<Vec<Payment>> {
        self.filter(&PaymentFilter {
            reseller_id: Some(reseller_id.to_string()),
            ..Default::default()
        })
        .await
    }

    async fn find_by_related_business_id(&self, business_id: &str) -> Result<Vec<Payment>> {
        self.filter(&PaymentFilter {
            related_business_id: Some(business_id.to_string()),
            ..Default::default()
        })
        .await
    }

    async fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Vec<Payment>> {
        self.filter(&PaymentFilter {
            correlation_id: Some(correlation_id.to_string()),
            ..Default::default()
        })
        .await
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Authoritative status of a request as reported by the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    Success,
    Failed,
    Processing,
    /// The channel could not tell. Never treated as success or failure.
    Unknown,
}

/// The facts a signed callback body vouches for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCallback {
    pub correlation_id: String,
    pub kind: TransactionType,
    pub success: bool,
}

/// One charge on the channel, possibly settling several payments at once.
#[derive(Debug, Clone)]
pub struct ChannelPaymentRequest {
    pub total_amount: Amount,
    pub currency: String,
    pub reseller_id: String,
    pub payment_codes: Vec<String>,
    pub params: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ChannelRefundRequest {
    pub payment_code: String,
    pub original_correlation_id: String,
    pub amount: Amount,
    pub reason: Option<String>,
}

/// A concrete payment rail (bank, wallet, wire, credit account).
#[async_trait]
pub trait ChannelGateway: Send + Sync {
    fn channel(&self) -> PaymentChannel;

    /// Issues a charge and returns the channel correlation id.
    async fn create_payment_request(&self, request: ChannelPaymentRequest) -> GatewayResult<String>;

    async fn query_payment_status(&self, correlation_id: &str) -> GatewayResult<GatewayStatus>;

    /// Issues a refund and returns the refund correlation id.
    async fn create_refund_request(&self, request: ChannelRefundRequest) -> GatewayResult<String>;

    async fn query_refund_status(&self, refund_correlation_id: &str) -> GatewayResult<GatewayStatus>;

    async fn is_available(&self, reseller_id: &str) -> bool;

    /// Fails fast if the channel will not accept this amount for the reseller.
    async fn supports_amount(&self, reseller_id: &str, amount: Amount) -> GatewayResult<()>;

    /// Authenticates a callback body and returns what it actually asserts.
    /// Fails with `InvalidCallback` when the signature does not match or the
    /// body cannot be read.
    fn parse_callback(&self, payload: &[u8], signature: &str) -> GatewayResult<VerifiedCallback>;
}

/// Fire-and-forget delivery of payment events to other systems.
pub trait EventNotifier: Send + Sync {
    fn publish(&self, event: PaymentEvent);
}

pub type PaymentRepositoryRef = Arc<dyn PaymentRepository>;
pub type ChannelGatewayRef = Arc<dyn ChannelGateway>;
pub type EventNotifierRef = Arc<dyn EventNotifier>;
