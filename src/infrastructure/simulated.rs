//! In-process channel gateway.
//!
//! Behaves like a remote payment rail whose answers are scripted by the
//! caller: requests are accepted and stay `Processing` until
//! [`SimulatedGateway::set_remote_status`] says otherwise. Every call is
//! counted so tests can assert that a rejected batch never reached the
//! channel.

use crate::domain::money::Amount;
use crate::domain::ports::{
    ChannelGateway, ChannelPaymentRequest, ChannelRefundRequest, GatewayResult, GatewayStatus,
    VerifiedCallback,
};
use crate::domain::types::{PaymentChannel, TransactionType};
use crate::error::GatewayError;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 of `payload`, hex encoded.
pub fn sign_payload(payload: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Checks a hex HMAC-SHA256 signature in constant time.
pub fn verify_payload(payload: &[u8], secret: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Body of a simulated channel notification. The signature covers all of it.
#[derive(Debug, Serialize, Deserialize)]
struct CallbackBody {
    reference: String,
    kind: String,
    success: bool,
}

#[derive(Default)]
struct RemoteState {
    payments: HashMap<String, GatewayStatus>,
    refunds: HashMap<String, GatewayStatus>,
    blocked_resellers: HashSet<String>,
    payment_log: Vec<ChannelPaymentRequest>,
    refund_log: Vec<ChannelRefundRequest>,
}

pub struct SimulatedGateway {
    channel: PaymentChannel,
    secret: String,
    amount_limit: Option<Decimal>,
    state: Mutex<RemoteState>,
    reject_requests: AtomicBool,
    fail_queries: AtomicBool,
    payment_requests: AtomicUsize,
    refund_requests: AtomicUsize,
    status_queries: AtomicUsize,
}

impl SimulatedGateway {
    pub fn new(channel: PaymentChannel, secret: &str) -> Self {
        Self {
            channel,
            secret: secret.to_string(),
            amount_limit: None,
            state: Mutex::new(RemoteState::default()),
            reject_requests: AtomicBool::new(false),
            fail_queries: AtomicBool::new(false),
            payment_requests: AtomicUsize::new(0),
            refund_requests: AtomicUsize::new(0),
            status_queries: AtomicUsize::new(0),
        }
    }

    /// Largest single charge the channel accepts.
    pub fn with_amount_limit(mut self, limit: Decimal) -> Self {
        self.amount_limit = Some(limit);
        self
    }

    pub fn sign(&self, payload: &[u8]) -> String {
        sign_payload(payload, &self.secret)
    }

    /// Builds the body this channel posts when `correlation_id` settles.
    pub fn callback_payload(correlation_id: &str, kind: TransactionType, success: bool) -> Vec<u8> {
        let body = CallbackBody {
            reference: correlation_id.to_string(),
            kind: kind.as_str().to_string(),
            success,
        };
        serde_json::to_vec(&body).unwrap_or_default()
    }

    /// Scripts what the channel answers for a payment or refund reference.
    pub fn set_remote_status(&self, correlation_id: &str, status: GatewayStatus) {
        let mut state = self.state();
        if let Some(slot) = state.payments.get_mut(correlation_id) {
            *slot = status;
        } else if let Some(slot) = state.refunds.get_mut(correlation_id) {
            *slot = status;
        } else {
            state.payments.insert(correlation_id.to_string(), status);
        }
    }

    pub fn block_reseller(&self, reseller_id: &str) {
        self.state().blocked_resellers.insert(reseller_id.to_string());
    }

    pub fn unblock_reseller(&self, reseller_id: &str) {
        self.state().blocked_resellers.remove(reseller_id);
    }

    /// Makes new payment and refund requests fail with `Rejected`.
    pub fn reject_requests(&self, reject: bool) {
        self.reject_requests.store(reject, Ordering::SeqCst);
    }

    /// Makes status queries fail with a network error.
    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub fn payment_requests(&self) -> usize {
        self.payment_requests.load(Ordering::SeqCst)
    }

    pub fn refund_requests(&self) -> usize {
        self.refund_requests.load(Ordering::SeqCst)
    }

    pub fn status_queries(&self) -> usize {
        self.status_queries.load(Ordering::SeqCst)
    }

    pub fn payment_log(&self) -> Vec<ChannelPaymentRequest> {
        self.state().payment_log.clone()
    }

    pub fn refund_log(&self) -> Vec<ChannelRefundRequest> {
        self.state().refund_log.clone()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RemoteState> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_reference(&self, prefix: &str) -> String {
        format!("{}-{}-{}", self.channel.as_str(), prefix, Uuid::new_v4().simple())
    }

    fn query(&self, correlation_id: &str, refunds: bool) -> GatewayResult<GatewayStatus> {
        self.status_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(GatewayError::Network("status query timed out".to_string()));
        }
        let state = self.state();
        let table = if refunds { &state.refunds } else { &state.payments };
        table
            .get(correlation_id)
            .copied()
            .ok_or_else(|| GatewayError::UnknownReference(correlation_id.to_string()))
    }
}

#[async_trait]
impl ChannelGateway for SimulatedGateway {
    fn channel(&self) -> PaymentChannel {
        self.channel
    }

    async fn create_payment_request(&self, request: ChannelPaymentRequest) -> GatewayResult<String> {
        self.payment_requests.fetch_add(1, Ordering::SeqCst);
        if self.reject_requests.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected("payment request declined".to_string()));
        }

        let reference = self.next_reference("pay");
        debug!(
            channel = %self.channel,
            correlation_id = %reference,
            total = %request.total_amount,
            "simulated channel accepted payment"
        );
        let mut state = self.state();
        state.payments.insert(reference.clone(), GatewayStatus::Processing);
        state.payment_log.push(request);
        Ok(reference)
    }

    async fn query_payment_status(&self, correlation_id: &str) -> GatewayResult<GatewayStatus> {
        self.query(correlation_id, false)
    }

    async fn create_refund_request(&self, request: ChannelRefundRequest) -> GatewayResult<String> {
        self.refund_requests.fetch_add(1, Ordering::SeqCst);
        if self.reject_requests.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected("refund request declined".to_string()));
        }

        let mut state = self.state();
        if !state.payments.contains_key(&request.original_correlation_id) {
            return Err(GatewayError::UnknownReference(
                request.original_correlation_id.clone(),
            ));
        }
        let reference = self.next_reference("refund");
        state.refunds.insert(reference.clone(), GatewayStatus::Processing);
        state.refund_log.push(request);
        Ok(reference)
    }

    async fn query_refund_status(&self, refund_correlation_id: &str) -> GatewayResult<GatewayStatus> {
        self.query(refund_correlation_id, true)
    }

    async fn is_available(&self, reseller_id: &str) -> bool {
        !self.state().blocked_resellers.contains(reseller_id)
    }

    async fn supports_amount(&self, reseller_id: &str, amount: Amount) -> GatewayResult<()> {
        if self.state().blocked_resellers.contains(reseller_id) {
            return Err(GatewayError::Unavailable {
                channel: self.channel.to_string(),
                reseller: reseller_id.to_string(),
            });
        }
        match self.amount_limit {
            Some(limit) if amount.value() > limit => Err(GatewayError::AmountRejected {
                amount: amount.value(),
                reason: format!("above the {limit} limit of channel {}", self.channel),
            }),
            _ => Ok(()),
        }
    }

    fn parse_callback(&self, payload: &[u8], signature: &str) -> GatewayResult<VerifiedCallback> {
        if !verify_payload(payload, &self.secret, signature) {
            return Err(GatewayError::InvalidCallback(format!(
                "signature mismatch on channel {}",
                self.channel
            )));
        }
        let body: CallbackBody = serde_json::from_slice(payload)
            .map_err(|err| GatewayError::InvalidCallback(err.to_string()))?;
        let kind = body
            .kind
            .parse::<TransactionType>()
            .map_err(|err| GatewayError::InvalidCallback(err.to_string()))?;
        Ok(VerifiedCallback {
            correlation_id: body.reference,
            kind,
            success: body.success,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(total: Decimal) -> ChannelPaymentRequest {
        ChannelPaymentRequest {
            total_amount: Amount::new(total).unwrap(),
            currency: "CNY".to_string(),
            reseller_id: "R1".to_string(),
            payment_codes: vec!["P1".to_string()],
            params: HashMap::new(),
        }
    }

    #[test]
    fn test_signature_round_trip() {
        let payload = br#"{"ref":"abc","result":"success"}"#;
        let signature = sign_payload(payload, "secret");

        assert!(verify_payload(payload, "secret", &signature));
        assert!(!verify_payload(b"tampered", "secret", &signature));
        assert!(!verify_payload(payload, "secret", "not-hex"));
        assert!(!verify_payload(payload, "other", &signature));
    }

    #[test]
    fn test_parse_callback_reads_signed_fields() {
        let gateway = SimulatedGateway::new(PaymentChannel::Online, "secret");
        let payload = SimulatedGateway::callback_payload("abc", TransactionType::Refund, false);
        let signature = gateway.sign(&payload);

        assert_eq!(
            gateway.parse_callback(&payload, &signature).unwrap(),
            VerifiedCallback {
                correlation_id: "abc".to_string(),
                kind: TransactionType::Refund,
                success: false,
            }
        );
        assert!(matches!(
            SimulatedGateway::new(PaymentChannel::Online, "other").parse_callback(&payload, &signature),
            Err(GatewayError::InvalidCallback(_))
        ));

        // Correctly signed but not a callback body.
        let junk = b"abc:success";
        assert!(matches!(
            gateway.parse_callback(junk, &gateway.sign(junk)),
            Err(GatewayError::InvalidCallback(_))
        ));
    }

    #[tokio::test]
    async fn test_scripted_statuses() {
        let gateway = SimulatedGateway::new(PaymentChannel::Wallet, "secret");
        let reference = gateway.create_payment_request(request(dec!(10))).await.unwrap();
        assert_eq!(
            gateway.query_payment_status(&reference).await.unwrap(),
            GatewayStatus::Processing
        );

        gateway.set_remote_status(&reference, GatewayStatus::Success);
        assert_eq!(
            gateway.query_payment_status(&reference).await.unwrap(),
            GatewayStatus::Success
        );
        assert!(matches!(
            gateway.query_payment_status("nope").await,
            Err(GatewayError::UnknownReference(_))
        ));

        gateway.fail_queries(true);
        assert!(matches!(
            gateway.query_payment_status(&reference).await,
            Err(GatewayError::Network(_))
        ));
        assert_eq!(gateway.payment_requests(), 1);
        assert_eq!(gateway.status_queries(), 4);
    }

    #[tokio::test]
    async fn test_availability_and_limits() {
        let gateway = SimulatedGateway::new(PaymentChannel::Online, "secret")
            .with_amount_limit(dec!(5000));
        let amount = Amount::new(dec!(6000)).unwrap();

        assert!(gateway.is_available("R1").await);
        assert!(matches!(
            gateway.supports_amount("R1", amount).await,
            Err(GatewayError::AmountRejected { .. })
        ));

        gateway.block_reseller("R1");
        assert!(!gateway.is_available("R1").await);
        gateway.unblock_reseller("R1");
        assert!(gateway.is_available("R1").await);
    }
}
