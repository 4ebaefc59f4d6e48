use rust_decimal::Decimal;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PaymentError>;

/// Coarse classification of a [`PaymentError`], used by callers that only
/// need to decide how to react (reject, retry later, alert an operator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    InvalidState,
    NotFound,
    ChannelUnavailable,
    AlreadyProcessed,
    ReconciliationMismatch,
    Internal,
}

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(String),
    #[error("Already processed: {0}")]
    AlreadyProcessed(String),
    #[error("Reconciliation mismatch: {0}")]
    ReconciliationMismatch(String),
    #[error("Invalid callback signature from channel {0}")]
    InvalidSignature(String),
    #[error("Payment {0} was modified concurrently")]
    ConcurrentModification(String),
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl PaymentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PaymentError::InvalidArgument(_) | PaymentError::InvalidSignature(_) => {
                ErrorKind::InvalidArgument
            }
            PaymentError::InvalidState(_) | PaymentError::ConcurrentModification(_) => {
                ErrorKind::InvalidState
            }
            PaymentError::NotFound(_) => ErrorKind::NotFound,
            PaymentError::ChannelUnavailable(_) | PaymentError::Gateway(_) => {
                ErrorKind::ChannelUnavailable
            }
            PaymentError::AlreadyProcessed(_) => ErrorKind::AlreadyProcessed,
            PaymentError::ReconciliationMismatch(_) => ErrorKind::ReconciliationMismatch,
            PaymentError::CsvError(_) | PaymentError::IoError(_) | PaymentError::InternalError(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        PaymentError::InternalError(Box::new(std::io::Error::other(message.into())))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for PaymentError {
    fn from(err: rocksdb::Error) -> Self {
        PaymentError::InternalError(Box::new(err))
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(err: serde_json::Error) -> Self {
        PaymentError::InternalError(Box::new(err))
    }
}

/// Failures reported by a channel gateway.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("channel {channel} is unavailable for reseller {reseller}")]
    Unavailable { channel: String, reseller: String },
    #[error("amount {amount} rejected: {reason}")]
    AmountRejected { amount: Decimal, reason: String },
    #[error("request rejected by channel: {0}")]
    Rejected(String),
    #[error("unknown channel reference {0}")]
    UnknownReference(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid callback: {0}")]
    InvalidCallback(String),
}
