use crate::domain::payment::Payment;
use crate::domain::ports::{PaymentFilter, PaymentRepository};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory store for payments.
///
/// Uses `Arc<RwLock<HashMap<String, Payment>>>` keyed by payment code, so
/// clones share the same data. Suited to tests and to runs that do not need
/// to survive a restart.
#[derive(Default, Clone)]
pub struct InMemoryPaymentRepository {
    payments: Arc<RwLock<HashMap<String, Payment>>>,
}

impl InMemoryPaymentRepository {
    /// Creates a new, empty in-memory repository.
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.payments.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.payments.read().await.is_empty()
    }
}

/// Compares the version the caller loaded with the stored one.
pub(crate) fn check_version(payment: &Payment, stored: Option<u64>) -> Result<u64> {
    let expected = stored.unwrap_or(0);
    if payment.version() != expected {
        return Err(PaymentError::ConcurrentModification(payment.code().to_string()));
    }
    Ok(expected + 1)
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn save(&self, payment: &mut Payment) -> Result<()> {
        let mut payments = self.payments.write().await;
        let next = check_version(payment, payments.get(payment.code()).map(Payment::version))?;

        let mut stored = payment.clone();
        stored.set_version(next);
        payments.insert(stored.code().to_string(), stored);
        payment.set_version(next);
        Ok(())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Payment>> {
        let payments = self.payments.read().await;
        Ok(payments.get(code).cloned())
    }

    async fn filter(&self, filter: &PaymentFilter) -> Result<Vec<Payment>> {
        let payments = self.payments.read().await;
        Ok(payments
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect())
    }
}
