use super::in_memory::check_version;
use super::record::PaymentRecord;
use crate::domain::payment::Payment;
use crate::domain::ports::{PaymentFilter, PaymentRepository};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, DB, Options};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for storing payment records.
pub const CF_PAYMENTS: &str = "payments";

/// A persistent payment repository using RocksDB.
///
/// Each payment is stored as one JSON [`PaymentRecord`] (transactions
/// included) under its code, so a save is a single atomic put. Writes are
/// serialized through `write_lock` to make the version check and the put
/// one step.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDbPaymentRepository {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDbPaymentRepository {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the "payments" column family exists.
    ///
    /// # Arguments
    ///
    /// * `path` - The filesystem path where the database will be stored.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_payments = ColumnFamilyDescriptor::new(CF_PAYMENTS, Options::default());
        let db = DB::open_cf_descriptors(&opts, path, vec![cf_payments])?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn read(&self, code: &str) -> Result<Option<PaymentRecord>> {
        let cf = self
            .db
            .cf_handle(CF_PAYMENTS)
            .ok_or_else(|| PaymentError::internal("Payments column family not found"))?;

        match self.db.get_pinned_cf(&cf, code.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl PaymentRepository for RocksDbPaymentRepository {
    async fn save(&self, payment: &mut Payment) -> Result<()> {
        let _write = self.write_lock.lock().await;
        let stored = self.read(payment.code())?.map(|r| r.version);
        let next = check_version(payment, stored)?;

        let mut record = PaymentRecord::from(&*payment);
        record.version = next;
        let value = serde_json::to_vec(&record)?;

        let cf = self
            .db
            .cf_handle(CF_PAYMENTS)
            .ok_or_else(|| PaymentError::internal("Payments column family not found"))?;
        self.db.put_cf(&cf, payment.code().as_bytes(), value)?;

        payment.set_version(next);
        Ok(())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Payment>> {
        self.read(code)?.map(PaymentRecord::into_domain).transpose()
    }

    async fn filter(&self, filter: &PaymentFilter) -> Result<Vec<Payment>> {
        let cf = self
            .db
            .cf_handle(CF_PAYMENTS)
            .ok_or_else(|| PaymentError::internal("Payments column family not found"))?;

        let mut payments = Vec::new();
        for item in self.db.iterator_cf(&cf, rocksdb::IteratorMode::Start) {
            let (_key, value) = item?;
            let record: PaymentRecord = serde_json::from_slice(&value)?;
            let payment = record.into_domain()?;
            if filter.matches(&payment) {
                payments.push(payment);
            }
        }
        Ok(payments)
    }
}
