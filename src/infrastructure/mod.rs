//! Adapters behind the domain ports: storage, channels and notification.

pub mod in_memory;
pub mod notifier;
pub mod record;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod simulated;
