use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::sync::{Mutex, OwnedMutexGuard};

type Slot = Arc<Mutex<()>>;

/// Per-payment mutual exclusion inside one process.
///
/// Every mutation path (execution, refund, callback, reconciliation,
/// lifecycle commands) runs while holding the slot of each payment it
/// touches. Cross-process races are caught by the repository's version
/// check instead.
///
/// A slot only lives while someone holds or waits for it, so the table
/// stays as small as the set of payments currently being worked on.
#[derive(Default)]
pub struct PaymentLocks {
    slots: StdMutex<HashMap<String, Slot>>,
}

/// Holds the slots of one or more payments until dropped.
pub struct PaymentGuard<'a> {
    locks: &'a PaymentLocks,
    keys: Vec<String>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl PaymentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, code: &str) -> PaymentGuard<'_> {
        self.lock_many(&[code]).await
    }

    /// Locks several payments. Slots are always taken in sorted order so two
    /// overlapping batches cannot deadlock.
    pub async fn lock_many<S: AsRef<str>>(&self, codes: &[S]) -> PaymentGuard<'_> {
        let mut keys: Vec<String> = codes.iter().map(|c| c.as_ref().to_string()).collect();
        keys.sort_unstable();
        keys.dedup();

        // Cloned under the table lock; a clone held here keeps the slot from
        // being evicted before it is awaited.
        let slots: Vec<Slot> = {
            let mut table = self.table();
            keys.iter()
                .map(|key| table.entry(key.clone()).or_default().clone())
                .collect()
        };

        let mut guard = PaymentGuard {
            locks: self,
            keys,
            guards: Vec::with_capacity(slots.len()),
        };
        for slot in slots {
            guard.guards.push(slot.lock_owned().await);
        }
        guard
    }

    /// Number of payments with a live slot.
    pub fn active(&self) -> usize {
        self.table().len()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        // The table only maps codes to slots; a panic elsewhere leaves it usable.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, keys: &[String]) {
        let mut table = self.table();
        for key in keys {
            if table.get(key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
                table.remove(key);
            }
        }
    }
}

impl Drop for PaymentGuard<'_> {
    fn drop(&mut self) {
        self.guards.clear();
        self.locks.release(&self.keys);
    }
}
