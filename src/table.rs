use std::sync::{Arc, Mutex};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::lock::Lock;
use crate::transaction::Transaction;
use crate::{RowID, TransactionID};

/// Concurrent map of live row locks. Locks are created on first
/// acquisition and evicted as soon as they become free, so the table
/// never carries a lock without owners.
pub struct LockTable {
    rows: DashMap<RowID, Lock>,
}

impl LockTable {
    pub fn with_capacity(capacity: usize) -> LockTable {
        LockTable {
            rows: DashMap::with_capacity(capacity),
        }
    }

    /// Runs `f` on the row's lock under the map shard guard, so the lock
    /// stays pinned for the duration of one operation. An absent row is
    /// presented as a fresh free lock; the entry is only kept (or kept
    /// alive) while the lock has owners afterwards.
    pub fn with_lock<R>(&self, row_id: RowID, f: impl FnOnce(&mut Lock) -> R) -> R {
        match self.rows.entry(row_id) {
            Entry::Occupied(mut entry) => {
                let result = f(entry.get_mut());
                if entry.get().is_free() {
                    entry.remove();
                }
                result
            }
            Entry::Vacant(entry) => {
                let mut lock = Lock::default();
                let result = f(&mut lock);
                if !lock.is_free() {
                    entry.insert(lock);
                }
                result
            }
        }
    }

    /// Releases `transaction_id`'s hold on the row, evicting the lock if
    /// it became free. Unknown rows are a no-op.
    pub fn release(&self, row_id: RowID, transaction_id: TransactionID) {
        self.with_lock(row_id, |lock| lock.release(transaction_id));
    }
}

/// Concurrent map of live transactions. The `Mutex` around each value is
/// what serializes a single transaction's state across workers; the row
/// sharding only serializes per-row work.
pub struct TransactionTable {
    transactions: DashMap<TransactionID, Arc<Mutex<Transaction>>>,
}

impl TransactionTable {
    pub fn with_capacity(capacity: usize) -> TransactionTable {
        TransactionTable {
            transactions: DashMap::with_capacity(capacity),
        }
    }

    /// Inserts a fresh transaction; returns false without touching the
    /// table when the id is already live.
    pub fn insert(&self, transaction: Transaction) -> bool {
        match self.transactions.entry(transaction.transaction_id()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Mutex::new(transaction)));
                true
            }
        }
    }

    pub fn get(&self, transaction_id: TransactionID) -> Option<Arc<Mutex<Transaction>>> {
        self.transactions
            .get(&transaction_id)
            .map(|slot| Arc::clone(&slot))
    }

    pub fn contains(&self, transaction_id: TransactionID) -> bool {
        self.transactions.contains_key(&transaction_id)
    }

    pub fn remove(&self, transaction_id: TransactionID) {
        self.transactions.remove(&transaction_id);
    }
}
