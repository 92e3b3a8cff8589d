use std::sync::Arc;

use log::{debug, error, warn};

use crate::capability;
use crate::config::Config;
use crate::error::LockVaultError;
use crate::keyvault::KeyVault;
use crate::lock::LockMode;
use crate::table::{LockTable, TransactionTable};
use crate::transaction::{Phase, Transaction};
use crate::worker::{Job, WorkerPool};
use crate::{Capability, Result, RowID, TransactionID};

/// Tables shared by all workers, plus the decision logic that operates
/// on them. Workers call in here; the façade only routes.
pub(crate) struct SharedState {
    lock_table: LockTable,
    transaction_table: TransactionTable,
}

impl SharedState {
    fn new(config: &Config) -> SharedState {
        SharedState {
            lock_table: LockTable::with_capacity(config.lock_table_size),
            transaction_table: TransactionTable::with_capacity(config.transaction_table_size),
        }
    }

    pub(crate) fn is_registered(&self, transaction_id: TransactionID) -> bool {
        self.transaction_table.contains(transaction_id)
    }

    pub(crate) fn register(&self, transaction_id: TransactionID, lock_budget: u32) -> Result<()> {
        if !self
            .transaction_table
            .insert(Transaction::new(transaction_id, lock_budget))
        {
            error!("transaction {} is already registered", transaction_id);
            return Err(LockVaultError::AlreadyRegistered(transaction_id));
        }
        Ok(())
    }

    /// Decides a lock request. The checks run in contract order: unknown
    /// transaction, 2PL phase, budget, upgrade, fresh acquisition,
    /// redundant request. Every failure except an unknown transaction
    /// aborts the requester. Returns the granted mode for signing.
    pub(crate) fn acquire(
        &self,
        transaction_id: TransactionID,
        row_id: RowID,
        requested: LockMode,
    ) -> Result<LockMode> {
        let slot = match self.transaction_table.get(transaction_id) {
            Some(slot) => slot,
            None => {
                error!("transaction {} was not registered", transaction_id);
                return Err(LockVaultError::NotRegistered(transaction_id));
            }
        };
        let mut transaction = slot.lock().unwrap();

        if transaction.phase() != Phase::Growing {
            error!(
                "transaction {} cannot acquire more locks according to 2PL",
                transaction_id
            );
            self.abort(&mut transaction);
            return Err(LockVaultError::PhaseViolation(transaction_id));
        }

        if transaction.budget_remaining() == 0 {
            error!("lock budget of transaction {} is exhausted", transaction_id);
            self.abort(&mut transaction);
            return Err(LockVaultError::BudgetExhausted(transaction_id));
        }

        if transaction.has_lock(row_id) && requested == LockMode::Exclusive {
            // Upgrade applies only while the lock is still shared; an
            // exclusive re-request falls through as a redundant request.
            let upgraded = self.lock_table.with_lock(row_id, |lock| {
                if lock.is_exclusive() {
                    None
                } else {
                    Some(lock.upgrade(transaction_id))
                }
            });
            match upgraded {
                Some(true) => return Ok(LockMode::Exclusive),
                Some(false) => {
                    error!(
                        "transaction {} cannot upgrade row {}, other owners exist",
                        transaction_id, row_id
                    );
                    self.abort(&mut transaction);
                    return Err(LockVaultError::UpgradeBlocked(transaction_id, row_id));
                }
                None => {}
            }
        }

        if !transaction.has_lock(row_id) {
            let granted = self
                .lock_table
                .with_lock(row_id, |lock| transaction.add_lock(row_id, requested, lock));
            if granted {
                return Ok(requested);
            }
            error!(
                "row {} is locked in a mode conflicting with transaction {}",
                row_id, transaction_id
            );
            self.abort(&mut transaction);
            return Err(LockVaultError::ModeConflict(transaction_id, row_id));
        }

        error!(
            "transaction {} requested row {} it already holds",
            transaction_id, row_id
        );
        self.abort(&mut transaction);
        Err(LockVaultError::DoubleAcquire(transaction_id, row_id))
    }

    /// Releases one row. A no-op for unknown transactions and unowned
    /// rows; dropping the last lock removes the transaction itself.
    pub(crate) fn release(&self, transaction_id: TransactionID, row_id: RowID) {
        let slot = match self.transaction_table.get(transaction_id) {
            Some(slot) => slot,
            None => {
                debug!("unlock for unregistered transaction {}", transaction_id);
                return;
            }
        };
        let mut transaction = slot.lock().unwrap();
        if !transaction.has_lock(row_id) {
            return;
        }
        transaction.release_lock(row_id, &self.lock_table);
        if transaction.locked_rows().is_empty() {
            self.transaction_table.remove(transaction_id);
        }
    }

    fn abort(&self, transaction: &mut Transaction) {
        warn!("aborting transaction {}", transaction.transaction_id());
        self.transaction_table.remove(transaction.transaction_id());
        transaction.release_all(&self.lock_table);
    }
}

/// The lock manager façade. Owns the worker pool, the shared tables and
/// the key vault; hands out signed capabilities for granted locks.
pub struct LockManager {
    state: Arc<SharedState>,
    vault: KeyVault,
    pool: WorkerPool,
}

impl LockManager {
    /// Loads (or creates) the key material and starts the worker pool.
    pub fn open(config: Config) -> Result<LockManager> {
        config.validate()?;
        let vault = KeyVault::load_or_generate(&config.key_path)?;
        let state = Arc::new(SharedState::new(&config));
        let pool = WorkerPool::start(&config, state.clone(), &vault);
        Ok(LockManager { state, vault, pool })
    }

    /// Registers a transaction with its lock budget on the dedicated
    /// worker and waits for completion. Re-registering a live id fails
    /// without side effects.
    pub fn register(&self, transaction_id: TransactionID, lock_budget: u32) -> Result<()> {
        let (reply, done) = crossbeam_channel::bounded(1);
        self.pool.submit_registration(Job::Register {
            transaction_id,
            lock_budget,
            reply,
        });
        done.recv().map_err(|_| LockVaultError::WorkerGone)?
    }

    /// Acquires `row_id` in the requested mode and waits for the signed
    /// capability. Any refusal aborts the transaction (see the error
    /// variants for the reasons).
    pub fn lock(
        &self,
        transaction_id: TransactionID,
        row_id: RowID,
        mode: LockMode,
    ) -> Result<Capability> {
        if !self.state.is_registered(transaction_id) {
            error!("need to register transaction before lock requests");
            return Err(LockVaultError::NotRegistered(transaction_id));
        }
        let (reply, done) = crossbeam_channel::bounded(1);
        self.pool
            .submit(self.pool.route(row_id), lock_job(transaction_id, row_id, mode, Some(reply)));
        done.recv().map_err(|_| LockVaultError::WorkerGone)?
    }

    /// Fire-and-forget flavor of [`lock`](LockManager::lock): the job is
    /// queued and the caller retains no completion handle.
    pub fn lock_detached(&self, transaction_id: TransactionID, row_id: RowID, mode: LockMode) {
        if !self.state.is_registered(transaction_id) {
            error!("need to register transaction before lock requests");
            return;
        }
        self.pool
            .submit(self.pool.route(row_id), lock_job(transaction_id, row_id, mode, None));
    }

    /// Releases one row, asynchronously. Unknown transactions and rows
    /// the transaction does not hold are silently ignored.
    pub fn unlock(&self, transaction_id: TransactionID, row_id: RowID) {
        if !self.state.is_registered(transaction_id) {
            debug!("unlock for unregistered transaction {}", transaction_id);
            return;
        }
        self.pool.submit(
            self.pool.route(row_id),
            Job::Unlock {
                transaction_id,
                row_id,
                reply: None,
            },
        );
    }

    /// Like [`unlock`](LockManager::unlock) but waits until the release
    /// was applied, giving the caller a happens-before edge.
    pub fn unlock_wait(&self, transaction_id: TransactionID, row_id: RowID) -> Result<()> {
        if !self.state.is_registered(transaction_id) {
            return Ok(());
        }
        let (reply, done) = crossbeam_channel::bounded(1);
        self.pool.submit(
            self.pool.route(row_id),
            Job::Unlock {
                transaction_id,
                row_id,
                reply: Some(reply),
            },
        );
        done.recv().map_err(|_| LockVaultError::WorkerGone)?
    }

    /// Checks that `capability` was issued by this manager's key pair
    /// for exactly this transaction, row and mode. Pure; touches no
    /// tables.
    pub fn verify_capability(
        &self,
        capability: &str,
        transaction_id: TransactionID,
        row_id: RowID,
        is_exclusive: bool,
    ) -> bool {
        let mode = if is_exclusive {
            LockMode::Exclusive
        } else {
            LockMode::Shared
        };
        let plaintext =
            capability::descriptor(transaction_id, row_id, mode, capability::block_timeout());
        match capability::decode(capability) {
            Ok(parts) => self.vault.verify(plaintext.as_bytes(), &parts),
            Err(_) => false,
        }
    }

    /// Attestation form of the public key.
    pub fn encoded_public_key(&self) -> &str {
        self.vault.encoded_public_key()
    }

    /// Stops all workers. Queued jobs are drained first; waiting callers
    /// on a severed reply channel observe `WorkerGone`.
    pub fn shutdown(&mut self) {
        self.pool.shutdown();
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.pool.shutdown();
    }
}

fn lock_job(
    transaction_id: TransactionID,
    row_id: RowID,
    mode: LockMode,
    reply: Option<crossbeam_channel::Sender<Result<Capability>>>,
) -> Job {
    match mode {
        LockMode::Shared => Job::Shared {
            transaction_id,
            row_id,
            reply,
        },
        LockMode::Exclusive => Job::Exclusive {
            transaction_id,
            row_id,
            reply,
        },
    }
}
