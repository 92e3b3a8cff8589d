use std::io;

use crate::{RowID, TransactionID};

#[derive(thiserror::Error, Debug)]
pub enum LockVaultError {
    #[error("transaction {0} is not registered")]
    NotRegistered(TransactionID),

    #[error("transaction {0} is already registered")]
    AlreadyRegistered(TransactionID),

    #[error("transaction {0} cannot acquire more locks according to 2PL")]
    PhaseViolation(TransactionID),

    #[error("lock budget of transaction {0} is exhausted")]
    BudgetExhausted(TransactionID),

    #[error("row {1} is locked in a conflicting mode (transaction {0})")]
    ModeConflict(TransactionID, RowID),

    #[error("row {1} has other shared owners, transaction {0} cannot upgrade")]
    UpgradeBlocked(TransactionID, RowID),

    #[error("transaction {0} already holds a lock on row {1}")]
    DoubleAcquire(TransactionID, RowID),

    #[error("plaintext exceeds the maximum signable length")]
    PlaintextTooLong,

    #[error("malformed capability")]
    BadCapability,

    #[error("sealed key material is corrupt")]
    BadKeyMaterial,

    #[error("invalid configuration: {0}")]
    BadConfig(String),

    #[error("worker reply channel closed")]
    WorkerGone,

    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("{0}")]
    Crypto(#[from] p256::ecdsa::Error),
}
