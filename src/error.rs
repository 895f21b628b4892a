use thiserror::Error;

use crate::engine::{TableId, TxId};

pub type Result<T> = std::result::Result<T, KvtError>;

/// Outcome of a single operation inside a batch. `Some(bytes)` carries the
/// value of a successful GET; SET and DEL report `None` on success.
pub type OpResult = Result<Option<Vec<u8>>>;

#[derive(Debug, Error)]
pub enum KvtError {
    #[error("table '{0}' already exists")]
    TableAlreadyExists(String),
    #[error("table with id {0} not found")]
    TableNotFound(TableId),
    #[error("table '{0}' not found")]
    TableNameNotFound(String),
    #[error("invalid partition method '{0}'; must be 'hash' or 'range'")]
    InvalidPartition(String),
    #[error("transaction {0} not found")]
    TransactionNotFound(TxId),
    #[error("a transaction is already running")]
    TransactionAlreadyRunning,
    #[error("key '{key}' not found")]
    KeyNotFound { key: String },
    #[error("key '{key}' is deleted in the current transaction")]
    KeyDeleted { key: String },
    #[error("key '{key}' is locked by transaction {holder}")]
    KeyLocked { key: String, holder: TxId },
    #[error("transaction {0} has stale data")]
    StaleData(TxId),
    #[error("one-shot writes are not allowed while a transaction is open")]
    OneShotWriteNotAllowed,
    #[error("one-shot deletes are not allowed while a transaction is open")]
    OneShotDeleteNotAllowed,
    #[error("batch completed with {failed} failed operation(s)")]
    BatchNotFullySuccess { failed: usize, results: Vec<OpResult> },
    #[error("corruption detected: {0}")]
    Corruption(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl KvtError {
    pub(crate) fn key_not_found(key: &[u8]) -> Self {
        KvtError::KeyNotFound {
            key: display_key(key),
        }
    }

    pub(crate) fn key_deleted(key: &[u8]) -> Self {
        KvtError::KeyDeleted {
            key: display_key(key),
        }
    }

    pub(crate) fn key_locked(key: &[u8], holder: TxId) -> Self {
        KvtError::KeyLocked {
            key: display_key(key),
            holder,
        }
    }

    /// True for errors caused by contention with another transaction. These
    /// are the only errors the retry facade re-attempts; everything else is a
    /// caller mistake or a definitive answer.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            KvtError::KeyLocked { .. }
                | KvtError::StaleData(_)
                | KvtError::TransactionAlreadyRunning
        )
    }
}

fn display_key(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}
