//! Table-oriented transactional key-value engine with pluggable concurrency
//! control.
//!
//! [`Kvt`] is the engine handle. It owns one concurrency-control strategy,
//! chosen at construction, and serializes every public operation through a
//! single engine-wide mutex; the strategies themselves are single-threaded
//! state machines. Keys and values are arbitrary byte strings. A transaction
//! id of [`ONE_SHOT`] runs an operation outside any open transaction,
//! auto-committed, where the active strategy allows it.

mod nocc;
mod occ;
mod pending;
mod registry;
mod simple;
mod twopl;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{KvtError, OpResult, Result};

pub use registry::Partition;

pub type TableId = u64;
pub type TxId = u64;

/// Reserved transaction id for one-shot auto-commit operations.
pub const ONE_SHOT: TxId = 0;

/// Concurrency-control strategy selection. Made at engine construction;
/// optimistic validation is the production default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CcMode {
    /// No isolation; reference baseline only.
    NoCc,
    /// Single open transaction at a time.
    Simple,
    /// Strict two-phase locking with immediate conflict refusal.
    TwoPhaseLocking,
    /// Optimistic validation against read versions at commit.
    Optimistic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Get,
    Set,
    Del,
}

/// One operation of a batch.
#[derive(Debug, Clone)]
pub struct BatchOp {
    pub op: Op,
    pub table_id: TableId,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl BatchOp {
    pub fn get(table_id: TableId, key: impl Into<Vec<u8>>) -> Self {
        Self {
            op: Op::Get,
            table_id,
            key: key.into(),
            value: Vec::new(),
        }
    }

    pub fn set(table_id: TableId, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            op: Op::Set,
            table_id,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn del(table_id: TableId, key: impl Into<Vec<u8>>) -> Self {
        Self {
            op: Op::Del,
            table_id,
            key: key.into(),
            value: Vec::new(),
        }
    }
}

/// Uniform operational surface every concurrency-control strategy provides.
/// Implementations are not thread-safe on their own; [`Kvt`] provides the
/// engine-wide mutex.
pub(crate) trait Strategy: Send {
    fn mode(&self) -> CcMode;
    fn create_table(&mut self, name: &str, partition: Partition) -> Result<TableId>;
    fn drop_table(&mut self, id: TableId) -> Result<()>;
    fn table_name(&self, id: TableId) -> Result<String>;
    fn table_id(&self, name: &str) -> Result<TableId>;
    fn list_tables(&self) -> Vec<(String, TableId)>;
    fn begin(&mut self) -> Result<TxId>;
    fn commit(&mut self, tx: TxId) -> Result<()>;
    fn rollback(&mut self, tx: TxId) -> Result<()>;
    fn get(&mut self, tx: TxId, table: TableId, key: &[u8]) -> Result<Vec<u8>>;
    fn set(&mut self, tx: TxId, table: TableId, key: &[u8], value: &[u8]) -> Result<()>;
    fn del(&mut self, tx: TxId, table: TableId, key: &[u8]) -> Result<()>;
    fn scan(
        &mut self,
        tx: TxId,
        table: TableId,
        start: &[u8],
        end: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// The engine handle. Cheap to share behind an `Arc`; every operation takes
/// the engine mutex for its duration.
pub struct Kvt {
    strategy: Mutex<Box<dyn Strategy>>,
}

// Not derived: formatting must not take the engine mutex.
impl std::fmt::Debug for Kvt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kvt").finish_non_exhaustive()
    }
}

impl Kvt {
    pub fn new(mode: CcMode) -> Self {
        let strategy: Box<dyn Strategy> = match mode {
            CcMode::NoCc => Box::new(nocc::NoCcStrategy::new()),
            CcMode::Simple => Box::new(simple::SimpleStrategy::new()),
            CcMode::TwoPhaseLocking => Box::new(twopl::TwoPlStrategy::new()),
            CcMode::Optimistic => Box::new(occ::OccStrategy::new()),
        };
        debug!(?mode, "kvt engine initialized");
        Self {
            strategy: Mutex::new(strategy),
        }
    }

    pub fn mode(&self) -> CcMode {
        self.strategy.lock().mode()
    }

    pub fn create_table(&self, name: &str, partition: Partition) -> Result<TableId> {
        self.strategy.lock().create_table(name, partition)
    }

    pub fn drop_table(&self, id: TableId) -> Result<()> {
        self.strategy.lock().drop_table(id)
    }

    pub fn table_name(&self, id: TableId) -> Result<String> {
        self.strategy.lock().table_name(id)
    }

    pub fn table_id(&self, name: &str) -> Result<TableId> {
        self.strategy.lock().table_id(name)
    }

    pub fn list_tables(&self) -> Vec<(String, TableId)> {
        self.strategy.lock().list_tables()
    }

    pub fn begin(&self) -> Result<TxId> {
        let id = self.strategy.lock().begin()?;
        debug!(tx_id = id, "transaction started");
        Ok(id)
    }

    pub fn commit(&self, tx: TxId) -> Result<()> {
        let result = self.strategy.lock().commit(tx);
        match &result {
            Ok(()) => debug!(tx_id = tx, "transaction committed"),
            Err(err) => debug!(tx_id = tx, error = %err, "commit failed"),
        }
        result
    }

    pub fn rollback(&self, tx: TxId) -> Result<()> {
        let result = self.strategy.lock().rollback(tx);
        if result.is_ok() {
            debug!(tx_id = tx, "transaction rolled back");
        }
        result
    }

    pub fn get(&self, tx: TxId, table: TableId, key: &[u8]) -> Result<Vec<u8>> {
        trace!(tx_id = tx, table, key = %String::from_utf8_lossy(key), "get");
        self.strategy.lock().get(tx, table, key)
    }

    pub fn set(&self, tx: TxId, table: TableId, key: &[u8], value: &[u8]) -> Result<()> {
        trace!(tx_id = tx, table, key = %String::from_utf8_lossy(key), "set");
        self.strategy.lock().set(tx, table, key, value)
    }

    pub fn del(&self, tx: TxId, table: TableId, key: &[u8]) -> Result<()> {
        trace!(tx_id = tx, table, key = %String::from_utf8_lossy(key), "del");
        self.strategy.lock().del(tx, table, key)
    }

    /// Range read over `[start, end)`, at most `limit` results, in table-key
    /// order. `limit` must be positive.
    pub fn scan(
        &self,
        tx: TxId,
        table: TableId,
        start: &[u8],
        end: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.strategy.lock().scan(tx, table, start, end, limit)
    }

    /// Executes `ops` in order. With `tx_id` = [`ONE_SHOT`] the whole batch
    /// runs in a fresh transaction that commits only if every operation
    /// succeeded and rolls back otherwise. With a caller-supplied transaction
    /// the batch never commits or rolls back on its own.
    ///
    /// Later operations observe the effects of earlier ones. Any per-op
    /// failure surfaces as [`KvtError::BatchNotFullySuccess`] carrying the
    /// full per-op result vector.
    pub fn batch_execute(&self, tx_id: TxId, ops: &[BatchOp]) -> Result<Vec<OpResult>> {
        let auto_commit = tx_id == ONE_SHOT;
        let tx = if auto_commit { self.begin()? } else { tx_id };

        let mut results = Vec::with_capacity(ops.len());
        let mut failed = 0usize;
        for op in ops {
            let result: OpResult = match op.op {
                Op::Get => self.get(tx, op.table_id, &op.key).map(Some),
                Op::Set => self.set(tx, op.table_id, &op.key, &op.value).map(|()| None),
                Op::Del => self.del(tx, op.table_id, &op.key).map(|()| None),
            };
            if result.is_err() {
                failed += 1;
            }
            results.push(result);
        }

        if auto_commit {
            if failed == 0 {
                if let Err(err) = self.commit(tx) {
                    let _ = self.rollback(tx);
                    return Err(err);
                }
            } else {
                let _ = self.rollback(tx);
            }
        }

        if failed > 0 {
            debug!(failed, total = ops.len(), "batch not fully successful");
            return Err(KvtError::BatchNotFullySuccess { failed, results });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with_table(mode: CcMode) -> (Kvt, TableId) {
        let kvt = Kvt::new(mode);
        let table = kvt.create_table("t", Partition::Range).unwrap();
        (kvt, table)
    }

    #[test]
    fn batch_auto_commit_installs_all_ops() {
        let (kvt, table) = engine_with_table(CcMode::Optimistic);
        let ops = vec![
            BatchOp::set(table, "a", "1"),
            BatchOp::set(table, "b", "2"),
            BatchOp::get(table, "a"),
        ];
        let results = kvt.batch_execute(ONE_SHOT, &ops).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[2].as_ref().unwrap().as_deref(), Some(&b"1"[..]));
        assert_eq!(kvt.get(ONE_SHOT, table, b"a").unwrap(), b"1");
    }

    #[test]
    fn batch_auto_commit_rolls_back_on_failure() {
        let (kvt, table) = engine_with_table(CcMode::Optimistic);
        let ops = vec![
            BatchOp::set(table, "k1", "v1"),
            BatchOp::set(table, "k2", "v2"),
            BatchOp::del(table, "k3"),
        ];
        match kvt.batch_execute(ONE_SHOT, &ops) {
            Err(KvtError::BatchNotFullySuccess { failed, results }) => {
                assert_eq!(failed, 1);
                assert!(results[0].is_ok());
                assert!(results[2].is_err());
            }
            other => panic!("expected batch failure, got {other:?}"),
        }
        // Nothing from the failed batch is visible.
        assert!(kvt.get(ONE_SHOT, table, b"k1").is_err());
        assert!(kvt.get(ONE_SHOT, table, b"k2").is_err());
    }

    #[test]
    fn batch_in_caller_transaction_never_auto_commits() {
        let (kvt, table) = engine_with_table(CcMode::Optimistic);
        let tx = kvt.begin().unwrap();
        kvt.batch_execute(tx, &[BatchOp::set(table, "a", "1")])
            .unwrap();
        // Not yet committed: invisible to one-shot readers.
        assert!(kvt.get(ONE_SHOT, table, b"a").is_err());
        kvt.commit(tx).unwrap();
        assert_eq!(kvt.get(ONE_SHOT, table, b"a").unwrap(), b"1");
    }

    #[test]
    fn batch_later_ops_see_earlier_effects() {
        let (kvt, table) = engine_with_table(CcMode::TwoPhaseLocking);
        let ops = vec![
            BatchOp::set(table, "x", "first"),
            BatchOp::get(table, "x"),
            BatchOp::del(table, "x"),
            BatchOp::get(table, "x"),
        ];
        match kvt.batch_execute(ONE_SHOT, &ops) {
            Err(KvtError::BatchNotFullySuccess { failed, results }) => {
                assert_eq!(failed, 1);
                assert_eq!(results[1].as_ref().unwrap().as_deref(), Some(&b"first"[..]));
                assert!(results[3].is_err());
            }
            other => panic!("expected partial batch, got {other:?}"),
        }
    }
}
