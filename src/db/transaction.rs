use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::engine::{Kvt, TxId};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
}

/// Scoped owner of an engine transaction.
///
/// The transaction is rolled back when the value goes out of scope without an
/// explicit [`commit`](Transaction::commit), so an early `?` return can never
/// leak a transaction (or, under 2PL, its locks).
#[derive(Debug)]
pub struct Transaction {
    kvt: Arc<Kvt>,
    id: TxId,
    state: TxState,
}

impl Transaction {
    pub(crate) fn begin(kvt: Arc<Kvt>) -> Result<Self> {
        let id = kvt.begin()?;
        Ok(Self {
            kvt,
            id,
            state: TxState::Active,
        })
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn commit(mut self) -> Result<()> {
        match self.kvt.commit(self.id) {
            Ok(()) => {
                self.state = TxState::Committed;
                Ok(())
            }
            Err(err) => {
                // A failed commit may already have retired the transaction
                // (OCC validation failure does); the rollback is best-effort.
                let _ = self.kvt.rollback(self.id);
                self.state = TxState::RolledBack;
                Err(err)
            }
        }
    }

    pub fn rollback(mut self) -> Result<()> {
        self.state = TxState::RolledBack;
        self.kvt.rollback(self.id)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TxState::Active {
            let _ = self.kvt.rollback(self.id);
            debug!(tx_id = self.id, "transaction dropped while active; rolled back");
        }
    }
}

/// Aggregate transaction counters, collected lock-free.
#[derive(Debug, Default)]
pub struct TxnStats {
    started: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    retries: AtomicU64,
    conflicts: AtomicU64,
}

/// Point-in-time snapshot of [`TxnStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxnStatsSnapshot {
    pub started: u64,
    pub committed: u64,
    pub rolled_back: u64,
    pub retries: u64,
    pub conflicts: u64,
}

impl TxnStats {
    fn snapshot(&self) -> TxnStatsSnapshot {
        TxnStatsSnapshot {
            started: self.started.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
        }
    }

    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Hands out scoped transactions and retries conflicted commits.
#[derive(Debug)]
pub struct TxnManager {
    kvt: Arc<Kvt>,
    stats: TxnStats,
}

impl TxnManager {
    pub fn new(kvt: Arc<Kvt>) -> Self {
        Self {
            kvt,
            stats: TxnStats::default(),
        }
    }

    pub fn begin(&self) -> Result<Transaction> {
        let tx = Transaction::begin(self.kvt.clone())?;
        TxnStats::inc(&self.stats.started);
        Ok(tx)
    }

    /// Runs `body` inside a fresh transaction and commits. Commit-time
    /// conflicts (stale OCC snapshot, lock refusal) restart the body in a new
    /// transaction, up to `max_retries` extra attempts. Errors from the body
    /// itself roll back and surface immediately; the body must be safe to
    /// re-run.
    pub fn execute_with_retry<T>(
        &self,
        max_retries: usize,
        mut body: impl FnMut(TxId) -> Result<T>,
    ) -> Result<T> {
        let mut attempt = 0usize;
        loop {
            let tx = self.begin()?;
            let value = match body(tx.id()) {
                Ok(value) => value,
                Err(err) => {
                    if let Err(rb_err) = tx.rollback() {
                        warn!(error = %rb_err, "rollback after failed body also failed");
                    }
                    TxnStats::inc(&self.stats.rolled_back);
                    return Err(err);
                }
            };
            match tx.commit() {
                Ok(()) => {
                    TxnStats::inc(&self.stats.committed);
                    return Ok(value);
                }
                Err(err) if err.is_conflict() => {
                    TxnStats::inc(&self.stats.conflicts);
                    if attempt < max_retries {
                        attempt += 1;
                        TxnStats::inc(&self.stats.retries);
                        debug!(attempt, error = %err, "commit conflict; retrying");
                        continue;
                    }
                    TxnStats::inc(&self.stats.rolled_back);
                    return Err(err);
                }
                Err(err) => {
                    TxnStats::inc(&self.stats.rolled_back);
                    return Err(err);
                }
            }
        }
    }

    pub fn stats(&self) -> TxnStatsSnapshot {
        self.stats.snapshot()
    }
}
