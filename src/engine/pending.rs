//! Per-transaction pending state.
//!
//! Each transaction tracks, per composite key, what it has observed from the
//! table and what it intends to do to it. Keeping both halves in a single
//! `Pending` record makes the classic set invariants structural: a key cannot
//! carry a write and a delete at the same time because `Intent` is an enum,
//! and a staged write always clears a staged delete because staging replaces
//! the intent.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use crate::engine::TxId;
use crate::error::{KvtError, Result};

/// What the transaction saw when it first read a key. `version` carries the
/// OCC version counter; lock-based strategies leave it at zero.
#[derive(Debug, Clone)]
pub(crate) struct Observed {
    pub payload: Vec<u8>,
    pub version: u64,
}

#[derive(Debug, Clone)]
pub(crate) enum Intent {
    Write { payload: Vec<u8>, new: bool },
    Delete,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Pending {
    pub observed: Option<Observed>,
    pub intent: Option<Intent>,
}

/// The read/write/delete sets of one transaction, fused per key.
#[derive(Debug)]
pub(crate) struct PendingSet {
    id: TxId,
    entries: BTreeMap<Vec<u8>, Pending>,
}

impl PendingSet {
    pub fn new(id: TxId) -> Self {
        Self {
            id,
            entries: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn pending(&self, ck: &[u8]) -> Option<&Pending> {
        self.entries.get(ck)
    }

    pub fn observed(&self, ck: &[u8]) -> Option<&Observed> {
        self.entries.get(ck).and_then(|p| p.observed.as_ref())
    }

    pub fn is_deleted(&self, ck: &[u8]) -> bool {
        matches!(
            self.entries.get(ck),
            Some(Pending {
                intent: Some(Intent::Delete),
                ..
            })
        )
    }

    /// Records the first read of a key; later observations are ignored so the
    /// snapshot taken at first read wins.
    pub fn observe(&mut self, ck: &[u8], payload: Vec<u8>, version: u64) {
        let pending = self.entries.entry(ck.to_vec()).or_default();
        if pending.observed.is_none() {
            pending.observed = Some(Observed { payload, version });
        }
    }

    /// Stages a write. An existing write keeps its `new` flag; a staged
    /// delete is replaced.
    pub fn stage_write(&mut self, ck: &[u8], payload: Vec<u8>, new: bool) {
        let pending = self.entries.entry(ck.to_vec()).or_default();
        let new = match pending.intent {
            Some(Intent::Write { new: existing, .. }) => existing,
            _ => new,
        };
        pending.intent = Some(Intent::Write { payload, new });
    }

    pub fn stage_delete(&mut self, ck: &[u8]) {
        let pending = self.entries.entry(ck.to_vec()).or_default();
        pending.intent = Some(Intent::Delete);
    }

    /// Drops the intent; the whole entry goes away if nothing was observed.
    pub fn clear_intent(&mut self, ck: &[u8]) {
        if let Some(pending) = self.entries.get_mut(ck) {
            pending.intent = None;
            if pending.observed.is_none() {
                self.entries.remove(ck);
            }
        }
    }

    pub fn remove(&mut self, ck: &[u8]) {
        self.entries.remove(ck);
    }

    /// Staged write payloads with composite keys in `[start, end)`.
    pub fn writes_in_range<'a>(
        &'a self,
        start: &[u8],
        end: &[u8],
    ) -> impl Iterator<Item = (&'a [u8], &'a [u8])> {
        self.entries
            .range::<[u8], _>((Bound::Included(start), Bound::Excluded(end)))
            .filter_map(|(ck, pending)| match &pending.intent {
                Some(Intent::Write { payload, .. }) => Some((ck.as_slice(), payload.as_slice())),
                _ => None,
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &Pending)> {
        self.entries.iter()
    }

    pub fn into_entries(self) -> impl Iterator<Item = (Vec<u8>, Pending)> {
        self.entries.into_iter()
    }
}

/// Open transactions of a multi-transaction strategy, plus the id allocator.
/// Ids start at 1 and are handed out monotonically; an id is valid only
/// between `begin` and the commit or rollback that retires it.
#[derive(Debug)]
pub(crate) struct TxTable {
    txs: HashMap<TxId, PendingSet>,
    next_id: TxId,
}

impl TxTable {
    pub fn new() -> Self {
        Self {
            txs: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn begin(&mut self) -> TxId {
        let id = self.next_id;
        self.next_id += 1;
        self.txs.insert(id, PendingSet::new(id));
        id
    }

    pub fn get(&self, tx: TxId) -> Result<&PendingSet> {
        self.txs.get(&tx).ok_or(KvtError::TransactionNotFound(tx))
    }

    pub fn get_mut(&mut self, tx: TxId) -> Result<&mut PendingSet> {
        self.txs
            .get_mut(&tx)
            .ok_or(KvtError::TransactionNotFound(tx))
    }

    pub fn remove(&mut self, tx: TxId) -> Result<PendingSet> {
        self.txs
            .remove(&tx)
            .ok_or(KvtError::TransactionNotFound(tx))
    }
}
