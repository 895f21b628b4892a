//! Strict two-phase locking.
//!
//! Every key a transaction touches is locked on first contact and stays
//! locked until commit or rollback. There is no deadlock detection: any lock
//! conflict fails immediately with `KeyLocked` and the caller retries.
//!
//! A `payload` of `None` marks a placeholder inserted for a not-yet-committed
//! new key. Placeholders are always locked by their creating transaction, and
//! scans never surface them.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::engine::nocc::check_limit;
use crate::engine::pending::{Intent, TxTable};
use crate::engine::registry::{composite_key, split_composite, Partition, Registry};
use crate::engine::{CcMode, Strategy, TableId, TxId, ONE_SHOT};
use crate::error::{KvtError, Result};

#[derive(Debug, Clone)]
pub(crate) struct LockEntry {
    payload: Option<Vec<u8>>,
    lock: Option<TxId>,
}

impl LockEntry {
    fn committed(payload: Vec<u8>) -> Self {
        Self {
            payload: Some(payload),
            lock: None,
        }
    }

    fn placeholder(tx: TxId) -> Self {
        Self {
            payload: None,
            lock: Some(tx),
        }
    }

    /// Acquires or re-acquires the lock for `tx`; fails if another
    /// transaction holds it.
    fn lock_for(&mut self, tx: TxId, key: &[u8]) -> Result<()> {
        match self.lock {
            Some(holder) if holder != tx => Err(KvtError::key_locked(key, holder)),
            _ => {
                self.lock = Some(tx);
                Ok(())
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct TwoPlStrategy {
    registry: Registry<LockEntry>,
    txs: TxTable,
}

impl TwoPlStrategy {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            txs: TxTable::new(),
        }
    }
}

impl Strategy for TwoPlStrategy {
    fn mode(&self) -> CcMode {
        CcMode::TwoPhaseLocking
    }

    fn create_table(&mut self, name: &str, partition: Partition) -> Result<TableId> {
        self.registry.create(name, partition)
    }

    fn drop_table(&mut self, id: TableId) -> Result<()> {
        self.registry.drop_table(id)
    }

    fn table_name(&self, id: TableId) -> Result<String> {
        self.registry.name_of(id).map(str::to_owned)
    }

    fn table_id(&self, name: &str) -> Result<TableId> {
        self.registry.id_of(name)
    }

    fn list_tables(&self) -> Vec<(String, TableId)> {
        self.registry.list()
    }

    fn begin(&mut self) -> Result<TxId> {
        Ok(self.txs.begin())
    }

    fn commit(&mut self, tx: TxId) -> Result<()> {
        let pending = self.txs.remove(tx)?;
        for (ck, entry) in pending.into_entries() {
            let (table_id, key) = split_composite(&ck);
            let Ok(table) = self.registry.table_mut(table_id) else {
                continue;
            };
            match entry.intent {
                Some(Intent::Delete) => {
                    if let Some(existing) = table.entries.get(key) {
                        debug_assert_eq!(existing.lock, Some(tx));
                        table.entries.remove(key);
                    }
                }
                Some(Intent::Write { payload, .. }) => {
                    // Install and release in one step.
                    table.entries.insert(key.to_vec(), LockEntry::committed(payload));
                }
                None => {
                    if let Some(existing) = table.entries.get_mut(key) {
                        if existing.lock == Some(tx) {
                            existing.lock = None;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn rollback(&mut self, tx: TxId) -> Result<()> {
        let pending = self.txs.remove(tx)?;
        for (ck, entry) in pending.into_entries() {
            let (table_id, key) = split_composite(&ck);
            let Ok(table) = self.registry.table_mut(table_id) else {
                continue;
            };
            let remove_placeholder =
                matches!(entry.intent, Some(Intent::Write { new: true, .. }));
            if let Some(existing) = table.entries.get_mut(key) {
                if existing.lock == Some(tx) {
                    if remove_placeholder {
                        table.entries.remove(key);
                    } else {
                        existing.lock = None;
                    }
                }
            }
        }
        Ok(())
    }

    fn get(&mut self, tx: TxId, table: TableId, key: &[u8]) -> Result<Vec<u8>> {
        if tx == ONE_SHOT {
            let table = self.registry.table(table)?;
            let entry = table
                .entries
                .get(key)
                .ok_or_else(|| KvtError::key_not_found(key))?;
            if let Some(holder) = entry.lock {
                return Err(KvtError::key_locked(key, holder));
            }
            return Ok(entry.payload.clone().unwrap_or_default());
        }

        let pending = self.txs.get_mut(tx)?;
        let ck = composite_key(table, key);
        if let Some(entry) = pending.pending(&ck) {
            match &entry.intent {
                Some(Intent::Delete) => return Err(KvtError::key_deleted(key)),
                Some(Intent::Write { payload, .. }) => return Ok(payload.clone()),
                None => {
                    if let Some(observed) = &entry.observed {
                        return Ok(observed.payload.clone());
                    }
                }
            }
        }

        let table = self.registry.table_mut(table)?;
        let entry = table
            .entries
            .get_mut(key)
            .ok_or_else(|| KvtError::key_not_found(key))?;
        entry.lock_for(tx, key)?;
        // A placeholder is always locked by its creator, so reaching here
        // means the payload is committed data.
        let payload = entry.payload.clone().unwrap_or_default();
        pending.observe(&ck, payload.clone(), 0);
        Ok(payload)
    }

    fn set(&mut self, tx: TxId, table: TableId, key: &[u8], value: &[u8]) -> Result<()> {
        if tx == ONE_SHOT {
            let table = self.registry.table_mut(table)?;
            match table.entries.get_mut(key) {
                None => {
                    table
                        .entries
                        .insert(key.to_vec(), LockEntry::committed(value.to_vec()));
                }
                Some(entry) => {
                    if let Some(holder) = entry.lock {
                        return Err(KvtError::key_locked(key, holder));
                    }
                    entry.payload = Some(value.to_vec());
                }
            }
            return Ok(());
        }

        let pending = self.txs.get_mut(tx)?;
        let ck = composite_key(table, key);
        if matches!(
            pending.pending(&ck).and_then(|p| p.intent.as_ref()),
            Some(Intent::Write { .. })
        ) {
            pending.stage_write(&ck, value.to_vec(), false);
            return Ok(());
        }

        let table = self.registry.table_mut(table)?;
        match table.entries.get_mut(key) {
            Some(entry) => {
                entry.lock_for(tx, key)?;
                let original = entry.payload.clone().unwrap_or_default();
                pending.observe(&ck, original, 0);
                pending.stage_write(&ck, value.to_vec(), false);
            }
            None => {
                // New key: hold its slot with a locked placeholder until
                // commit installs the payload or rollback removes it.
                table.entries.insert(key.to_vec(), LockEntry::placeholder(tx));
                pending.stage_write(&ck, value.to_vec(), true);
            }
        }
        Ok(())
    }

    fn del(&mut self, tx: TxId, table: TableId, key: &[u8]) -> Result<()> {
        if tx == ONE_SHOT {
            let table = self.registry.table_mut(table)?;
            let entry = table
                .entries
                .get(key)
                .ok_or_else(|| KvtError::key_not_found(key))?;
            if let Some(holder) = entry.lock {
                return Err(KvtError::key_locked(key, holder));
            }
            table.entries.remove(key);
            return Ok(());
        }

        let pending = self.txs.get_mut(tx)?;
        let ck = composite_key(table, key);
        let staged = match pending.pending(&ck).and_then(|p| p.intent.as_ref()) {
            Some(Intent::Write { new, .. }) => Some(*new),
            Some(Intent::Delete) => return Ok(()),
            None => None,
        };
        match staged {
            Some(true) => {
                // Deleting our own uncommitted insert: drop the placeholder
                // and forget the key entirely.
                let table = self.registry.table_mut(table)?;
                if let Some(entry) = table.entries.get(key) {
                    if entry.lock == Some(tx) {
                        table.entries.remove(key);
                    }
                }
                pending.remove(&ck);
                return Ok(());
            }
            Some(false) => {
                // Lock is already held and the original is in the read set.
                pending.stage_delete(&ck);
                return Ok(());
            }
            None => {}
        }

        let table = self.registry.table_mut(table)?;
        let entry = table
            .entries
            .get_mut(key)
            .ok_or_else(|| KvtError::key_not_found(key))?;
        entry.lock_for(tx, key)?;
        let original = entry.payload.clone().unwrap_or_default();
        pending.observe(&ck, original, 0);
        pending.stage_delete(&ck);
        Ok(())
    }

    fn scan(
        &mut self,
        tx: TxId,
        table: TableId,
        start: &[u8],
        end: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        check_limit(limit)?;
        let table = self.registry.table(table)?;
        if start >= end {
            return Ok(Vec::new());
        }
        let committed = table
            .entries
            .range::<[u8], _>((Bound::Included(start), Bound::Excluded(end)));

        if tx == ONE_SHOT {
            // Locks act as read locks for point access only; a scan walks the
            // committed entries regardless of lock state.
            return Ok(committed
                .filter_map(|(k, e)| e.payload.as_ref().map(|p| (k.clone(), p.clone())))
                .take(limit)
                .collect());
        }

        // Read-committed range semantics: no range locks, phantoms allowed.
        let pending = self.txs.get(tx)?;
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        for (key, entry) in committed {
            let Some(payload) = entry.payload.as_ref() else {
                continue;
            };
            let ck = composite_key(table.id, key);
            if pending.is_deleted(&ck) {
                continue;
            }
            merged.insert(key.clone(), payload.clone());
        }
        let ck_start = composite_key(table.id, start);
        let ck_end = composite_key(table.id, end);
        for (ck, payload) in pending.writes_in_range(&ck_start, &ck_end) {
            let (_, key) = split_composite(ck);
            merged.insert(key.to_vec(), payload.to_vec());
        }
        Ok(merged.into_iter().take(limit).collect())
    }
}
