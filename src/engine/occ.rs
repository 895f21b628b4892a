//! Optimistic concurrency control.
//!
//! Transactions run without locks, remembering the version of every entry
//! they read. Commit validates the whole read snapshot under the engine
//! mutex and installs the staged writes atomically; any key whose version
//! moved fails the transaction with `StaleData`.
//!
//! Entry versions start at 1 on first write and only ever increase. A
//! deleted key re-created later restarts at 1, which validation still
//! catches because the reader remembered the pre-delete version.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::engine::nocc::check_limit;
use crate::engine::pending::{Intent, TxTable};
use crate::engine::registry::{composite_key, split_composite, Partition, Registry};
use crate::engine::{CcMode, Strategy, TableId, TxId, ONE_SHOT};
use crate::error::{KvtError, Result};

#[derive(Debug, Clone)]
pub(crate) struct VersionEntry {
    payload: Vec<u8>,
    version: u64,
}

#[derive(Debug)]
pub(crate) struct OccStrategy {
    registry: Registry<VersionEntry>,
    txs: TxTable,
}

impl OccStrategy {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            txs: TxTable::new(),
        }
    }

    /// Checks every observed version against the live table. Returns false
    /// as soon as any read is stale; a missing table or entry counts as
    /// stale, since something deleted it after we read it.
    fn snapshot_is_current(&self, tx: TxId) -> Result<bool> {
        let pending = self.txs.get(tx)?;
        for (ck, entry) in pending.iter() {
            let Some(observed) = &entry.observed else {
                continue;
            };
            let (table_id, key) = split_composite(ck);
            let Ok(table) = self.registry.table(table_id) else {
                return Ok(false);
            };
            match table.entries.get(key) {
                Some(current) if current.version == observed.version => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }
}

impl Strategy for OccStrategy {
    fn mode(&self) -> CcMode {
        CcMode::Optimistic
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
        if !self.snapshot_is_current(tx)? {
            // The transaction is gone either way; the caller decides whether
            // to retry from scratch.
            self.txs.remove(tx)?;
            return Err(KvtError::StaleData(tx));
        }
        let pending = self.txs.remove(tx)?;
        for (ck, entry) in pending.into_entries() {
            let (table_id, key) = split_composite(&ck);
            let Ok(table) = self.registry.table_mut(table_id) else {
                continue;
            };
            match entry.intent {
                Some(Intent::Delete) => {
                    // A write-then-delete of a brand-new key never reached
                    // the table; removal is a no-op then.
                    table.entries.remove(key);
                }
                Some(Intent::Write { payload, .. }) => {
                    let version = table.entries.get(key).map(|e| e.version).unwrap_or(0) + 1;
                    table
                        .entries
                        .insert(key.to_vec(), VersionEntry { payload, version });
                }
                None => {}
            }
        }
        Ok(())
    }

    fn rollback(&mut self, tx: TxId) -> Result<()> {
        self.txs.remove(tx).map(|_| ())
    }

    fn get(&mut self, tx: TxId, table: TableId, key: &[u8]) -> Result<Vec<u8>> {
        if tx == ONE_SHOT {
            let table = self.registry.table(table)?;
            return table
                .entries
                .get(key)
                .map(|e| e.payload.clone())
                .ok_or_else(|| KvtError::key_not_found(key));
        }
        let pending = self.txs.get_mut(tx)?;
        let ck = composite_key(table, key);
        if let Some(entry) = pending.pending(&ck) {
            match &entry.intent {
                Some(Intent::Write { payload, .. }) => return Ok(payload.clone()),
                Some(Intent::Delete) => return Err(KvtError::key_deleted(key)),
                None => {
                    if let Some(observed) = &entry.observed {
                        return Ok(observed.payload.clone());
                    }
                }
            }
        }
        let table = self.registry.table(table)?;
        let entry = table
            .entries
            .get(key)
            .ok_or_else(|| KvtError::key_not_found(key))?;
        pending.observe(&ck, entry.payload.clone(), entry.version);
        Ok(entry.payload.clone())
    }

    fn set(&mut self, tx: TxId, table: TableId, key: &[u8], value: &[u8]) -> Result<()> {
        if tx == ONE_SHOT {
            // One-shot writes bump the version without snapshot validation;
            // they have no read set to validate.
            let table = self.registry.table_mut(table)?;
            let version = table.entries.get(key).map(|e| e.version).unwrap_or(0) + 1;
            table.entries.insert(
                key.to_vec(),
                VersionEntry {
                    payload: value.to_vec(),
                    version,
                },
            );
            return Ok(());
        }
        self.registry.table(table)?;
        let pending = self.txs.get_mut(tx)?;
        let ck = composite_key(table, key);
        pending.stage_write(&ck, value.to_vec(), false);
        Ok(())
    }

    fn del(&mut self, tx: TxId, table: TableId, key: &[u8]) -> Result<()> {
        if tx == ONE_SHOT {
            let table = self.registry.table_mut(table)?;
            return table
                .entries
                .remove(key)
                .map(|_| ())
                .ok_or_else(|| KvtError::key_not_found(key));
        }
        let pending = self.txs.get_mut(tx)?;
        let ck = composite_key(table, key);
        // Delete after our own staged write or delete: nothing to validate.
        let staged = pending
            .pending(&ck)
            .map(|p| p.intent.is_some())
            .unwrap_or(false);
        if staged {
            pending.stage_delete(&ck);
            return Ok(());
        }
        if pending.observed(&ck).is_none() {
            // Capture the version so commit can tell if someone else touched
            // the key before our delete lands.
            let table = self.registry.table(table)?;
            let entry = table
                .entries
                .get(key)
                .ok_or_else(|| KvtError::key_not_found(key))?;
            pending.observe(&ck, entry.payload.clone(), entry.version);
        }
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
        if start >= end {
            self.registry.table(table)?;
            return Ok(Vec::new());
        }
        if tx == ONE_SHOT {
            let table = self.registry.table(table)?;
            return Ok(table
                .entries
                .range::<[u8], _>((Bound::Included(start), Bound::Excluded(end)))
                .take(limit)
                .map(|(k, e)| (k.clone(), e.payload.clone()))
                .collect());
        }

        let pending = self.txs.get_mut(tx)?;
        let table = self.registry.table(table)?;
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        let ck_start = composite_key(table.id, start);
        let ck_end = composite_key(table.id, end);
        for (ck, payload) in pending.writes_in_range(&ck_start, &ck_end) {
            let (_, key) = split_composite(ck);
            merged.insert(key.to_vec(), payload.to_vec());
        }
        for (key, entry) in table
            .entries
            .range::<[u8], _>((Bound::Included(start), Bound::Excluded(end)))
        {
            if merged.contains_key(key) {
                continue;
            }
            let ck = composite_key(table.id, key);
            if pending.is_deleted(&ck) {
                continue;
            }
            // Keys first seen by this scan join the read set so commit-time
            // validation covers the whole range we observed.
            match pending.observed(&ck) {
                Some(observed) => {
                    merged.insert(key.clone(), observed.payload.clone());
                }
                None => {
                    pending.observe(&ck, entry.payload.clone(), entry.version);
                    merged.insert(key.clone(), entry.payload.clone());
                }
            }
        }
        Ok(merged.into_iter().take(limit).collect())
    }
}
