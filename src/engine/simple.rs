//! Single-writer strategy.
//!
//! At most one transaction is open at a time, so the writer's staged sets
//! serialize trivially against each other. One-shot reads are always allowed
//! and see only committed state; one-shot mutations are allowed only while no
//! transaction is open.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::engine::nocc::check_limit;
use crate::engine::pending::{Intent, PendingSet};
use crate::engine::registry::{composite_key, split_composite, Partition, Registry};
use crate::engine::{CcMode, Strategy, TableId, TxId, ONE_SHOT};
use crate::error::{KvtError, Result};

#[derive(Debug)]
pub(crate) struct SimpleStrategy {
    registry: Registry<Vec<u8>>,
    next_tx_id: TxId,
    active: Option<PendingSet>,
}

impl SimpleStrategy {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            next_tx_id: 1,
            active: None,
        }
    }

    fn current_tx(&self) -> TxId {
        self.active.as_ref().map(PendingSet::id).unwrap_or(ONE_SHOT)
    }

    fn active_for(&mut self, tx: TxId) -> Result<&mut PendingSet> {
        match self.active.as_mut() {
            Some(pending) if pending.id() == tx => Ok(pending),
            _ => Err(KvtError::TransactionNotFound(tx)),
        }
    }
}

impl Strategy for SimpleStrategy {
    fn mode(&self) -> CcMode {
        CcMode::Simple
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
        if self.active.is_some() {
            return Err(KvtError::TransactionAlreadyRunning);
        }
        let id = self.next_tx_id;
        self.next_tx_id += 1;
        self.active = Some(PendingSet::new(id));
        Ok(id)
    }

    fn commit(&mut self, tx: TxId) -> Result<()> {
        let pending = match self.active.take() {
            Some(pending) if pending.id() == tx => pending,
            other => {
                self.active = other;
                return Err(KvtError::TransactionNotFound(tx));
            }
        };
        for (ck, entry) in pending.into_entries() {
            let (table_id, key) = split_composite(&ck);
            // The table may have been dropped while the transaction was open.
            let Ok(table) = self.registry.table_mut(table_id) else {
                continue;
            };
            match entry.intent {
                Some(Intent::Write { payload, .. }) => {
                    table.entries.insert(key.to_vec(), payload);
                }
                Some(Intent::Delete) => {
                    // Existence was verified when the delete was staged.
                    table.entries.remove(key);
                }
                None => {}
            }
        }
        Ok(())
    }

    fn rollback(&mut self, tx: TxId) -> Result<()> {
        self.active_for(tx)?;
        self.active = None;
        Ok(())
    }

    fn get(&mut self, tx: TxId, table: TableId, key: &[u8]) -> Result<Vec<u8>> {
        let table = self.registry.table(table)?;
        // One-shot reads see only committed state, even while a transaction
        // is open.
        if tx == ONE_SHOT {
            return table
                .entries
                .get(key)
                .cloned()
                .ok_or_else(|| KvtError::key_not_found(key));
        }
        let table_id = table.id;
        let pending = match self.active.as_ref() {
            Some(pending) if pending.id() == tx => pending,
            _ => return Err(KvtError::TransactionNotFound(tx)),
        };
        let ck = composite_key(table_id, key);
        match pending.pending(&ck).and_then(|p| p.intent.as_ref()) {
            Some(Intent::Write { payload, .. }) => Ok(payload.clone()),
            Some(Intent::Delete) => Err(KvtError::key_deleted(key)),
            None => self
                .registry
                .table(table_id)?
                .entries
                .get(key)
                .cloned()
                .ok_or_else(|| KvtError::key_not_found(key)),
        }
    }

    fn set(&mut self, tx: TxId, table: TableId, key: &[u8], value: &[u8]) -> Result<()> {
        self.registry.table(table)?;
        if tx == ONE_SHOT {
            if self.current_tx() != ONE_SHOT {
                return Err(KvtError::OneShotWriteNotAllowed);
            }
            // No transaction open: apply directly, auto-committed.
            let table = self.registry.table_mut(table)?;
            table.entries.insert(key.to_vec(), value.to_vec());
            return Ok(());
        }
        let ck = composite_key(table, key);
        let pending = self.active_for(tx)?;
        pending.stage_write(&ck, value.to_vec(), false);
        Ok(())
    }

    fn del(&mut self, tx: TxId, table: TableId, key: &[u8]) -> Result<()> {
        self.registry.table(table)?;
        if tx == ONE_SHOT {
            if self.current_tx() != ONE_SHOT {
                return Err(KvtError::OneShotDeleteNotAllowed);
            }
            let table = self.registry.table_mut(table)?;
            return table
                .entries
                .remove(key)
                .map(|_| ())
                .ok_or_else(|| KvtError::key_not_found(key));
        }
        let ck = composite_key(table, key);
        let key_in_table = self.registry.table(table)?.entries.contains_key(key);
        let pending = self.active_for(tx)?;
        let staged_write = matches!(
            pending.pending(&ck).and_then(|p| p.intent.as_ref()),
            Some(Intent::Write { .. })
        );
        if staged_write {
            // The write was never installed; dropping it undoes the key.
            pending.clear_intent(&ck);
            return Ok(());
        }
        if !key_in_table {
            return Err(KvtError::key_not_found(key));
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
        let table = self.registry.table(table)?;
        if start >= end {
            return Ok(Vec::new());
        }
        let committed = table
            .entries
            .range::<[u8], _>((Bound::Included(start), Bound::Excluded(end)));

        if tx != ONE_SHOT {
            let pending = match self.active.as_ref() {
                Some(pending) if pending.id() == tx => pending,
                _ => return Err(KvtError::TransactionNotFound(tx)),
            };
            let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
            for (key, value) in committed {
                let ck = composite_key(table.id, key);
                if pending.is_deleted(&ck) {
                    continue;
                }
                merged.insert(key.clone(), value.clone());
            }
            let ck_start = composite_key(table.id, start);
            let ck_end = composite_key(table.id, end);
            for (ck, payload) in pending.writes_in_range(&ck_start, &ck_end) {
                let (_, key) = split_composite(ck);
                merged.insert(key.to_vec(), payload.to_vec());
            }
            return Ok(merged.into_iter().take(limit).collect());
        }

        Ok(committed
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
