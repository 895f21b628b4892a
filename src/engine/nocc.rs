//! Baseline strategy with no isolation at all.
//!
//! Reads and writes hit the table directly; commit and rollback are no-ops.
//! Kept for comparison and bring-up, never for graph workloads.

use std::ops::Bound;

use crate::engine::registry::{Partition, Registry};
use crate::engine::{CcMode, Strategy, TableId, TxId};
use crate::error::{KvtError, Result};

#[derive(Debug)]
pub(crate) struct NoCcStrategy {
    registry: Registry<Vec<u8>>,
    next_tx_id: TxId,
}

impl NoCcStrategy {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            next_tx_id: 1,
        }
    }

    // Any id already handed out (and the one-shot id 0) is acceptable; there
    // is no per-transaction state to look up.
    fn check_tx(&self, tx: TxId) -> Result<()> {
        if tx >= self.next_tx_id {
            return Err(KvtError::TransactionNotFound(tx));
        }
        Ok(())
    }
}

impl Strategy for NoCcStrategy {
    fn mode(&self) -> CcMode {
        CcMode::NoCc
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
        let id = self.next_tx_id;
        self.next_tx_id += 1;
        Ok(id)
    }

    fn commit(&mut self, tx: TxId) -> Result<()> {
        self.check_tx(tx)
    }

    fn rollback(&mut self, tx: TxId) -> Result<()> {
        self.check_tx(tx)
    }

    fn get(&mut self, tx: TxId, table: TableId, key: &[u8]) -> Result<Vec<u8>> {
        self.check_tx(tx)?;
        let table = self.registry.table(table)?;
        table
            .entries
            .get(key)
            .cloned()
            .ok_or_else(|| KvtError::key_not_found(key))
    }

    fn set(&mut self, tx: TxId, table: TableId, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_tx(tx)?;
        let table = self.registry.table_mut(table)?;
        table.entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn del(&mut self, tx: TxId, table: TableId, key: &[u8]) -> Result<()> {
        self.check_tx(tx)?;
        let table = self.registry.table_mut(table)?;
        table
            .entries
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| KvtError::key_not_found(key))
    }

    fn scan(
        &mut self,
        tx: TxId,
        table: TableId,
        start: &[u8],
        end: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.check_tx(tx)?;
        check_limit(limit)?;
        let table = self.registry.table(table)?;
        if start >= end {
            return Ok(Vec::new());
        }
        Ok(table
            .entries
            .range::<[u8], _>((Bound::Included(start), Bound::Excluded(end)))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

pub(crate) fn check_limit(limit: usize) -> Result<()> {
    if limit == 0 {
        return Err(KvtError::InvalidArgument(
            "scan limit must be positive".into(),
        ));
    }
    Ok(())
}
