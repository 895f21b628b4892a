//! Table registry: name/id mapping, partition style, and per-table entry
//! maps. Table ids start at 1, grow monotonically and are never reused for
//! the life of the process. Each table owns its own ordered map, which keeps
//! per-table key spaces disjoint without sharing one flat namespace.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::TableId;
use crate::error::{KvtError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Partition {
    Hash,
    Range,
}

impl Partition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Hash => "hash",
            Partition::Range => "range",
        }
    }
}

impl FromStr for Partition {
    type Err = KvtError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hash" => Ok(Partition::Hash),
            "range" => Ok(Partition::Range),
            other => Err(KvtError::InvalidPartition(other.to_owned())),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Table<E> {
    pub id: TableId,
    pub name: String,
    pub partition: Partition,
    pub entries: BTreeMap<Vec<u8>, E>,
}

#[derive(Debug)]
pub(crate) struct Registry<E> {
    tables: HashMap<TableId, Table<E>>,
    by_name: HashMap<String, TableId>,
    next_id: TableId,
}

impl<E> Registry<E> {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
            by_name: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn create(&mut self, name: &str, partition: Partition) -> Result<TableId> {
        if self.by_name.contains_key(name) {
            return Err(KvtError::TableAlreadyExists(name.to_owned()));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.tables.insert(
            id,
            Table {
                id,
                name: name.to_owned(),
                partition,
                entries: BTreeMap::new(),
            },
        );
        self.by_name.insert(name.to_owned(), id);
        info!(table = name, id, partition = partition.as_str(), "created table");
        Ok(id)
    }

    /// Drops the table and with it every entry it owned.
    pub fn drop_table(&mut self, id: TableId) -> Result<()> {
        let table = self.tables.remove(&id).ok_or(KvtError::TableNotFound(id))?;
        self.by_name.remove(&table.name);
        info!(table = table.name, id, "dropped table");
        Ok(())
    }

    pub fn name_of(&self, id: TableId) -> Result<&str> {
        self.tables
            .get(&id)
            .map(|t| t.name.as_str())
            .ok_or(KvtError::TableNotFound(id))
    }

    pub fn id_of(&self, name: &str) -> Result<TableId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| KvtError::TableNameNotFound(name.to_owned()))
    }

    pub fn list(&self) -> Vec<(String, TableId)> {
        let mut tables: Vec<_> = self
            .tables
            .values()
            .map(|t| (t.name.clone(), t.id))
            .collect();
        tables.sort_by_key(|(_, id)| *id);
        tables
    }

    pub fn table(&self, id: TableId) -> Result<&Table<E>> {
        self.tables.get(&id).ok_or(KvtError::TableNotFound(id))
    }

    pub fn table_mut(&mut self, id: TableId) -> Result<&mut Table<E>> {
        self.tables.get_mut(&id).ok_or(KvtError::TableNotFound(id))
    }
}

/// Forms the composite `(table_id, user key)` used to key transaction-local
/// state: 8-byte little-endian table id, then the key bytes.
pub(crate) fn composite_key(table: TableId, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + key.len());
    out.extend_from_slice(&table.to_le_bytes());
    out.extend_from_slice(key);
    out
}

pub(crate) fn split_composite(ck: &[u8]) -> (TableId, &[u8]) {
    debug_assert!(ck.len() >= 8, "composite key shorter than its table prefix");
    let mut id_bytes = [0u8; 8];
    id_bytes.copy_from_slice(&ck[..8]);
    (TableId::from_le_bytes(id_bytes), &ck[8..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_ids_are_monotonic_and_stable() {
        let mut reg: Registry<Vec<u8>> = Registry::new();
        let a = reg.create("a", Partition::Hash).unwrap();
        let b = reg.create("b", Partition::Range).unwrap();
        assert_eq!((a, b), (1, 2));
        assert!(matches!(
            reg.create("a", Partition::Hash),
            Err(KvtError::TableAlreadyExists(_))
        ));
        reg.drop_table(a).unwrap();
        // Dropped ids are never reused.
        let c = reg.create("c", Partition::Hash).unwrap();
        assert_eq!(c, 3);
        assert!(matches!(reg.table(a), Err(KvtError::TableNotFound(1))));
    }

    #[test]
    fn lookup_both_directions() {
        let mut reg: Registry<Vec<u8>> = Registry::new();
        let id = reg.create("vertices", Partition::Hash).unwrap();
        assert_eq!(reg.id_of("vertices").unwrap(), id);
        assert_eq!(reg.name_of(id).unwrap(), "vertices");
        assert!(reg.id_of("missing").is_err());
        assert_eq!(reg.list(), vec![("vertices".to_string(), id)]);
    }

    #[test]
    fn composite_key_roundtrip() {
        let ck = composite_key(513, b"edge:1");
        let (table, key) = split_composite(&ck);
        assert_eq!(table, 513);
        assert_eq!(key, b"edge:1");
    }

    #[test]
    fn partition_parse() {
        assert_eq!("hash".parse::<Partition>().unwrap(), Partition::Hash);
        assert_eq!("range".parse::<Partition>().unwrap(), Partition::Range);
        assert!("round-robin".parse::<Partition>().is_err());
    }
}
