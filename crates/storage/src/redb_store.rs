//! `redb`-backed store: one database file per node, one table per
//! [`TableId`], one write transaction per batch.

use crate::database::{Database, TableId, WriteBatch};
use arca_types::error::StorageError;
use redb::{ReadableTable, TableDefinition};
use std::path::Path;
use tracing::debug;

const RESPONSE_NODES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("RESPONSE_NODES");
const HISTORY_NODES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("HISTORY_NODES");
const INFO_NODES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("INFO_NODES");
const META: TableDefinition<&[u8], &[u8]> = TableDefinition::new("META");

fn definition(table: TableId) -> TableDefinition<'static, &'static [u8], &'static [u8]> {
    match table {
        TableId::ResponseNodes => RESPONSE_NODES,
        TableId::HistoryNodes => HISTORY_NODES,
        TableId::InfoNodes => INFO_NODES,
        TableId::Meta => META,
    }
}

fn backend(e: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(e.to_string())
}

pub struct RedbDatabase {
    db: redb::Database,
}

impl RedbDatabase {
    /// Opens (or creates) the store file, ensuring every table exists so
    /// that later read transactions never fail on a missing table.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = redb::Database::create(path.as_ref())
            .map_err(|e| StorageError::Open(format!("{}: {e}", path.as_ref().display())))?;
        {
            let w = db.begin_write().map_err(backend)?;
            for table in TableId::ALL {
                w.open_table(definition(table)).map_err(backend)?;
            }
            w.commit().map_err(backend)?;
        }
        Ok(Self { db })
    }
}

impl Database for RedbDatabase {
    fn get(&self, table: TableId, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let r = self.db.begin_read().map_err(backend)?;
        let t = r.open_table(definition(table)).map_err(backend)?;
        let result = t.get(key).map_err(backend)?.map(|g| g.value().to_vec());
        Ok(result)
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let w = self.db.begin_write().map_err(backend)?;
        {
            for table in TableId::ALL {
                let mut t = w.open_table(definition(table)).map_err(backend)?;
                for (op_table, key, value) in &batch.ops {
                    if *op_table != table {
                        continue;
                    }
                    match value {
                        Some(v) => {
                            t.insert(key.as_slice(), v.as_slice()).map_err(backend)?;
                        }
                        None => {
                            t.remove(key.as_slice()).map_err(backend)?;
                        }
                    }
                }
            }
        }
        debug!(target: "store", ops = batch.len(), "committed write batch");
        w.commit().map_err(backend)
    }

    fn scan(&self, table: TableId) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let r = self.db.begin_read().map_err(backend)?;
        let t = r.open_table(definition(table)).map_err(backend)?;
        let mut out = Vec::new();
        for item in t.iter().map_err(backend)? {
            let (k, v) = item.map_err(backend)?;
            out.push((k.value().to_vec(), v.value().to_vec()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_is_atomic_across_tables() {
        let dir = tempfile::tempdir().unwrap();
        let db = RedbDatabase::open(dir.path().join("store.redb")).unwrap();

        let mut batch = WriteBatch::new();
        batch.put(TableId::ResponseNodes, b"a".to_vec(), b"1".to_vec());
        batch.put(TableId::Meta, b"head".to_vec(), b"2".to_vec());
        db.write(batch).unwrap();

        assert_eq!(
            db.get(TableId::ResponseNodes, b"a").unwrap(),
            Some(b"1".to_vec())
        );
        assert_eq!(db.get(TableId::Meta, b"head").unwrap(), Some(b"2".to_vec()));

        let mut batch = WriteBatch::new();
        batch.delete(TableId::ResponseNodes, b"a".to_vec());
        db.write(batch).unwrap();
        assert_eq!(db.get(TableId::ResponseNodes, b"a").unwrap(), None);
    }
}
