//! In-memory store, used by unit tests and throwaway nodes.

use crate::database::{Database, TableId, WriteBatch};
use arca_types::error::StorageError;
use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Default)]
pub struct MemoryDatabase {
    tables: [RwLock<BTreeMap<Vec<u8>, Vec<u8>>>; 4],
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Database for MemoryDatabase {
    fn get(&self, table: TableId, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let t = self.tables[table.index()]
            .read()
            .map_err(|_| StorageError::Backend("lock poisoned".into()))?;
        Ok(t.get(key).cloned())
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StorageError> {
        // Take all four locks up front so the batch is atomic for readers.
        let mut guards: Vec<_> = Vec::with_capacity(4);
        for t in &self.tables {
            guards.push(
                t.write()
                    .map_err(|_| StorageError::Backend("lock poisoned".into()))?,
            );
        }
        for (table, key, value) in batch.ops {
            match value {
                Some(v) => {
                    guards[table.index()].insert(key, v);
                }
                None => {
                    guards[table.index()].remove(&key);
                }
            }
        }
        Ok(())
    }

    fn scan(&self, table: TableId) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let t = self.tables[table.index()]
            .read()
            .map_err(|_| StorageError::Backend("lock poisoned".into()))?;
        Ok(t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}
