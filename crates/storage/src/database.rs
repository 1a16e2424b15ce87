//! The store abstraction consumed by the state layer.

use arca_types::error::StorageError;

/// The logical tables of one node store.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TableId {
    /// Trie nodes of the responses trie.
    ResponseNodes,
    /// Trie nodes of the histories trie.
    HistoryNodes,
    /// Trie nodes of the info trie.
    InfoNodes,
    /// Head pointer, retained roots and other small control records.
    Meta,
}

impl TableId {
    pub const ALL: [TableId; 4] = [
        TableId::ResponseNodes,
        TableId::HistoryNodes,
        TableId::InfoNodes,
        TableId::Meta,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            TableId::ResponseNodes => 0,
            TableId::HistoryNodes => 1,
            TableId::InfoNodes => 2,
            TableId::Meta => 3,
        }
    }
}

/// A set of puts and deletes applied atomically across tables.
///
/// This is the only write path: one batch per store commit, so a crashed
/// node never observes a torn commit.
#[derive(Default, Debug)]
pub struct WriteBatch {
    pub(crate) ops: Vec<(TableId, Vec<u8>, Option<Vec<u8>>)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, table: TableId, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push((table, key, Some(value)));
    }

    pub fn delete(&mut self, table: TableId, key: Vec<u8>) {
        self.ops.push((table, key, None));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// A transactional byte store. Reads are read-committed; writes land in
/// one atomic batch.
pub trait Database: Send + Sync + 'static {
    fn get(&self, table: TableId, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Applies the batch atomically. Either every op lands or none does.
    fn write(&self, batch: WriteBatch) -> Result<(), StorageError>;

    /// Full scan of one table. Used only by the bounded garbage collector,
    /// whose sweeps are rare and scoped to node tables kept small by the
    /// retention window.
    fn scan(&self, table: TableId) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;
}
