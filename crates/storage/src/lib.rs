//! The transactional byte store under the authenticated state.
//!
//! Four logical tables back the node store: the node records of the three
//! tries plus a small metadata table. Writes happen through atomic batches
//! spanning all tables; readers see the last committed state.

mod database;
mod memory;
mod redb_store;

pub use database::{Database, TableId, WriteBatch};
pub use memory::MemoryDatabase;
pub use redb_store::RedbDatabase;
