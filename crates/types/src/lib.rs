//! Core data structures of the Arca engine.
//!
//! Everything that crosses the node boundary or feeds a hash pre-image lives
//! here: transaction and storage references, storage values and types, field
//! and code signatures, updates, the request and response sums, and the
//! canonical marshalling layer that defines their byte representation.

pub mod config;
pub mod error;
pub mod lang;
pub mod marshalling;
pub mod references;
pub mod requests;
pub mod responses;
pub mod signatures;
pub mod updates;
pub mod values;

pub use references::{StorageReference, TransactionReference};
pub use requests::TransactionRequest;
pub use responses::TransactionResponse;
pub use signatures::{ClassType, ConstructorSignature, FieldSignature, MethodSignature};
pub use updates::Update;
pub use values::{StorageType, StorageValue};
