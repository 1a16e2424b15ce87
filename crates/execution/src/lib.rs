//! Execution of Arca transactions.
//!
//! A response builder takes one admitted request and produces the response
//! the node commits: it loads classes under the request's classpath,
//! rehydrates the object graph from committed updates, runs instrumented
//! code under the gas budget, and extracts the new updates from the
//! mutated graph. Builders never share mutable state; each owns a fresh
//! execution context destroyed when the response is ready.

pub mod base_module;
pub mod builders;
pub mod caches;
pub mod classloader;
pub mod context;
pub mod deserializer;
pub mod errors;
pub mod extractor;
pub mod interpreter;
pub mod state_view;

pub use builders::{build, BuildFailure, BuilderEnv};
pub use caches::NodeCaches;
pub use classloader::ClassLoader;
pub use errors::ExecutionError;
pub use state_view::StateView;
