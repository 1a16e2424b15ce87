//! The contract execution subset of the Arca engine.
//!
//! A contract module is a marshalled bundle of class definitions whose
//! method bodies are stack-machine instruction sequences. Before a module
//! becomes executable it passes the [`verifier`], which enforces the
//! subset, and the [`instrumenter`], which weaves in gas charges, entry
//! prologues and lazy-load dispatch. Only instrumented modules ever run.

pub mod gas;
pub mod instrumenter;
pub mod isa;
pub mod module;
pub mod verifier;
pub mod whitelist;

pub use gas::GasCostModel;
pub use instrumenter::{instrument, InstrumentedModule};
pub use isa::{Instruction, Intrinsic};
pub use module::{Annotations, ClassDef, ClassKind, FieldDef, MethodDef, MethodFlags, Module};
pub use verifier::{verify, ClassInfo, ClassResolver, VerificationError, VerifiedModule};
pub use whitelist::WhiteList;
