//! Errors raised while running the body of a transaction.

use arca_types::error::StateError;
use arca_types::ClassType;
use thiserror::Error;

/// What can go wrong inside an execution context. Everything except
/// `State` is captured by the response builder and mapped to a response;
/// store failures abort the commit instead.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// The gas budget ran out. Never a code-execution outcome: always the
    /// penalty branch.
    #[error("out of gas")]
    OutOfGas,
    /// Executed code threw an exception object.
    #[error("{class_name}: {message}")]
    Contract {
        class_name: ClassType,
        message: String,
        /// Whether the thrown class extends the checked exception root.
        checked: bool,
    },
    /// The engine caught the executed code misbehaving (stack underflow,
    /// type confusion, unresolved member). Always the penalty branch.
    #[error("illegal operation: {0}")]
    Illegal(String),
    /// The store failed underneath the execution; the commit aborts.
    #[error(transparent)]
    State(#[from] StateError),
}

impl ExecutionError {
    /// An unchecked exception raised by the engine on behalf of the code.
    pub fn engine_exception(class_name: &str, message: impl Into<String>) -> Self {
        ExecutionError::Contract {
            class_name: ClassType::new(class_name),
            message: message.into(),
            checked: false,
        }
    }
}
