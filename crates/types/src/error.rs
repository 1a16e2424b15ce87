//! Error types shared across the Arca engine.

use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors of the canonical codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarshallingError {
    /// The input ended before the value was complete.
    #[error("unexpected end of input")]
    UnexpectedEof,
    /// A selector byte did not match any known shape.
    #[error("unknown selector {selector} while decoding {what}")]
    UnknownSelector { what: &'static str, selector: u8 },
    /// A decoded scalar was outside its domain.
    #[error("value out of range: {0}")]
    ValueOutOfRange(String),
    /// A string field was not valid UTF-8.
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,
    /// The buffer was longer than the encoded value.
    #[error("{0} trailing bytes after a complete value")]
    TrailingBytes(usize),
}

impl ErrorCode for MarshallingError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnexpectedEof => "MARSHALLING_EOF",
            Self::UnknownSelector { .. } => "MARSHALLING_UNKNOWN_SELECTOR",
            Self::ValueOutOfRange(_) => "MARSHALLING_OUT_OF_RANGE",
            Self::InvalidUtf8 => "MARSHALLING_INVALID_UTF8",
            Self::TrailingBytes(_) => "MARSHALLING_TRAILING_BYTES",
        }
    }
}

/// Errors of the transactional byte store backing the tries.
#[derive(Error, Debug)]
pub enum StorageError {
    /// An error surfaced by the storage backend.
    #[error("storage backend error: {0}")]
    Backend(String),
    /// The store directory could not be opened or created.
    #[error("cannot open store: {0}")]
    Open(String),
    /// A record was present but malformed.
    #[error("corrupted record under key {key}: {reason}")]
    Corrupted { key: String, reason: String },
}

impl ErrorCode for StorageError {
    fn code(&self) -> &'static str {
        match self {
            Self::Backend(_) => "STORAGE_BACKEND_ERROR",
            Self::Open(_) => "STORAGE_OPEN_FAILED",
            Self::Corrupted { .. } => "STORAGE_CORRUPTED",
        }
    }
}

/// Errors of the authenticated state layer (tries and node store).
#[derive(Error, Debug)]
pub enum StateError {
    /// An error occurred in the underlying byte store.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// A trie node referenced by digest was not found.
    #[error("missing trie node {0}")]
    MissingNode(String),
    /// A stored value failed to decode.
    #[error("decode error: {0}")]
    Decode(#[from] MarshallingError),
    /// `checkout` was asked for a root outside the retained window.
    #[error("unknown or garbage-collected root {0}")]
    UnknownRoot(String),
    /// The merged root had the wrong width.
    #[error("malformed merged root: expected 96 bytes, got {0}")]
    MalformedRoot(usize),
}

impl ErrorCode for StateError {
    fn code(&self) -> &'static str {
        match self {
            Self::Storage(_) => "STATE_STORAGE_ERROR",
            Self::MissingNode(_) => "STATE_MISSING_NODE",
            Self::Decode(_) => "STATE_DECODE_ERROR",
            Self::UnknownRoot(_) => "STATE_UNKNOWN_ROOT",
            Self::MalformedRoot(_) => "STATE_MALFORMED_ROOT",
        }
    }
}

/// The transaction-facing error taxonomy of the node boundary.
///
/// `TransactionRejected` means nothing was written to the store;
/// `TransactionFailed` means a failed response was committed with penalty
/// accounting; `CodeExecution` is a success outcome carrying the declared
/// exception of the executed code.
#[derive(Error, Debug)]
pub enum NodeError {
    /// The request was not admissible; no state was touched.
    #[error("transaction rejected: {message}")]
    TransactionRejected { message: String },
    /// The body of an accepted transaction failed; a failed response was
    /// committed.
    #[error("transaction failed [{class_name_of_cause}] at {where_}: {message}")]
    TransactionFailed {
        class_name_of_cause: String,
        message: String,
        where_: String,
    },
    /// The executed code threw an exception it declares; the transaction
    /// succeeded and committed its updates.
    #[error("{class_name_of_cause}: {message}")]
    CodeExecution {
        class_name_of_cause: String,
        message: String,
    },
    /// The store layer failed; the commit was aborted atomically.
    #[error(transparent)]
    State(#[from] StateError),
    /// The node is shutting down or its delivery thread is gone.
    #[error("node unavailable: {0}")]
    Unavailable(String),
    /// A polled response did not arrive within the timeout.
    #[error("timed out waiting for the response of {0}")]
    PollTimeout(String),
}

impl ErrorCode for NodeError {
    fn code(&self) -> &'static str {
        match self {
            Self::TransactionRejected { .. } => "TX_REJECTED",
            Self::TransactionFailed { .. } => "TX_FAILED",
            Self::CodeExecution { .. } => "TX_CODE_EXECUTION",
            Self::State(_) => "NODE_STATE_ERROR",
            Self::Unavailable(_) => "NODE_UNAVAILABLE",
            Self::PollTimeout(_) => "NODE_POLL_TIMEOUT",
        }
    }
}
