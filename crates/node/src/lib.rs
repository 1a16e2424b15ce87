//! The Arca node surface.
//!
//! [`Node`] is the uniform request/response contract every backend
//! exposes; [`LocalNode`] is the single-process backend. A replicated,
//! log-backed backend drives the same delivery surface
//! ([`LocalNode::deliver`], [`LocalNode::commit_block`],
//! [`LocalNode::checkout`]) from its consensus log instead of the local
//! mempool.

mod future;
pub mod genesis;
mod local;

pub use future::TransactionFuture;
pub use local::LocalNode;

pub use arca_types::error::NodeError;
use arca_types::requests::{
    ConstructorCallRequest, GameteCreationRequest, InitialModuleStoreRequest,
    InitializationRequest, InstanceMethodCallRequest, ModuleStoreRequest, StaticMethodCallRequest,
    TransferRequest,
};
use arca_types::signatures::ClassTag;
use arca_types::{
    StorageReference, StorageValue, TransactionReference, TransactionRequest, TransactionResponse,
    Update,
};
use std::time::Duration;

/// The node API: the system boundary of the engine.
///
/// `add_*` delivers synchronously; `post_*` enqueues and returns a
/// future; `run_*` executes a view call against the current state and
/// commits nothing. Errors surface as the taxonomy of
/// [`NodeError`]: rejected requests leave no trace, failed ones are
/// committed with penalty accounting, declared exceptions are successes
/// carrying the exception.
pub trait Node {
    /// The classpath of the base runtime module.
    fn base_code(&self) -> Result<TransactionReference, NodeError>;

    /// The manifest object; present iff the node is initialized.
    fn manifest(&self) -> Result<StorageReference, NodeError>;

    /// The runtime class of a storage object.
    fn class_tag(&self, object: &StorageReference) -> Result<ClassTag, NodeError>;

    /// The current state of a storage object: its class tag plus the
    /// newest update of every field, reconstructed from its history.
    fn state(&self, object: &StorageReference) -> Result<Vec<Update>, NodeError>;

    /// The committed request of a transaction, if any.
    fn request(&self, reference: &TransactionReference)
        -> Result<Option<TransactionRequest>, NodeError>;

    /// The committed response of a transaction; absent until committed.
    fn response(
        &self,
        reference: &TransactionReference,
    ) -> Result<Option<TransactionResponse>, NodeError>;

    /// Blocks until the response of `reference` is committed, up to
    /// `timeout`.
    fn polled_response(
        &self,
        reference: &TransactionReference,
        timeout: Duration,
    ) -> Result<TransactionResponse, NodeError>;

    // ---- synchronous delivery ----

    fn add_initial_module_store_transaction(
        &self,
        request: InitialModuleStoreRequest,
    ) -> Result<TransactionReference, NodeError>;

    fn add_gamete_creation_transaction(
        &self,
        request: GameteCreationRequest,
    ) -> Result<StorageReference, NodeError>;

    fn add_initialization_transaction(
        &self,
        request: InitializationRequest,
    ) -> Result<(), NodeError>;

    fn add_module_store_transaction(
        &self,
        request: ModuleStoreRequest,
    ) -> Result<TransactionReference, NodeError>;

    fn add_constructor_call_transaction(
        &self,
        request: ConstructorCallRequest,
    ) -> Result<StorageReference, NodeError>;

    fn add_instance_method_call_transaction(
        &self,
        request: InstanceMethodCallRequest,
    ) -> Result<Option<StorageValue>, NodeError>;

    fn add_static_method_call_transaction(
        &self,
        request: StaticMethodCallRequest,
    ) -> Result<Option<StorageValue>, NodeError>;

    fn add_transfer_transaction(&self, request: TransferRequest) -> Result<(), NodeError>;

    // ---- asynchronous delivery ----

    fn post_transaction(
        &self,
        request: TransactionRequest,
    ) -> Result<TransactionFuture, NodeError>;

    // ---- view calls: never committed ----

    fn run_instance_method_call_transaction(
        &self,
        request: InstanceMethodCallRequest,
    ) -> Result<Option<StorageValue>, NodeError>;

    fn run_static_method_call_transaction(
        &self,
        request: StaticMethodCallRequest,
    ) -> Result<Option<StorageValue>, NodeError>;
}

/// Maps a committed call response to the value the client sees.
pub(crate) fn method_outcome(
    response: TransactionResponse,
) -> Result<Option<StorageValue>, NodeError> {
    match response {
        TransactionResponse::MethodCallSuccessful(r) => Ok(Some(r.result)),
        TransactionResponse::VoidMethodCallSuccessful(_) => Ok(None),
        TransactionResponse::MethodCallException(r) => Err(NodeError::CodeExecution {
            class_name_of_cause: r.exception.class_name_of_cause,
            message: r.exception.message,
        }),
        TransactionResponse::MethodCallFailed(r) => Err(NodeError::TransactionFailed {
            class_name_of_cause: r.cause.class_name_of_cause,
            message: r.cause.message,
            where_: r.cause.where_,
        }),
        other => Err(NodeError::Unavailable(format!(
            "unexpected response shape {other:?}"
        ))),
    }
}

pub(crate) fn constructor_outcome(
    response: TransactionResponse,
) -> Result<StorageReference, NodeError> {
    match response {
        TransactionResponse::ConstructorCallSuccessful(r) => Ok(r.new_object),
        TransactionResponse::ConstructorCallException(r) => Err(NodeError::CodeExecution {
            class_name_of_cause: r.exception.class_name_of_cause,
            message: r.exception.message,
        }),
        TransactionResponse::ConstructorCallFailed(r) => Err(NodeError::TransactionFailed {
            class_name_of_cause: r.cause.class_name_of_cause,
            message: r.cause.message,
            where_: r.cause.where_,
        }),
        other => Err(NodeError::Unavailable(format!(
            "unexpected response shape {other:?}"
        ))),
    }
}
