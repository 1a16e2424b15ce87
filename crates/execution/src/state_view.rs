//! Read access to committed state, as needed by execution.

use arca_state::NodeStore;
use arca_types::error::StateError;
use arca_types::{StorageReference, TransactionReference, TransactionResponse};

/// The committed state a builder executes over. Implemented by the node
/// store; tests may substitute fixtures.
pub trait StateView {
    fn response(
        &self,
        reference: &TransactionReference,
    ) -> Result<Option<TransactionResponse>, StateError>;

    fn history(
        &self,
        object: &StorageReference,
    ) -> Result<Vec<TransactionReference>, StateError>;

    fn base_code(&self) -> Result<Option<TransactionReference>, StateError>;

    fn gamete(&self) -> Result<Option<StorageReference>, StateError>;

    fn is_initialized(&self) -> Result<bool, StateError>;
}

impl StateView for NodeStore {
    fn response(
        &self,
        reference: &TransactionReference,
    ) -> Result<Option<TransactionResponse>, StateError> {
        self.get_response(reference)
    }

    fn history(
        &self,
        object: &StorageReference,
    ) -> Result<Vec<TransactionReference>, StateError> {
        self.get_history(object)
    }

    fn base_code(&self) -> Result<Option<TransactionReference>, StateError> {
        self.get_base_code()
    }

    fn gamete(&self) -> Result<Option<StorageReference>, StateError> {
        self.get_gamete()
    }

    fn is_initialized(&self) -> Result<bool, StateError> {
        NodeStore::is_initialized(self)
    }
}
