//! Response builders: one state machine per request kind.
//!
//! The common skeleton: validate admissibility, reserve the full gas cost
//! pessimistically, run the body under the meter, then either charge
//! storage and refund on success, or revert to the caller's nonce and
//! balance plus a penalty on failure. Rejections never touch state.

mod call;
mod common;
mod initial;
mod module_store;

pub use common::{BuildFailure, BuilderEnv};

use crate::state_view::StateView;
use arca_crypto::hash::reference_of;
use arca_types::{TransactionReference, TransactionRequest, TransactionResponse};
use tracing::{debug, warn};

/// Builds the response of `request`. On `Ok` the caller commits the pair;
/// `Rejected` means nothing may be written; `State` aborts the commit.
pub fn build<S: StateView>(
    request: &TransactionRequest,
    env: &BuilderEnv<'_, S>,
) -> Result<(TransactionReference, TransactionResponse), BuildFailure> {
    let reference = reference_of(request)
        .map_err(|e| BuildFailure::Rejected(format!("unencodable request: {e}")))?;

    if request.is_initial() && env.store.is_initialized().map_err(BuildFailure::from)? {
        return Err(BuildFailure::Rejected(
            "the node is already initialized".into(),
        ));
    }

    let response = match request {
        TransactionRequest::InitialModuleStore(r) => initial::initial_module_store(r, env),
        TransactionRequest::GameteCreation(r) => initial::gamete_creation(r, reference, env),
        TransactionRequest::Initialization(r) => initial::initialization(r, env),
        TransactionRequest::ModuleStore(r) => module_store::module_store(r, reference, env),
        TransactionRequest::ConstructorCall(r) => call::constructor_call(r, reference, env),
        TransactionRequest::InstanceMethodCall(r) => call::instance_method_call(r, reference, env),
        TransactionRequest::StaticMethodCall(r) => call::static_method_call(r, reference, env),
        TransactionRequest::Transfer(r) => call::transfer(r, reference, env),
    };

    match &response {
        Ok(r) if r.is_failed() => debug!(target: "builder", %reference, "transaction failed"),
        Ok(_) => debug!(target: "builder", %reference, "transaction succeeded"),
        Err(BuildFailure::Rejected(message)) => {
            warn!(target: "builder", %reference, message, "transaction rejected")
        }
        Err(BuildFailure::State(_)) => {}
    }

    response.map(|r| (reference, r))
}
