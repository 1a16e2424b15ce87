//! Builders of the initial, unsigned transactions: base module store,
//! gamete creation and the initialization marker.

use super::common::{BuildFailure, BuilderEnv};
use crate::context::{ExecutionContext, RuntimeValue};
use crate::deserializer::eager_state_of;
use crate::extractor::extract_updates;
use crate::state_view::StateView;
use arca_types::marshalling::{from_bytes, to_bytes};
use arca_types::requests::{
    GameteCreationRequest, InitialModuleStoreRequest, InitializationRequest,
};
use arca_types::responses::{
    GameteCreationResponse, InitialModuleStoreResponse, InitializationResponse,
};
use arca_types::{FieldSignature, TransactionReference, TransactionResponse};
use arca_vm::verifier::{verify, EmptyResolver};
use arca_vm::{instrument, Module};
use num_bigint::Sign;
use tracing::info;

/// Installs the base runtime module. Rejected on any flaw: initial
/// transactions never produce failed responses.
pub fn initial_module_store<S: StateView>(
    request: &InitialModuleStoreRequest,
    env: &BuilderEnv<'_, S>,
) -> Result<TransactionResponse, BuildFailure> {
    if env.store.base_code()?.is_some() {
        return Err(BuildFailure::Rejected(
            "the base module is already installed".into(),
        ));
    }

    let module: Module = from_bytes(&request.module)
        .map_err(|e| BuildFailure::Rejected(format!("undecodable base module: {e}")))?;
    let verified = verify(&module, &EmptyResolver, &env.whitelist, env.consensus.allows_self_charged)
        .map_err(|e| BuildFailure::Rejected(format!("base module rejected: {e}")))?;
    let instrumented = instrument(&verified, &EmptyResolver, &env.costs);
    let instrumented_module = to_bytes(&instrumented)
        .map_err(|e| BuildFailure::Rejected(format!("unencodable base module: {e}")))?;

    info!(target: "builder", "base runtime module installed");
    Ok(TransactionResponse::InitialModuleStore(
        InitialModuleStoreResponse {
            instrumented_module,
            verification_version: env.consensus.verification_version,
        },
    ))
}

/// Creates the distinguished funded account.
pub fn gamete_creation<S: StateView>(
    request: &GameteCreationRequest,
    reference: TransactionReference,
    env: &BuilderEnv<'_, S>,
) -> Result<TransactionResponse, BuildFailure> {
    if request.initial_amount.sign() == Sign::Minus
        || request.red_initial_amount.sign() == Sign::Minus
    {
        return Err(BuildFailure::Rejected("negative initial supply".into()));
    }

    let loader = env.caches.classloader_for(env.store, &request.classpath)?;
    // Initial transactions are not gas-metered.
    let mut ctx = ExecutionContext::new(env.store, loader, &env.costs, reference, u64::MAX);

    let gamete_class = ctx.loader.gamete_class();
    let gamete = ctx
        .allocate(&gamete_class)
        .map_err(|e| BuildFailure::Rejected(e.to_string()))?;
    ctx.set_balance(gamete, false, request.initial_amount.clone())
        .map_err(|e| BuildFailure::Rejected(e.to_string()))?;
    ctx.set_balance(gamete, true, request.red_initial_amount.clone())
        .map_err(|e| BuildFailure::Rejected(e.to_string()))?;
    ctx.write_field(
        gamete,
        &FieldSignature::eoa_public_key(),
        RuntimeValue::Str(request.public_key.clone()),
    )
    .map_err(|e| BuildFailure::Rejected(e.to_string()))?;

    let updates = extract_updates(&ctx, &[gamete]).map_err(|e| match e {
        crate::errors::ExecutionError::State(e) => BuildFailure::State(e),
        other => BuildFailure::Rejected(other.to_string()),
    })?;
    let gamete_reference = ctx.object(gamete).reference;

    info!(target: "builder", gamete = %gamete_reference, "gamete created");
    Ok(TransactionResponse::GameteCreation(GameteCreationResponse {
        updates,
        gamete: gamete_reference,
    }))
}

/// Marks the node initialized. The manifest must be an existing object.
pub fn initialization<S: StateView>(
    request: &InitializationRequest,
    env: &BuilderEnv<'_, S>,
) -> Result<TransactionResponse, BuildFailure> {
    if env.store.response(&request.classpath)?.is_none() {
        return Err(BuildFailure::Rejected(format!(
            "unknown classpath {}",
            request.classpath
        )));
    }
    eager_state_of(env.store, &request.manifest).map_err(|e| match e {
        crate::errors::ExecutionError::State(e) => BuildFailure::State(e),
        other => BuildFailure::Rejected(format!("unusable manifest: {other}")),
    })?;

    info!(target: "builder", manifest = %request.manifest, "node initialized");
    Ok(TransactionResponse::Initialization(InitializationResponse))
}
