//! Bootstrap of a fresh node: base module, gamete, manifest,
//! initialization marker.

use crate::{Node, NodeError};
use arca_crypto::sign::KeyPair;
use arca_execution::base_module::base_module_bytes;
use arca_types::config::ConsensusParams;
use arca_types::requests::{
    ConstructorCallRequest, GameteCreationRequest, InitialModuleStoreRequest,
    InitializationRequest,
};
use arca_types::signatures::ConstructorSignature;
use arca_types::{
    ClassType, StorageReference, StorageValue, StorageType, TransactionReference,
    TransactionRequest, lang,
};
use tracing::info;

/// The references produced by a completed genesis.
#[derive(Clone, Debug)]
pub struct Genesis {
    pub base_code: TransactionReference,
    pub gamete: StorageReference,
    pub manifest: StorageReference,
}

/// Drives the four genesis transactions on a fresh node. The gamete key
/// pair signs the manifest creation; pass `None` with the `empty`
/// signature suite.
pub fn initialize<N: Node>(
    node: &N,
    consensus: &ConsensusParams,
    gamete_keys: Option<&KeyPair>,
) -> Result<Genesis, NodeError> {
    let base_code = node.add_initial_module_store_transaction(InitialModuleStoreRequest {
        module: base_module_bytes(),
    })?;

    let gamete = node.add_gamete_creation_transaction(GameteCreationRequest {
        classpath: base_code,
        initial_amount: consensus
            .initial_supply()
            .map_err(|e| NodeError::TransactionRejected { message: e.to_string() })?,
        red_initial_amount: consensus
            .initial_red_supply()
            .map_err(|e| NodeError::TransactionRejected { message: e.to_string() })?,
        public_key: consensus.public_key_of_gamete.clone(),
    })?;

    // The manifest is created by the gamete, which pays for it.
    let mut manifest_request = ConstructorCallRequest {
        caller: gamete,
        nonce: 0,
        chain_id: consensus.chain_id.clone(),
        gas_limit: 1_000_000.min(consensus.max_gas_per_transaction),
        gas_price: consensus.gas_price,
        classpath: base_code,
        constructor: ConstructorSignature::new(
            ClassType::new(lang::MANIFEST),
            vec![StorageType::String],
        ),
        actuals: vec![StorageValue::String(consensus.chain_id.clone())],
        signature: vec![],
    };
    if let Some(keys) = gamete_keys {
        let payload = TransactionRequest::ConstructorCall(manifest_request.clone())
            .signed_payload()
            .map_err(|e| NodeError::TransactionRejected { message: e.to_string() })?;
        manifest_request.signature = keys.sign(&payload);
    }
    let manifest = node.add_constructor_call_transaction(manifest_request)?;

    node.add_initialization_transaction(InitializationRequest {
        classpath: base_code,
        manifest,
    })?;

    info!(target: "node", %gamete, %manifest, "genesis complete");
    Ok(Genesis {
        base_code,
        gamete,
        manifest,
    })
}
