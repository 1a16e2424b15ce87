//! Builder-level pipeline tests over a bare node store: gas conservation
//! and the penalty accounting of failed transactions.

use arca_execution::base_module::base_module_bytes;
use arca_execution::builders::{build, BuildFailure, BuilderEnv};
use arca_execution::NodeCaches;
use arca_state::NodeStore;
use arca_storage::MemoryDatabase;
use arca_types::config::ConsensusParams;
use arca_types::requests::{
    ConstructorCallRequest, GameteCreationRequest, InitialModuleStoreRequest, TransferAmount,
    TransferRequest, TRANSFER_GAS_LIMIT,
};
use arca_types::signatures::ConstructorSignature;
use arca_types::{
    lang, ClassType, StorageReference, StorageType, StorageValue, TransactionRequest,
    TransactionResponse, Update,
};
use arca_vm::{GasCostModel, WhiteList};
use num_bigint::BigInt;
use std::collections::BTreeSet;
use std::sync::Arc;

const CHAIN_ID: &str = "pipeline-test";

fn consensus() -> ConsensusParams {
    ConsensusParams {
        chain_id: CHAIN_ID.into(),
        signature: "empty".into(),
        gas_price: 1,
        ..Default::default()
    }
}

struct Pipeline {
    store: NodeStore,
    caches: NodeCaches,
}

impl Pipeline {
    fn new() -> Self {
        Self {
            store: NodeStore::open(Arc::new(MemoryDatabase::new()), 5).unwrap(),
            caches: NodeCaches::new(),
        }
    }

    /// Builds and commits one request, the way a node's delivery loop
    /// does.
    fn deliver(
        &mut self,
        request: TransactionRequest,
    ) -> Result<TransactionResponse, BuildFailure> {
        let (reference, response) = {
            let env = BuilderEnv {
                store: &self.store,
                caches: &self.caches,
                consensus: consensus(),
                costs: GasCostModel::default(),
                whitelist: WhiteList::default(),
                view_gas_cap: None,
            };
            build(&request, &env)?
        };

        self.store
            .put_delivery(&reference, &request, &response)
            .unwrap();
        let touched: BTreeSet<StorageReference> =
            response.updates().iter().map(|u| *u.object()).collect();
        for object in touched {
            let mut history = self.store.get_history(&object).unwrap();
            history.insert(0, reference);
            self.store.put_history(&object, &history).unwrap();
        }
        match (&request, &response) {
            (TransactionRequest::InitialModuleStore(_), _) => {
                self.store.set_base_code(&reference).unwrap();
            }
            (_, TransactionResponse::GameteCreation(r)) => {
                self.store.set_gamete(&r.gamete).unwrap();
            }
            _ => {}
        }
        self.store.commit().unwrap();
        if response.instrumented_module().is_some() {
            self.caches.invalidate_classloaders();
        }
        Ok(response)
    }

    fn balance_of(&self, object: &StorageReference) -> BigInt {
        for transaction in self.store.get_history(object).unwrap() {
            let response = self.store.get_response(&transaction).unwrap().unwrap();
            for update in response.updates() {
                if let Update::Balance { object: o, value } = update {
                    if o == object {
                        return value.clone();
                    }
                }
            }
        }
        panic!("no balance in the history of {object}");
    }
}

fn bootstrap(pipeline: &mut Pipeline, supply: u64) -> (arca_types::TransactionReference, StorageReference) {
    pipeline
        .deliver(TransactionRequest::InitialModuleStore(
            InitialModuleStoreRequest {
                module: base_module_bytes(),
            },
        ))
        .unwrap();
    let base_code = pipeline.store.get_base_code().unwrap().unwrap();

    let response = pipeline
        .deliver(TransactionRequest::GameteCreation(GameteCreationRequest {
            classpath: base_code,
            initial_amount: BigInt::from(supply),
            red_initial_amount: BigInt::from(0),
            public_key: "dGVzdA==".into(),
        }))
        .unwrap();
    let gamete = match response {
        TransactionResponse::GameteCreation(r) => r.gamete,
        other => panic!("unexpected {other:?}"),
    };
    (base_code, gamete)
}

#[test]
fn successful_transfer_conserves_gas() {
    let mut pipeline = Pipeline::new();
    let (base_code, gamete) = bootstrap(&mut pipeline, 1_000_000_000);

    let account = match pipeline
        .deliver(TransactionRequest::ConstructorCall(ConstructorCallRequest {
            caller: gamete,
            nonce: 0,
            chain_id: CHAIN_ID.into(),
            gas_limit: 200_000,
            gas_price: 1,
            classpath: base_code,
            constructor: ConstructorSignature::new(
                ClassType::new(lang::EXTERNALLY_OWNED_ACCOUNT),
                vec![StorageType::BigInteger, StorageType::String],
            ),
            actuals: vec![
                StorageValue::BigInteger(BigInt::from(500_000u64)),
                StorageValue::String("a2V5".into()),
            ],
            signature: vec![],
        }))
        .unwrap()
    {
        TransactionResponse::ConstructorCallSuccessful(r) => r.new_object,
        other => panic!("unexpected {other:?}"),
    };

    let before = pipeline.balance_of(&account);
    let response = pipeline
        .deliver(TransactionRequest::Transfer(TransferRequest {
            caller: account,
            nonce: 0,
            chain_id: CHAIN_ID.into(),
            gas_price: 1,
            classpath: base_code,
            receiver: gamete,
            amount: TransferAmount::Int(1_000),
            signature: vec![],
        }))
        .unwrap();

    let gas = response.gas();
    assert_eq!(response.gas_penalty(), 0);
    assert!(gas.total() > 0 && gas.total() < TRANSFER_GAS_LIMIT);

    // The caller paid exactly the consumed gas (at price 1) plus the
    // amount: the refund of the unused budget balances the reservation.
    let after = pipeline.balance_of(&account);
    assert_eq!(before - after, BigInt::from(1_000u64 + gas.total()));
}

#[test]
fn out_of_gas_burns_the_whole_limit_as_consumption_plus_penalty() {
    let mut pipeline = Pipeline::new();
    let (base_code, gamete) = bootstrap(&mut pipeline, 1_000_000_000);

    // The minimum admissible gas cannot even pay the storage of a
    // response: the body dies of out-of-gas and the penalty covers the
    // rest of the limit.
    let gas_limit = GasCostModel::default().minimum_gas();
    let before = pipeline.balance_of(&gamete);
    let response = pipeline
        .deliver(TransactionRequest::ConstructorCall(ConstructorCallRequest {
            caller: gamete,
            nonce: 0,
            chain_id: CHAIN_ID.into(),
            gas_limit,
            gas_price: 1,
            classpath: base_code,
            constructor: ConstructorSignature::new(
                ClassType::new(lang::EXTERNALLY_OWNED_ACCOUNT),
                vec![StorageType::BigInteger, StorageType::String],
            ),
            actuals: vec![
                StorageValue::BigInteger(BigInt::from(1u64)),
                StorageValue::String("a2V5".into()),
            ],
            signature: vec![],
        }))
        .unwrap();

    assert!(response.is_failed());
    let gas = response.gas();
    // P4 with no refund: consumption plus penalty exhausts the limit.
    assert_eq!(gas.total() + response.gas_penalty(), gas_limit);
    // The caller paid for the full limit.
    assert_eq!(
        pipeline.balance_of(&gamete),
        before - BigInt::from(gas_limit)
    );
}

#[test]
fn unknown_classpath_is_rejected_without_state_change() {
    let mut pipeline = Pipeline::new();
    let (_, gamete) = bootstrap(&mut pipeline, 1_000_000_000);
    let root = pipeline.store.merged_root();

    let bogus = arca_types::TransactionReference([0xEE; 32]);
    let result = pipeline.deliver(TransactionRequest::Transfer(TransferRequest {
        caller: gamete,
        nonce: 0,
        chain_id: CHAIN_ID.into(),
        gas_price: 1,
        classpath: bogus,
        receiver: gamete,
        amount: TransferAmount::Int(1),
        signature: vec![],
    }));

    assert!(matches!(result, Err(BuildFailure::Rejected(_))));
    assert_eq!(pipeline.store.merged_root(), root);
}
