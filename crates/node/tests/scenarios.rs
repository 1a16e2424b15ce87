//! End-to-end scenarios driven through the node API over an in-memory
//! store: genesis, the compact transfer, a pyramid contract, module
//! verification rejection, view isolation and root determinism.

use arca_node::genesis::{initialize, Genesis};
use arca_node::{LocalNode, Node, NodeError};
use arca_state::MERGED_ROOT_LEN;
use arca_storage::MemoryDatabase;
use arca_types::config::{ConsensusParams, NodeConfig};
use arca_types::marshalling::to_bytes;
use arca_types::requests::{
    ConstructorCallRequest, InstanceMethodCallRequest, ModuleStoreRequest, TransferAmount,
    TransferRequest,
};
use arca_types::signatures::ConstructorSignature;
use arca_types::{
    lang, ClassType, FieldSignature, MethodSignature, StorageReference, StorageType, StorageValue,
    TransactionReference, TransactionRequest, Update,
};
use arca_vm::{
    Annotations, ClassDef, ClassKind, FieldDef, Instruction, MethodDef, MethodFlags, Module,
};
use num_bigint::BigInt;
use std::sync::Arc;

const CHAIN_ID: &str = "arca-test";
const GAMETE_KEY: &str = "MAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
const ACCOUNT_FUNDS: u64 = 1_000_000;
const INVESTMENT: u64 = 10_000;
const PAYOUT: u64 = 25_000;

fn consensus() -> ConsensusParams {
    ConsensusParams {
        chain_id: CHAIN_ID.into(),
        signature: "empty".into(),
        gas_price: 1,
        initial_supply: BigInt::from(10u64).pow(15).to_string(),
        initial_red_supply: BigInt::from(10u64).pow(15).to_string(),
        public_key_of_gamete: GAMETE_KEY.into(),
        ..Default::default()
    }
}

fn fresh_node() -> LocalNode {
    LocalNode::with_database(
        Arc::new(MemoryDatabase::new()),
        NodeConfig::default(),
        consensus(),
    )
    .expect("node opens over a fresh store")
}

/// A genesis-ed node plus the gamete's running nonce.
struct Harness {
    node: LocalNode,
    genesis: Genesis,
    gamete_nonce: u64,
}

impl Harness {
    fn start() -> Self {
        let node = fresh_node();
        let genesis = initialize(&node, &consensus(), None).expect("genesis succeeds");
        Self {
            node,
            genesis,
            // Genesis spends one gamete transaction on the manifest.
            gamete_nonce: 1,
        }
    }

    /// Creates a funded externally owned account, paid by the gamete.
    fn new_account(&mut self, funds: u64, key: &str) -> StorageReference {
        let request = ConstructorCallRequest {
            caller: self.genesis.gamete,
            nonce: self.gamete_nonce,
            chain_id: CHAIN_ID.into(),
            gas_limit: 200_000,
            gas_price: 1,
            classpath: self.genesis.base_code,
            constructor: ConstructorSignature::new(
                ClassType::new(lang::EXTERNALLY_OWNED_ACCOUNT),
                vec![StorageType::BigInteger, StorageType::String],
            ),
            actuals: vec![
                StorageValue::BigInteger(BigInt::from(funds)),
                StorageValue::String(key.into()),
            ],
            signature: vec![],
        };
        self.gamete_nonce += 1;
        self.node
            .add_constructor_call_transaction(request)
            .expect("account creation succeeds")
    }

    fn install_module(&mut self, module: &Module) -> Result<TransactionReference, NodeError> {
        let request = ModuleStoreRequest {
            caller: self.genesis.gamete,
            nonce: self.gamete_nonce,
            chain_id: CHAIN_ID.into(),
            gas_limit: 500_000,
            gas_price: 1,
            classpath: self.genesis.base_code,
            module: to_bytes(module).unwrap(),
            dependencies: vec![self.genesis.base_code],
            signature: vec![],
        };
        self.gamete_nonce += 1;
        self.node.add_module_store_transaction(request)
    }

    fn balance_of(&self, object: &StorageReference) -> BigInt {
        let state = self.node.state(object).expect("object exists");
        state
            .iter()
            .find_map(|update| match update {
                Update::Balance { value, .. } => Some(value.clone()),
                _ => None,
            })
            .expect("a contract always has a balance update")
    }

    fn nonce_of(&self, object: &StorageReference) -> BigInt {
        let state = self.node.state(object).expect("object exists");
        state
            .iter()
            .find_map(|update| {
                (update.field() == Some(FieldSignature::eoa_nonce()))
                    .then(|| update.value())
                    .flatten()
            })
            .and_then(|v| v.as_big_integer().cloned())
            .expect("an account always has a nonce update")
    }
}

// ---- contract modules assembled for the scenarios ----

fn plain_constructor() -> MethodDef {
    MethodDef {
        name: lang::INIT.into(),
        formals: vec![],
        returns: None,
        flags: MethodFlags::PUBLIC,
        annotations: Annotations::default(),
        max_locals: 1,
        body: vec![Instruction::Return],
    }
}

/// A pyramid: investments land on the contract balance through the
/// payable prologue; `withdraw` pays out once the pot covers the payout.
fn pyramid_module() -> Module {
    let pyramid = ClassType::new("demo.Pyramid");
    let invest = MethodDef {
        name: "invest".into(),
        formals: vec![StorageType::BigInteger],
        returns: None,
        flags: MethodFlags::PUBLIC,
        annotations: Annotations {
            from_contract: true,
            payable: true,
            ..Default::default()
        },
        max_locals: 2,
        body: vec![Instruction::Return],
    };
    // if balance >= PAYOUT { caller.receive(PAYOUT) }
    let withdraw = MethodDef {
        name: "withdraw".into(),
        formals: vec![],
        returns: None,
        flags: MethodFlags::PUBLIC,
        annotations: Annotations {
            from_contract: true,
            ..Default::default()
        },
        max_locals: 2,
        body: vec![
            Instruction::Load(0),
            Instruction::GetField(FieldSignature::balance()),
            Instruction::Const(StorageValue::BigInteger(BigInt::from(PAYOUT))),
            Instruction::Ge,
            Instruction::JumpIfNot(9),
            // The implicit caller local follows `this` (no formals here).
            Instruction::Load(1),
            Instruction::Const(StorageValue::BigInteger(BigInt::from(PAYOUT))),
            Instruction::CallVirtual(MethodSignature::new(
                ClassType::contract(),
                lang::RECEIVE,
                vec![StorageType::BigInteger],
                None,
            )),
            Instruction::Return,
            Instruction::Return,
        ],
    };
    Module {
        classes: vec![ClassDef {
            name: pyramid,
            superclass: Some(ClassType::contract()),
            kind: ClassKind::Class,
            fields: vec![],
            methods: vec![plain_constructor(), invest, withdraw],
        }],
    }
}

/// Reads a field of a class that is neither in the classpath nor
/// white-listed.
fn snooping_module() -> Module {
    Module {
        classes: vec![ClassDef {
            name: ClassType::new("demo.Snooper"),
            superclass: Some(ClassType::new(lang::STORAGE)),
            kind: ClassKind::Class,
            fields: vec![],
            methods: vec![MethodDef {
                name: "snoop".into(),
                formals: vec![],
                returns: None,
                flags: MethodFlags::PUBLIC,
                annotations: Annotations::default(),
                max_locals: 1,
                body: vec![
                    Instruction::Load(0),
                    Instruction::GetField(FieldSignature::new(
                        ClassType::new("outside.World"),
                        "secret",
                        StorageType::Int,
                    )),
                    Instruction::Pop,
                    Instruction::Return,
                ],
            }],
        }],
    }
}

/// A view method that writes a field.
fn box_module() -> Module {
    let class = ClassType::new("demo.Box");
    Module {
        classes: vec![ClassDef {
            name: class.clone(),
            superclass: Some(ClassType::new(lang::STORAGE)),
            kind: ClassKind::Class,
            fields: vec![FieldDef {
                name: "value".into(),
                ty: StorageType::Int,
                flags: Default::default(),
            }],
            methods: vec![
                plain_constructor(),
                MethodDef {
                    name: "poke".into(),
                    formals: vec![],
                    returns: None,
                    flags: MethodFlags::PUBLIC,
                    annotations: Annotations {
                        view: true,
                        ..Default::default()
                    },
                    max_locals: 1,
                    body: vec![
                        Instruction::Load(0),
                        Instruction::Const(StorageValue::Int(1)),
                        Instruction::PutField(FieldSignature::new(
                            class,
                            "value",
                            StorageType::Int,
                        )),
                        Instruction::Return,
                    ],
                },
            ],
        }],
    }
}

// ---- scenario 1: gamete creation ----

#[test]
fn gamete_creation_yields_tagged_account_with_both_supplies() {
    let node = fresh_node();
    let base_code = node
        .add_initial_module_store_transaction(arca_types::requests::InitialModuleStoreRequest {
            module: arca_execution::base_module::base_module_bytes(),
        })
        .unwrap();

    let supply = BigInt::from(10u64).pow(15);
    let gamete = node
        .add_gamete_creation_transaction(arca_types::requests::GameteCreationRequest {
            classpath: base_code,
            initial_amount: supply.clone(),
            red_initial_amount: supply.clone(),
            public_key: GAMETE_KEY.into(),
        })
        .unwrap();

    assert_eq!(gamete.progressive, 0);

    let state = node.state(&gamete).unwrap();
    let tag = node.class_tag(&gamete).unwrap();
    assert_eq!(tag.class, ClassType::new(lang::GAMETE));

    let mut total = BigInt::from(0);
    let mut balance_updates = 0;
    for update in &state {
        match update {
            Update::Balance { value, .. } | Update::RedBalance { value, .. } => {
                total += value;
                balance_updates += 1;
            }
            _ => {}
        }
    }
    assert_eq!(balance_updates, 2);
    assert_eq!(total, supply * 2u32);
}

// ---- scenario 2: compact transfer ----

#[test]
fn transfer_compact_form_moves_coins_and_bumps_the_nonce() {
    let mut harness = Harness::start();
    let a = harness.new_account(ACCOUNT_FUNDS, "a-key");
    let b = harness.new_account(ACCOUNT_FUNDS, "b-key");

    let balance_a = harness.balance_of(&a);
    let balance_b = harness.balance_of(&b);
    let nonce_a = harness.nonce_of(&a);

    let request = TransferRequest {
        caller: a,
        nonce: 0,
        chain_id: CHAIN_ID.into(),
        gas_price: 1,
        classpath: harness.genesis.base_code,
        receiver: b,
        amount: TransferAmount::Int(100),
        signature: vec![],
    };
    let wrapped = TransactionRequest::Transfer(request.clone());
    assert_eq!(to_bytes(&wrapped).unwrap()[0], 0x07);

    let reference = arca_crypto::hash::reference_of(&wrapped).unwrap();
    harness.node.add_transfer_transaction(request).unwrap();

    let response = harness.node.response(&reference).unwrap().unwrap();
    let gas_used = BigInt::from(response.gas().total());

    assert_eq!(harness.balance_of(&b), balance_b + 100);
    assert_eq!(harness.balance_of(&a), balance_a - 100 - gas_used);
    assert_eq!(harness.nonce_of(&a), nonce_a + 1);
}

// ---- scenario 3: the pyramid ----

#[test]
fn pyramid_pays_out_once_the_pot_covers_the_payout() {
    let mut harness = Harness::start();
    let investors: Vec<StorageReference> = (0..3)
        .map(|i| harness.new_account(ACCOUNT_FUNDS, &format!("inv-{i}")))
        .collect();

    let module = harness.install_module(&pyramid_module()).unwrap();
    let pyramid = harness
        .node
        .add_constructor_call_transaction(ConstructorCallRequest {
            caller: harness.genesis.gamete,
            nonce: harness.gamete_nonce,
            chain_id: CHAIN_ID.into(),
            gas_limit: 200_000,
            gas_price: 1,
            classpath: module,
            constructor: ConstructorSignature::new(ClassType::new("demo.Pyramid"), vec![]),
            actuals: vec![],
            signature: vec![],
        })
        .unwrap();
    harness.gamete_nonce += 1;

    let invest = |harness: &Harness, investor: StorageReference, nonce: u64| {
        harness
            .node
            .add_instance_method_call_transaction(InstanceMethodCallRequest {
                caller: investor,
                nonce,
                chain_id: CHAIN_ID.into(),
                gas_limit: 100_000,
                gas_price: 1,
                classpath: module,
                method: MethodSignature::new(
                    ClassType::new("demo.Pyramid"),
                    "invest",
                    vec![StorageType::BigInteger],
                    None,
                ),
                receiver: pyramid,
                actuals: vec![StorageValue::BigInteger(BigInt::from(INVESTMENT))],
                signature: vec![],
            })
            .unwrap();
    };
    let withdraw = |harness: &Harness, investor: StorageReference, nonce: u64| {
        harness
            .node
            .add_instance_method_call_transaction(InstanceMethodCallRequest {
                caller: investor,
                nonce,
                chain_id: CHAIN_ID.into(),
                gas_limit: 100_000,
                gas_price: 1,
                classpath: module,
                method: MethodSignature::new(
                    ClassType::new("demo.Pyramid"),
                    "withdraw",
                    vec![],
                    None,
                ),
                receiver: pyramid,
                actuals: vec![],
                signature: vec![],
            })
            .unwrap();
    };

    // Two investors: the pot stays below the payout threshold.
    invest(&harness, investors[0], 0);
    invest(&harness, investors[1], 0);
    withdraw(&harness, investors[0], 1);
    assert!(harness.balance_of(&investors[0]) <= BigInt::from(ACCOUNT_FUNDS));

    // A third investment pushes the pot over the threshold.
    invest(&harness, investors[2], 0);
    withdraw(&harness, investors[0], 2);
    let first = harness.balance_of(&investors[0]);
    assert!(first > BigInt::from(20_000u64));
    assert!(first > BigInt::from(ACCOUNT_FUNDS));
}

// ---- scenario 4: verification rejection ----

#[test]
fn snooping_module_fails_verification_with_the_named_cause() {
    let mut harness = Harness::start();
    let root_before = harness.node.merged_root().unwrap();

    let error = harness.install_module(&snooping_module()).unwrap_err();
    match error {
        NodeError::TransactionFailed {
            class_name_of_cause,
            ..
        } => {
            assert!(
                class_name_of_cause.starts_with("IllegalAccessToNonWhiteListedField"),
                "unexpected cause {class_name_of_cause}"
            );
        }
        other => panic!("expected a failed transaction, got {other:?}"),
    }

    // Failed (unlike rejected) transactions do commit: the penalty moved
    // the root.
    assert_ne!(harness.node.merged_root().unwrap(), root_before);
}

// ---- scenario 5: view side-effect detection ----

#[test]
fn view_method_with_side_effects_is_refused_and_commits_nothing() {
    let mut harness = Harness::start();
    let module = harness.install_module(&box_module()).unwrap();
    let boxed = harness
        .node
        .add_constructor_call_transaction(ConstructorCallRequest {
            caller: harness.genesis.gamete,
            nonce: harness.gamete_nonce,
            chain_id: CHAIN_ID.into(),
            gas_limit: 200_000,
            gas_price: 1,
            classpath: module,
            constructor: ConstructorSignature::new(ClassType::new("demo.Box"), vec![]),
            actuals: vec![],
            signature: vec![],
        })
        .unwrap();
    harness.gamete_nonce += 1;

    let error = harness
        .node
        .add_instance_method_call_transaction(InstanceMethodCallRequest {
            caller: harness.genesis.gamete,
            nonce: harness.gamete_nonce,
            chain_id: CHAIN_ID.into(),
            gas_limit: 100_000,
            gas_price: 1,
            classpath: module,
            method: MethodSignature::new(ClassType::new("demo.Box"), "poke", vec![], None),
            receiver: boxed,
            actuals: vec![],
            signature: vec![],
        })
        .unwrap_err();
    harness.gamete_nonce += 1;

    match error {
        NodeError::TransactionFailed {
            class_name_of_cause,
            ..
        } => assert_eq!(class_name_of_cause, lang::SIDE_EFFECTS_IN_VIEW_METHOD),
        other => panic!("expected a failed transaction, got {other:?}"),
    }

    // The write was reverted: the box still holds its initial value.
    let state = harness.node.state(&boxed).unwrap();
    let value = state
        .iter()
        .find_map(|u| match u {
            Update::Field { field, .. } if field.name == "value" => u.value(),
            _ => None,
        })
        .unwrap();
    assert_eq!(value, StorageValue::Int(0));
}

// ---- rejected requests leave no trace (P3) ----

#[test]
fn rejected_requests_do_not_move_the_root() {
    let mut harness = Harness::start();
    let a = harness.new_account(ACCOUNT_FUNDS, "a-key");
    let root_before = harness.node.merged_root().unwrap();

    let error = harness
        .node
        .add_transfer_transaction(TransferRequest {
            caller: a,
            nonce: 99, // wrong nonce
            chain_id: CHAIN_ID.into(),
            gas_price: 1,
            classpath: harness.genesis.base_code,
            receiver: harness.genesis.gamete,
            amount: TransferAmount::Int(1),
            signature: vec![],
        })
        .unwrap_err();
    assert!(matches!(error, NodeError::TransactionRejected { .. }));

    let error = harness
        .node
        .add_transfer_transaction(TransferRequest {
            caller: a,
            nonce: 0,
            chain_id: CHAIN_ID.into(),
            gas_price: 1,
            classpath: harness.genesis.base_code,
            receiver: harness.genesis.gamete,
            amount: TransferAmount::Int(-5),
            signature: vec![],
        })
        .unwrap_err();
    assert!(matches!(error, NodeError::TransactionRejected { .. }));

    assert_eq!(harness.node.merged_root().unwrap(), root_before);
}

// ---- scenario 6: deterministic roots ----

/// Replays the same script on a fresh node, recording the merged root
/// after every step.
fn scripted_run() -> Vec<[u8; MERGED_ROOT_LEN]> {
    let mut roots = Vec::new();
    let mut harness = Harness::start();
    roots.push(harness.node.merged_root().unwrap());

    let a = harness.new_account(ACCOUNT_FUNDS, "a-key");
    roots.push(harness.node.merged_root().unwrap());
    let b = harness.new_account(ACCOUNT_FUNDS, "b-key");
    roots.push(harness.node.merged_root().unwrap());

    harness
        .node
        .add_transfer_transaction(TransferRequest {
            caller: a,
            nonce: 0,
            chain_id: CHAIN_ID.into(),
            gas_price: 1,
            classpath: harness.genesis.base_code,
            receiver: b,
            amount: TransferAmount::Int(100),
            signature: vec![],
        })
        .unwrap();
    roots.push(harness.node.merged_root().unwrap());

    harness.install_module(&pyramid_module()).unwrap();
    roots.push(harness.node.merged_root().unwrap());

    // A failed module store is part of replayed history too.
    let _ = harness.install_module(&snooping_module());
    roots.push(harness.node.merged_root().unwrap());

    roots
}

#[test]
fn replaying_the_log_reproduces_every_merged_root() {
    let first = scripted_run();
    let second = scripted_run();
    assert_eq!(first.len(), second.len());
    for (i, (a, b)) in first.iter().zip(second.iter()).enumerate() {
        assert_eq!(a, b, "roots diverge at step {i}");
        assert_eq!(a.len(), MERGED_ROOT_LEN);
    }
}
