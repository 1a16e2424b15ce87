//! The base runtime module.
//!
//! Every network installs this module first, through the initial module
//! store; its classes anchor contract-ness, account-ness, events and the
//! exception hierarchy. It is assembled programmatically so that the
//! engine and the module can never drift apart.

use arca_types::marshalling::to_bytes;
use arca_types::{lang, ClassType, FieldSignature, StorageType, StorageValue};
use num_bigint::BigInt;
use arca_vm::{
    Annotations, ClassDef, ClassKind, FieldDef, Instruction, MethodDef, MethodFlags, Module,
};

fn class(name: &str, superclass: Option<&str>) -> ClassDef {
    ClassDef {
        name: ClassType::new(name),
        superclass: superclass.map(ClassType::new),
        kind: ClassKind::Class,
        fields: vec![],
        methods: vec![],
    }
}

fn field(name: &str, ty: StorageType) -> FieldDef {
    FieldDef {
        name: name.into(),
        ty,
        flags: Default::default(),
    }
}

fn getter(class_name: &str, field_name: &str, ty: StorageType) -> MethodDef {
    MethodDef {
        name: field_name.into(),
        formals: vec![],
        returns: Some(ty.clone()),
        flags: MethodFlags::PUBLIC,
        annotations: Annotations {
            view: true,
            ..Default::default()
        },
        max_locals: 1,
        body: vec![
            Instruction::Load(0),
            Instruction::GetField(FieldSignature::new(ClassType::new(class_name), field_name, ty)),
            Instruction::ReturnValue,
        ],
    }
}

/// An empty-bodied payable receiver: the transfer itself happens in the
/// instrumented prologue.
fn receive(name: &str, amount: StorageType, red: bool) -> MethodDef {
    MethodDef {
        name: name.into(),
        formals: vec![amount],
        returns: None,
        flags: MethodFlags::PUBLIC,
        annotations: Annotations {
            from_contract: true,
            payable: !red,
            red_payable: red,
            ..Default::default()
        },
        max_locals: 2,
        body: vec![Instruction::Return],
    }
}

/// Builds the base runtime module.
pub fn base_module() -> Module {
    let storage = class(lang::STORAGE, None);

    let mut contract = class(lang::CONTRACT, Some(lang::STORAGE));
    contract.fields = vec![
        field("balance", StorageType::BigInteger),
        field("redBalance", StorageType::BigInteger),
    ];
    contract.methods = vec![
        receive(lang::RECEIVE, StorageType::Int, false),
        receive(lang::RECEIVE, StorageType::Long, false),
        receive(lang::RECEIVE, StorageType::BigInteger, false),
        receive(lang::RECEIVE_RED, StorageType::BigInteger, true),
        getter(lang::CONTRACT, "balance", StorageType::BigInteger),
    ];

    let mut account = class(lang::EXTERNALLY_OWNED_ACCOUNT, Some(lang::CONTRACT));
    account.fields = vec![
        field("nonce", StorageType::BigInteger),
        field("publicKey", StorageType::String),
    ];
    account.methods = vec![
        getter(lang::EXTERNALLY_OWNED_ACCOUNT, "nonce", StorageType::BigInteger),
        getter(lang::EXTERNALLY_OWNED_ACCOUNT, "publicKey", StorageType::String),
        // Payable creation of a funded account: the gamete uses this to
        // hand out accounts.
        MethodDef {
            name: lang::INIT.into(),
            formals: vec![StorageType::BigInteger, StorageType::String],
            returns: None,
            flags: MethodFlags::PUBLIC,
            annotations: Annotations {
                from_contract: true,
                payable: true,
                ..Default::default()
            },
            max_locals: 3,
            body: vec![
                Instruction::Load(0),
                Instruction::Load(2),
                Instruction::PutField(FieldSignature::eoa_public_key()),
                Instruction::Load(0),
                Instruction::Const(StorageValue::BigInteger(BigInt::from(0))),
                Instruction::PutField(FieldSignature::eoa_nonce()),
                Instruction::Return,
            ],
        },
    ];

    let gamete = class(lang::GAMETE, Some(lang::EXTERNALLY_OWNED_ACCOUNT));

    // The manifest: the storage object initialization points at; it pins
    // the chain identifier into state.
    let mut manifest = class(lang::MANIFEST, Some(lang::STORAGE));
    manifest.fields = vec![field("chainId", StorageType::String)];
    manifest.methods = vec![
        getter(lang::MANIFEST, "chainId", StorageType::String),
        MethodDef {
            name: lang::INIT.into(),
            formals: vec![StorageType::String],
            returns: None,
            flags: MethodFlags::PUBLIC,
            annotations: Annotations::default(),
            max_locals: 2,
            body: vec![
                Instruction::Load(0),
                Instruction::Load(1),
                Instruction::PutField(FieldSignature::new(
                    ClassType::new(lang::MANIFEST),
                    "chainId",
                    StorageType::String,
                )),
                Instruction::Return,
            ],
        },
    ];

    let mut exception = class(lang::EXCEPTION, None);
    exception.fields = vec![field("message", StorageType::String)];
    let runtime_exception = class(lang::RUNTIME_EXCEPTION, Some(lang::EXCEPTION));

    let event = class(lang::EVENT, Some(lang::STORAGE));

    Module {
        classes: vec![
            storage,
            contract,
            account,
            gamete,
            manifest,
            exception,
            runtime_exception,
            event,
        ],
    }
}

/// The marshalled base module, as submitted by the initial module store.
pub fn base_module_bytes() -> Vec<u8> {
    to_bytes(&base_module()).expect("the base module always marshals")
}

#[cfg(test)]
mod tests {
    use super::*;
    use arca_vm::verifier::{verify, EmptyResolver};
    use arca_vm::WhiteList;

    #[test]
    fn base_module_passes_its_own_verifier() {
        let module = base_module();
        let verified = verify(&module, &EmptyResolver, &WhiteList::default(), false)
            .expect("the base module must verify");
        let contract = verified.infos[&ClassType::new(lang::CONTRACT)].clone();
        assert!(contract.is_storage && contract.is_contract);
        let account = verified.infos[&ClassType::new(lang::EXTERNALLY_OWNED_ACCOUNT)].clone();
        assert!(account.is_account);
        let rte = verified.infos[&ClassType::new(lang::RUNTIME_EXCEPTION)].clone();
        assert!(!rte.is_checked_exception);
        let exc = verified.infos[&ClassType::new(lang::EXCEPTION)].clone();
        assert!(exc.is_checked_exception);
    }
}
