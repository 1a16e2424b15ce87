//! Transaction requests: the inputs of the engine.
//!
//! The marshalled bytes of a request are hashed into its transaction
//! reference, so every encoding here is part of node identity. Signed
//! requests are signed over their encoding without the signature field,
//! which is appended last.

use crate::error::MarshallingError;
use crate::marshalling::{Marshallable, MarshallingContext, UnmarshallingContext};
use crate::references::{StorageReference, TransactionReference};
use crate::signatures::{ConstructorSignature, MethodSignature};
use crate::values::StorageValue;
use num_bigint::BigInt;

mod selectors {
    pub const INITIAL_MODULE_STORE: u8 = 1;
    pub const GAMETE_CREATION: u8 = 2;
    pub const MODULE_STORE: u8 = 3;
    pub const CONSTRUCTOR_CALL: u8 = 4;
    pub const INSTANCE_METHOD_CALL: u8 = 5;
    pub const STATIC_METHOD_CALL: u8 = 6;
    pub const TRANSFER_INT: u8 = 7;
    pub const TRANSFER_LONG: u8 = 8;
    pub const TRANSFER_BIG_INTEGER: u8 = 9;
    pub const INITIALIZATION: u8 = 10;
}

/// The fixed gas limit of the compact transfer form.
pub const TRANSFER_GAS_LIMIT: u64 = 10_000;

/// Installs the base runtime module. Only accepted before initialization.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct InitialModuleStoreRequest {
    pub module: Vec<u8>,
}

/// Creates the distinguished funded account of the node.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct GameteCreationRequest {
    pub classpath: TransactionReference,
    pub initial_amount: BigInt,
    pub red_initial_amount: BigInt,
    /// Base64-encoded key material, stored verbatim on the gamete.
    pub public_key: String,
}

/// Marks the node as initialized; no initial request is accepted after it.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct InitializationRequest {
    pub classpath: TransactionReference,
    pub manifest: StorageReference,
}

/// Installs a contract module under a gas budget.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ModuleStoreRequest {
    pub caller: StorageReference,
    pub nonce: u64,
    pub chain_id: String,
    pub gas_limit: u64,
    pub gas_price: u64,
    pub classpath: TransactionReference,
    pub module: Vec<u8>,
    pub dependencies: Vec<TransactionReference>,
    pub signature: Vec<u8>,
}

/// Runs a constructor of a class of the classpath.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ConstructorCallRequest {
    pub caller: StorageReference,
    pub nonce: u64,
    pub chain_id: String,
    pub gas_limit: u64,
    pub gas_price: u64,
    pub classpath: TransactionReference,
    pub constructor: ConstructorSignature,
    pub actuals: Vec<StorageValue>,
    pub signature: Vec<u8>,
}

/// Runs an instance method on a storage object.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct InstanceMethodCallRequest {
    pub caller: StorageReference,
    pub nonce: u64,
    pub chain_id: String,
    pub gas_limit: u64,
    pub gas_price: u64,
    pub classpath: TransactionReference,
    pub method: MethodSignature,
    pub receiver: StorageReference,
    pub actuals: Vec<StorageValue>,
    pub signature: Vec<u8>,
}

/// Runs a static method of a class of the classpath.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StaticMethodCallRequest {
    pub caller: StorageReference,
    pub nonce: u64,
    pub chain_id: String,
    pub gas_limit: u64,
    pub gas_price: u64,
    pub classpath: TransactionReference,
    pub method: MethodSignature,
    pub actuals: Vec<StorageValue>,
    pub signature: Vec<u8>,
}

/// The amount moved by a compact transfer; its kind selects the wire
/// selector (7, 8 or 9) and the implicit `receive` overload.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum TransferAmount {
    Int(i32),
    Long(i64),
    BigInteger(BigInt),
}

impl TransferAmount {
    pub fn to_big_integer(&self) -> BigInt {
        match self {
            TransferAmount::Int(v) => BigInt::from(*v),
            TransferAmount::Long(v) => BigInt::from(*v),
            TransferAmount::BigInteger(v) => v.clone(),
        }
    }

    pub fn to_storage_value(&self) -> StorageValue {
        match self {
            TransferAmount::Int(v) => StorageValue::Int(*v),
            TransferAmount::Long(v) => StorageValue::Long(*v),
            TransferAmount::BigInteger(v) => StorageValue::BigInteger(v.clone()),
        }
    }
}

/// Compact form of an instance method call: the receiver method signature
/// is implicitly `receive(T)` and the gas limit is fixed at
/// [`TRANSFER_GAS_LIMIT`]; neither is encoded.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TransferRequest {
    pub caller: StorageReference,
    pub nonce: u64,
    pub chain_id: String,
    pub gas_price: u64,
    pub classpath: TransactionReference,
    pub receiver: StorageReference,
    pub amount: TransferAmount,
    pub signature: Vec<u8>,
}

impl TransferRequest {
    /// The method this request implicitly targets.
    pub fn implicit_method(&self) -> MethodSignature {
        use crate::values::StorageType;
        let ty = match self.amount {
            TransferAmount::Int(_) => StorageType::Int,
            TransferAmount::Long(_) => StorageType::Long,
            TransferAmount::BigInteger(_) => StorageType::BigInteger,
        };
        MethodSignature::receive(ty)
    }
}

/// The request sum.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum TransactionRequest {
    InitialModuleStore(InitialModuleStoreRequest),
    GameteCreation(GameteCreationRequest),
    Initialization(InitializationRequest),
    ModuleStore(ModuleStoreRequest),
    ConstructorCall(ConstructorCallRequest),
    InstanceMethodCall(InstanceMethodCallRequest),
    StaticMethodCall(StaticMethodCallRequest),
    Transfer(TransferRequest),
}

impl TransactionRequest {
    /// Initial requests are unsigned, carry no caller and are only
    /// accepted before the node is initialized.
    pub fn is_initial(&self) -> bool {
        matches!(
            self,
            TransactionRequest::InitialModuleStore(_)
                | TransactionRequest::GameteCreation(_)
                | TransactionRequest::Initialization(_)
        )
    }

    pub fn caller(&self) -> Option<&StorageReference> {
        match self {
            TransactionRequest::ModuleStore(r) => Some(&r.caller),
            TransactionRequest::ConstructorCall(r) => Some(&r.caller),
            TransactionRequest::InstanceMethodCall(r) => Some(&r.caller),
            TransactionRequest::StaticMethodCall(r) => Some(&r.caller),
            TransactionRequest::Transfer(r) => Some(&r.caller),
            _ => None,
        }
    }

    pub fn nonce(&self) -> Option<u64> {
        match self {
            TransactionRequest::ModuleStore(r) => Some(r.nonce),
            TransactionRequest::ConstructorCall(r) => Some(r.nonce),
            TransactionRequest::InstanceMethodCall(r) => Some(r.nonce),
            TransactionRequest::StaticMethodCall(r) => Some(r.nonce),
            TransactionRequest::Transfer(r) => Some(r.nonce),
            _ => None,
        }
    }

    pub fn chain_id(&self) -> Option<&str> {
        match self {
            TransactionRequest::ModuleStore(r) => Some(&r.chain_id),
            TransactionRequest::ConstructorCall(r) => Some(&r.chain_id),
            TransactionRequest::InstanceMethodCall(r) => Some(&r.chain_id),
            TransactionRequest::StaticMethodCall(r) => Some(&r.chain_id),
            TransactionRequest::Transfer(r) => Some(&r.chain_id),
            _ => None,
        }
    }

    pub fn gas_limit(&self) -> Option<u64> {
        match self {
            TransactionRequest::ModuleStore(r) => Some(r.gas_limit),
            TransactionRequest::ConstructorCall(r) => Some(r.gas_limit),
            TransactionRequest::InstanceMethodCall(r) => Some(r.gas_limit),
            TransactionRequest::StaticMethodCall(r) => Some(r.gas_limit),
            TransactionRequest::Transfer(_) => Some(TRANSFER_GAS_LIMIT),
            _ => None,
        }
    }

    pub fn gas_price(&self) -> Option<u64> {
        match self {
            TransactionRequest::ModuleStore(r) => Some(r.gas_price),
            TransactionRequest::ConstructorCall(r) => Some(r.gas_price),
            TransactionRequest::InstanceMethodCall(r) => Some(r.gas_price),
            TransactionRequest::StaticMethodCall(r) => Some(r.gas_price),
            TransactionRequest::Transfer(r) => Some(r.gas_price),
            _ => None,
        }
    }

    /// The classpath under which the request executes. Absent only for the
    /// initial module store, which installs the base module itself.
    pub fn classpath(&self) -> Option<&TransactionReference> {
        match self {
            TransactionRequest::InitialModuleStore(_) => None,
            TransactionRequest::GameteCreation(r) => Some(&r.classpath),
            TransactionRequest::Initialization(r) => Some(&r.classpath),
            TransactionRequest::ModuleStore(r) => Some(&r.classpath),
            TransactionRequest::ConstructorCall(r) => Some(&r.classpath),
            TransactionRequest::InstanceMethodCall(r) => Some(&r.classpath),
            TransactionRequest::StaticMethodCall(r) => Some(&r.classpath),
            TransactionRequest::Transfer(r) => Some(&r.classpath),
        }
    }

    pub fn signature(&self) -> Option<&[u8]> {
        match self {
            TransactionRequest::ModuleStore(r) => Some(&r.signature),
            TransactionRequest::ConstructorCall(r) => Some(&r.signature),
            TransactionRequest::InstanceMethodCall(r) => Some(&r.signature),
            TransactionRequest::StaticMethodCall(r) => Some(&r.signature),
            TransactionRequest::Transfer(r) => Some(&r.signature),
            _ => None,
        }
    }

    /// The bytes a signer signs: the full encoding with the signature
    /// field left out.
    pub fn signed_payload(&self) -> Result<Vec<u8>, MarshallingError> {
        let mut w = MarshallingContext::new();
        self.marshal_without_signature(&mut w)?;
        Ok(w.finish())
    }

    fn marshal_without_signature(
        &self,
        w: &mut MarshallingContext,
    ) -> Result<(), MarshallingError> {
        use selectors::*;
        match self {
            TransactionRequest::InitialModuleStore(r) => {
                w.write_u8(INITIAL_MODULE_STORE);
                w.write_byte_array(&r.module)?;
            }
            TransactionRequest::GameteCreation(r) => {
                w.write_u8(GAMETE_CREATION);
                r.classpath.marshal(w)?;
                w.write_big_integer(&r.initial_amount)?;
                w.write_big_integer(&r.red_initial_amount)?;
                w.write_str(&r.public_key)?;
            }
            TransactionRequest::Initialization(r) => {
                w.write_u8(INITIALIZATION);
                r.classpath.marshal(w)?;
                r.manifest.marshal_without_selector(w)?;
            }
            TransactionRequest::ModuleStore(r) => {
                w.write_u8(MODULE_STORE);
                Self::marshal_common(w, &r.caller, r.nonce, &r.chain_id, r.gas_limit, r.gas_price, &r.classpath)?;
                w.write_byte_array(&r.module)?;
                r.dependencies.marshal(w)?;
            }
            TransactionRequest::ConstructorCall(r) => {
                w.write_u8(CONSTRUCTOR_CALL);
                Self::marshal_common(w, &r.caller, r.nonce, &r.chain_id, r.gas_limit, r.gas_price, &r.classpath)?;
                r.constructor.marshal(w)?;
                r.actuals.marshal(w)?;
            }
            TransactionRequest::InstanceMethodCall(r) => {
                w.write_u8(INSTANCE_METHOD_CALL);
                Self::marshal_common(w, &r.caller, r.nonce, &r.chain_id, r.gas_limit, r.gas_price, &r.classpath)?;
                r.method.marshal(w)?;
                r.receiver.marshal_without_selector(w)?;
                r.actuals.marshal(w)?;
            }
            TransactionRequest::StaticMethodCall(r) => {
                w.write_u8(STATIC_METHOD_CALL);
                Self::marshal_common(w, &r.caller, r.nonce, &r.chain_id, r.gas_limit, r.gas_price, &r.classpath)?;
                r.method.marshal(w)?;
                r.actuals.marshal(w)?;
            }
            TransactionRequest::Transfer(r) => {
                // The selector fixes the amount kind; the receiver method
                // and the gas limit are elided.
                match &r.amount {
                    TransferAmount::Int(_) => w.write_u8(TRANSFER_INT),
                    TransferAmount::Long(_) => w.write_u8(TRANSFER_LONG),
                    TransferAmount::BigInteger(_) => w.write_u8(TRANSFER_BIG_INTEGER),
                }
                r.caller.marshal_without_selector(w)?;
                w.write_u64(r.nonce);
                w.write_str(&r.chain_id)?;
                w.write_u64(r.gas_price);
                r.classpath.marshal(w)?;
                r.receiver.marshal_without_selector(w)?;
                match &r.amount {
                    TransferAmount::Int(v) => w.write_i32(*v),
                    TransferAmount::Long(v) => w.write_i64(*v),
                    TransferAmount::BigInteger(v) => w.write_big_integer(v)?,
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn marshal_common(
        w: &mut MarshallingContext,
        caller: &StorageReference,
        nonce: u64,
        chain_id: &str,
        gas_limit: u64,
        gas_price: u64,
        classpath: &TransactionReference,
    ) -> Result<(), MarshallingError> {
        caller.marshal_without_selector(w)?;
        w.write_u64(nonce);
        w.write_str(chain_id)?;
        w.write_u64(gas_limit);
        w.write_u64(gas_price);
        classpath.marshal(w)
    }
}

impl Marshallable for TransactionRequest {
    fn marshal(&self, w: &mut MarshallingContext) -> Result<(), MarshallingError> {
        self.marshal_without_signature(w)?;
        if let Some(signature) = self.signature() {
            w.write_byte_array(signature)?;
        }
        Ok(())
    }

    fn unmarshal(r: &mut UnmarshallingContext<'_>) -> Result<Self, MarshallingError> {
        use selectors::*;
        let selector = r.read_u8()?;
        Ok(match selector {
            INITIAL_MODULE_STORE => {
                TransactionRequest::InitialModuleStore(InitialModuleStoreRequest {
                    module: r.read_byte_array()?,
                })
            }
            GAMETE_CREATION => TransactionRequest::GameteCreation(GameteCreationRequest {
                classpath: TransactionReference::unmarshal(r)?,
                initial_amount: r.read_big_integer()?,
                red_initial_amount: r.read_big_integer()?,
                public_key: r.read_str()?,
            }),
            INITIALIZATION => TransactionRequest::Initialization(InitializationRequest {
                classpath: TransactionReference::unmarshal(r)?,
                manifest: StorageReference::unmarshal_without_selector(r)?,
            }),
            MODULE_STORE => {
                let (caller, nonce, chain_id, gas_limit, gas_price, classpath) =
                    unmarshal_common(r)?;
                TransactionRequest::ModuleStore(ModuleStoreRequest {
                    caller,
                    nonce,
                    chain_id,
                    gas_limit,
                    gas_price,
                    classpath,
                    module: r.read_byte_array()?,
                    dependencies: Vec::<TransactionReference>::unmarshal(r)?,
                    signature: r.read_byte_array()?,
                })
            }
            CONSTRUCTOR_CALL => {
                let (caller, nonce, chain_id, gas_limit, gas_price, classpath) =
                    unmarshal_common(r)?;
                TransactionRequest::ConstructorCall(ConstructorCallRequest {
                    caller,
                    nonce,
                    chain_id,
                    gas_limit,
                    gas_price,
                    classpath,
                    constructor: ConstructorSignature::unmarshal(r)?,
                    actuals: Vec::<StorageValue>::unmarshal(r)?,
                    signature: r.read_byte_array()?,
                })
            }
            INSTANCE_METHOD_CALL => {
                let (caller, nonce, chain_id, gas_limit, gas_price, classpath) =
                    unmarshal_common(r)?;
                TransactionRequest::InstanceMethodCall(InstanceMethodCallRequest {
                    caller,
                    nonce,
                    chain_id,
                    gas_limit,
                    gas_price,
                    classpath,
                    method: MethodSignature::unmarshal(r)?,
                    receiver: StorageReference::unmarshal_without_selector(r)?,
                    actuals: Vec::<StorageValue>::unmarshal(r)?,
                    signature: r.read_byte_array()?,
                })
            }
            STATIC_METHOD_CALL => {
                let (caller, nonce, chain_id, gas_limit, gas_price, classpath) =
                    unmarshal_common(r)?;
                TransactionRequest::StaticMethodCall(StaticMethodCallRequest {
                    caller,
                    nonce,
                    chain_id,
                    gas_limit,
                    gas_price,
                    classpath,
                    method: MethodSignature::unmarshal(r)?,
                    actuals: Vec::<StorageValue>::unmarshal(r)?,
                    signature: r.read_byte_array()?,
                })
            }
            TRANSFER_INT | TRANSFER_LONG | TRANSFER_BIG_INTEGER => {
                let caller = StorageReference::unmarshal_without_selector(r)?;
                let nonce = r.read_u64()?;
                let chain_id = r.read_str()?;
                let gas_price = r.read_u64()?;
                let classpath = TransactionReference::unmarshal(r)?;
                let receiver = StorageReference::unmarshal_without_selector(r)?;
                let amount = match selector {
                    TRANSFER_INT => TransferAmount::Int(r.read_i32()?),
                    TRANSFER_LONG => TransferAmount::Long(r.read_i64()?),
                    _ => TransferAmount::BigInteger(r.read_big_integer()?),
                };
                TransactionRequest::Transfer(TransferRequest {
                    caller,
                    nonce,
                    chain_id,
                    gas_price,
                    classpath,
                    receiver,
                    amount,
                    signature: r.read_byte_array()?,
                })
            }
            selector => {
                return Err(MarshallingError::UnknownSelector {
                    what: "transaction request",
                    selector,
                })
            }
        })
    }
}

type CommonFields = (
    StorageReference,
    u64,
    String,
    u64,
    u64,
    TransactionReference,
);

fn unmarshal_common(r: &mut UnmarshallingContext<'_>) -> Result<CommonFields, MarshallingError> {
    Ok((
        StorageReference::unmarshal_without_selector(r)?,
        r.read_u64()?,
        r.read_str()?,
        r.read_u64()?,
        r.read_u64()?,
        TransactionReference::unmarshal(r)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshalling::{from_bytes, to_bytes};

    fn caller() -> StorageReference {
        StorageReference::new(TransactionReference([1u8; 32]), 0)
    }

    fn classpath() -> TransactionReference {
        TransactionReference([2u8; 32])
    }

    #[test]
    fn transfer_int_leads_with_selector_seven() {
        let req = TransactionRequest::Transfer(TransferRequest {
            caller: caller(),
            nonce: 0,
            chain_id: "test".into(),
            gas_price: 1,
            classpath: classpath(),
            receiver: StorageReference::new(TransactionReference([4u8; 32]), 0),
            amount: TransferAmount::Int(100),
            signature: vec![],
        });
        let bytes = to_bytes(&req).unwrap();
        assert_eq!(bytes[0], 0x07);
        assert_eq!(req.gas_limit(), Some(TRANSFER_GAS_LIMIT));
        assert_eq!(from_bytes::<TransactionRequest>(&bytes).unwrap(), req);
    }

    #[test]
    fn signature_is_appended_last() {
        let mut req = InstanceMethodCallRequest {
            caller: caller(),
            nonce: 7,
            chain_id: "test".into(),
            gas_limit: 20_000,
            gas_price: 1,
            classpath: classpath(),
            method: MethodSignature::receive(crate::values::StorageType::Int),
            receiver: StorageReference::new(TransactionReference([4u8; 32]), 0),
            actuals: vec![StorageValue::Int(100)],
            signature: vec![],
        };
        let unsigned = TransactionRequest::InstanceMethodCall(req.clone())
            .signed_payload()
            .unwrap();
        req.signature = vec![0xAB; 64];
        let signed = to_bytes(&TransactionRequest::InstanceMethodCall(req)).unwrap();
        assert!(signed.starts_with(&unsigned));
    }

    #[test]
    fn request_roundtrip() {
        let samples = vec![
            TransactionRequest::InitialModuleStore(InitialModuleStoreRequest {
                module: vec![1, 2, 3],
            }),
            TransactionRequest::GameteCreation(GameteCreationRequest {
                classpath: classpath(),
                initial_amount: BigInt::from(10u64).pow(15),
                red_initial_amount: BigInt::from(10u64).pow(15),
                public_key: "MAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA".into(),
            }),
            TransactionRequest::ModuleStore(ModuleStoreRequest {
                caller: caller(),
                nonce: 1,
                chain_id: "test".into(),
                gas_limit: 100_000,
                gas_price: 1,
                classpath: classpath(),
                module: vec![9; 40],
                dependencies: vec![classpath()],
                signature: vec![0xCD; 64],
            }),
            TransactionRequest::Initialization(InitializationRequest {
                classpath: classpath(),
                manifest: StorageReference::new(TransactionReference([6u8; 32]), 0),
            }),
        ];
        for req in samples {
            let bytes = to_bytes(&req).unwrap();
            assert_eq!(from_bytes::<TransactionRequest>(&bytes).unwrap(), req);
        }
    }
}
