//! Transaction responses: what the engine commits for each accepted request.

use crate::error::MarshallingError;
use crate::marshalling::{Marshallable, MarshallingContext, UnmarshallingContext};
use crate::references::{StorageReference, TransactionReference};
use crate::updates::Update;
use crate::values::StorageValue;

mod selectors {
    pub const GAMETE_CREATION: u8 = 0;
    pub const INITIAL_MODULE_STORE: u8 = 1;
    pub const MODULE_STORE_SUCCESSFUL: u8 = 2;
    pub const MODULE_STORE_FAILED: u8 = 3;
    pub const CONSTRUCTOR_CALL_EXCEPTION: u8 = 4;
    pub const CONSTRUCTOR_CALL_SUCCESSFUL: u8 = 5;
    pub const CONSTRUCTOR_CALL_FAILED: u8 = 6;
    pub const METHOD_CALL_EXCEPTION: u8 = 7;
    pub const METHOD_CALL_FAILED: u8 = 8;
    pub const METHOD_CALL_SUCCESSFUL: u8 = 9;
    pub const VOID_METHOD_CALL_SUCCESSFUL: u8 = 10;
    pub const INITIALIZATION: u8 = 11;
}

/// Gas actually consumed by an accepted transaction, by component.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct GasConsumption {
    pub cpu: u64,
    pub ram: u64,
    pub storage: u64,
}

impl GasConsumption {
    pub fn total(&self) -> u64 {
        self.cpu + self.ram + self.storage
    }
}

impl Marshallable for GasConsumption {
    fn marshal(&self, w: &mut MarshallingContext) -> Result<(), MarshallingError> {
        w.write_u64(self.cpu);
        w.write_u64(self.ram);
        w.write_u64(self.storage);
        Ok(())
    }

    fn unmarshal(r: &mut UnmarshallingContext<'_>) -> Result<Self, MarshallingError> {
        Ok(Self {
            cpu: r.read_u64()?,
            ram: r.read_u64()?,
            storage: r.read_u64()?,
        })
    }
}

/// The failure classification of a failed transaction.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FailureCause {
    pub class_name_of_cause: String,
    pub message: String,
    /// The program point where the failure arose, when known.
    pub where_: String,
}

impl Marshallable for FailureCause {
    fn marshal(&self, w: &mut MarshallingContext) -> Result<(), MarshallingError> {
        w.write_str(&self.class_name_of_cause)?;
        w.write_str(&self.message)?;
        w.write_str(&self.where_)
    }

    fn unmarshal(r: &mut UnmarshallingContext<'_>) -> Result<Self, MarshallingError> {
        Ok(Self {
            class_name_of_cause: r.read_str()?,
            message: r.read_str()?,
            where_: r.read_str()?,
        })
    }
}

/// A declared exception escaping a `throws_exceptions` executable: a
/// success outcome carrying the exception instead of a return value.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ExceptionPayload {
    pub class_name_of_cause: String,
    pub message: String,
    pub where_: String,
}

impl Marshallable for ExceptionPayload {
    fn marshal(&self, w: &mut MarshallingContext) -> Result<(), MarshallingError> {
        w.write_str(&self.class_name_of_cause)?;
        w.write_str(&self.message)?;
        w.write_str(&self.where_)
    }

    fn unmarshal(r: &mut UnmarshallingContext<'_>) -> Result<Self, MarshallingError> {
        Ok(Self {
            class_name_of_cause: r.read_str()?,
            message: r.read_str()?,
            where_: r.read_str()?,
        })
    }
}

/// Response of the creation of the gamete.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct GameteCreationResponse {
    pub updates: Vec<Update>,
    pub gamete: StorageReference,
}

/// Response of the installation of the base runtime module.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct InitialModuleStoreResponse {
    pub instrumented_module: Vec<u8>,
    pub verification_version: u32,
}

/// Response of a successful module installation. Carries the instrumented
/// bytes so that every node materializes byte-identical artifacts.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ModuleStoreSuccessfulResponse {
    pub instrumented_module: Vec<u8>,
    pub dependencies: Vec<TransactionReference>,
    pub verification_version: u32,
    pub updates: Vec<Update>,
    pub gas: GasConsumption,
}

/// Response of a failed module installation (verification or execution).
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ModuleStoreFailedResponse {
    pub cause: FailureCause,
    pub updates: Vec<Update>,
    pub gas: GasConsumption,
    pub gas_penalty: u64,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ConstructorCallSuccessfulResponse {
    pub updates: Vec<Update>,
    pub events: Vec<StorageReference>,
    pub gas: GasConsumption,
    pub new_object: StorageReference,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ConstructorCallExceptionResponse {
    pub updates: Vec<Update>,
    pub events: Vec<StorageReference>,
    pub gas: GasConsumption,
    pub exception: ExceptionPayload,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ConstructorCallFailedResponse {
    pub updates: Vec<Update>,
    pub gas: GasConsumption,
    pub gas_penalty: u64,
    pub cause: FailureCause,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MethodCallSuccessfulResponse {
    pub updates: Vec<Update>,
    pub events: Vec<StorageReference>,
    pub gas: GasConsumption,
    pub result: StorageValue,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct VoidMethodCallSuccessfulResponse {
    pub updates: Vec<Update>,
    pub events: Vec<StorageReference>,
    pub gas: GasConsumption,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MethodCallExceptionResponse {
    pub updates: Vec<Update>,
    pub events: Vec<StorageReference>,
    pub gas: GasConsumption,
    pub exception: ExceptionPayload,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MethodCallFailedResponse {
    pub updates: Vec<Update>,
    pub gas: GasConsumption,
    pub gas_penalty: u64,
    pub cause: FailureCause,
}

/// Response of the initialization marker.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct InitializationResponse;

/// The response sum.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum TransactionResponse {
    GameteCreation(GameteCreationResponse),
    InitialModuleStore(InitialModuleStoreResponse),
    ModuleStoreSuccessful(ModuleStoreSuccessfulResponse),
    ModuleStoreFailed(ModuleStoreFailedResponse),
    ConstructorCallException(ConstructorCallExceptionResponse),
    ConstructorCallSuccessful(ConstructorCallSuccessfulResponse),
    ConstructorCallFailed(ConstructorCallFailedResponse),
    MethodCallException(MethodCallExceptionResponse),
    MethodCallFailed(MethodCallFailedResponse),
    MethodCallSuccessful(MethodCallSuccessfulResponse),
    VoidMethodCallSuccessful(VoidMethodCallSuccessfulResponse),
    Initialization(InitializationResponse),
}

impl TransactionResponse {
    /// The updates this response commits.
    pub fn updates(&self) -> &[Update] {
        match self {
            TransactionResponse::GameteCreation(r) => &r.updates,
            TransactionResponse::InitialModuleStore(_)
            | TransactionResponse::Initialization(_) => &[],
            TransactionResponse::ModuleStoreSuccessful(r) => &r.updates,
            TransactionResponse::ModuleStoreFailed(r) => &r.updates,
            TransactionResponse::ConstructorCallException(r) => &r.updates,
            TransactionResponse::ConstructorCallSuccessful(r) => &r.updates,
            TransactionResponse::ConstructorCallFailed(r) => &r.updates,
            TransactionResponse::MethodCallException(r) => &r.updates,
            TransactionResponse::MethodCallFailed(r) => &r.updates,
            TransactionResponse::MethodCallSuccessful(r) => &r.updates,
            TransactionResponse::VoidMethodCallSuccessful(r) => &r.updates,
        }
    }

    pub fn events(&self) -> &[StorageReference] {
        match self {
            TransactionResponse::ConstructorCallException(r) => &r.events,
            TransactionResponse::ConstructorCallSuccessful(r) => &r.events,
            TransactionResponse::MethodCallException(r) => &r.events,
            TransactionResponse::MethodCallSuccessful(r) => &r.events,
            TransactionResponse::VoidMethodCallSuccessful(r) => &r.events,
            _ => &[],
        }
    }

    pub fn gas(&self) -> GasConsumption {
        match self {
            TransactionResponse::ModuleStoreSuccessful(r) => r.gas,
            TransactionResponse::ModuleStoreFailed(r) => r.gas,
            TransactionResponse::ConstructorCallException(r) => r.gas,
            TransactionResponse::ConstructorCallSuccessful(r) => r.gas,
            TransactionResponse::ConstructorCallFailed(r) => r.gas,
            TransactionResponse::MethodCallException(r) => r.gas,
            TransactionResponse::MethodCallFailed(r) => r.gas,
            TransactionResponse::MethodCallSuccessful(r) => r.gas,
            TransactionResponse::VoidMethodCallSuccessful(r) => r.gas,
            _ => GasConsumption::default(),
        }
    }

    pub fn gas_penalty(&self) -> u64 {
        match self {
            TransactionResponse::ModuleStoreFailed(r) => r.gas_penalty,
            TransactionResponse::ConstructorCallFailed(r) => r.gas_penalty,
            TransactionResponse::MethodCallFailed(r) => r.gas_penalty,
            _ => 0,
        }
    }

    /// The instrumented module bytes, for module-store responses that
    /// installed one.
    pub fn instrumented_module(&self) -> Option<&[u8]> {
        match self {
            TransactionResponse::InitialModuleStore(r) => Some(&r.instrumented_module),
            TransactionResponse::ModuleStoreSuccessful(r) => Some(&r.instrumented_module),
            _ => None,
        }
    }

    pub fn dependencies(&self) -> &[TransactionReference] {
        match self {
            TransactionResponse::ModuleStoreSuccessful(r) => &r.dependencies,
            _ => &[],
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            TransactionResponse::ModuleStoreFailed(_)
                | TransactionResponse::ConstructorCallFailed(_)
                | TransactionResponse::MethodCallFailed(_)
        )
    }

    pub fn failure_cause(&self) -> Option<&FailureCause> {
        match self {
            TransactionResponse::ModuleStoreFailed(r) => Some(&r.cause),
            TransactionResponse::ConstructorCallFailed(r) => Some(&r.cause),
            TransactionResponse::MethodCallFailed(r) => Some(&r.cause),
            _ => None,
        }
    }

    pub fn exception(&self) -> Option<&ExceptionPayload> {
        match self {
            TransactionResponse::ConstructorCallException(r) => Some(&r.exception),
            TransactionResponse::MethodCallException(r) => Some(&r.exception),
            _ => None,
        }
    }
}

impl Marshallable for TransactionResponse {
    fn marshal(&self, w: &mut MarshallingContext) -> Result<(), MarshallingError> {
        use selectors::*;
        match self {
            TransactionResponse::GameteCreation(r) => {
                w.write_u8(GAMETE_CREATION);
                r.updates.marshal(w)?;
                r.gamete.marshal_without_selector(w)?;
            }
            TransactionResponse::InitialModuleStore(r) => {
                w.write_u8(INITIAL_MODULE_STORE);
                w.write_byte_array(&r.instrumented_module)?;
                w.write_u32(r.verification_version);
            }
            TransactionResponse::ModuleStoreSuccessful(r) => {
                w.write_u8(MODULE_STORE_SUCCESSFUL);
                w.write_byte_array(&r.instrumented_module)?;
                r.dependencies.marshal(w)?;
                w.write_u32(r.verification_version);
                r.updates.marshal(w)?;
                r.gas.marshal(w)?;
            }
            TransactionResponse::ModuleStoreFailed(r) => {
                w.write_u8(MODULE_STORE_FAILED);
                r.cause.marshal(w)?;
                r.updates.marshal(w)?;
                r.gas.marshal(w)?;
                w.write_u64(r.gas_penalty);
            }
            TransactionResponse::ConstructorCallException(r) => {
                w.write_u8(CONSTRUCTOR_CALL_EXCEPTION);
                r.updates.marshal(w)?;
                marshal_events(&r.events, w)?;
                r.gas.marshal(w)?;
                r.exception.marshal(w)?;
            }
            TransactionResponse::ConstructorCallSuccessful(r) => {
                w.write_u8(CONSTRUCTOR_CALL_SUCCESSFUL);
                r.updates.marshal(w)?;
                marshal_events(&r.events, w)?;
                r.gas.marshal(w)?;
                r.new_object.marshal_without_selector(w)?;
            }
            TransactionResponse::ConstructorCallFailed(r) => {
                w.write_u8(CONSTRUCTOR_CALL_FAILED);
                r.updates.marshal(w)?;
                r.gas.marshal(w)?;
                w.write_u64(r.gas_penalty);
                r.cause.marshal(w)?;
            }
            TransactionResponse::MethodCallException(r) => {
                w.write_u8(METHOD_CALL_EXCEPTION);
                r.updates.marshal(w)?;
                marshal_events(&r.events, w)?;
                r.gas.marshal(w)?;
                r.exception.marshal(w)?;
            }
            TransactionResponse::MethodCallFailed(r) => {
                w.write_u8(METHOD_CALL_FAILED);
                r.updates.marshal(w)?;
                r.gas.marshal(w)?;
                w.write_u64(r.gas_penalty);
                r.cause.marshal(w)?;
            }
            TransactionResponse::MethodCallSuccessful(r) => {
                w.write_u8(METHOD_CALL_SUCCESSFUL);
                r.updates.marshal(w)?;
                marshal_events(&r.events, w)?;
                r.gas.marshal(w)?;
                r.result.marshal(w)?;
            }
            TransactionResponse::VoidMethodCallSuccessful(r) => {
                w.write_u8(VOID_METHOD_CALL_SUCCESSFUL);
                r.updates.marshal(w)?;
                marshal_events(&r.events, w)?;
                r.gas.marshal(w)?;
            }
            TransactionResponse::Initialization(_) => {
                w.write_u8(INITIALIZATION);
            }
        }
        Ok(())
    }

    fn unmarshal(r: &mut UnmarshallingContext<'_>) -> Result<Self, MarshallingError> {
        use selectors::*;
        let selector = r.read_u8()?;
        Ok(match selector {
            GAMETE_CREATION => TransactionResponse::GameteCreation(GameteCreationResponse {
                updates: Vec::<Update>::unmarshal(r)?,
                gamete: StorageReference::unmarshal_without_selector(r)?,
            }),
            INITIAL_MODULE_STORE => {
                TransactionResponse::InitialModuleStore(InitialModuleStoreResponse {
                    instrumented_module: r.read_byte_array()?,
                    verification_version: r.read_u32()?,
                })
            }
            MODULE_STORE_SUCCESSFUL => {
                TransactionResponse::ModuleStoreSuccessful(ModuleStoreSuccessfulResponse {
                    instrumented_module: r.read_byte_array()?,
                    dependencies: Vec::<TransactionReference>::unmarshal(r)?,
                    verification_version: r.read_u32()?,
                    updates: Vec::<Update>::unmarshal(r)?,
                    gas: GasConsumption::unmarshal(r)?,
                })
            }
            MODULE_STORE_FAILED => {
                TransactionResponse::ModuleStoreFailed(ModuleStoreFailedResponse {
                    cause: FailureCause::unmarshal(r)?,
                    updates: Vec::<Update>::unmarshal(r)?,
                    gas: GasConsumption::unmarshal(r)?,
                    gas_penalty: r.read_u64()?,
                })
            }
            CONSTRUCTOR_CALL_EXCEPTION => {
                TransactionResponse::ConstructorCallException(ConstructorCallExceptionResponse {
                    updates: Vec::<Update>::unmarshal(r)?,
                    events: unmarshal_events(r)?,
                    gas: GasConsumption::unmarshal(r)?,
                    exception: ExceptionPayload::unmarshal(r)?,
                })
            }
            CONSTRUCTOR_CALL_SUCCESSFUL => {
                TransactionResponse::ConstructorCallSuccessful(ConstructorCallSuccessfulResponse {
                    updates: Vec::<Update>::unmarshal(r)?,
                    events: unmarshal_events(r)?,
                    gas: GasConsumption::unmarshal(r)?,
                    new_object: StorageReference::unmarshal_without_selector(r)?,
                })
            }
            CONSTRUCTOR_CALL_FAILED => {
                TransactionResponse::ConstructorCallFailed(ConstructorCallFailedResponse {
                    updates: Vec::<Update>::unmarshal(r)?,
                    gas: GasConsumption::unmarshal(r)?,
                    gas_penalty: r.read_u64()?,
                    cause: FailureCause::unmarshal(r)?,
                })
            }
            METHOD_CALL_EXCEPTION => {
                TransactionResponse::MethodCallException(MethodCallExceptionResponse {
                    updates: Vec::<Update>::unmarshal(r)?,
                    events: unmarshal_events(r)?,
                    gas: GasConsumption::unmarshal(r)?,
                    exception: ExceptionPayload::unmarshal(r)?,
                })
            }
            METHOD_CALL_FAILED => TransactionResponse::MethodCallFailed(MethodCallFailedResponse {
                updates: Vec::<Update>::unmarshal(r)?,
                gas: GasConsumption::unmarshal(r)?,
                gas_penalty: r.read_u64()?,
                cause: FailureCause::unmarshal(r)?,
            }),
            METHOD_CALL_SUCCESSFUL => {
                TransactionResponse::MethodCallSuccessful(MethodCallSuccessfulResponse {
                    updates: Vec::<Update>::unmarshal(r)?,
                    events: unmarshal_events(r)?,
                    gas: GasConsumption::unmarshal(r)?,
                    result: StorageValue::unmarshal(r)?,
                })
            }
            VOID_METHOD_CALL_SUCCESSFUL => {
                TransactionResponse::VoidMethodCallSuccessful(VoidMethodCallSuccessfulResponse {
                    updates: Vec::<Update>::unmarshal(r)?,
                    events: unmarshal_events(r)?,
                    gas: GasConsumption::unmarshal(r)?,
                })
            }
            INITIALIZATION => TransactionResponse::Initialization(InitializationResponse),
            selector => {
                return Err(MarshallingError::UnknownSelector {
                    what: "transaction response",
                    selector,
                })
            }
        })
    }
}

fn marshal_events(
    events: &[StorageReference],
    w: &mut MarshallingContext,
) -> Result<(), MarshallingError> {
    w.write_length(events.len())?;
    for e in events {
        e.marshal_without_selector(w)?;
    }
    Ok(())
}

fn unmarshal_events(
    r: &mut UnmarshallingContext<'_>,
) -> Result<Vec<StorageReference>, MarshallingError> {
    let len = r.read_length()?;
    let mut out = Vec::with_capacity(len.min(1024));
    for _ in 0..len {
        out.push(StorageReference::unmarshal_without_selector(r)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshalling::{from_bytes, to_bytes};
    use num_bigint::BigInt;

    fn sr(b: u8, p: u64) -> StorageReference {
        StorageReference::new(TransactionReference([b; 32]), p)
    }

    #[test]
    fn pinned_selectors() {
        let gamete = TransactionResponse::GameteCreation(GameteCreationResponse {
            updates: vec![],
            gamete: sr(1, 0),
        });
        assert_eq!(to_bytes(&gamete).unwrap()[0], 0);

        let ctor_exc = TransactionResponse::ConstructorCallException(
            ConstructorCallExceptionResponse {
                updates: vec![],
                events: vec![],
                gas: GasConsumption::default(),
                exception: ExceptionPayload {
                    class_name_of_cause: "x".into(),
                    message: String::new(),
                    where_: String::new(),
                },
            },
        );
        assert_eq!(to_bytes(&ctor_exc).unwrap()[0], 4);

        let failed = TransactionResponse::MethodCallFailed(MethodCallFailedResponse {
            updates: vec![],
            gas: GasConsumption::default(),
            gas_penalty: 0,
            cause: FailureCause {
                class_name_of_cause: "x".into(),
                message: String::new(),
                where_: String::new(),
            },
        });
        assert_eq!(to_bytes(&failed).unwrap()[0], 8);

        let ok = TransactionResponse::MethodCallSuccessful(MethodCallSuccessfulResponse {
            updates: vec![],
            events: vec![],
            gas: GasConsumption::default(),
            result: StorageValue::Null,
        });
        assert_eq!(to_bytes(&ok).unwrap()[0], 9);
    }

    #[test]
    fn response_roundtrip() {
        let response = TransactionResponse::MethodCallSuccessful(MethodCallSuccessfulResponse {
            updates: vec![Update::Balance {
                object: sr(2, 0),
                value: BigInt::from(55),
            }],
            events: vec![sr(3, 1)],
            gas: GasConsumption {
                cpu: 10,
                ram: 20,
                storage: 30,
            },
            result: StorageValue::Int(7),
        });
        let bytes = to_bytes(&response).unwrap();
        assert_eq!(from_bytes::<TransactionResponse>(&bytes).unwrap(), response);
    }
}
