//! Builders of constructor and method calls, including the compact
//! transfer form.

use super::common::{
    admit, failure_outcome, finish_success, Admitted, BuildFailure, BuilderEnv, SignedLead,
    violates_view_contract,
};
use crate::context::RuntimeValue;
use crate::deserializer::deserialize;
use crate::errors::ExecutionError;
use crate::extractor::extract_updates;
use crate::interpreter::Interpreter;
use crate::state_view::StateView;
use arca_types::requests::{
    ConstructorCallRequest, InstanceMethodCallRequest, StaticMethodCallRequest, TransferRequest,
    TRANSFER_GAS_LIMIT,
};
use arca_types::responses::{
    ConstructorCallExceptionResponse, ConstructorCallFailedResponse,
    ConstructorCallSuccessfulResponse, ExceptionPayload, GasConsumption,
    MethodCallExceptionResponse, MethodCallFailedResponse, MethodCallSuccessfulResponse,
    VoidMethodCallSuccessfulResponse,
};
use arca_types::{
    lang, ClassType, StorageReference, StorageType, StorageValue, TransactionReference,
    TransactionRequest, TransactionResponse, Update,
};
use arca_vm::MethodDef;
use num_bigint::Sign;

/// Deserializes request actuals into runtime values, faulting referenced
/// objects into the arena.
fn runtime_actuals<S: StateView>(
    admitted: &mut Admitted<'_, S>,
    actuals: &[StorageValue],
) -> Result<(Vec<RuntimeValue>, Vec<usize>), ExecutionError> {
    let mut values = Vec::with_capacity(actuals.len());
    let mut objects = Vec::new();
    for actual in actuals {
        let value = match actual {
            StorageValue::Reference(r) => {
                let index = deserialize(&mut admitted.ctx, r)?;
                objects.push(index);
                RuntimeValue::Object(index)
            }
            StorageValue::Null => RuntimeValue::Null,
            StorageValue::Boolean(v) => RuntimeValue::Bool(*v),
            StorageValue::Byte(v) => RuntimeValue::Byte(*v),
            StorageValue::Char(v) => RuntimeValue::Char(*v),
            StorageValue::Short(v) => RuntimeValue::Short(*v),
            StorageValue::Int(v) => RuntimeValue::Int(*v),
            StorageValue::Long(v) => RuntimeValue::Long(*v),
            StorageValue::Float(v) => RuntimeValue::Float(*v),
            StorageValue::Double(v) => RuntimeValue::Double(*v),
            StorageValue::BigInteger(v) => RuntimeValue::BigInt(v.clone()),
            StorageValue::String(v) => RuntimeValue::Str(v.clone()),
            StorageValue::Enum { class, name } => RuntimeValue::Enum {
                class: class.clone(),
                name: name.clone(),
            },
        };
        values.push(value);
    }
    Ok((values, objects))
}

fn signed_lead(request: &ConstructorCallRequest) -> SignedLead<'_> {
    SignedLead {
        caller: &request.caller,
        nonce: request.nonce,
        chain_id: &request.chain_id,
        gas_limit: request.gas_limit,
        gas_price: request.gas_price,
        classpath: &request.classpath,
        signature: &request.signature,
    }
}

pub fn constructor_call<S: StateView>(
    request: &ConstructorCallRequest,
    reference: TransactionReference,
    env: &BuilderEnv<'_, S>,
) -> Result<TransactionResponse, BuildFailure> {
    let payload = TransactionRequest::ConstructorCall(request.clone())
        .signed_payload()
        .map_err(|e| BuildFailure::Rejected(e.to_string()))?;
    let mut admitted = admit(env, signed_lead(request), payload, reference)?;
    let where_ = request.constructor.to_string();

    // Resolve before running: whether a checked exception is a declared
    // outcome depends on the resolved target.
    let prepared = prepare_constructor(&mut admitted, request);
    let (class_name, target, args, arg_objects) = match prepared {
        Ok(p) => p,
        Err(e) => return fail_constructor(&admitted, e, &where_),
    };
    let declares = target.annotations.throws_exceptions;

    let allocated = match admitted.ctx.allocate(&class_name) {
        Ok(index) => index,
        Err(e) => return fail_constructor(&admitted, e, &where_),
    };
    let caller = admitted.caller;
    let invoked = Interpreter::new(&mut admitted.ctx).invoke(
        &class_name,
        &target,
        Some(allocated),
        args,
        Some(caller),
        false,
        0,
    );

    match invoked {
        Ok(_) => {
            let mut roots = arg_objects;
            roots.push(allocated);
            let new_object = admitted.ctx.object(allocated).reference;
            let events = event_references(&admitted);
            let shaped = finish_success(&mut admitted, &roots, &|updates, gas| {
                TransactionResponse::ConstructorCallSuccessful(ConstructorCallSuccessfulResponse {
                    updates,
                    events: events.clone(),
                    gas,
                    new_object,
                })
            });
            match shaped {
                Ok(response) => Ok(response),
                Err(e) => fail_constructor(&admitted, e, &where_),
            }
        }
        Err(error) => match declared_exception(&error, declares, &where_) {
            Some(exception) => {
                let events = event_references(&admitted);
                let shaped = finish_success(&mut admitted, &[], &|updates, gas| {
                    TransactionResponse::ConstructorCallException(
                        ConstructorCallExceptionResponse {
                            updates,
                            events: events.clone(),
                            gas,
                            exception: exception.clone(),
                        },
                    )
                });
                match shaped {
                    Ok(response) => Ok(response),
                    Err(e) => fail_constructor(&admitted, e, &where_),
                }
            }
            None => fail_constructor(&admitted, error, &where_),
        },
    }
}

type PreparedConstructor = (ClassType, MethodDef, Vec<RuntimeValue>, Vec<usize>);

fn prepare_constructor<S: StateView>(
    admitted: &mut Admitted<'_, S>,
    request: &ConstructorCallRequest,
) -> Result<PreparedConstructor, ExecutionError> {
    let (args, arg_objects) = runtime_actuals(admitted, &request.actuals)?;
    let (resolved, target) = admitted
        .ctx
        .loader
        .resolve_method(
            &request.constructor.defining_class,
            lang::INIT,
            &request.constructor.formals,
        )
        .ok_or_else(|| {
            ExecutionError::engine_exception(
                "NoSuchConstructorException",
                request.constructor.to_string(),
            )
        })?;
    Ok((resolved.def.name.clone(), target, args, arg_objects))
}

fn fail_constructor<S: StateView>(
    admitted: &Admitted<'_, S>,
    error: ExecutionError,
    where_: &str,
) -> Result<TransactionResponse, BuildFailure> {
    match error {
        ExecutionError::State(e) => Err(BuildFailure::State(e)),
        error => {
            let (updates, gas, penalty, cause) = failure_outcome(admitted, &error, where_);
            Ok(TransactionResponse::ConstructorCallFailed(
                ConstructorCallFailedResponse {
                    updates,
                    gas,
                    gas_penalty: penalty,
                    cause,
                },
            ))
        }
    }
}

pub fn instance_method_call<S: StateView>(
    request: &InstanceMethodCallRequest,
    reference: TransactionReference,
    env: &BuilderEnv<'_, S>,
) -> Result<TransactionResponse, BuildFailure> {
    let payload = TransactionRequest::InstanceMethodCall(request.clone())
        .signed_payload()
        .map_err(|e| BuildFailure::Rejected(e.to_string()))?;
    let admitted = admit(
        env,
        SignedLead {
            caller: &request.caller,
            nonce: request.nonce,
            chain_id: &request.chain_id,
            gas_limit: request.gas_limit,
            gas_price: request.gas_price,
            classpath: &request.classpath,
            signature: &request.signature,
        },
        payload,
        reference,
    )?;

    method_call_body(
        admitted,
        MethodTarget::Instance(request.receiver),
        &request.method.name,
        &request.method.formals,
        request.method.returns.is_some(),
        &request.actuals,
        &request.method.to_string(),
    )
}

pub fn static_method_call<S: StateView>(
    request: &StaticMethodCallRequest,
    reference: TransactionReference,
    env: &BuilderEnv<'_, S>,
) -> Result<TransactionResponse, BuildFailure> {
    let payload = TransactionRequest::StaticMethodCall(request.clone())
        .signed_payload()
        .map_err(|e| BuildFailure::Rejected(e.to_string()))?;
    let admitted = admit(
        env,
        SignedLead {
            caller: &request.caller,
            nonce: request.nonce,
            chain_id: &request.chain_id,
            gas_limit: request.gas_limit,
            gas_price: request.gas_price,
            classpath: &request.classpath,
            signature: &request.signature,
        },
        payload,
        reference,
    )?;

    method_call_body(
        admitted,
        MethodTarget::Static(request.method.defining_class.clone()),
        &request.method.name,
        &request.method.formals,
        request.method.returns.is_some(),
        &request.actuals,
        &request.method.to_string(),
    )
}

/// The compact transfer: an instance call of the implicit `receive`
/// overload with the fixed gas limit.
pub fn transfer<S: StateView>(
    request: &TransferRequest,
    reference: TransactionReference,
    env: &BuilderEnv<'_, S>,
) -> Result<TransactionResponse, BuildFailure> {
    if request.amount.to_big_integer().sign() == Sign::Minus {
        return Err(BuildFailure::Rejected("negative transfer amount".into()));
    }
    let payload = TransactionRequest::Transfer(request.clone())
        .signed_payload()
        .map_err(|e| BuildFailure::Rejected(e.to_string()))?;
    let method = request.implicit_method();
    let admitted = admit(
        env,
        SignedLead {
            caller: &request.caller,
            nonce: request.nonce,
            chain_id: &request.chain_id,
            gas_limit: TRANSFER_GAS_LIMIT,
            gas_price: request.gas_price,
            classpath: &request.classpath,
            signature: &request.signature,
        },
        payload,
        reference,
    )?;

    method_call_body(
        admitted,
        MethodTarget::Instance(request.receiver),
        &method.name,
        &method.formals,
        false,
        &[request.amount.to_storage_value()],
        &method.to_string(),
    )
}

enum MethodTarget {
    Instance(StorageReference),
    Static(ClassType),
}

fn method_call_body<S: StateView>(
    mut admitted: Admitted<'_, S>,
    target: MethodTarget,
    name: &str,
    formals: &[StorageType],
    declared_non_void: bool,
    actuals: &[StorageValue],
    where_: &str,
) -> Result<TransactionResponse, BuildFailure> {
    let prepared = prepare_method(&mut admitted, &target, name, formals, actuals);
    let (class_name, method, this, args, mut roots) = match prepared {
        Ok(p) => p,
        Err(e) => return fail_method(&admitted, e, where_),
    };
    let declares = method.annotations.throws_exceptions;
    let caller = admitted.caller;

    let invoked = Interpreter::new(&mut admitted.ctx).invoke(
        &class_name,
        &method,
        this,
        args,
        Some(caller),
        false,
        0,
    );

    match invoked {
        Ok(result) => {
            if method.annotations.view {
                let caller_reference = admitted.ctx.object(admitted.caller).reference;
                let mut probe_roots = vec![admitted.caller];
                probe_roots.extend_from_slice(&roots);
                let probe = match extract_updates(&admitted.ctx, &probe_roots) {
                    Ok(probe) => probe,
                    Err(e) => return fail_method(&admitted, e, where_),
                };
                if violates_view_contract(&probe, &caller_reference) {
                    let error = ExecutionError::engine_exception(
                        lang::SIDE_EFFECTS_IN_VIEW_METHOD,
                        format!("{where_} is annotated as view"),
                    );
                    return fail_method(&admitted, error, where_);
                }
            }

            if let Some(RuntimeValue::Object(index)) = &result {
                roots.push(*index);
            }
            let events = event_references(&admitted);
            let result_value = result
                .as_ref()
                .map(|v| admitted.ctx.to_storage_value(v))
                .unwrap_or(StorageValue::Null);
            let shaped = finish_success(&mut admitted, &roots, &|updates, gas| {
                shape_method_success(
                    declared_non_void,
                    updates,
                    events.clone(),
                    gas,
                    result_value.clone(),
                )
            });
            match shaped {
                Ok(response) => Ok(response),
                Err(e) => fail_method(&admitted, e, where_),
            }
        }
        Err(error) => match declared_exception(&error, declares, where_) {
            Some(exception) => {
                let events = event_references(&admitted);
                let shaped = finish_success(&mut admitted, &[], &|updates, gas| {
                    TransactionResponse::MethodCallException(MethodCallExceptionResponse {
                        updates,
                        events: events.clone(),
                        gas,
                        exception: exception.clone(),
                    })
                });
                match shaped {
                    Ok(response) => Ok(response),
                    Err(e) => fail_method(&admitted, e, where_),
                }
            }
            None => fail_method(&admitted, error, where_),
        },
    }
}

type PreparedMethod = (
    ClassType,
    MethodDef,
    Option<usize>,
    Vec<RuntimeValue>,
    Vec<usize>,
);

fn prepare_method<S: StateView>(
    admitted: &mut Admitted<'_, S>,
    target: &MethodTarget,
    name: &str,
    formals: &[StorageType],
    actuals: &[StorageValue],
) -> Result<PreparedMethod, ExecutionError> {
    let (args, mut roots) = runtime_actuals(admitted, actuals)?;
    match target {
        MethodTarget::Instance(receiver) => {
            let receiver_index = deserialize(&mut admitted.ctx, receiver)?;
            roots.push(receiver_index);
            let runtime_class = admitted.ctx.object(receiver_index).class.clone();
            let (resolved, method) = admitted
                .ctx
                .loader
                .resolve_method(&runtime_class, name, formals)
                .ok_or_else(|| {
                    ExecutionError::engine_exception(
                        "NoSuchMethodException",
                        format!("{runtime_class}.{name}"),
                    )
                })?;
            if method.is_static() {
                return Err(ExecutionError::engine_exception(
                    "NoSuchMethodException",
                    format!("{runtime_class}.{name} is static"),
                ));
            }
            Ok((
                resolved.def.name.clone(),
                method,
                Some(receiver_index),
                args,
                roots,
            ))
        }
        MethodTarget::Static(class) => {
            let (resolved, method) = admitted
                .ctx
                .loader
                .resolve_method(class, name, formals)
                .ok_or_else(|| {
                    ExecutionError::engine_exception(
                        "NoSuchMethodException",
                        format!("{class}.{name}"),
                    )
                })?;
            if !method.is_static() {
                return Err(ExecutionError::engine_exception(
                    "NoSuchMethodException",
                    format!("{class}.{name} is not static"),
                ));
            }
            Ok((resolved.def.name.clone(), method, None, args, roots))
        }
    }
}

fn shape_method_success(
    non_void: bool,
    updates: Vec<Update>,
    events: Vec<StorageReference>,
    gas: GasConsumption,
    result: StorageValue,
) -> TransactionResponse {
    if non_void {
        TransactionResponse::MethodCallSuccessful(MethodCallSuccessfulResponse {
            updates,
            events,
            gas,
            result,
        })
    } else {
        TransactionResponse::VoidMethodCallSuccessful(VoidMethodCallSuccessfulResponse {
            updates,
            events,
            gas,
        })
    }
}

fn fail_method<S: StateView>(
    admitted: &Admitted<'_, S>,
    error: ExecutionError,
    where_: &str,
) -> Result<TransactionResponse, BuildFailure> {
    match error {
        ExecutionError::State(e) => Err(BuildFailure::State(e)),
        error => {
            let (updates, gas, penalty, cause) = failure_outcome(admitted, &error, where_);
            Ok(TransactionResponse::MethodCallFailed(
                MethodCallFailedResponse {
                    updates,
                    gas,
                    gas_penalty: penalty,
                    cause,
                },
            ))
        }
    }
}

/// A thrown checked exception becomes a declared outcome only when the
/// resolved executable is marked `throws_exceptions`. Out-of-gas is never
/// one.
fn declared_exception(
    error: &ExecutionError,
    declares: bool,
    where_: &str,
) -> Option<ExceptionPayload> {
    if !declares {
        return None;
    }
    match error {
        ExecutionError::Contract {
            class_name,
            message,
            checked: true,
        } => Some(ExceptionPayload {
            class_name_of_cause: class_name.name().into(),
            message: message.clone(),
            where_: where_.into(),
        }),
        _ => None,
    }
}

fn event_references<S: StateView>(admitted: &Admitted<'_, S>) -> Vec<StorageReference> {
    admitted
        .ctx
        .events
        .iter()
        .map(|index| admitted.ctx.object(*index).reference)
        .collect()
}
