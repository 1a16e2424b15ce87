//! Rehydration of storage objects from their committed update history.
//!
//! The eager phase scans an object's history newest-to-oldest, keeping the
//! first value seen per eager field, until the class tag is found. Lazy
//! fields stay unloaded and fault in on first access.

use crate::context::{default_of, ExecutionContext, FieldCell, RuntimeValue};
use crate::errors::ExecutionError;
use crate::state_view::StateView;
use arca_types::{ClassType, FieldSignature, StorageReference, StorageValue, TransactionReference, Update};
use std::collections::BTreeMap;

/// The newest committed value of one field of one object, if any.
pub fn latest_update_for<S: StateView>(
    store: &S,
    object: &StorageReference,
    field: &FieldSignature,
) -> Result<Option<StorageValue>, ExecutionError> {
    for transaction in store.history(object)? {
        let Some(response) = store.response(&transaction)? else {
            continue;
        };
        for update in response.updates() {
            if update.object() == object && update.field().as_ref() == Some(field) {
                return Ok(update.value());
            }
        }
    }
    Ok(None)
}

/// The class tag and the newest value of every eager field, gathered in a
/// single history scan that stops at the class tag.
pub fn eager_state_of<S: StateView>(
    store: &S,
    object: &StorageReference,
) -> Result<(ClassType, TransactionReference, BTreeMap<FieldSignature, StorageValue>), ExecutionError>
{
    let mut fields: BTreeMap<FieldSignature, StorageValue> = BTreeMap::new();
    for transaction in store.history(object)? {
        let Some(response) = store.response(&transaction)? else {
            continue;
        };
        let mut tagged: Option<(ClassType, TransactionReference)> = None;
        for update in response.updates() {
            if update.object() != object {
                continue;
            }
            match update {
                Update::ClassTag { class, module, .. } => {
                    tagged = Some((class.clone(), *module));
                }
                other if other.is_eager() => {
                    if let (Some(field), Some(value)) = (other.field(), other.value()) {
                        fields.entry(field).or_insert(value);
                    }
                }
                _ => {}
            }
        }
        // The class tag lives in the creating transaction, the oldest
        // entry of the history: everything eager has been seen by now.
        if let Some((class, module)) = tagged {
            return Ok((class, module, fields));
        }
    }
    Err(ExecutionError::Illegal(format!(
        "no class tag in the history of {object}"
    )))
}

/// The runtime form of an eager wire value. References never reach here:
/// reference-typed fields are lazy.
fn runtime_of(value: &StorageValue) -> Result<RuntimeValue, ExecutionError> {
    Ok(match value {
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
        StorageValue::Reference(r) => {
            return Err(ExecutionError::Illegal(format!(
                "reference {r} in an eager slot"
            )))
        }
    })
}

/// Deserializes `reference` into the context's arena, returning its index.
/// Equal references resolve to the same index within one transaction.
pub fn deserialize<S: StateView>(
    ctx: &mut ExecutionContext<'_, S>,
    reference: &StorageReference,
) -> Result<usize, ExecutionError> {
    if let Some(index) = ctx.index_of(reference) {
        return Ok(index);
    }

    let (class, module, eager) = eager_state_of(ctx.store, reference)?;
    let resolved = ctx.loader.resolve(&class).ok_or_else(|| {
        ExecutionError::Illegal(format!("class {class} of {reference} is not in the classpath"))
    })?;

    // Rehydration costs RAM like an allocation of the same shape.
    let layout = resolved.layout.clone();
    ctx.gas
        .charge_ram(ctx.costs.ram_allocation_cost(layout.len()))?;

    let mut fields = BTreeMap::new();
    for signature in &layout {
        let cell = if ctx.loader.is_eager(&signature.ty) {
            let value = eager
                .get(signature)
                .cloned()
                .unwrap_or(StorageValue::Null);
            let current = match &value {
                // A never-assigned eager field reads as its default.
                StorageValue::Null if signature.ty.is_primitive() => default_of(&signature.ty),
                other => runtime_of(other)?,
            };
            FieldCell {
                old: Some(value),
                current,
                loaded: true,
                dirty: false,
            }
        } else {
            FieldCell::unloaded()
        };
        fields.insert(signature.clone(), cell);
    }

    Ok(ctx.adopt(*reference, class, module, fields))
}

/// Faults in a lazy field on first access, deserializing the referent
/// when the committed value is a reference.
pub fn load_lazy<S: StateView>(
    ctx: &mut ExecutionContext<'_, S>,
    index: usize,
    field: &FieldSignature,
) -> Result<RuntimeValue, ExecutionError> {
    {
        let slot = ctx.object(index);
        if let Some(cell) = slot.fields.get(field) {
            if cell.loaded {
                return Ok(cell.current.clone());
            }
        } else {
            return Err(ExecutionError::Illegal(format!(
                "{}: no field {field}",
                slot.class
            )));
        }
    }

    let object = ctx.object(index).reference;
    let committed = latest_update_for(ctx.store, &object, field)?.unwrap_or(StorageValue::Null);
    let current = match &committed {
        StorageValue::Reference(r) => RuntimeValue::Object(deserialize(ctx, r)?),
        other => runtime_of(other)?,
    };

    let slot = ctx.object_mut(index);
    let cell = slot.fields.get_mut(field).expect("checked above");
    cell.old = Some(committed);
    cell.current = current.clone();
    cell.loaded = true;
    Ok(current)
}
