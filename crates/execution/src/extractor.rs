//! Extraction of updates from the mutated object graph.
//!
//! After a successful body, a breadth-first walk from the caller, the
//! receiver, the actuals and the result visits every reachable arena
//! object and emits an update for each slot whose current value differs
//! from the committed one. The result is sorted by the canonical order
//! (object, class tag first, then defining class superclass-first, field
//! name, field type), which is also the deserialization layout order.

use crate::context::{ExecutionContext, RuntimeValue};
use crate::errors::ExecutionError;
use crate::state_view::StateView;
use arca_types::updates::UpdateValue;
use arca_types::{FieldSignature, StorageValue, Update};
use std::collections::{BTreeSet, VecDeque};

/// Extracts the updates produced by this transaction, walking from
/// `roots` (arena indices).
pub fn extract_updates<S: StateView>(
    ctx: &ExecutionContext<'_, S>,
    roots: &[usize],
) -> Result<Vec<Update>, ExecutionError> {
    let mut visited: BTreeSet<usize> = BTreeSet::new();
    let mut queue: VecDeque<usize> = roots.iter().copied().collect();
    let mut updates: Vec<Update> = Vec::new();

    while let Some(index) = queue.pop_front() {
        if !visited.insert(index) {
            continue;
        }
        let slot = ctx.object(index);
        // Only storage objects persist; plain objects (exceptions,
        // scratch data) still propagate reachability through their
        // fields.
        let persists = ctx
            .loader
            .resolve(&slot.class)
            .map(|r| r.info.is_storage)
            .unwrap_or(false);

        if slot.is_new && persists {
            updates.push(Update::ClassTag {
                object: slot.reference,
                class: slot.class.clone(),
                module: slot.module,
            });
        }

        for (field, cell) in &slot.fields {
            if !cell.loaded {
                continue;
            }
            // Reachability flows through every loaded reference, changed
            // or not: an untouched edge can still lead to a mutated node.
            if let RuntimeValue::Object(referent) = &cell.current {
                queue.push_back(*referent);
            }

            if !persists {
                continue;
            }
            let current = ctx.to_storage_value(&cell.current);
            let changed = match &cell.old {
                Some(old) => *old != current,
                None => slot.is_new || cell.dirty,
            };
            if changed {
                updates.push(field_update(ctx, index, field, &current)?);
            }
        }
    }

    sort_canonically(ctx, &mut updates);
    Ok(updates)
}

/// Shapes one field assignment, using the compact balance forms on
/// contract balances.
fn field_update<S: StateView>(
    ctx: &ExecutionContext<'_, S>,
    index: usize,
    field: &FieldSignature,
    value: &StorageValue,
) -> Result<Update, ExecutionError> {
    let slot = ctx.object(index);
    let object = slot.reference;

    if ctx.loader.is_contract(&slot.class) {
        if let StorageValue::BigInteger(amount) = value {
            if *field == FieldSignature::balance() {
                return Ok(Update::Balance {
                    object,
                    value: amount.clone(),
                });
            }
            if *field == FieldSignature::red_balance() {
                return Ok(Update::RedBalance {
                    object,
                    value: amount.clone(),
                });
            }
        }
    }

    let eager = ctx.loader.is_eager(&field.ty);
    let update_value = match value {
        StorageValue::Null => UpdateValue::Null { eager },
        StorageValue::Boolean(v) => UpdateValue::Boolean(*v),
        StorageValue::Byte(v) => UpdateValue::Byte(*v),
        StorageValue::Char(v) => UpdateValue::Char(*v),
        StorageValue::Short(v) => UpdateValue::Short(*v),
        StorageValue::Int(v) => UpdateValue::Int(*v),
        StorageValue::Long(v) => UpdateValue::Long(*v),
        StorageValue::Float(v) => UpdateValue::Float(v.to_bits()),
        StorageValue::Double(v) => UpdateValue::Double(v.to_bits()),
        StorageValue::BigInteger(v) => UpdateValue::BigInteger(v.clone()),
        StorageValue::String(v) => UpdateValue::String(v.clone()),
        StorageValue::Enum { class, name } => UpdateValue::Enum {
            class: class.clone(),
            name: name.clone(),
            eager,
        },
        StorageValue::Reference(r) => UpdateValue::Storage(*r),
    };
    Ok(Update::Field {
        object,
        field: field.clone(),
        value: update_value,
    })
}

/// The canonical response order of updates.
fn sort_canonically<S: StateView>(ctx: &ExecutionContext<'_, S>, updates: &mut [Update]) {
    updates.sort_by(|a, b| {
        a.object()
            .cmp(b.object())
            .then_with(|| b.is_class_tag().cmp(&a.is_class_tag()))
            .then_with(|| match (a.field(), b.field()) {
                (Some(fa), Some(fb)) => ctx
                    .loader
                    .depth_of(&fa.defining_class)
                    .cmp(&ctx.loader.depth_of(&fb.defining_class))
                    .then_with(|| fa.defining_class.cmp(&fb.defining_class))
                    .then_with(|| fa.name.cmp(&fb.name))
                    .then_with(|| fa.ty.cmp(&fb.ty)),
                _ => std::cmp::Ordering::Equal,
            })
    });
}
