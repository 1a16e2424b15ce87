//! The per-transaction execution context: gas meter, object arena and
//! event log. Created fresh for every transaction and dropped with it.

use crate::classloader::ClassLoader;
use crate::errors::ExecutionError;
use crate::state_view::StateView;
use arca_types::{lang, ClassType, FieldSignature, StorageReference, StorageType, StorageValue, TransactionReference};
use arca_vm::GasCostModel;
use num_bigint::BigInt;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A value as the interpreter sees it. Objects are arena indices; their
/// storage references are resolved only at the boundaries.
#[derive(Clone, PartialEq, Debug)]
pub enum RuntimeValue {
    Null,
    Bool(bool),
    Byte(i8),
    Char(char),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    BigInt(BigInt),
    Str(String),
    Enum { class: ClassType, name: String },
    Object(usize),
}

impl RuntimeValue {
    pub fn is_truthy(&self) -> Result<bool, ExecutionError> {
        match self {
            RuntimeValue::Bool(b) => Ok(*b),
            other => Err(ExecutionError::Illegal(format!(
                "branch on non-boolean {other:?}"
            ))),
        }
    }
}

/// One field slot of an arena object.
///
/// `old` is the committed wire value the slot was loaded from, when known;
/// the extractor emits an update iff the current value differs from it.
/// Unloaded lazy slots have `loaded == false` and cannot have changed.
#[derive(Clone, Debug)]
pub struct FieldCell {
    pub old: Option<StorageValue>,
    pub current: RuntimeValue,
    pub loaded: bool,
    pub dirty: bool,
}

impl FieldCell {
    /// A lazy slot that has not been faulted in yet.
    pub fn unloaded() -> Self {
        Self {
            old: None,
            current: RuntimeValue::Null,
            loaded: false,
            dirty: false,
        }
    }
}

/// One object of the arena: either rehydrated from storage or created by
/// this transaction.
#[derive(Clone, Debug)]
pub struct ObjectSlot {
    pub class: ClassType,
    /// Module-store transaction that installed the class, for class tags.
    pub module: TransactionReference,
    pub reference: StorageReference,
    /// Created by this transaction: all fields are emitted on extraction.
    pub is_new: bool,
    pub fields: BTreeMap<FieldSignature, FieldCell>,
}

/// The gas meter of one transaction: a shrinking budget plus the
/// consumption tallies the response reports.
#[derive(Clone, Debug)]
pub struct GasMeter {
    remaining: u64,
    pub cpu: u64,
    pub ram: u64,
    pub storage: u64,
}

impl GasMeter {
    pub fn new(limit: u64) -> Self {
        Self {
            remaining: limit,
            cpu: 0,
            ram: 0,
            storage: 0,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    fn debit(&mut self, amount: u64) -> Result<(), ExecutionError> {
        if amount > self.remaining {
            self.remaining = 0;
            return Err(ExecutionError::OutOfGas);
        }
        self.remaining -= amount;
        Ok(())
    }

    pub fn charge_cpu(&mut self, amount: u64) -> Result<(), ExecutionError> {
        self.debit(amount)?;
        self.cpu += amount;
        Ok(())
    }

    pub fn charge_ram(&mut self, amount: u64) -> Result<(), ExecutionError> {
        self.debit(amount)?;
        self.ram += amount;
        Ok(())
    }

    pub fn charge_storage(&mut self, amount: u64) -> Result<(), ExecutionError> {
        self.debit(amount)?;
        self.storage += amount;
        Ok(())
    }

    pub fn consumed(&self) -> u64 {
        self.cpu + self.ram + self.storage
    }
}

/// The execution context: exclusive owner of everything a transaction
/// mutates before its updates are extracted.
pub struct ExecutionContext<'a, S: StateView> {
    pub store: &'a S,
    pub loader: Arc<ClassLoader>,
    pub costs: &'a GasCostModel,
    pub gas: GasMeter,
    /// The transaction being executed; new objects are allocated under it.
    pub transaction: TransactionReference,
    arena: Vec<ObjectSlot>,
    by_reference: HashMap<StorageReference, usize>,
    next_progressive: u64,
    pub events: Vec<usize>,
    /// Transient static fields, written only by class initializers; never
    /// persisted.
    pub statics: HashMap<FieldSignature, RuntimeValue>,
}

impl<'a, S: StateView> ExecutionContext<'a, S> {
    pub fn new(
        store: &'a S,
        loader: Arc<ClassLoader>,
        costs: &'a GasCostModel,
        transaction: TransactionReference,
        gas_limit: u64,
    ) -> Self {
        Self {
            store,
            loader,
            costs,
            gas: GasMeter::new(gas_limit),
            transaction,
            arena: Vec::new(),
            by_reference: HashMap::new(),
            next_progressive: 0,
            events: Vec::new(),
            statics: HashMap::new(),
        }
    }

    pub fn object(&self, index: usize) -> &ObjectSlot {
        &self.arena[index]
    }

    pub fn object_mut(&mut self, index: usize) -> &mut ObjectSlot {
        &mut self.arena[index]
    }

    pub fn objects(&self) -> impl Iterator<Item = (usize, &ObjectSlot)> {
        self.arena.iter().enumerate()
    }

    pub fn index_of(&self, reference: &StorageReference) -> Option<usize> {
        self.by_reference.get(reference).copied()
    }

    /// Allocates a fresh object of `class`, identified by the current
    /// transaction and the next progressive. Fields start at their
    /// defaults and are all considered assigned by this transaction.
    pub fn allocate(&mut self, class: &ClassType) -> Result<usize, ExecutionError> {
        let resolved = self
            .loader
            .resolve(class)
            .ok_or_else(|| ExecutionError::Illegal(format!("allocation of unknown class {class}")))?;
        let reference = StorageReference::new(self.transaction, self.next_progressive);
        self.next_progressive += 1;

        let mut fields = BTreeMap::new();
        for signature in &resolved.layout {
            fields.insert(
                signature.clone(),
                FieldCell {
                    old: None,
                    current: default_of(&signature.ty),
                    loaded: true,
                    dirty: true,
                },
            );
        }

        let index = self.arena.len();
        self.arena.push(ObjectSlot {
            class: class.clone(),
            module: resolved.module,
            reference,
            is_new: true,
            fields,
        });
        self.by_reference.insert(reference, index);
        Ok(index)
    }

    /// Registers an object rehydrated by the deserializer.
    pub fn adopt(
        &mut self,
        reference: StorageReference,
        class: ClassType,
        module: TransactionReference,
        fields: BTreeMap<FieldSignature, FieldCell>,
    ) -> usize {
        let index = self.arena.len();
        self.arena.push(ObjectSlot {
            class,
            module,
            reference,
            is_new: false,
            fields,
        });
        self.by_reference.insert(reference, index);
        index
    }

    /// Reads a field slot, which must be loaded.
    pub fn read_field(
        &self,
        index: usize,
        field: &FieldSignature,
    ) -> Result<RuntimeValue, ExecutionError> {
        let slot = &self.arena[index];
        let cell = slot.fields.get(field).ok_or_else(|| {
            ExecutionError::Illegal(format!("{}: no field {field}", slot.class))
        })?;
        if !cell.loaded {
            return Err(ExecutionError::Illegal(format!(
                "read of unloaded lazy field {field}"
            )));
        }
        Ok(cell.current.clone())
    }

    pub fn write_field(
        &mut self,
        index: usize,
        field: &FieldSignature,
        value: RuntimeValue,
    ) -> Result<(), ExecutionError> {
        let slot = &mut self.arena[index];
        let cell = slot.fields.get_mut(field).ok_or_else(|| {
            ExecutionError::Illegal(format!("{}: no field {field}", slot.class))
        })?;
        cell.current = value;
        cell.loaded = true;
        cell.dirty = true;
        Ok(())
    }

    /// The big-integer balance of a contract object.
    pub fn balance_of(&self, index: usize, red: bool) -> Result<BigInt, ExecutionError> {
        let field = if red {
            FieldSignature::red_balance()
        } else {
            FieldSignature::balance()
        };
        match self.read_field(index, &field)? {
            RuntimeValue::BigInt(b) => Ok(b),
            RuntimeValue::Null => Ok(BigInt::from(0)),
            other => Err(ExecutionError::Illegal(format!(
                "balance holds {other:?}"
            ))),
        }
    }

    pub fn set_balance(
        &mut self,
        index: usize,
        red: bool,
        value: BigInt,
    ) -> Result<(), ExecutionError> {
        let field = if red {
            FieldSignature::red_balance()
        } else {
            FieldSignature::balance()
        };
        self.write_field(index, &field, RuntimeValue::BigInt(value))
    }

    /// Moves `amount` coins between two contracts, failing on a negative
    /// amount or an uncovered debit.
    pub fn transfer(
        &mut self,
        from: usize,
        to: usize,
        amount: &BigInt,
        red: bool,
    ) -> Result<(), ExecutionError> {
        if amount.sign() == num_bigint::Sign::Minus {
            return Err(ExecutionError::engine_exception(
                lang::INSUFFICIENT_FUNDS_ERROR,
                "negative amount",
            ));
        }
        let from_balance = self.balance_of(from, red)?;
        if from_balance < *amount {
            return Err(ExecutionError::engine_exception(
                lang::INSUFFICIENT_FUNDS_ERROR,
                format!("balance {from_balance} < amount {amount}"),
            ));
        }
        let to_balance = self.balance_of(to, red)?;
        self.set_balance(from, red, from_balance - amount)?;
        self.set_balance(to, red, to_balance + amount)?;
        Ok(())
    }

    /// The wire value of a runtime value.
    pub fn to_storage_value(&self, value: &RuntimeValue) -> StorageValue {
        match value {
            RuntimeValue::Null => StorageValue::Null,
            RuntimeValue::Bool(v) => StorageValue::Boolean(*v),
            RuntimeValue::Byte(v) => StorageValue::Byte(*v),
            RuntimeValue::Char(v) => StorageValue::Char(*v),
            RuntimeValue::Short(v) => StorageValue::Short(*v),
            RuntimeValue::Int(v) => StorageValue::Int(*v),
            RuntimeValue::Long(v) => StorageValue::Long(*v),
            RuntimeValue::Float(v) => StorageValue::Float(*v),
            RuntimeValue::Double(v) => StorageValue::Double(*v),
            RuntimeValue::BigInt(v) => StorageValue::BigInteger(v.clone()),
            RuntimeValue::Str(v) => StorageValue::String(v.clone()),
            RuntimeValue::Enum { class, name } => StorageValue::Enum {
                class: class.clone(),
                name: name.clone(),
            },
            RuntimeValue::Object(index) => {
                StorageValue::Reference(self.arena[*index].reference)
            }
        }
    }
}

/// The default of a freshly allocated field. Big integers default to zero
/// so that balances are always arithmetic-ready.
pub fn default_of(ty: &StorageType) -> RuntimeValue {
    match ty {
        StorageType::Boolean => RuntimeValue::Bool(false),
        StorageType::Byte => RuntimeValue::Byte(0),
        StorageType::Char => RuntimeValue::Char('\0'),
        StorageType::Double => RuntimeValue::Double(0.0),
        StorageType::Float => RuntimeValue::Float(0.0),
        StorageType::Int => RuntimeValue::Int(0),
        StorageType::Long => RuntimeValue::Long(0),
        StorageType::Short => RuntimeValue::Short(0),
        StorageType::BigInteger => RuntimeValue::BigInt(BigInt::from(0)),
        StorageType::String | StorageType::Class(_) => RuntimeValue::Null,
    }
}
