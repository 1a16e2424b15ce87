//! Updates: the atomic persistent change units committed by responses.
//!
//! An update either tags a newly created object with its runtime class or
//! assigns one field of one object. The balance fields of contracts use
//! compact shapes that elide the field signature.

use crate::error::MarshallingError;
use crate::marshalling::{Marshallable, MarshallingContext, UnmarshallingContext};
use crate::references::{StorageReference, TransactionReference};
use crate::signatures::{ClassType, FieldSignature};
use crate::values::StorageValue;
use num_bigint::BigInt;

mod selectors {
    pub const CLASS_TAG: u8 = 0;
    pub const BIG_INTEGER: u8 = 1;
    pub const BOOLEAN_FALSE: u8 = 2;
    pub const BOOLEAN_TRUE: u8 = 3;
    pub const BYTE: u8 = 4;
    pub const CHAR: u8 = 5;
    pub const DOUBLE: u8 = 6;
    pub const ENUM_EAGER: u8 = 7;
    pub const ENUM_LAZY: u8 = 8;
    pub const FLOAT: u8 = 9;
    pub const INT: u8 = 10;
    pub const LONG: u8 = 11;
    pub const SHORT: u8 = 12;
    pub const STORAGE: u8 = 13;
    pub const STRING: u8 = 14;
    pub const NULL_EAGER: u8 = 15;
    pub const NULL_LAZY: u8 = 16;
    pub const BALANCE: u8 = 17;
    pub const RED_BALANCE: u8 = 18;
}

/// An atomic change to the persistent state of one storage object.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Update {
    /// Records the runtime class of a newly created object and the
    /// module-store transaction that installed that class. Exactly one per
    /// object across its whole history.
    ClassTag {
        object: StorageReference,
        class: ClassType,
        module: TransactionReference,
    },
    /// Assigns a field. `eager` is derived from the declared type of the
    /// field and decides which null shape and which enum shape is used.
    Field {
        object: StorageReference,
        field: FieldSignature,
        value: UpdateValue,
    },
    /// Compact shape for the green balance of a contract.
    Balance {
        object: StorageReference,
        value: BigInt,
    },
    /// Compact shape for the red balance of a contract.
    RedBalance {
        object: StorageReference,
        value: BigInt,
    },
}

/// The assigned value of a field update. A separate sum from
/// [`StorageValue`] because null and enum assignments must remember the
/// eagerness of the field they assign.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum UpdateValue {
    BigInteger(BigInt),
    Boolean(bool),
    Byte(i8),
    Char(char),
    Double(u64),
    Enum {
        class: ClassType,
        name: String,
        eager: bool,
    },
    Float(u32),
    Int(i32),
    Long(i64),
    Short(i16),
    Storage(StorageReference),
    String(String),
    Null {
        eager: bool,
    },
}

impl UpdateValue {
    /// The wire value this assignment stores.
    pub fn to_storage_value(&self) -> StorageValue {
        match self {
            UpdateValue::BigInteger(v) => StorageValue::BigInteger(v.clone()),
            UpdateValue::Boolean(v) => StorageValue::Boolean(*v),
            UpdateValue::Byte(v) => StorageValue::Byte(*v),
            UpdateValue::Char(v) => StorageValue::Char(*v),
            UpdateValue::Double(bits) => StorageValue::Double(f64::from_bits(*bits)),
            UpdateValue::Enum { class, name, .. } => StorageValue::Enum {
                class: class.clone(),
                name: name.clone(),
            },
            UpdateValue::Float(bits) => StorageValue::Float(f32::from_bits(*bits)),
            UpdateValue::Int(v) => StorageValue::Int(*v),
            UpdateValue::Long(v) => StorageValue::Long(*v),
            UpdateValue::Short(v) => StorageValue::Short(*v),
            UpdateValue::Storage(r) => StorageValue::Reference(*r),
            UpdateValue::String(v) => StorageValue::String(v.clone()),
            UpdateValue::Null { .. } => StorageValue::Null,
        }
    }

    pub fn is_eager(&self) -> bool {
        match self {
            UpdateValue::Enum { eager, .. } | UpdateValue::Null { eager } => *eager,
            UpdateValue::Storage(_) => false,
            _ => true,
        }
    }
}

impl Update {
    pub fn object(&self) -> &StorageReference {
        match self {
            Update::ClassTag { object, .. }
            | Update::Field { object, .. }
            | Update::Balance { object, .. }
            | Update::RedBalance { object, .. } => object,
        }
    }

    pub fn is_class_tag(&self) -> bool {
        matches!(self, Update::ClassTag { .. })
    }

    /// The field this update assigns, if any. Compact balance shapes
    /// resolve to the canonical balance signatures.
    pub fn field(&self) -> Option<FieldSignature> {
        match self {
            Update::ClassTag { .. } => None,
            Update::Field { field, .. } => Some(field.clone()),
            Update::Balance { .. } => Some(FieldSignature::balance()),
            Update::RedBalance { .. } => Some(FieldSignature::red_balance()),
        }
    }

    pub fn value(&self) -> Option<StorageValue> {
        match self {
            Update::ClassTag { .. } => None,
            Update::Field { value, .. } => Some(value.to_storage_value()),
            Update::Balance { value, .. } | Update::RedBalance { value, .. } => {
                Some(StorageValue::BigInteger(value.clone()))
            }
        }
    }

    /// An update is eager when its value is recoverable during the eager
    /// phase of deserialization. Class tags always are.
    pub fn is_eager(&self) -> bool {
        match self {
            Update::ClassTag { .. } | Update::Balance { .. } | Update::RedBalance { .. } => true,
            Update::Field { value, .. } => value.is_eager(),
        }
    }

    /// True when the two updates assign the same slot of the same object
    /// (or tag the class of the same object): at most one per transaction
    /// may be committed.
    pub fn same_subject(&self, other: &Update) -> bool {
        if self.object() != other.object() {
            return false;
        }
        match (self.is_class_tag(), other.is_class_tag()) {
            (true, true) => true,
            (false, false) => self.field() == other.field(),
            _ => false,
        }
    }
}

impl Marshallable for Update {
    fn marshal(&self, w: &mut MarshallingContext) -> Result<(), MarshallingError> {
        use selectors::*;
        match self {
            Update::ClassTag {
                object,
                class,
                module,
            } => {
                w.write_u8(CLASS_TAG);
                object.marshal_without_selector(w)?;
                class.marshal(w)?;
                module.marshal(w)?;
            }
            Update::Balance { object, value } => {
                w.write_u8(BALANCE);
                object.marshal_without_selector(w)?;
                w.write_big_integer(value)?;
            }
            Update::RedBalance { object, value } => {
                w.write_u8(RED_BALANCE);
                object.marshal_without_selector(w)?;
                w.write_big_integer(value)?;
            }
            Update::Field {
                object,
                field,
                value,
            } => {
                let selector = match value {
                    UpdateValue::BigInteger(_) => BIG_INTEGER,
                    UpdateValue::Boolean(false) => BOOLEAN_FALSE,
                    UpdateValue::Boolean(true) => BOOLEAN_TRUE,
                    UpdateValue::Byte(_) => BYTE,
                    UpdateValue::Char(_) => CHAR,
                    UpdateValue::Double(_) => DOUBLE,
                    UpdateValue::Enum { eager: true, .. } => ENUM_EAGER,
                    UpdateValue::Enum { eager: false, .. } => ENUM_LAZY,
                    UpdateValue::Float(_) => FLOAT,
                    UpdateValue::Int(_) => INT,
                    UpdateValue::Long(_) => LONG,
                    UpdateValue::Short(_) => SHORT,
                    UpdateValue::Storage(_) => STORAGE,
                    UpdateValue::String(_) => STRING,
                    UpdateValue::Null { eager: true } => NULL_EAGER,
                    UpdateValue::Null { eager: false } => NULL_LAZY,
                };
                w.write_u8(selector);
                object.marshal_without_selector(w)?;
                field.marshal(w)?;
                match value {
                    UpdateValue::BigInteger(v) => w.write_big_integer(v)?,
                    UpdateValue::Boolean(_) | UpdateValue::Null { .. } => {}
                    UpdateValue::Byte(v) => w.write_i8(*v),
                    UpdateValue::Char(v) => w.write_char(*v),
                    UpdateValue::Double(bits) => w.write_u64(*bits),
                    UpdateValue::Enum { class, name, .. } => {
                        class.marshal(w)?;
                        w.write_str(name)?;
                    }
                    UpdateValue::Float(bits) => w.write_u32(*bits),
                    UpdateValue::Int(v) => w.write_i32(*v),
                    UpdateValue::Long(v) => w.write_i64(*v),
                    UpdateValue::Short(v) => w.write_i16(*v),
                    UpdateValue::Storage(r) => r.marshal_without_selector(w)?,
                    UpdateValue::String(v) => w.write_str(v)?,
                }
            }
        }
        Ok(())
    }

    fn unmarshal(r: &mut UnmarshallingContext<'_>) -> Result<Self, MarshallingError> {
        use selectors::*;
        let selector = r.read_u8()?;
        match selector {
            CLASS_TAG => Ok(Update::ClassTag {
                object: StorageReference::unmarshal_without_selector(r)?,
                class: ClassType::unmarshal(r)?,
                module: TransactionReference::unmarshal(r)?,
            }),
            BALANCE => Ok(Update::Balance {
                object: StorageReference::unmarshal_without_selector(r)?,
                value: r.read_big_integer()?,
            }),
            RED_BALANCE => Ok(Update::RedBalance {
                object: StorageReference::unmarshal_without_selector(r)?,
                value: r.read_big_integer()?,
            }),
            _ => {
                let object = StorageReference::unmarshal_without_selector(r)?;
                let field = FieldSignature::unmarshal(r)?;
                let value = match selector {
                    BIG_INTEGER => UpdateValue::BigInteger(r.read_big_integer()?),
                    BOOLEAN_FALSE => UpdateValue::Boolean(false),
                    BOOLEAN_TRUE => UpdateValue::Boolean(true),
                    BYTE => UpdateValue::Byte(r.read_i8()?),
                    CHAR => UpdateValue::Char(r.read_char()?),
                    DOUBLE => UpdateValue::Double(r.read_u64()?),
                    ENUM_EAGER | ENUM_LAZY => UpdateValue::Enum {
                        class: ClassType::unmarshal(r)?,
                        name: r.read_str()?,
                        eager: selector == ENUM_EAGER,
                    },
                    FLOAT => UpdateValue::Float(r.read_u32()?),
                    INT => UpdateValue::Int(r.read_i32()?),
                    LONG => UpdateValue::Long(r.read_i64()?),
                    SHORT => UpdateValue::Short(r.read_i16()?),
                    STORAGE => {
                        UpdateValue::Storage(StorageReference::unmarshal_without_selector(r)?)
                    }
                    STRING => UpdateValue::String(r.read_str()?),
                    NULL_EAGER => UpdateValue::Null { eager: true },
                    NULL_LAZY => UpdateValue::Null { eager: false },
                    selector => {
                        return Err(MarshallingError::UnknownSelector {
                            what: "update",
                            selector,
                        })
                    }
                };
                Ok(Update::Field {
                    object,
                    field,
                    value,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshalling::{from_bytes, to_bytes};
    use crate::values::StorageType;

    fn obj() -> StorageReference {
        StorageReference::new(TransactionReference([3u8; 32]), 0)
    }

    #[test]
    fn balance_update_resolves_canonical_field() {
        let u = Update::Balance {
            object: obj(),
            value: BigInt::from(1000),
        };
        assert_eq!(u.field().unwrap(), FieldSignature::balance());
        assert!(u.is_eager());
    }

    #[test]
    fn updates_roundtrip() {
        let samples = vec![
            Update::ClassTag {
                object: obj(),
                class: ClassType::new("app.Ledger"),
                module: TransactionReference([5u8; 32]),
            },
            Update::Balance {
                object: obj(),
                value: BigInt::from(123456789u64),
            },
            Update::Field {
                object: obj(),
                field: FieldSignature::new(
                    ClassType::new("app.Ledger"),
                    "owner",
                    StorageType::Class(ClassType::new("arca.lang.Contract")),
                ),
                value: UpdateValue::Storage(StorageReference::new(
                    TransactionReference([8u8; 32]),
                    1,
                )),
            },
            Update::Field {
                object: obj(),
                field: FieldSignature::new(ClassType::new("app.Ledger"), "open", StorageType::Boolean),
                value: UpdateValue::Boolean(true),
            },
            Update::Field {
                object: obj(),
                field: FieldSignature::new(
                    ClassType::new("app.Ledger"),
                    "note",
                    StorageType::String,
                ),
                value: UpdateValue::Null { eager: true },
            },
        ];
        for u in samples {
            let bytes = to_bytes(&u).unwrap();
            assert_eq!(from_bytes::<Update>(&bytes).unwrap(), u, "{u:?}");
        }
    }

    #[test]
    fn same_subject_discriminates_fields() {
        let a = Update::Field {
            object: obj(),
            field: FieldSignature::new(ClassType::new("A"), "x", StorageType::Int),
            value: UpdateValue::Int(1),
        };
        let b = Update::Field {
            object: obj(),
            field: FieldSignature::new(ClassType::new("A"), "x", StorageType::Int),
            value: UpdateValue::Int(2),
        };
        let c = Update::Field {
            object: obj(),
            field: FieldSignature::new(ClassType::new("A"), "y", StorageType::Int),
            value: UpdateValue::Int(1),
        };
        assert!(a.same_subject(&b));
        assert!(!a.same_subject(&c));
    }
}
