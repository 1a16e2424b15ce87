//! Storage values and storage types: the data that crosses the boundary
//! between requests, responses, updates and executed code.

use crate::error::MarshallingError;
use crate::marshalling::{Marshallable, MarshallingContext, UnmarshallingContext};
use crate::references::StorageReference;
use crate::signatures::ClassType;
use num_bigint::BigInt;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

mod type_selectors {
    pub const BOOLEAN: u8 = 0;
    pub const BYTE: u8 = 1;
    pub const CHAR: u8 = 2;
    pub const DOUBLE: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const INT: u8 = 5;
    pub const LONG: u8 = 6;
    pub const SHORT: u8 = 7;
    pub const CLASS: u8 = 8;
    pub const BIG_INTEGER: u8 = 9;
    pub const STRING: u8 = 10;
}

/// The declared type of a field or formal parameter.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StorageType {
    Boolean,
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Class(ClassType),
    BigInteger,
    String,
}

impl StorageType {
    /// Eagerness decidable from the type alone. Class types need hierarchy
    /// information (enums are eager, other classes lazy); the class loader
    /// answers for those.
    pub fn is_eager_basic(&self) -> bool {
        !matches!(self, StorageType::Class(_))
    }

    pub fn is_primitive(&self) -> bool {
        !matches!(
            self,
            StorageType::Class(_) | StorageType::BigInteger | StorageType::String
        )
    }

    pub fn class_name(&self) -> Option<&ClassType> {
        match self {
            StorageType::Class(c) => Some(c),
            _ => None,
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageType::Boolean => f.write_str("boolean"),
            StorageType::Byte => f.write_str("byte"),
            StorageType::Char => f.write_str("char"),
            StorageType::Double => f.write_str("double"),
            StorageType::Float => f.write_str("float"),
            StorageType::Int => f.write_str("int"),
            StorageType::Long => f.write_str("long"),
            StorageType::Short => f.write_str("short"),
            StorageType::Class(c) => write!(f, "{c}"),
            StorageType::BigInteger => f.write_str("BigInteger"),
            StorageType::String => f.write_str("String"),
        }
    }
}

impl fmt::Debug for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Marshallable for StorageType {
    fn marshal(&self, w: &mut MarshallingContext) -> Result<(), MarshallingError> {
        use type_selectors::*;
        match self {
            StorageType::Boolean => w.write_u8(BOOLEAN),
            StorageType::Byte => w.write_u8(BYTE),
            StorageType::Char => w.write_u8(CHAR),
            StorageType::Double => w.write_u8(DOUBLE),
            StorageType::Float => w.write_u8(FLOAT),
            StorageType::Int => w.write_u8(INT),
            StorageType::Long => w.write_u8(LONG),
            StorageType::Short => w.write_u8(SHORT),
            StorageType::Class(c) => {
                w.write_u8(CLASS);
                c.marshal(w)?;
            }
            StorageType::BigInteger => w.write_u8(BIG_INTEGER),
            StorageType::String => w.write_u8(STRING),
        }
        Ok(())
    }

    fn unmarshal(r: &mut UnmarshallingContext<'_>) -> Result<Self, MarshallingError> {
        use type_selectors::*;
        Ok(match r.read_u8()? {
            BOOLEAN => StorageType::Boolean,
            BYTE => StorageType::Byte,
            CHAR => StorageType::Char,
            DOUBLE => StorageType::Double,
            FLOAT => StorageType::Float,
            INT => StorageType::Int,
            LONG => StorageType::Long,
            SHORT => StorageType::Short,
            CLASS => StorageType::Class(ClassType::unmarshal(r)?),
            BIG_INTEGER => StorageType::BigInteger,
            STRING => StorageType::String,
            selector => {
                return Err(MarshallingError::UnknownSelector {
                    what: "storage type",
                    selector,
                })
            }
        })
    }
}

mod value_selectors {
    pub const BIG_INTEGER: u8 = 0;
    pub const BOOLEAN: u8 = 1;
    pub const BYTE: u8 = 2;
    pub const CHAR: u8 = 3;
    pub const DOUBLE: u8 = 4;
    pub const ENUM: u8 = 5;
    pub const FLOAT: u8 = 6;
    pub const INT: u8 = 7;
    pub const LONG: u8 = 8;
    pub const NULL: u8 = 9;
    pub const SHORT: u8 = 10;
    pub const REFERENCE: u8 = 11;
    pub const STRING: u8 = 12;
    /// Selectors `SMALL_INT_BASE..=u8::MAX` encode `Int(selector - SMALL_INT_BASE)`
    /// in a single byte.
    pub const SMALL_INT_BASE: u8 = 13;
}

/// The number of int values that fit the single-byte encoding.
pub const SMALL_INT_RANGE: i32 = (u8::MAX - value_selectors::SMALL_INT_BASE) as i32 + 1;

/// A value of the storage calculus: the tagged union carried by requests,
/// responses and updates.
#[derive(Clone)]
pub enum StorageValue {
    BigInteger(BigInt),
    Boolean(bool),
    Byte(i8),
    Char(char),
    Double(f64),
    Enum { class: ClassType, name: String },
    Float(f32),
    Int(i32),
    Long(i64),
    Null,
    Short(i16),
    Reference(StorageReference),
    String(String),
}

impl StorageValue {
    /// A small discriminant used only to order values of different kinds.
    fn kind(&self) -> u8 {
        match self {
            StorageValue::BigInteger(_) => 0,
            StorageValue::Boolean(_) => 1,
            StorageValue::Byte(_) => 2,
            StorageValue::Char(_) => 3,
            StorageValue::Double(_) => 4,
            StorageValue::Enum { .. } => 5,
            StorageValue::Float(_) => 6,
            StorageValue::Int(_) => 7,
            StorageValue::Long(_) => 8,
            StorageValue::Null => 9,
            StorageValue::Short(_) => 10,
            StorageValue::Reference(_) => 11,
            StorageValue::String(_) => 12,
        }
    }

    pub fn as_reference(&self) -> Option<&StorageReference> {
        match self {
            StorageValue::Reference(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_big_integer(&self) -> Option<&BigInt> {
        match self {
            StorageValue::BigInteger(b) => Some(b),
            _ => None,
        }
    }
}

// Floats are compared and hashed by bit pattern: the engine needs total,
// deterministic behavior, not IEEE semantics.
impl PartialEq for StorageValue {
    fn eq(&self, other: &Self) -> bool {
        use StorageValue::*;
        match (self, other) {
            (BigInteger(a), BigInteger(b)) => a == b,
            (Boolean(a), Boolean(b)) => a == b,
            (Byte(a), Byte(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (
                Enum { class: ca, name: na },
                Enum { class: cb, name: nb },
            ) => ca == cb && na == nb,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Int(a), Int(b)) => a == b,
            (Long(a), Long(b)) => a == b,
            (Null, Null) => true,
            (Short(a), Short(b)) => a == b,
            (Reference(a), Reference(b)) => a == b,
            (String(a), String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for StorageValue {}

impl PartialOrd for StorageValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StorageValue {
    fn cmp(&self, other: &Self) -> Ordering {
        use StorageValue::*;
        match (self, other) {
            (BigInteger(a), BigInteger(b)) => a.cmp(b),
            (Boolean(a), Boolean(b)) => a.cmp(b),
            (Byte(a), Byte(b)) => a.cmp(b),
            (Char(a), Char(b)) => a.cmp(b),
            (Double(a), Double(b)) => a.to_bits().cmp(&b.to_bits()),
            (
                Enum { class: ca, name: na },
                Enum { class: cb, name: nb },
            ) => ca.cmp(cb).then_with(|| na.cmp(nb)),
            (Float(a), Float(b)) => a.to_bits().cmp(&b.to_bits()),
            (Int(a), Int(b)) => a.cmp(b),
            (Long(a), Long(b)) => a.cmp(b),
            (Null, Null) => Ordering::Equal,
            (Short(a), Short(b)) => a.cmp(b),
            (Reference(a), Reference(b)) => a.cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (a, b) => a.kind().cmp(&b.kind()),
        }
    }
}

impl Hash for StorageValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
        match self {
            StorageValue::BigInteger(v) => v.hash(state),
            StorageValue::Boolean(v) => v.hash(state),
            StorageValue::Byte(v) => v.hash(state),
            StorageValue::Char(v) => v.hash(state),
            StorageValue::Double(v) => v.to_bits().hash(state),
            StorageValue::Enum { class, name } => {
                class.hash(state);
                name.hash(state);
            }
            StorageValue::Float(v) => v.to_bits().hash(state),
            StorageValue::Int(v) => v.hash(state),
            StorageValue::Long(v) => v.hash(state),
            StorageValue::Null => {}
            StorageValue::Short(v) => v.hash(state),
            StorageValue::Reference(v) => v.hash(state),
            StorageValue::String(v) => v.hash(state),
        }
    }
}

impl fmt::Display for StorageValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageValue::BigInteger(v) => write!(f, "{v}"),
            StorageValue::Boolean(v) => write!(f, "{v}"),
            StorageValue::Byte(v) => write!(f, "{v}b"),
            StorageValue::Char(v) => write!(f, "'{v}'"),
            StorageValue::Double(v) => write!(f, "{v}d"),
            StorageValue::Enum { class, name } => write!(f, "{class}.{name}"),
            StorageValue::Float(v) => write!(f, "{v}f"),
            StorageValue::Int(v) => write!(f, "{v}"),
            StorageValue::Long(v) => write!(f, "{v}L"),
            StorageValue::Null => f.write_str("null"),
            StorageValue::Short(v) => write!(f, "{v}s"),
            StorageValue::Reference(v) => write!(f, "{v}"),
            StorageValue::String(v) => write!(f, "{v:?}"),
        }
    }
}

impl fmt::Debug for StorageValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Marshallable for StorageValue {
    fn marshal(&self, w: &mut MarshallingContext) -> Result<(), MarshallingError> {
        use value_selectors::*;
        match self {
            StorageValue::BigInteger(v) => {
                w.write_u8(BIG_INTEGER);
                w.write_big_integer(v)?;
            }
            StorageValue::Boolean(v) => {
                w.write_u8(BOOLEAN);
                w.write_bool(*v);
            }
            StorageValue::Byte(v) => {
                w.write_u8(BYTE);
                w.write_i8(*v);
            }
            StorageValue::Char(v) => {
                w.write_u8(CHAR);
                w.write_char(*v);
            }
            StorageValue::Double(v) => {
                w.write_u8(DOUBLE);
                w.write_f64(*v);
            }
            StorageValue::Enum { class, name } => {
                w.write_u8(ENUM);
                class.marshal(w)?;
                w.write_str(name)?;
            }
            StorageValue::Float(v) => {
                w.write_u8(FLOAT);
                w.write_f32(*v);
            }
            StorageValue::Int(v) => {
                // Small non-negative ints ride on the selector byte itself.
                if (0..SMALL_INT_RANGE).contains(v) {
                    w.write_u8(SMALL_INT_BASE + *v as u8);
                } else {
                    w.write_u8(INT);
                    w.write_i32(*v);
                }
            }
            StorageValue::Long(v) => {
                w.write_u8(LONG);
                w.write_i64(*v);
            }
            StorageValue::Null => w.write_u8(NULL),
            StorageValue::Short(v) => {
                w.write_u8(SHORT);
                w.write_i16(*v);
            }
            StorageValue::Reference(v) => {
                w.write_u8(REFERENCE);
                v.marshal_without_selector(w)?;
            }
            StorageValue::String(v) => {
                w.write_u8(STRING);
                w.write_str(v)?;
            }
        }
        Ok(())
    }

    fn unmarshal(r: &mut UnmarshallingContext<'_>) -> Result<Self, MarshallingError> {
        use value_selectors::*;
        let selector = r.read_u8()?;
        Ok(match selector {
            BIG_INTEGER => StorageValue::BigInteger(r.read_big_integer()?),
            BOOLEAN => StorageValue::Boolean(r.read_bool()?),
            BYTE => StorageValue::Byte(r.read_i8()?),
            CHAR => StorageValue::Char(r.read_char()?),
            DOUBLE => StorageValue::Double(r.read_f64()?),
            ENUM => StorageValue::Enum {
                class: ClassType::unmarshal(r)?,
                name: r.read_str()?,
            },
            FLOAT => StorageValue::Float(r.read_f32()?),
            INT => StorageValue::Int(r.read_i32()?),
            LONG => StorageValue::Long(r.read_i64()?),
            NULL => StorageValue::Null,
            SHORT => StorageValue::Short(r.read_i16()?),
            REFERENCE => {
                StorageValue::Reference(StorageReference::unmarshal_without_selector(r)?)
            }
            STRING => StorageValue::String(r.read_str()?),
            small => StorageValue::Int((small - SMALL_INT_BASE) as i32),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshalling::{from_bytes, to_bytes};
    use crate::references::TransactionReference;
    use proptest::prelude::*;

    #[test]
    fn small_ints_take_one_byte() {
        for v in [0, 1, 100, SMALL_INT_RANGE - 1] {
            let bytes = to_bytes(&StorageValue::Int(v)).unwrap();
            assert_eq!(bytes.len(), 1, "int {v}");
            assert_eq!(from_bytes::<StorageValue>(&bytes).unwrap(), StorageValue::Int(v));
        }
        let bytes = to_bytes(&StorageValue::Int(SMALL_INT_RANGE)).unwrap();
        assert_eq!(bytes.len(), 5);
    }

    #[test]
    fn reference_selector_is_eleven() {
        let v = StorageValue::Reference(StorageReference::new(
            TransactionReference([9u8; 32]),
            3,
        ));
        let bytes = to_bytes(&v).unwrap();
        assert_eq!(bytes[0], 11);
        assert_eq!(from_bytes::<StorageValue>(&bytes).unwrap(), v);
    }

    fn arb_value() -> impl Strategy<Value = StorageValue> {
        prop_oneof![
            any::<i64>().prop_map(|v| StorageValue::BigInteger(BigInt::from(v))),
            any::<bool>().prop_map(StorageValue::Boolean),
            any::<i8>().prop_map(StorageValue::Byte),
            any::<char>().prop_map(StorageValue::Char),
            any::<f64>().prop_map(StorageValue::Double),
            any::<f32>().prop_map(StorageValue::Float),
            any::<i32>().prop_map(StorageValue::Int),
            any::<i64>().prop_map(StorageValue::Long),
            Just(StorageValue::Null),
            any::<i16>().prop_map(StorageValue::Short),
            ".*".prop_map(StorageValue::String),
            (any::<[u8; 32]>(), any::<u64>()).prop_map(|(t, p)| {
                StorageValue::Reference(StorageReference::new(TransactionReference(t), p))
            }),
        ]
    }

    proptest! {
        #[test]
        fn value_roundtrip(v in arb_value()) {
            let bytes = to_bytes(&v).unwrap();
            prop_assert_eq!(from_bytes::<StorageValue>(&bytes).unwrap(), v);
        }

        #[test]
        fn canonical_encoding(v in arb_value()) {
            prop_assert_eq!(to_bytes(&v).unwrap(), to_bytes(&v.clone()).unwrap());
        }
    }
}
