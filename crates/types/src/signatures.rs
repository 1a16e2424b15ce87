//! Class, field and code signatures.

use crate::error::MarshallingError;
use crate::marshalling::{Marshallable, MarshallingContext, UnmarshallingContext};
use crate::values::StorageType;
use crate::{lang, references::StorageReference};
use std::fmt;

/// A fully-qualified class name, dot-separated.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassType(pub String);

impl ClassType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn contract() -> Self {
        Self::new(lang::CONTRACT)
    }

    pub fn externally_owned_account() -> Self {
        Self::new(lang::EXTERNALLY_OWNED_ACCOUNT)
    }
}

impl fmt::Display for ClassType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ClassType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Marshallable for ClassType {
    fn marshal(&self, w: &mut MarshallingContext) -> Result<(), MarshallingError> {
        w.write_str(&self.0)
    }

    fn unmarshal(r: &mut UnmarshallingContext<'_>) -> Result<Self, MarshallingError> {
        Ok(Self(r.read_str()?))
    }
}

/// Identifies one field of one class: `(defining_class, name, declared type)`.
///
/// `Ord` is lexicographic on those three components; the canonical ordering
/// of updates additionally ranks defining classes superclass-first, which
/// needs hierarchy information and therefore lives with the class loader.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldSignature {
    pub defining_class: ClassType,
    pub name: String,
    pub ty: StorageType,
}

impl FieldSignature {
    pub fn new(defining_class: ClassType, name: impl Into<String>, ty: StorageType) -> Self {
        Self {
            defining_class,
            name: name.into(),
            ty,
        }
    }

    /// The green balance of a contract; updated through the compact shape.
    pub fn balance() -> Self {
        Self::new(ClassType::contract(), "balance", StorageType::BigInteger)
    }

    /// The red balance of a contract; updated through the compact shape.
    pub fn red_balance() -> Self {
        Self::new(ClassType::contract(), "redBalance", StorageType::BigInteger)
    }

    pub fn eoa_nonce() -> Self {
        Self::new(
            ClassType::externally_owned_account(),
            "nonce",
            StorageType::BigInteger,
        )
    }

    pub fn eoa_public_key() -> Self {
        Self::new(
            ClassType::externally_owned_account(),
            "publicKey",
            StorageType::String,
        )
    }
}

impl fmt::Display for FieldSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.defining_class, self.name, self.ty)
    }
}

impl fmt::Debug for FieldSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Marshallable for FieldSignature {
    fn marshal(&self, w: &mut MarshallingContext) -> Result<(), MarshallingError> {
        self.defining_class.marshal(w)?;
        w.write_str(&self.name)?;
        self.ty.marshal(w)
    }

    fn unmarshal(r: &mut UnmarshallingContext<'_>) -> Result<Self, MarshallingError> {
        Ok(Self {
            defining_class: ClassType::unmarshal(r)?,
            name: r.read_str()?,
            ty: StorageType::unmarshal(r)?,
        })
    }
}

/// The signature of a method: defining class, name, formal parameter types
/// and optional return type. The implicit `(caller, dummy)` trailing formals
/// of from-contract code never appear here.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodSignature {
    pub defining_class: ClassType,
    pub name: String,
    pub formals: Vec<StorageType>,
    pub returns: Option<StorageType>,
}

impl MethodSignature {
    pub fn new(
        defining_class: ClassType,
        name: impl Into<String>,
        formals: Vec<StorageType>,
        returns: Option<StorageType>,
    ) -> Self {
        Self {
            defining_class,
            name: name.into(),
            formals,
            returns,
        }
    }

    /// The `receive` method a transfer request implicitly calls.
    pub fn receive(amount: StorageType) -> Self {
        Self::new(ClassType::contract(), lang::RECEIVE, vec![amount], None)
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}(", self.defining_class, self.name)?;
        for (i, ty) in self.formals.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{ty}")?;
        }
        f.write_str(")")
    }
}

impl fmt::Debug for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Marshallable for MethodSignature {
    fn marshal(&self, w: &mut MarshallingContext) -> Result<(), MarshallingError> {
        self.defining_class.marshal(w)?;
        w.write_str(&self.name)?;
        self.formals.marshal(w)?;
        match &self.returns {
            None => w.write_u8(0),
            Some(ty) => {
                w.write_u8(1);
                ty.marshal(w)?;
            }
        }
        Ok(())
    }

    fn unmarshal(r: &mut UnmarshallingContext<'_>) -> Result<Self, MarshallingError> {
        let defining_class = ClassType::unmarshal(r)?;
        let name = r.read_str()?;
        let formals = Vec::<StorageType>::unmarshal(r)?;
        let returns = match r.read_u8()? {
            0 => None,
            1 => Some(StorageType::unmarshal(r)?),
            s => {
                return Err(MarshallingError::UnknownSelector {
                    what: "method return marker",
                    selector: s,
                })
            }
        };
        Ok(Self {
            defining_class,
            name,
            formals,
            returns,
        })
    }
}

/// The signature of a constructor: defining class plus formal types.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstructorSignature {
    pub defining_class: ClassType,
    pub formals: Vec<StorageType>,
}

impl ConstructorSignature {
    pub fn new(defining_class: ClassType, formals: Vec<StorageType>) -> Self {
        Self {
            defining_class,
            formals,
        }
    }
}

impl fmt::Display for ConstructorSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.<init>({} formals)", self.defining_class, self.formals.len())
    }
}

impl fmt::Debug for ConstructorSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Marshallable for ConstructorSignature {
    fn marshal(&self, w: &mut MarshallingContext) -> Result<(), MarshallingError> {
        self.defining_class.marshal(w)?;
        self.formals.marshal(w)
    }

    fn unmarshal(r: &mut UnmarshallingContext<'_>) -> Result<Self, MarshallingError> {
        Ok(Self {
            defining_class: ClassType::unmarshal(r)?,
            formals: Vec::<StorageType>::unmarshal(r)?,
        })
    }
}

/// A class tag resolved for a storage reference: its runtime class and the
/// module-store transaction that installed that class.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ClassTag {
    pub object: StorageReference,
    pub class: ClassType,
    pub module: crate::references::TransactionReference,
}
