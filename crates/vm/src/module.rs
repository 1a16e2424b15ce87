//! The contract module format: classes, fields, methods and their flags.

use crate::isa::Instruction;
use arca_types::error::MarshallingError;
use arca_types::lang;
use arca_types::marshalling::{Marshallable, MarshallingContext, UnmarshallingContext};
use arca_types::{ClassType, StorageType};
use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct MethodFlags: u16 {
        const STATIC = 1 << 0;
        const PUBLIC = 1 << 1;
        /// Engine-generated code, exempt from some verification rules.
        const SYNTHETIC = 1 << 2;
        /// The class initializer, the only place static writes may appear.
        const CLASS_INITIALIZER = 1 << 3;
    }
}

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct FieldFlags: u16 {
        const STATIC = 1 << 0;
        const FINAL = 1 << 1;
        /// Excluded from persistence and update extraction.
        const TRANSIENT = 1 << 2;
    }
}

/// The execution annotations of a method or constructor.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Annotations {
    pub from_contract: bool,
    pub payable: bool,
    pub red_payable: bool,
    pub view: bool,
    pub throws_exceptions: bool,
    pub self_charged: bool,
}

impl Annotations {
    fn to_bits(self) -> u8 {
        (self.from_contract as u8)
            | (self.payable as u8) << 1
            | (self.red_payable as u8) << 2
            | (self.view as u8) << 3
            | (self.throws_exceptions as u8) << 4
            | (self.self_charged as u8) << 5
    }

    fn from_bits(bits: u8) -> Self {
        Self {
            from_contract: bits & 1 != 0,
            payable: bits & 2 != 0,
            red_payable: bits & 4 != 0,
            view: bits & 8 != 0,
            throws_exceptions: bits & 16 != 0,
            self_charged: bits & 32 != 0,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FieldDef {
    pub name: String,
    pub ty: StorageType,
    pub flags: FieldFlags,
}

impl FieldDef {
    /// Persistent fields are the instance fields that survive across
    /// transactions.
    pub fn is_persistent(&self) -> bool {
        !self.flags.contains(FieldFlags::STATIC) && !self.flags.contains(FieldFlags::TRANSIENT)
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MethodDef {
    pub name: String,
    pub formals: Vec<StorageType>,
    pub returns: Option<StorageType>,
    pub flags: MethodFlags,
    pub annotations: Annotations,
    pub max_locals: u16,
    pub body: Vec<Instruction>,
}

impl MethodDef {
    pub fn is_constructor(&self) -> bool {
        self.name == lang::INIT
    }

    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC)
    }

    pub fn is_public(&self) -> bool {
        self.flags.contains(MethodFlags::PUBLIC)
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ClassKind {
    Class,
    Interface,
    Enum { constants: Vec<String> },
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ClassDef {
    pub name: ClassType,
    pub superclass: Option<ClassType>,
    pub kind: ClassKind,
    pub fields: Vec<FieldDef>,
    pub methods: Vec<MethodDef>,
}

impl ClassDef {
    pub fn is_enum(&self) -> bool {
        matches!(self.kind, ClassKind::Enum { .. })
    }

    /// Finds a method or constructor by name and formal types.
    pub fn find_method(&self, name: &str, formals: &[StorageType]) -> Option<&MethodDef> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.formals == formals)
    }

    pub fn methods_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MethodDef> {
        self.methods.iter().filter(move |m| m.name == name)
    }

    pub fn persistent_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.is_persistent())
    }
}

/// A bundle of classes, installed as one unit by a module-store
/// transaction. Its dependencies live in the request, not here.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Module {
    pub classes: Vec<ClassDef>,
}

impl Module {
    pub fn find_class(&self, name: &ClassType) -> Option<&ClassDef> {
        self.classes.iter().find(|c| &c.name == name)
    }
}

impl Marshallable for FieldDef {
    fn marshal(&self, w: &mut MarshallingContext) -> Result<(), MarshallingError> {
        w.write_str(&self.name)?;
        self.ty.marshal(w)?;
        w.write_u16(self.flags.bits());
        Ok(())
    }

    fn unmarshal(r: &mut UnmarshallingContext<'_>) -> Result<Self, MarshallingError> {
        Ok(Self {
            name: r.read_str()?,
            ty: StorageType::unmarshal(r)?,
            flags: FieldFlags::from_bits_truncate(r.read_u16()?),
        })
    }
}

impl Marshallable for MethodDef {
    fn marshal(&self, w: &mut MarshallingContext) -> Result<(), MarshallingError> {
        w.write_str(&self.name)?;
        self.formals.marshal(w)?;
        match &self.returns {
            None => w.write_u8(0),
            Some(ty) => {
                w.write_u8(1);
                ty.marshal(w)?;
            }
        }
        w.write_u16(self.flags.bits());
        w.write_u8(self.annotations.to_bits());
        w.write_u16(self.max_locals);
        self.body.marshal(w)
    }

    fn unmarshal(r: &mut UnmarshallingContext<'_>) -> Result<Self, MarshallingError> {
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
            name,
            formals,
            returns,
            flags: MethodFlags::from_bits_truncate(r.read_u16()?),
            annotations: Annotations::from_bits(r.read_u8()?),
            max_locals: r.read_u16()?,
            body: Vec::<Instruction>::unmarshal(r)?,
        })
    }
}

impl Marshallable for ClassDef {
    fn marshal(&self, w: &mut MarshallingContext) -> Result<(), MarshallingError> {
        self.name.marshal(w)?;
        match &self.superclass {
            None => w.write_u8(0),
            Some(c) => {
                w.write_u8(1);
                c.marshal(w)?;
            }
        }
        match &self.kind {
            ClassKind::Class => w.write_u8(0),
            ClassKind::Interface => w.write_u8(1),
            ClassKind::Enum { constants } => {
                w.write_u8(2);
                w.write_length(constants.len())?;
                for c in constants {
                    w.write_str(c)?;
                }
            }
        }
        self.fields.marshal(w)?;
        self.methods.marshal(w)
    }

    fn unmarshal(r: &mut UnmarshallingContext<'_>) -> Result<Self, MarshallingError> {
        let name = ClassType::unmarshal(r)?;
        let superclass = match r.read_u8()? {
            0 => None,
            1 => Some(ClassType::unmarshal(r)?),
            s => {
                return Err(MarshallingError::UnknownSelector {
                    what: "superclass marker",
                    selector: s,
                })
            }
        };
        let kind = match r.read_u8()? {
            0 => ClassKind::Class,
            1 => ClassKind::Interface,
            2 => {
                let len = r.read_length()?;
                let mut constants = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    constants.push(r.read_str()?);
                }
                ClassKind::Enum { constants }
            }
            s => {
                return Err(MarshallingError::UnknownSelector {
                    what: "class kind",
                    selector: s,
                })
            }
        };
        Ok(Self {
            name,
            superclass,
            kind,
            fields: Vec::<FieldDef>::unmarshal(r)?,
            methods: Vec::<MethodDef>::unmarshal(r)?,
        })
    }
}

impl Marshallable for Module {
    fn marshal(&self, w: &mut MarshallingContext) -> Result<(), MarshallingError> {
        self.classes.marshal(w)
    }

    fn unmarshal(r: &mut UnmarshallingContext<'_>) -> Result<Self, MarshallingError> {
        Ok(Self {
            classes: Vec::<ClassDef>::unmarshal(r)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arca_types::marshalling::{from_bytes, to_bytes};
    use arca_types::FieldSignature;

    #[test]
    fn module_roundtrip() {
        let module = Module {
            classes: vec![ClassDef {
                name: ClassType::new("app.Counter"),
                superclass: Some(ClassType::new(lang::STORAGE)),
                kind: ClassKind::Class,
                fields: vec![FieldDef {
                    name: "count".into(),
                    ty: StorageType::Int,
                    flags: FieldFlags::default(),
                }],
                methods: vec![MethodDef {
                    name: "increment".into(),
                    formals: vec![],
                    returns: None,
                    flags: MethodFlags::PUBLIC,
                    annotations: Annotations::default(),
                    max_locals: 1,
                    body: vec![
                        Instruction::Load(0),
                        Instruction::Load(0),
                        Instruction::GetField(FieldSignature::new(
                            ClassType::new("app.Counter"),
                            "count",
                            StorageType::Int,
                        )),
                        Instruction::Const(arca_types::StorageValue::Int(1)),
                        Instruction::Add,
                        Instruction::PutField(FieldSignature::new(
                            ClassType::new("app.Counter"),
                            "count",
                            StorageType::Int,
                        )),
                        Instruction::Return,
                    ],
                }],
            }],
        };
        let bytes = to_bytes(&module).unwrap();
        assert_eq!(from_bytes::<Module>(&bytes).unwrap(), module);
    }
}
