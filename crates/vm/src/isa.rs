//! The instruction set of contract method bodies.
//!
//! A small stack machine with typed locals. The legacy opcodes (`Jsr`,
//! `Ret`, the monitor pair) are parsed but never verified; the intrinsics
//! are the instrumentation surface and are illegal in uploaded code.

use arca_types::error::MarshallingError;
use arca_types::marshalling::{Marshallable, MarshallingContext, UnmarshallingContext};
use arca_types::{ClassType, ConstructorSignature, FieldSignature, MethodSignature, StorageValue};

mod selectors {
    pub const CONST: u8 = 0;
    pub const LOAD: u8 = 1;
    pub const STORE: u8 = 2;
    pub const GET_FIELD: u8 = 3;
    pub const PUT_FIELD: u8 = 4;
    pub const GET_STATIC: u8 = 5;
    pub const PUT_STATIC: u8 = 6;
    pub const CALL_VIRTUAL: u8 = 7;
    pub const CALL_STATIC: u8 = 8;
    pub const CALL_CONSTRUCTOR: u8 = 9;
    pub const NEW: u8 = 10;
    pub const ADD: u8 = 11;
    pub const SUB: u8 = 12;
    pub const MUL: u8 = 13;
    pub const DIV: u8 = 14;
    pub const REM: u8 = 15;
    pub const NEG: u8 = 16;
    pub const EQ: u8 = 17;
    pub const NE: u8 = 18;
    pub const LT: u8 = 19;
    pub const LE: u8 = 20;
    pub const GT: u8 = 21;
    pub const GE: u8 = 22;
    pub const NOT: u8 = 23;
    pub const AND: u8 = 24;
    pub const OR: u8 = 25;
    pub const JUMP: u8 = 26;
    pub const JUMP_IF: u8 = 27;
    pub const JUMP_IF_NOT: u8 = 28;
    pub const DUP: u8 = 29;
    pub const POP: u8 = 30;
    pub const SWAP: u8 = 31;
    pub const RETURN: u8 = 32;
    pub const RETURN_VALUE: u8 = 33;
    pub const THROW: u8 = 34;
    pub const JSR: u8 = 35;
    pub const RET: u8 = 36;
    pub const MONITOR_ENTER: u8 = 37;
    pub const MONITOR_EXIT: u8 = 38;
    pub const INTRINSIC: u8 = 39;
}

mod intrinsic_selectors {
    pub const CHARGE_CPU: u8 = 0;
    pub const CHARGE_RAM: u8 = 1;
    pub const LOAD_LAZY: u8 = 2;
    pub const FROM_CONTRACT: u8 = 3;
    pub const PAYABLE_FROM_CONTRACT: u8 = 4;
    pub const RED_PAYABLE_FROM_CONTRACT: u8 = 5;
    pub const EVENT: u8 = 6;
}

/// Runtime calls woven in by the instrumenter. The execution context is
/// their implicit first argument.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Intrinsic {
    /// Debit the CPU gas of the basic block about to execute.
    ChargeCpu(u64),
    /// Debit RAM gas for the allocation about to happen.
    ChargeRam(u64),
    /// Read a lazy field, faulting it in from the object's history on
    /// first access.
    LoadLazy(FieldSignature),
    /// Entry prologue of a from-contract executable: bind the caller.
    FromContract,
    /// Entry prologue of a payable executable: bind the caller and move
    /// the amount onto the callee's balance before the body runs.
    PayableFromContract,
    /// As `PayableFromContract`, on the red balance.
    RedPayableFromContract,
    /// Emit the event object on top of the stack.
    Event,
}

/// One instruction of a method body. Branch targets are instruction
/// indices within the same body.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Instruction {
    /// Push a literal. Storage-reference literals are rejected by the
    /// verifier: object identities cannot be forged in code.
    Const(StorageValue),
    Load(u16),
    Store(u16),
    GetField(FieldSignature),
    PutField(FieldSignature),
    GetStatic(FieldSignature),
    PutStatic(FieldSignature),
    CallVirtual(MethodSignature),
    CallStatic(MethodSignature),
    CallConstructor(ConstructorSignature),
    New(ClassType),
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Not,
    And,
    Or,
    Jump(u32),
    JumpIf(u32),
    JumpIfNot(u32),
    Dup,
    Pop,
    Swap,
    Return,
    ReturnValue,
    Throw,
    // Legacy opcodes, present only to be rejected.
    Jsr(u32),
    Ret(u16),
    MonitorEnter,
    MonitorExit,
    Intrinsic(Intrinsic),
}

impl Instruction {
    /// The branch target, for instructions that jump.
    pub fn jump_target(&self) -> Option<u32> {
        match self {
            Instruction::Jump(t)
            | Instruction::JumpIf(t)
            | Instruction::JumpIfNot(t)
            | Instruction::Jsr(t) => Some(*t),
            _ => None,
        }
    }

    pub fn jump_target_mut(&mut self) -> Option<&mut u32> {
        match self {
            Instruction::Jump(t)
            | Instruction::JumpIf(t)
            | Instruction::JumpIfNot(t)
            | Instruction::Jsr(t) => Some(t),
            _ => None,
        }
    }

    /// True when control never falls through to the next instruction.
    pub fn ends_block(&self) -> bool {
        matches!(
            self,
            Instruction::Jump(_)
                | Instruction::JumpIf(_)
                | Instruction::JumpIfNot(_)
                | Instruction::Return
                | Instruction::ReturnValue
                | Instruction::Throw
                | Instruction::Jsr(_)
                | Instruction::Ret(_)
        )
    }
}

impl Marshallable for Instruction {
    fn marshal(&self, w: &mut MarshallingContext) -> Result<(), MarshallingError> {
        use selectors::*;
        match self {
            Instruction::Const(v) => {
                w.write_u8(CONST);
                v.marshal(w)?;
            }
            Instruction::Load(slot) => {
                w.write_u8(LOAD);
                w.write_u16(*slot);
            }
            Instruction::Store(slot) => {
                w.write_u8(STORE);
                w.write_u16(*slot);
            }
            Instruction::GetField(f) => {
                w.write_u8(GET_FIELD);
                f.marshal(w)?;
            }
            Instruction::PutField(f) => {
                w.write_u8(PUT_FIELD);
                f.marshal(w)?;
            }
            Instruction::GetStatic(f) => {
                w.write_u8(GET_STATIC);
                f.marshal(w)?;
            }
            Instruction::PutStatic(f) => {
                w.write_u8(PUT_STATIC);
                f.marshal(w)?;
            }
            Instruction::CallVirtual(m) => {
                w.write_u8(CALL_VIRTUAL);
                m.marshal(w)?;
            }
            Instruction::CallStatic(m) => {
                w.write_u8(CALL_STATIC);
                m.marshal(w)?;
            }
            Instruction::CallConstructor(c) => {
                w.write_u8(CALL_CONSTRUCTOR);
                c.marshal(w)?;
            }
            Instruction::New(c) => {
                w.write_u8(NEW);
                c.marshal(w)?;
            }
            Instruction::Add => w.write_u8(ADD),
            Instruction::Sub => w.write_u8(SUB),
            Instruction::Mul => w.write_u8(MUL),
            Instruction::Div => w.write_u8(DIV),
            Instruction::Rem => w.write_u8(REM),
            Instruction::Neg => w.write_u8(NEG),
            Instruction::Eq => w.write_u8(EQ),
            Instruction::Ne => w.write_u8(NE),
            Instruction::Lt => w.write_u8(LT),
            Instruction::Le => w.write_u8(LE),
            Instruction::Gt => w.write_u8(GT),
            Instruction::Ge => w.write_u8(GE),
            Instruction::Not => w.write_u8(NOT),
            Instruction::And => w.write_u8(AND),
            Instruction::Or => w.write_u8(OR),
            Instruction::Jump(t) => {
                w.write_u8(JUMP);
                w.write_u32(*t);
            }
            Instruction::JumpIf(t) => {
                w.write_u8(JUMP_IF);
                w.write_u32(*t);
            }
            Instruction::JumpIfNot(t) => {
                w.write_u8(JUMP_IF_NOT);
                w.write_u32(*t);
            }
            Instruction::Dup => w.write_u8(DUP),
            Instruction::Pop => w.write_u8(POP),
            Instruction::Swap => w.write_u8(SWAP),
            Instruction::Return => w.write_u8(RETURN),
            Instruction::ReturnValue => w.write_u8(RETURN_VALUE),
            Instruction::Throw => w.write_u8(THROW),
            Instruction::Jsr(t) => {
                w.write_u8(JSR);
                w.write_u32(*t);
            }
            Instruction::Ret(slot) => {
                w.write_u8(RET);
                w.write_u16(*slot);
            }
            Instruction::MonitorEnter => w.write_u8(MONITOR_ENTER),
            Instruction::MonitorExit => w.write_u8(MONITOR_EXIT),
            Instruction::Intrinsic(i) => {
                w.write_u8(INTRINSIC);
                i.marshal(w)?;
            }
        }
        Ok(())
    }

    fn unmarshal(r: &mut UnmarshallingContext<'_>) -> Result<Self, MarshallingError> {
        use selectors::*;
        Ok(match r.read_u8()? {
            CONST => Instruction::Const(StorageValue::unmarshal(r)?),
            LOAD => Instruction::Load(r.read_u16()?),
            STORE => Instruction::Store(r.read_u16()?),
            GET_FIELD => Instruction::GetField(FieldSignature::unmarshal(r)?),
            PUT_FIELD => Instruction::PutField(FieldSignature::unmarshal(r)?),
            GET_STATIC => Instruction::GetStatic(FieldSignature::unmarshal(r)?),
            PUT_STATIC => Instruction::PutStatic(FieldSignature::unmarshal(r)?),
            CALL_VIRTUAL => Instruction::CallVirtual(MethodSignature::unmarshal(r)?),
            CALL_STATIC => Instruction::CallStatic(MethodSignature::unmarshal(r)?),
            CALL_CONSTRUCTOR => Instruction::CallConstructor(ConstructorSignature::unmarshal(r)?),
            NEW => Instruction::New(ClassType::unmarshal(r)?),
            ADD => Instruction::Add,
            SUB => Instruction::Sub,
            MUL => Instruction::Mul,
            DIV => Instruction::Div,
            REM => Instruction::Rem,
            NEG => Instruction::Neg,
            EQ => Instruction::Eq,
            NE => Instruction::Ne,
            LT => Instruction::Lt,
            LE => Instruction::Le,
            GT => Instruction::Gt,
            GE => Instruction::Ge,
            NOT => Instruction::Not,
            AND => Instruction::And,
            OR => Instruction::Or,
            JUMP => Instruction::Jump(r.read_u32()?),
            JUMP_IF => Instruction::JumpIf(r.read_u32()?),
            JUMP_IF_NOT => Instruction::JumpIfNot(r.read_u32()?),
            DUP => Instruction::Dup,
            POP => Instruction::Pop,
            SWAP => Instruction::Swap,
            RETURN => Instruction::Return,
            RETURN_VALUE => Instruction::ReturnValue,
            THROW => Instruction::Throw,
            JSR => Instruction::Jsr(r.read_u32()?),
            RET => Instruction::Ret(r.read_u16()?),
            MONITOR_ENTER => Instruction::MonitorEnter,
            MONITOR_EXIT => Instruction::MonitorExit,
            INTRINSIC => Instruction::Intrinsic(Intrinsic::unmarshal(r)?),
            selector => {
                return Err(MarshallingError::UnknownSelector {
                    what: "instruction",
                    selector,
                })
            }
        })
    }
}

impl Marshallable for Intrinsic {
    fn marshal(&self, w: &mut MarshallingContext) -> Result<(), MarshallingError> {
        use intrinsic_selectors::*;
        match self {
            Intrinsic::ChargeCpu(n) => {
                w.write_u8(CHARGE_CPU);
                w.write_u64(*n);
            }
            Intrinsic::ChargeRam(n) => {
                w.write_u8(CHARGE_RAM);
                w.write_u64(*n);
            }
            Intrinsic::LoadLazy(f) => {
                w.write_u8(LOAD_LAZY);
                f.marshal(w)?;
            }
            Intrinsic::FromContract => w.write_u8(FROM_CONTRACT),
            Intrinsic::PayableFromContract => w.write_u8(PAYABLE_FROM_CONTRACT),
            Intrinsic::RedPayableFromContract => w.write_u8(RED_PAYABLE_FROM_CONTRACT),
            Intrinsic::Event => w.write_u8(EVENT),
        }
        Ok(())
    }

    fn unmarshal(r: &mut UnmarshallingContext<'_>) -> Result<Self, MarshallingError> {
        use intrinsic_selectors::*;
        Ok(match r.read_u8()? {
            CHARGE_CPU => Intrinsic::ChargeCpu(r.read_u64()?),
            CHARGE_RAM => Intrinsic::ChargeRam(r.read_u64()?),
            LOAD_LAZY => Intrinsic::LoadLazy(FieldSignature::unmarshal(r)?),
            FROM_CONTRACT => Intrinsic::FromContract,
            PAYABLE_FROM_CONTRACT => Intrinsic::PayableFromContract,
            RED_PAYABLE_FROM_CONTRACT => Intrinsic::RedPayableFromContract,
            EVENT => Intrinsic::Event,
            selector => {
                return Err(MarshallingError::UnknownSelector {
                    what: "intrinsic",
                    selector,
                })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arca_types::marshalling::{from_bytes, to_bytes};
    use arca_types::StorageType;

    #[test]
    fn instruction_roundtrip() {
        let samples = vec![
            Instruction::Const(StorageValue::Int(42)),
            Instruction::Load(0),
            Instruction::GetField(FieldSignature::balance()),
            Instruction::CallVirtual(MethodSignature::receive(StorageType::Int)),
            Instruction::JumpIfNot(17),
            Instruction::Intrinsic(Intrinsic::ChargeCpu(12)),
            Instruction::Intrinsic(Intrinsic::LoadLazy(FieldSignature::balance())),
            Instruction::Throw,
        ];
        for i in samples {
            let bytes = to_bytes(&i).unwrap();
            assert_eq!(from_bytes::<Instruction>(&bytes).unwrap(), i, "{i:?}");
        }
    }

    #[test]
    fn block_enders() {
        assert!(Instruction::Jump(0).ends_block());
        assert!(Instruction::Throw.ends_block());
        assert!(!Instruction::Add.ends_block());
        assert_eq!(Instruction::JumpIf(9).jump_target(), Some(9));
        assert_eq!(Instruction::Add.jump_target(), None);
    }
}
