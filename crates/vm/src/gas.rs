//! The pluggable gas cost model.

use crate::isa::{Instruction, Intrinsic};

/// Static costs charged by instrumentation and by the response builders.
/// Module installation cost is linear in the module bytes.
#[derive(Clone, Debug)]
pub struct GasCostModel {
    /// Flat CPU cost debited on admission of any transaction.
    pub base_cpu_transaction: u64,
    /// RAM debited per allocated object.
    pub ram_per_object: u64,
    /// RAM debited per field of an allocated object.
    pub ram_per_field: u64,
    /// Storage gas per byte of the marshalled response.
    pub storage_per_byte: u64,
    /// CPU per byte of an installed module.
    pub cpu_per_module_byte: u64,
    /// RAM per byte of an installed module, covering instrumentation.
    pub ram_per_module_byte: u64,
    /// Interpreter frame depth bound; deeper recursion fails the
    /// transaction.
    pub max_call_depth: u32,
}

impl Default for GasCostModel {
    fn default() -> Self {
        Self {
            base_cpu_transaction: 10,
            ram_per_object: 8,
            ram_per_field: 4,
            storage_per_byte: 1,
            cpu_per_module_byte: 1,
            ram_per_module_byte: 1,
            max_call_depth: 128,
        }
    }
}

impl GasCostModel {
    /// Static CPU cost of one instruction, summed per basic block by the
    /// instrumenter.
    pub fn cpu_cost(&self, instruction: &Instruction) -> u64 {
        match instruction {
            Instruction::Const(_) | Instruction::Load(_) | Instruction::Store(_) => 1,
            Instruction::Dup | Instruction::Pop | Instruction::Swap => 1,
            Instruction::Add
            | Instruction::Sub
            | Instruction::Neg
            | Instruction::Not
            | Instruction::And
            | Instruction::Or => 1,
            Instruction::Mul | Instruction::Div | Instruction::Rem => 2,
            Instruction::Eq
            | Instruction::Ne
            | Instruction::Lt
            | Instruction::Le
            | Instruction::Gt
            | Instruction::Ge => 1,
            Instruction::Jump(_) | Instruction::JumpIf(_) | Instruction::JumpIfNot(_) => 1,
            Instruction::GetField(_) | Instruction::PutField(_) => 2,
            Instruction::GetStatic(_) | Instruction::PutStatic(_) => 2,
            Instruction::CallVirtual(_)
            | Instruction::CallStatic(_)
            | Instruction::CallConstructor(_) => 5,
            Instruction::New(_) => 5,
            Instruction::Return | Instruction::ReturnValue => 1,
            Instruction::Throw => 3,
            // Never survive verification; priced anyway so that the model
            // is total.
            Instruction::Jsr(_)
            | Instruction::Ret(_)
            | Instruction::MonitorEnter
            | Instruction::MonitorExit => 1,
            Instruction::Intrinsic(i) => match i {
                Intrinsic::LoadLazy(_) => 3,
                Intrinsic::Event => 2,
                _ => 0,
            },
        }
    }

    /// RAM cost of allocating an instance with `fields` persistent fields.
    pub fn ram_allocation_cost(&self, fields: usize) -> u64 {
        self.ram_per_object + self.ram_per_field * fields as u64
    }

    /// CPU cost of installing a module of the given size.
    pub fn module_install_cpu(&self, bytes: usize) -> u64 {
        self.base_cpu_transaction + self.cpu_per_module_byte * bytes as u64
    }

    pub fn module_install_ram(&self, bytes: usize) -> u64 {
        self.ram_per_module_byte * bytes as u64
    }

    pub fn storage_cost(&self, bytes: usize) -> u64 {
        self.storage_per_byte * bytes as u64
    }

    /// The smallest admissible gas limit: the flat CPU baseline plus room
    /// for a minimal response.
    pub fn minimum_gas(&self) -> u64 {
        self.base_cpu_transaction + self.ram_per_object + self.storage_per_byte * 64
    }
}
