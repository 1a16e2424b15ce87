//! Instrumentation of verified modules.
//!
//! The rewriting is deterministic: every node instruments the same
//! verified module into the same bytes, which are carried in the
//! module-store response and are part of the replicated state.

use crate::gas::GasCostModel;
use crate::isa::{Instruction, Intrinsic};
use crate::module::{ClassDef, MethodDef, Module};
use crate::verifier::{is_eager_type, lookup_class, ClassResolver, VerifiedModule};
use arca_types::error::MarshallingError;
use arca_types::marshalling::{Marshallable, MarshallingContext, UnmarshallingContext};
use arca_types::{ClassType, FieldSignature};
use std::collections::{BTreeMap, BTreeSet};

/// A verified module rewritten for execution, plus the per-class layout
/// tables of persistent fields.
///
/// The layout order (defining class superclass-first, then field name,
/// then field type) is the deserialization order and the canonical order
/// of extracted updates.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct InstrumentedModule {
    pub module: Module,
    layouts: BTreeMap<ClassType, Vec<FieldSignature>>,
}

impl InstrumentedModule {
    /// The persistent-field layout of a class, when the class is a
    /// storage class of this module.
    pub fn layout_of(&self, class: &ClassType) -> Option<&[FieldSignature]> {
        self.layouts.get(class).map(Vec::as_slice)
    }

    pub fn layouts(&self) -> impl Iterator<Item = (&ClassType, &[FieldSignature])> {
        self.layouts.iter().map(|(c, l)| (c, l.as_slice()))
    }
}

impl Marshallable for InstrumentedModule {
    fn marshal(&self, w: &mut MarshallingContext) -> Result<(), MarshallingError> {
        self.module.marshal(w)?;
        w.write_length(self.layouts.len())?;
        for (class, layout) in &self.layouts {
            class.marshal(w)?;
            layout.marshal(w)?;
        }
        Ok(())
    }

    fn unmarshal(r: &mut UnmarshallingContext<'_>) -> Result<Self, MarshallingError> {
        let module = Module::unmarshal(r)?;
        let len = r.read_length()?;
        let mut layouts = BTreeMap::new();
        for _ in 0..len {
            let class = ClassType::unmarshal(r)?;
            let layout = Vec::<FieldSignature>::unmarshal(r)?;
            layouts.insert(class, layout);
        }
        Ok(Self { module, layouts })
    }
}

/// Rewrites a verified module: gas prologues per basic block, RAM charges
/// before allocation, entry prologues on from-contract code, lazy reads
/// through [`Intrinsic::LoadLazy`], and the persistent-field tables.
pub fn instrument(
    verified: &VerifiedModule,
    resolver: &dyn ClassResolver,
    costs: &GasCostModel,
) -> InstrumentedModule {
    let mut module = verified.module.clone();
    for class in &mut module.classes {
        let class_name = class.name.clone();
        for method in &mut class.methods {
            instrument_method(&class_name, method, &verified.module, resolver, costs);
        }
    }

    let mut layouts = BTreeMap::new();
    for class in &verified.module.classes {
        let Some(info) = verified.infos.get(&class.name) else {
            continue;
        };
        if info.is_storage {
            layouts.insert(
                class.name.clone(),
                layout_of_class(&verified.module, resolver, &class.name),
            );
        }
    }

    InstrumentedModule { module, layouts }
}

/// The persistent fields of a class: superclass chain first, each class's
/// own fields ordered by name then type.
pub fn layout_of_class(
    module: &Module,
    resolver: &dyn ClassResolver,
    class: &ClassType,
) -> Vec<FieldSignature> {
    let mut chain: Vec<&ClassDef> = Vec::new();
    let mut current = class.clone();
    while let Some(def) = lookup_class(module, resolver, &current) {
        chain.push(def);
        match &def.superclass {
            Some(parent) => current = parent.clone(),
            None => break,
        }
    }

    let mut layout = Vec::new();
    for def in chain.iter().rev() {
        let mut own: Vec<FieldSignature> = def
            .persistent_fields()
            .map(|f| FieldSignature::new(def.name.clone(), f.name.clone(), f.ty.clone()))
            .collect();
        own.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.ty.cmp(&b.ty)));
        layout.extend(own);
    }
    layout
}

fn instrument_method(
    class: &ClassType,
    method: &mut MethodDef,
    module: &Module,
    resolver: &dyn ClassResolver,
    costs: &GasCostModel,
) {
    if method.body.is_empty() {
        return;
    }

    let leaders = block_leaders(&method.body);
    let block_costs = block_costs(&method.body, &leaders, costs);

    let mut new_body: Vec<Instruction> = Vec::with_capacity(method.body.len() * 2);
    let mut map: Vec<u32> = vec![0; method.body.len()];

    // The entry prologue runs exactly once: jumps back to instruction 0
    // land after it, on the block charge.
    if method.annotations.payable {
        new_body.push(Instruction::Intrinsic(Intrinsic::PayableFromContract));
    } else if method.annotations.red_payable {
        new_body.push(Instruction::Intrinsic(Intrinsic::RedPayableFromContract));
    } else if method.annotations.from_contract {
        new_body.push(Instruction::Intrinsic(Intrinsic::FromContract));
    }

    for (pc, instruction) in method.body.iter().enumerate() {
        map[pc] = new_body.len() as u32;
        if leaders.contains(&pc) {
            new_body.push(Instruction::Intrinsic(Intrinsic::ChargeCpu(
                block_costs[&pc],
            )));
        }
        match instruction {
            Instruction::New(allocated) => {
                let fields = layout_of_class(module, resolver, allocated).len();
                new_body.push(Instruction::Intrinsic(Intrinsic::ChargeRam(
                    costs.ram_allocation_cost(fields),
                )));
                new_body.push(instruction.clone());
            }
            Instruction::GetField(f) if !is_eager_type(module, resolver, &f.ty) => {
                new_body.push(Instruction::Intrinsic(Intrinsic::LoadLazy(f.clone())));
            }
            other => new_body.push(other.clone()),
        }
    }

    for instruction in &mut new_body {
        if let Some(target) = instruction.jump_target_mut() {
            *target = map[*target as usize];
        }
    }

    method.body = new_body;
}

/// The leaders of the basic blocks: entry, every branch target, and every
/// fall-through successor of a block-ending instruction.
fn block_leaders(body: &[Instruction]) -> BTreeSet<usize> {
    let mut leaders = BTreeSet::new();
    leaders.insert(0);
    for (pc, instruction) in body.iter().enumerate() {
        if let Some(target) = instruction.jump_target() {
            leaders.insert(target as usize);
        }
        if instruction.ends_block() && pc + 1 < body.len() {
            leaders.insert(pc + 1);
        }
    }
    leaders
}

/// Static CPU cost per block, keyed by leader.
fn block_costs(
    body: &[Instruction],
    leaders: &BTreeSet<usize>,
    costs: &GasCostModel,
) -> BTreeMap<usize, u64> {
    let mut out = BTreeMap::new();
    let mut boundaries: Vec<usize> = leaders.iter().copied().collect();
    boundaries.push(body.len());
    for pair in boundaries.windows(2) {
        let (start, end) = (pair[0], pair[1]);
        let cost = body[start..end].iter().map(|i| costs.cpu_cost(i)).sum();
        out.insert(start, cost);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{Annotations, ClassKind, FieldDef, FieldFlags, MethodFlags};
    use crate::verifier::{verify, EmptyResolver};
    use crate::whitelist::WhiteList;
    use arca_types::marshalling::{from_bytes, to_bytes};
    use arca_types::{lang, StorageType, StorageValue};

    fn build_module() -> Module {
        Module {
            classes: vec![
                ClassDef {
                    name: ClassType::new(lang::STORAGE),
                    superclass: None,
                    kind: ClassKind::Class,
                    fields: vec![],
                    methods: vec![],
                },
                ClassDef {
                    name: ClassType::new("app.Cell"),
                    superclass: Some(ClassType::new(lang::STORAGE)),
                    kind: ClassKind::Class,
                    fields: vec![
                        FieldDef {
                            name: "next".into(),
                            ty: StorageType::Class(ClassType::new("app.Cell")),
                            flags: FieldFlags::default(),
                        },
                        FieldDef {
                            name: "count".into(),
                            ty: StorageType::Int,
                            flags: FieldFlags::default(),
                        },
                    ],
                    methods: vec![MethodDef {
                        name: "loop".into(),
                        formals: vec![],
                        returns: None,
                        flags: MethodFlags::PUBLIC,
                        annotations: Annotations::default(),
                        max_locals: 1,
                        body: vec![
                            Instruction::Load(0),
                            Instruction::GetField(FieldSignature::new(
                                ClassType::new("app.Cell"),
                                "next",
                                StorageType::Class(ClassType::new("app.Cell")),
                            )),
                            Instruction::Pop,
                            Instruction::Jump(0),
                        ],
                    }],
                },
            ],
        }
    }

    fn instrumented() -> InstrumentedModule {
        let module = build_module();
        let verified = verify(&module, &EmptyResolver, &WhiteList::default(), false).unwrap();
        instrument(&verified, &EmptyResolver, &GasCostModel::default())
    }

    #[test]
    fn blocks_get_cpu_charges_and_lazy_reads_are_rewritten() {
        let out = instrumented();
        let body = &out.module.find_class(&ClassType::new("app.Cell")).unwrap().methods[0].body;

        assert!(matches!(
            body[0],
            Instruction::Intrinsic(Intrinsic::ChargeCpu(_))
        ));
        assert!(body
            .iter()
            .any(|i| matches!(i, Instruction::Intrinsic(Intrinsic::LoadLazy(_)))));
        // The original GetField of the lazy field is gone.
        assert!(!body.iter().any(|i| matches!(i, Instruction::GetField(_))));
    }

    #[test]
    fn back_jump_lands_on_the_block_charge() {
        let out = instrumented();
        let body = &out.module.find_class(&ClassType::new("app.Cell")).unwrap().methods[0].body;
        let target = body
            .iter()
            .find_map(|i| i.jump_target())
            .expect("the loop jump survives");
        assert!(matches!(
            body[target as usize],
            Instruction::Intrinsic(Intrinsic::ChargeCpu(_))
        ));
    }

    #[test]
    fn layouts_order_superclass_first_then_name() {
        let out = instrumented();
        let layout = out.layout_of(&ClassType::new("app.Cell")).unwrap();
        let names: Vec<&str> = layout.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["count", "next"]);
    }

    #[test]
    fn prologue_is_prepended_once_for_payable_methods() {
        let mut module = build_module();
        {
            let cell = &mut module.classes[1];
            cell.methods.push(MethodDef {
                name: "pay".into(),
                formals: vec![StorageType::Int],
                returns: None,
                flags: MethodFlags::PUBLIC,
                annotations: Annotations {
                    from_contract: true,
                    payable: true,
                    ..Default::default()
                },
                max_locals: 2,
                body: vec![Instruction::Const(StorageValue::Null), Instruction::Pop, Instruction::Return],
            });
        }
        let verified = verify(&module, &EmptyResolver, &WhiteList::default(), false).unwrap();
        let out = instrument(&verified, &EmptyResolver, &GasCostModel::default());
        let body = &out
            .module
            .find_class(&ClassType::new("app.Cell"))
            .unwrap()
            .find_method("pay", &[StorageType::Int])
            .unwrap()
            .body;
        assert_eq!(
            body[0],
            Instruction::Intrinsic(Intrinsic::PayableFromContract)
        );
        assert_eq!(
            body.iter()
                .filter(|i| matches!(i, Instruction::Intrinsic(Intrinsic::PayableFromContract)))
                .count(),
            1
        );
    }

    #[test]
    fn instrumented_module_roundtrip() {
        let out = instrumented();
        let bytes = to_bytes(&out).unwrap();
        assert_eq!(from_bytes::<InstrumentedModule>(&bytes).unwrap(), out);
    }
}
