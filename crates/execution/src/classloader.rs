//! The per-transaction class loader.
//!
//! Given a classpath transaction, the loader collects the referenced
//! module and, transitively, the dependencies recorded in the module-store
//! responses, breadth-first and de-duplicated. Resolution is parent-first:
//! the deepest dependencies win name clashes, so installed code can never
//! shadow the base runtime classes.

use crate::state_view::StateView;
use arca_types::error::StateError;
use arca_types::marshalling::from_bytes;
use arca_types::{lang, ClassType, FieldSignature, StorageType, TransactionReference};
use arca_vm::verifier::{ClassInfo, ClassResolver};
use arca_vm::{ClassDef, InstrumentedModule, MethodDef};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// A class resolved under some classpath.
#[derive(Clone, Debug)]
pub struct ResolvedClass {
    pub def: ClassDef,
    /// The module-store transaction that installed the defining module.
    pub module: TransactionReference,
    pub info: ClassInfo,
    /// Persistent fields in canonical order; empty for non-storage
    /// classes.
    pub layout: Vec<FieldSignature>,
}

/// Errors while assembling a classpath. An unusable classpath rejects the
/// transaction; store failures abort it.
#[derive(Debug)]
pub enum ClasspathError {
    Unusable(String),
    State(StateError),
}

impl From<StateError> for ClasspathError {
    fn from(e: StateError) -> Self {
        ClasspathError::State(e)
    }
}

pub struct ClassLoader {
    roots: Vec<TransactionReference>,
    /// Modules in resolution order: parents before dependents.
    modules: Vec<(TransactionReference, InstrumentedModule)>,
    classes: HashMap<ClassType, Arc<ResolvedClass>>,
}

impl ClassLoader {
    /// Builds the loader for a single classpath.
    pub fn build<S: StateView>(
        store: &S,
        classpath: &TransactionReference,
    ) -> Result<Self, ClasspathError> {
        Self::build_for_roots(store, std::slice::from_ref(classpath))
    }

    /// Builds a loader spanning several roots, as used when verifying a
    /// new module against its declared dependencies.
    pub fn build_for_roots<S: StateView>(
        store: &S,
        roots: &[TransactionReference],
    ) -> Result<Self, ClasspathError> {
        // Breadth-first over the dependency DAG, de-duplicating.
        let mut order: Vec<TransactionReference> = Vec::new();
        let mut queue: VecDeque<TransactionReference> = roots.iter().copied().collect();
        while let Some(reference) = queue.pop_front() {
            if order.contains(&reference) {
                continue;
            }
            order.push(reference);
            let response = store
                .response(&reference)?
                .ok_or_else(|| ClasspathError::Unusable(format!("unknown classpath {reference}")))?;
            if response.instrumented_module().is_none() {
                return Err(ClasspathError::Unusable(format!(
                    "classpath {reference} is not a successful module store"
                )));
            }
            queue.extend(response.dependencies().iter().copied());
        }

        let mut modules = Vec::with_capacity(order.len());
        for reference in order.iter().rev() {
            let response = store.response(reference)?.ok_or_else(|| {
                ClasspathError::Unusable(format!("classpath {reference} vanished"))
            })?;
            let bytes = response
                .instrumented_module()
                .ok_or_else(|| ClasspathError::Unusable(format!("{reference} has no module")))?;
            let module: InstrumentedModule = from_bytes(bytes)
                .map_err(|e| ClasspathError::Unusable(format!("undecodable module: {e}")))?;
            modules.push((*reference, module));
        }

        let mut loader = Self {
            roots: roots.to_vec(),
            modules,
            classes: HashMap::new(),
        };
        loader.link()?;
        debug!(
            target: "classloader",
            modules = loader.modules.len(),
            classes = loader.classes.len(),
            "classpath assembled"
        );
        Ok(loader)
    }

    /// Resolves every class once. Parent-first insertion means the first
    /// definition of a name wins.
    fn link(&mut self) -> Result<(), ClasspathError> {
        let mut defs: HashMap<ClassType, (ClassDef, TransactionReference, Option<Vec<FieldSignature>>)> =
            HashMap::new();
        for (reference, module) in &self.modules {
            for class in &module.module.classes {
                let layout = module.layout_of(&class.name).map(|l| l.to_vec());
                defs.entry(class.name.clone())
                    .or_insert_with(|| (class.clone(), *reference, layout));
            }
        }

        for (name, (def, module, layout)) in &defs {
            let info = classify_in(&defs, name).ok_or_else(|| {
                ClasspathError::Unusable(format!("unresolvable hierarchy of {name}"))
            })?;
            // Storage classes carry their instrumented layout; other
            // classes still need a field table to be allocatable.
            let layout = match layout {
                Some(layout) => layout.clone(),
                None => layout_in(&defs, name),
            };
            self.classes.insert(
                name.clone(),
                Arc::new(ResolvedClass {
                    def: def.clone(),
                    module: *module,
                    info,
                    layout,
                }),
            );
        }
        Ok(())
    }

    pub fn classpath(&self) -> TransactionReference {
        self.roots[0]
    }

    pub fn resolve(&self, name: &ClassType) -> Option<Arc<ResolvedClass>> {
        self.classes.get(name).cloned()
    }

    /// Resolves a method by walking the superclass chain from `class`.
    pub fn resolve_method(
        &self,
        class: &ClassType,
        name: &str,
        formals: &[StorageType],
    ) -> Option<(Arc<ResolvedClass>, MethodDef)> {
        let mut current = class.clone();
        loop {
            let resolved = self.resolve(&current)?;
            if let Some(m) = resolved.def.find_method(name, formals) {
                return Some((resolved.clone(), m.clone()));
            }
            current = resolved.def.superclass.clone()?;
        }
    }

    /// The superclass-first rank of a defining class, used by the
    /// canonical update comparator.
    pub fn depth_of(&self, class: &ClassType) -> u32 {
        self.resolve(class).map(|c| c.info.depth).unwrap_or(u32::MAX)
    }

    /// Eagerness of a declared type under this classpath.
    pub fn is_eager(&self, ty: &StorageType) -> bool {
        match ty {
            StorageType::Class(c) => self.resolve(c).map(|r| r.info.is_enum).unwrap_or(false),
            _ => true,
        }
    }

    pub fn is_contract(&self, class: &ClassType) -> bool {
        self.resolve(class).map(|r| r.info.is_contract).unwrap_or(false)
    }

    pub fn is_account(&self, class: &ClassType) -> bool {
        self.resolve(class).map(|r| r.info.is_account).unwrap_or(false)
    }

    /// The gamete class of the base runtime.
    pub fn gamete_class(&self) -> ClassType {
        ClassType::new(lang::GAMETE)
    }
}

type DefMap = HashMap<ClassType, (ClassDef, TransactionReference, Option<Vec<FieldSignature>>)>;

/// The persistent-field table of a class over a plain definition map:
/// superclass chain first, each class's own fields by name then type.
fn layout_in(defs: &DefMap, name: &ClassType) -> Vec<FieldSignature> {
    let mut chain = Vec::new();
    let mut current = name;
    while let Some((def, _, _)) = defs.get(current) {
        chain.push(def);
        match &def.superclass {
            Some(parent) => current = parent,
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

/// Hierarchy classification over a plain definition map; mirrors the
/// verifier's, but spans all modules of the classpath.
fn classify_in(defs: &DefMap, name: &ClassType) -> Option<ClassInfo> {
    let mut chain: Vec<&ClassType> = Vec::new();
    let mut current = name;
    loop {
        let (def, _, _) = defs.get(current)?;
        if chain.contains(&current) {
            return None;
        }
        chain.push(current);
        match &def.superclass {
            Some(parent) => current = parent,
            None => break,
        }
    }
    let names: Vec<&str> = chain.iter().map(|c| c.name()).collect();
    let is_enum = defs
        .get(chain[0])
        .map(|(d, _, _)| d.is_enum())
        .unwrap_or(false);
    let mut is_checked_exception = names.contains(&lang::EXCEPTION);
    if names.contains(&lang::RUNTIME_EXCEPTION) {
        is_checked_exception = false;
    }
    Some(ClassInfo {
        depth: (chain.len() - 1) as u32,
        is_storage: names.contains(&lang::STORAGE),
        is_contract: names.contains(&lang::CONTRACT),
        is_account: names.contains(&lang::EXTERNALLY_OWNED_ACCOUNT),
        is_enum,
        is_event: names.contains(&lang::EVENT),
        is_checked_exception,
    })
}

/// Lets a loader stand in as the classpath when verifying a new module.
impl ClassResolver for ClassLoader {
    fn resolve(&self, name: &ClassType) -> Option<&ClassDef> {
        self.classes.get(name).map(|c| &c.def)
    }
}
