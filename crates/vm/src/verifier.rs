//! Verification of uploaded modules against the contract-execution subset.
//!
//! Issues are collected rather than failing fast; the presence of any
//! error fails the module-store transaction, and the name of the first
//! error becomes the failure cause of its response.

use crate::module::{ClassDef, MethodDef, MethodFlags, Module};
use crate::whitelist::WhiteList;
use crate::Instruction;
use arca_types::{lang, ClassType, StorageType, StorageValue};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Classes visible under the classpath a module is installed over.
pub trait ClassResolver {
    fn resolve(&self, name: &ClassType) -> Option<&ClassDef>;
}

/// A resolver with no classes: used when verifying the base module, which
/// depends on nothing.
pub struct EmptyResolver;

impl ClassResolver for EmptyResolver {
    fn resolve(&self, _name: &ClassType) -> Option<&ClassDef> {
        None
    }
}

/// Hierarchy facts about one class, precomputed at verification time so
/// that nothing downstream needs to walk superclass chains again.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ClassInfo {
    /// Distance from the root of the superclass chain; superclasses have
    /// strictly smaller depth, which orders fields superclass-first.
    pub depth: u32,
    pub is_storage: bool,
    pub is_contract: bool,
    pub is_account: bool,
    pub is_enum: bool,
    pub is_event: bool,
    /// Checked exceptions must be declared via `throws_exceptions`.
    pub is_checked_exception: bool,
}

/// The outcome of a successful verification.
#[derive(Clone, Debug)]
pub struct VerifiedModule {
    pub module: Module,
    pub infos: BTreeMap<ClassType, ClassInfo>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Severity {
    Error,
    Warning,
}

/// The kinds of verification issues. Names are stable identifiers exposed
/// as failure causes.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum IssueKind {
    IllegalAccessToNonWhiteListedField,
    IllegalCallToNonWhiteListedMethod,
    IllegalJsrInstruction,
    IllegalRetInstruction,
    IllegalSynchronization,
    IllegalPutstaticInstruction,
    IllegalModificationOfLocal0,
    IllegalIntrinsicInstruction,
    IllegalStorageReferenceLiteral,
    IllegalCallToFromContract,
    PayableWithoutFromContract,
    PayableWithoutAmount,
    UndeclaredException,
    IllegalTypeForStorageField,
    IllegalSelfChargedMethod,
    UnresolvedClass,
}

impl IssueKind {
    pub fn name(&self) -> &'static str {
        match self {
            IssueKind::IllegalAccessToNonWhiteListedField => {
                "IllegalAccessToNonWhiteListedFieldError"
            }
            IssueKind::IllegalCallToNonWhiteListedMethod => {
                "IllegalCallToNonWhiteListedMethodError"
            }
            IssueKind::IllegalJsrInstruction => "IllegalJsrInstructionError",
            IssueKind::IllegalRetInstruction => "IllegalRetInstructionError",
            IssueKind::IllegalSynchronization => "IllegalSynchronizationError",
            IssueKind::IllegalPutstaticInstruction => "IllegalPutstaticInstructionError",
            IssueKind::IllegalModificationOfLocal0 => "IllegalModificationOfLocal0Error",
            IssueKind::IllegalIntrinsicInstruction => "IllegalIntrinsicInstructionError",
            IssueKind::IllegalStorageReferenceLiteral => "IllegalStorageReferenceLiteralError",
            IssueKind::IllegalCallToFromContract => "IllegalCallToFromContractError",
            IssueKind::PayableWithoutFromContract => "PayableWithoutFromContractError",
            IssueKind::PayableWithoutAmount => "PayableWithoutAmountError",
            IssueKind::UndeclaredException => "UndeclaredExceptionError",
            IssueKind::IllegalTypeForStorageField => "IllegalTypeForStorageFieldError",
            IssueKind::IllegalSelfChargedMethod => "IllegalSelfChargedMethodError",
            IssueKind::UnresolvedClass => "UnresolvedClassError",
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct VerificationIssue {
    pub class: ClassType,
    /// The method or field the issue was found in, empty at class level.
    pub where_: String,
    pub kind: IssueKind,
    pub message: String,
    pub severity: Severity,
}

impl fmt::Display for VerificationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {}.{}: {}",
            self.kind.name(),
            self.class,
            self.where_,
            self.message
        )
    }
}

/// Verification failed: at least one issue is an error.
#[derive(Debug)]
pub struct VerificationError {
    pub issues: Vec<VerificationIssue>,
}

impl std::error::Error for VerificationError {}

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "verification failed with {} issue(s)", self.issues.len())?;
        for issue in &self.issues {
            write!(f, "; {issue}")?;
        }
        Ok(())
    }
}

impl VerificationError {
    /// The stable name of the first error, used as the failure cause
    /// class name of the module-store response.
    pub fn first_error_name(&self) -> &'static str {
        self.issues
            .iter()
            .find(|i| i.severity == Severity::Error)
            .map(|i| i.kind.name())
            .unwrap_or("VerificationError")
    }
}

/// Looks a class up in the module under verification or its classpath.
pub fn lookup_class<'a>(
    module: &'a Module,
    resolver: &'a dyn ClassResolver,
    name: &ClassType,
) -> Option<&'a ClassDef> {
    module.find_class(name).or_else(|| resolver.resolve(name))
}

/// Computes the hierarchy facts of `name`, walking superclass chains
/// through the module and its classpath. `None` when the chain leaves the
/// known world.
pub fn classify(
    module: &Module,
    resolver: &dyn ClassResolver,
    name: &ClassType,
) -> Option<ClassInfo> {
    let mut chain = Vec::new();
    let mut current = name.clone();
    loop {
        let def = lookup_class(module, resolver, &current)?;
        chain.push((current.clone(), def.is_enum()));
        match &def.superclass {
            Some(parent) => {
                // A cycle would loop forever; treat it as unresolved.
                if chain.iter().any(|(c, _)| c == parent) {
                    return None;
                }
                current = parent.clone();
            }
            None => break,
        }
    }
    let names: Vec<&str> = chain.iter().map(|(c, _)| c.name()).collect();
    let mut is_checked_exception = names.contains(&lang::EXCEPTION);
    if names.contains(&lang::RUNTIME_EXCEPTION) {
        is_checked_exception = false;
    }
    Some(ClassInfo {
        depth: (chain.len() - 1) as u32,
        is_storage: names.contains(&lang::STORAGE),
        is_contract: names.contains(&lang::CONTRACT),
        is_account: names.contains(&lang::EXTERNALLY_OWNED_ACCOUNT),
        is_enum: chain[0].1,
        is_event: names.contains(&lang::EVENT),
        is_checked_exception,
    })
}

/// A field or formal type is eager when its value travels with the eager
/// phase of deserialization.
pub fn is_eager_type(module: &Module, resolver: &dyn ClassResolver, ty: &StorageType) -> bool {
    match ty {
        StorageType::Class(c) => classify(module, resolver, c).map_or(false, |i| i.is_enum),
        _ => true,
    }
}

struct Verifier<'a> {
    module: &'a Module,
    resolver: &'a dyn ClassResolver,
    whitelist: &'a WhiteList,
    allows_self_charged: bool,
    infos: BTreeMap<ClassType, ClassInfo>,
    issues: Vec<VerificationIssue>,
}

/// Verifies a module, returning its hierarchy facts or the collected
/// issues.
pub fn verify(
    module: &Module,
    resolver: &dyn ClassResolver,
    whitelist: &WhiteList,
    allows_self_charged: bool,
) -> Result<VerifiedModule, VerificationError> {
    let mut verifier = Verifier {
        module,
        resolver,
        whitelist,
        allows_self_charged,
        infos: BTreeMap::new(),
        issues: Vec::new(),
    };
    verifier.run();

    let has_errors = verifier
        .issues
        .iter()
        .any(|i| i.severity == Severity::Error);
    if has_errors {
        debug!(target: "verifier", issues = verifier.issues.len(), "module rejected");
        Err(VerificationError {
            issues: verifier.issues,
        })
    } else {
        Ok(VerifiedModule {
            module: module.clone(),
            infos: verifier.infos,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum FieldLookup {
    Found,
    UnknownClass,
    MissingField,
}

impl<'a> Verifier<'a> {
    fn run(&mut self) {
        for class in &self.module.classes {
            match classify(self.module, self.resolver, &class.name) {
                Some(info) => {
                    self.infos.insert(class.name.clone(), info);
                }
                None => {
                    self.error(
                        &class.name,
                        "",
                        IssueKind::UnresolvedClass,
                        "superclass chain leaves the classpath".into(),
                    );
                    continue;
                }
            }
            self.check_class(class);
        }
    }

    fn error(&mut self, class: &ClassType, where_: &str, kind: IssueKind, message: String) {
        self.issues.push(VerificationIssue {
            class: class.clone(),
            where_: where_.to_string(),
            kind,
            message,
            severity: Severity::Error,
        });
    }

    fn info_of(&self, name: &ClassType) -> Option<ClassInfo> {
        self.infos
            .get(name)
            .cloned()
            .or_else(|| classify(self.module, self.resolver, name))
    }

    fn check_class(&mut self, class: &ClassDef) {
        let is_storage = self
            .infos
            .get(&class.name)
            .map(|i| i.is_storage)
            .unwrap_or(false);

        if is_storage {
            for field in class.persistent_fields() {
                self.check_storage_field_type(class, &field.name, &field.ty);
            }
        }

        for method in &class.methods {
            self.check_annotations(class, method);
            self.check_body(class, method);
        }
    }

    fn check_storage_field_type(&mut self, class: &ClassDef, field: &str, ty: &StorageType) {
        let StorageType::Class(c) = ty else {
            return;
        };
        match self.info_of(c) {
            None => self.error(
                &class.name,
                field,
                IssueKind::UnresolvedClass,
                format!("field type {c} is not in the classpath"),
            ),
            Some(info) if info.is_storage || info.is_enum => {}
            Some(_) => self.error(
                &class.name,
                field,
                IssueKind::IllegalTypeForStorageField,
                format!("{c} is neither a storage class nor an enumeration"),
            ),
        }
    }

    fn check_annotations(&mut self, class: &ClassDef, method: &MethodDef) {
        let a = method.annotations;
        if (a.payable || a.red_payable) && !a.from_contract {
            self.error(
                &class.name,
                &method.name,
                IssueKind::PayableWithoutFromContract,
                "payable code must also be from-contract".into(),
            );
        }
        if a.payable || a.red_payable {
            let amount_ok = matches!(
                method.formals.first(),
                Some(StorageType::Int) | Some(StorageType::Long) | Some(StorageType::BigInteger)
            );
            if !amount_ok {
                self.error(
                    &class.name,
                    &method.name,
                    IssueKind::PayableWithoutAmount,
                    "payable code must take the paid amount as first formal".into(),
                );
            }
        }
        if a.self_charged {
            let class_is_contract = self
                .infos
                .get(&class.name)
                .map(|i| i.is_contract)
                .unwrap_or(false);
            let allowed = self.allows_self_charged
                && method.is_public()
                && !method.is_static()
                && !method.is_constructor()
                && class_is_contract;
            if !allowed {
                self.error(
                    &class.name,
                    &method.name,
                    IssueKind::IllegalSelfChargedMethod,
                    "self-charged is reserved to public instance methods of contracts, where consensus allows it".into(),
                );
            }
        }
    }

    fn check_body(&mut self, class: &ClassDef, method: &MethodDef) {
        let may_write_statics = method.flags.contains(MethodFlags::CLASS_INITIALIZER)
            || method.flags.contains(MethodFlags::SYNTHETIC);

        for (pc, instruction) in method.body.iter().enumerate() {
            match instruction {
                Instruction::Jsr(_) => self.forbidden(class, method, pc, IssueKind::IllegalJsrInstruction),
                Instruction::Ret(_) => self.forbidden(class, method, pc, IssueKind::IllegalRetInstruction),
                Instruction::MonitorEnter | Instruction::MonitorExit => {
                    self.forbidden(class, method, pc, IssueKind::IllegalSynchronization)
                }
                Instruction::Intrinsic(i) => {
                    // The instrumenter is the only producer of intrinsics.
                    self.error(
                        &class.name,
                        &method.name,
                        IssueKind::IllegalIntrinsicInstruction,
                        format!("intrinsic {i:?} at {pc} in uploaded code"),
                    )
                }
                Instruction::Const(StorageValue::Reference(_)) => self.error(
                    &class.name,
                    &method.name,
                    IssueKind::IllegalStorageReferenceLiteral,
                    format!("storage reference literal at {pc}"),
                ),
                Instruction::PutStatic(f) => {
                    if !may_write_statics {
                        self.forbidden(class, method, pc, IssueKind::IllegalPutstaticInstruction);
                    }
                    self.check_field_access(class, method, f);
                }
                Instruction::Store(0) if !method.is_static() => self.forbidden(
                    class,
                    method,
                    pc,
                    IssueKind::IllegalModificationOfLocal0,
                ),
                Instruction::GetField(f) | Instruction::GetStatic(f) => {
                    self.check_field_access(class, method, f)
                }
                Instruction::PutField(f) => self.check_field_access(class, method, f),
                Instruction::CallVirtual(m) | Instruction::CallStatic(m) => {
                    self.check_call(class, method, &m.defining_class, &m.name, &m.formals)
                }
                Instruction::CallConstructor(c) => {
                    self.check_call(class, method, &c.defining_class, lang::INIT, &c.formals)
                }
                Instruction::New(c) => {
                    if lookup_class(self.module, self.resolver, c).is_none()
                        && !self.whitelist.allows_class(c)
                    {
                        self.error(
                            &class.name,
                            &method.name,
                            IssueKind::IllegalCallToNonWhiteListedMethod,
                            format!("allocation of unknown class {c}"),
                        );
                    }
                }
                _ => {}
            }
        }
    }

    fn forbidden(&mut self, class: &ClassDef, method: &MethodDef, pc: usize, kind: IssueKind) {
        self.error(
            &class.name,
            &method.name,
            kind,
            format!("forbidden instruction at {pc}"),
        );
    }

    fn check_field_access(
        &mut self,
        class: &ClassDef,
        method: &MethodDef,
        field: &arca_types::FieldSignature,
    ) {
        match self.find_field(&field.defining_class, &field.name) {
            FieldLookup::Found => {}
            FieldLookup::UnknownClass if self.whitelist.allows_field(&field.defining_class, &field.name) => {}
            FieldLookup::UnknownClass => self.error(
                &class.name,
                &method.name,
                IssueKind::IllegalAccessToNonWhiteListedField,
                format!("access to field {field} of a class outside the classpath"),
            ),
            FieldLookup::MissingField => self.error(
                &class.name,
                &method.name,
                IssueKind::IllegalAccessToNonWhiteListedField,
                format!("no such field: {field}"),
            ),
        }
    }

    fn find_field(&self, class: &ClassType, name: &str) -> FieldLookup {
        let mut current = class.clone();
        let mut known = false;
        loop {
            match lookup_class(self.module, self.resolver, &current) {
                None => {
                    return if known {
                        FieldLookup::MissingField
                    } else {
                        FieldLookup::UnknownClass
                    }
                }
                Some(def) => {
                    known = true;
                    if def.fields.iter().any(|f| f.name == name) {
                        return FieldLookup::Found;
                    }
                    match &def.superclass {
                        Some(parent) => current = parent.clone(),
                        None => return FieldLookup::MissingField,
                    }
                }
            }
        }
    }

    fn check_call(
        &mut self,
        class: &ClassDef,
        method: &MethodDef,
        target_class: &ClassType,
        target_name: &str,
        formals: &[StorageType],
    ) {
        let target = self.find_method(target_class, target_name, formals);
        match target {
            None => {
                let class_known =
                    lookup_class(self.module, self.resolver, target_class).is_some();
                if !class_known && self.whitelist.allows_method(target_class, target_name) {
                    return;
                }
                self.error(
                    &class.name,
                    &method.name,
                    IssueKind::IllegalCallToNonWhiteListedMethod,
                    format!("unresolved call to {target_class}.{target_name}"),
                );
            }
            Some(target) => {
                if target.annotations.from_contract {
                    let caller_is_contract = self
                        .infos
                        .get(&class.name)
                        .map(|i| i.is_contract)
                        .unwrap_or(false);
                    if !method.annotations.from_contract && !caller_is_contract {
                        self.error(
                            &class.name,
                            &method.name,
                            IssueKind::IllegalCallToFromContract,
                            format!(
                                "{target_class}.{target_name} is from-contract and unreachable from here"
                            ),
                        );
                    }
                }
                if target.annotations.throws_exceptions
                    && !method.annotations.throws_exceptions
                    && !method.flags.contains(MethodFlags::SYNTHETIC)
                {
                    self.error(
                        &class.name,
                        &method.name,
                        IssueKind::UndeclaredException,
                        format!(
                            "{target_class}.{target_name} may throw declared exceptions this code does not declare"
                        ),
                    );
                }
            }
        }
    }

    fn find_method(
        &self,
        class: &ClassType,
        name: &str,
        formals: &[StorageType],
    ) -> Option<MethodDef> {
        let mut current = class.clone();
        loop {
            let def = lookup_class(self.module, self.resolver, &current)?;
            if let Some(m) = def.find_method(name, formals) {
                return Some(m.clone());
            }
            current = def.superclass.clone()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::Intrinsic;
    use crate::module::{Annotations, ClassKind, FieldDef, FieldFlags};
    use arca_types::FieldSignature;

    fn storage_root() -> ClassDef {
        ClassDef {
            name: ClassType::new(lang::STORAGE),
            superclass: None,
            kind: ClassKind::Class,
            fields: vec![],
            methods: vec![],
        }
    }

    fn simple_class(name: &str, body: Vec<Instruction>) -> ClassDef {
        ClassDef {
            name: ClassType::new(name),
            superclass: Some(ClassType::new(lang::STORAGE)),
            kind: ClassKind::Class,
            fields: vec![],
            methods: vec![MethodDef {
                name: "run".into(),
                formals: vec![],
                returns: None,
                flags: MethodFlags::PUBLIC,
                annotations: Annotations::default(),
                max_locals: 1,
                body,
            }],
        }
    }

    fn verify_single(class: ClassDef) -> Result<VerifiedModule, VerificationError> {
        let module = Module {
            classes: vec![storage_root(), class],
        };
        verify(&module, &EmptyResolver, &WhiteList::default(), false)
    }

    #[test]
    fn clean_module_verifies() {
        let ok = verify_single(simple_class("app.Ok", vec![Instruction::Return]));
        let verified = ok.unwrap();
        assert!(verified.infos[&ClassType::new("app.Ok")].is_storage);
    }

    #[test]
    fn jsr_is_rejected() {
        let err = verify_single(simple_class("app.Bad", vec![Instruction::Jsr(0)])).unwrap_err();
        assert_eq!(err.first_error_name(), "IllegalJsrInstructionError");
    }

    #[test]
    fn intrinsics_are_rejected_in_uploaded_code() {
        let err = verify_single(simple_class(
            "app.Bad",
            vec![
                Instruction::Intrinsic(Intrinsic::ChargeCpu(1)),
                Instruction::Return,
            ],
        ))
        .unwrap_err();
        assert_eq!(err.first_error_name(), "IllegalIntrinsicInstructionError");
    }

    #[test]
    fn non_white_listed_field_access_is_rejected() {
        let err = verify_single(simple_class(
            "app.Bad",
            vec![
                Instruction::Load(0),
                Instruction::GetField(FieldSignature::new(
                    ClassType::new("outside.World"),
                    "secret",
                    StorageType::Int,
                )),
                Instruction::Pop,
                Instruction::Return,
            ],
        ))
        .unwrap_err();
        assert_eq!(
            err.first_error_name(),
            "IllegalAccessToNonWhiteListedFieldError"
        );
    }

    #[test]
    fn store_to_local_zero_rejected_in_instance_methods() {
        let err = verify_single(simple_class(
            "app.Bad",
            vec![
                Instruction::Const(StorageValue::Null),
                Instruction::Store(0),
                Instruction::Return,
            ],
        ))
        .unwrap_err();
        assert_eq!(err.first_error_name(), "IllegalModificationOfLocal0Error");
    }

    #[test]
    fn payable_requires_from_contract_and_amount() {
        let mut class = simple_class("app.Bad", vec![Instruction::Return]);
        class.methods[0].annotations.payable = true;
        let err = verify_single(class).unwrap_err();
        let names: Vec<_> = err.issues.iter().map(|i| i.kind.name()).collect();
        assert!(names.contains(&"PayableWithoutFromContractError"));
        assert!(names.contains(&"PayableWithoutAmountError"));
    }

    #[test]
    fn storage_fields_must_be_storage_typed() {
        let mut class = simple_class("app.Bad", vec![Instruction::Return]);
        class.fields.push(FieldDef {
            name: "peer".into(),
            ty: StorageType::Class(ClassType::new("app.Plain")),
            flags: FieldFlags::default(),
        });
        let plain = ClassDef {
            name: ClassType::new("app.Plain"),
            superclass: None,
            kind: ClassKind::Class,
            fields: vec![],
            methods: vec![],
        };
        let module = Module {
            classes: vec![storage_root(), plain, class],
        };
        let err = verify(&module, &EmptyResolver, &WhiteList::default(), false).unwrap_err();
        assert_eq!(err.first_error_name(), "IllegalTypeForStorageFieldError");
    }
}
