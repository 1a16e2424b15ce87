//! The interpreter of instrumented method bodies.
//!
//! A straightforward frame-per-call design: each invocation gets its own
//! locals and operand stack, recursion depth is bounded by the cost model,
//! and every gas charge woven in by the instrumenter lands on the context
//! meter. The execution context is the implicit first argument of every
//! intrinsic.

use crate::context::{default_of, ExecutionContext, RuntimeValue};
use crate::deserializer::load_lazy;
use crate::errors::ExecutionError;
use crate::state_view::StateView;
use arca_types::{lang, ClassType, StorageType, StorageValue};
use arca_vm::{Instruction, Intrinsic, MethodDef};
use num_bigint::BigInt;

pub struct Interpreter<'c, 'a, S: StateView> {
    pub ctx: &'c mut ExecutionContext<'a, S>,
}

/// How a resolved executable is being entered.
struct Frame {
    locals: Vec<RuntimeValue>,
    stack: Vec<RuntimeValue>,
    /// Arena index of `this`, for instance code.
    this: Option<usize>,
    /// Arena index of the caller contract bound by the prologue.
    caller: Option<usize>,
    /// Local slot holding the first formal, where payable amounts live.
    first_formal: usize,
}

impl<'c, 'a, S: StateView> Interpreter<'c, 'a, S> {
    pub fn new(ctx: &'c mut ExecutionContext<'a, S>) -> Self {
        Self { ctx }
    }

    /// Invokes a method or constructor. `this` is `None` for static code;
    /// `caller` is the arena index the from-contract prologue binds.
    pub fn invoke(
        &mut self,
        class: &ClassType,
        method: &MethodDef,
        this: Option<usize>,
        args: Vec<RuntimeValue>,
        caller: Option<usize>,
        on_self: bool,
        depth: u32,
    ) -> Result<Option<RuntimeValue>, ExecutionError> {
        if depth > self.ctx.costs.max_call_depth {
            return Err(ExecutionError::Illegal(format!(
                "call depth beyond {}",
                self.ctx.costs.max_call_depth
            )));
        }
        if args.len() != method.formals.len() {
            return Err(ExecutionError::Illegal(format!(
                "{}.{} expects {} arguments, got {}",
                class,
                method.name,
                method.formals.len(),
                args.len()
            )));
        }

        let mut locals = Vec::with_capacity(method.max_locals as usize + 4);
        if let Some(index) = this {
            locals.push(RuntimeValue::Object(index));
        }
        let first_formal = locals.len();
        locals.extend(args);
        if method.annotations.from_contract {
            // The two implicit trailing formals of from-contract code.
            locals.push(match caller {
                Some(index) => RuntimeValue::Object(index),
                None => RuntimeValue::Null,
            });
            locals.push(RuntimeValue::Bool(on_self));
        }
        while locals.len() < method.max_locals as usize {
            locals.push(RuntimeValue::Null);
        }

        let mut frame = Frame {
            locals,
            stack: Vec::new(),
            this,
            caller,
            first_formal,
        };
        self.run(class, method, &mut frame, depth)
    }

    fn run(
        &mut self,
        class: &ClassType,
        method: &MethodDef,
        frame: &mut Frame,
        depth: u32,
    ) -> Result<Option<RuntimeValue>, ExecutionError> {
        let body = &method.body;
        let mut pc: usize = 0;
        loop {
            let instruction = body.get(pc).ok_or_else(|| {
                ExecutionError::Illegal(format!("{class}.{}: fell off the body", method.name))
            })?;
            pc += 1;
            match instruction {
                Instruction::Const(v) => frame.stack.push(constant_of(v)?),
                Instruction::Load(slot) => {
                    let value = frame
                        .locals
                        .get(*slot as usize)
                        .cloned()
                        .ok_or_else(|| ExecutionError::Illegal(format!("load of local {slot}")))?;
                    frame.stack.push(value);
                }
                Instruction::Store(slot) => {
                    let value = pop(frame)?;
                    let slot = *slot as usize;
                    if frame.locals.len() <= slot {
                        frame.locals.resize(slot + 1, RuntimeValue::Null);
                    }
                    frame.locals[slot] = value;
                }
                Instruction::GetField(f) => {
                    let receiver = pop_object(frame)?;
                    frame.stack.push(self.ctx.read_field(receiver, f)?);
                }
                Instruction::PutField(f) => {
                    let value = pop(frame)?;
                    let receiver = pop_object(frame)?;
                    self.ctx.write_field(receiver, f, value)?;
                }
                Instruction::GetStatic(f) => {
                    let value = self
                        .ctx
                        .statics
                        .get(f)
                        .cloned()
                        .unwrap_or_else(|| default_of(&f.ty));
                    frame.stack.push(value);
                }
                Instruction::PutStatic(f) => {
                    let value = pop(frame)?;
                    self.ctx.statics.insert(f.clone(), value);
                }
                Instruction::CallVirtual(m) => {
                    let args = pop_n(frame, m.formals.len())?;
                    let receiver = pop_object(frame)?;
                    let result = self.call_instance(receiver, &m.name, &m.formals, args, frame, depth)?;
                    if m.returns.is_some() {
                        frame.stack.push(result.unwrap_or(RuntimeValue::Null));
                    }
                }
                Instruction::CallStatic(m) => {
                    let args = pop_n(frame, m.formals.len())?;
                    let (resolved, target) = self
                        .ctx
                        .loader
                        .resolve_method(&m.defining_class, &m.name, &m.formals)
                        .ok_or_else(|| {
                            ExecutionError::Illegal(format!("unresolved static call {m}"))
                        })?;
                    let result = self.invoke(
                        &resolved.def.name.clone(),
                        &target,
                        None,
                        args,
                        frame.this.or(frame.caller),
                        false,
                        depth + 1,
                    )?;
                    if m.returns.is_some() {
                        frame.stack.push(result.unwrap_or(RuntimeValue::Null));
                    }
                }
                Instruction::CallConstructor(c) => {
                    let args = pop_n(frame, c.formals.len())?;
                    let receiver = pop_object(frame)?;
                    let (resolved, target) = self
                        .ctx
                        .loader
                        .resolve_method(&c.defining_class, lang::INIT, &c.formals)
                        .ok_or_else(|| {
                            ExecutionError::Illegal(format!("unresolved constructor {c}"))
                        })?;
                    self.invoke(
                        &resolved.def.name.clone(),
                        &target,
                        Some(receiver),
                        args,
                        frame.this.or(frame.caller),
                        false,
                        depth + 1,
                    )?;
                    // The initialized object stays available.
                    frame.stack.push(RuntimeValue::Object(receiver));
                }
                Instruction::New(c) => {
                    let index = self.ctx.allocate(c)?;
                    frame.stack.push(RuntimeValue::Object(index));
                }
                Instruction::Add => binary_arith(frame, ArithOp::Add)?,
                Instruction::Sub => binary_arith(frame, ArithOp::Sub)?,
                Instruction::Mul => binary_arith(frame, ArithOp::Mul)?,
                Instruction::Div => binary_arith(frame, ArithOp::Div)?,
                Instruction::Rem => binary_arith(frame, ArithOp::Rem)?,
                Instruction::Neg => {
                    let value = pop(frame)?;
                    frame.stack.push(negate(value)?);
                }
                Instruction::Eq => {
                    let (b, a) = (pop(frame)?, pop(frame)?);
                    frame.stack.push(RuntimeValue::Bool(a == b));
                }
                Instruction::Ne => {
                    let (b, a) = (pop(frame)?, pop(frame)?);
                    frame.stack.push(RuntimeValue::Bool(a != b));
                }
                Instruction::Lt => compare(frame, |o| o.is_lt())?,
                Instruction::Le => compare(frame, |o| o.is_le())?,
                Instruction::Gt => compare(frame, |o| o.is_gt())?,
                Instruction::Ge => compare(frame, |o| o.is_ge())?,
                Instruction::Not => {
                    let value = pop(frame)?.is_truthy()?;
                    frame.stack.push(RuntimeValue::Bool(!value));
                }
                Instruction::And => {
                    let (b, a) = (pop(frame)?.is_truthy()?, pop(frame)?.is_truthy()?);
                    frame.stack.push(RuntimeValue::Bool(a && b));
                }
                Instruction::Or => {
                    let (b, a) = (pop(frame)?.is_truthy()?, pop(frame)?.is_truthy()?);
                    frame.stack.push(RuntimeValue::Bool(a || b));
                }
                Instruction::Jump(target) => pc = *target as usize,
                Instruction::JumpIf(target) => {
                    if pop(frame)?.is_truthy()? {
                        pc = *target as usize;
                    }
                }
                Instruction::JumpIfNot(target) => {
                    if !pop(frame)?.is_truthy()? {
                        pc = *target as usize;
                    }
                }
                Instruction::Dup => {
                    let top = frame
                        .stack
                        .last()
                        .cloned()
                        .ok_or_else(|| ExecutionError::Illegal("dup on empty stack".into()))?;
                    frame.stack.push(top);
                }
                Instruction::Pop => {
                    pop(frame)?;
                }
                Instruction::Swap => {
                    let (b, a) = (pop(frame)?, pop(frame)?);
                    frame.stack.push(b);
                    frame.stack.push(a);
                }
                Instruction::Return => return Ok(None),
                Instruction::ReturnValue => return Ok(Some(pop(frame)?)),
                Instruction::Throw => {
                    let thrown = pop_object(frame)?;
                    return Err(self.exception_of(thrown));
                }
                Instruction::Jsr(_)
                | Instruction::Ret(_)
                | Instruction::MonitorEnter
                | Instruction::MonitorExit => {
                    return Err(ExecutionError::Illegal(
                        "legacy instruction escaped verification".into(),
                    ))
                }
                Instruction::Intrinsic(intrinsic) => {
                    self.intrinsic(intrinsic, frame)?;
                }
            }
        }
    }

    /// Resolves and enters an instance method on the runtime class of the
    /// receiver; the callee's caller is the executing object.
    fn call_instance(
        &mut self,
        receiver: usize,
        name: &str,
        formals: &[StorageType],
        args: Vec<RuntimeValue>,
        frame: &Frame,
        depth: u32,
    ) -> Result<Option<RuntimeValue>, ExecutionError> {
        let runtime_class = self.ctx.object(receiver).class.clone();
        let (resolved, target) = self
            .ctx
            .loader
            .resolve_method(&runtime_class, name, formals)
            .ok_or_else(|| {
                ExecutionError::Illegal(format!("unresolved call {runtime_class}.{name}"))
            })?;
        let caller = frame.this.or(frame.caller);
        let on_self = frame.this == Some(receiver);
        self.invoke(
            &resolved.def.name.clone(),
            &target,
            Some(receiver),
            args,
            caller,
            on_self,
            depth + 1,
        )
    }

    fn intrinsic(&mut self, intrinsic: &Intrinsic, frame: &mut Frame) -> Result<(), ExecutionError> {
        match intrinsic {
            Intrinsic::ChargeCpu(amount) => self.ctx.gas.charge_cpu(*amount),
            Intrinsic::ChargeRam(amount) => self.ctx.gas.charge_ram(*amount),
            Intrinsic::LoadLazy(field) => {
                let receiver = pop_object(frame)?;
                let value = load_lazy(self.ctx, receiver, field)?;
                frame.stack.push(value);
                Ok(())
            }
            Intrinsic::FromContract => {
                // The prologue only checks the binding; the caller slot
                // was filled at invocation.
                match frame.caller {
                    Some(index) if self.ctx.loader.is_contract(&self.ctx.object(index).class) => {
                        Ok(())
                    }
                    _ => Err(ExecutionError::Illegal(
                        "from-contract code entered without a contract caller".into(),
                    )),
                }
            }
            Intrinsic::PayableFromContract => self.payable(frame, false),
            Intrinsic::RedPayableFromContract => self.payable(frame, true),
            Intrinsic::Event => {
                let event = pop_object(frame)?;
                let class = self.ctx.object(event).class.clone();
                let is_event = self
                    .ctx
                    .loader
                    .resolve(&class)
                    .map(|r| r.info.is_event)
                    .unwrap_or(false);
                if !is_event {
                    return Err(ExecutionError::Illegal(format!(
                        "{class} emitted as an event"
                    )));
                }
                self.ctx.events.push(event);
                Ok(())
            }
        }
    }

    /// The payable prologue: move the paid amount from the caller onto
    /// the callee before the body runs.
    fn payable(&mut self, frame: &mut Frame, red: bool) -> Result<(), ExecutionError> {
        let callee = frame.this.ok_or_else(|| {
            ExecutionError::Illegal("payable prologue outside instance code".into())
        })?;
        let caller = frame.caller.ok_or_else(|| {
            ExecutionError::Illegal("payable code entered without a caller".into())
        })?;
        let amount = match frame.locals.get(frame.first_formal) {
            Some(RuntimeValue::Int(v)) => BigInt::from(*v),
            Some(RuntimeValue::Long(v)) => BigInt::from(*v),
            Some(RuntimeValue::BigInt(v)) => v.clone(),
            other => {
                return Err(ExecutionError::Illegal(format!(
                    "payable amount is {other:?}"
                )))
            }
        };
        self.ctx.transfer(caller, callee, &amount, red)
    }

    fn exception_of(&self, thrown: usize) -> ExecutionError {
        let slot = self.ctx.object(thrown);
        let class = slot.class.clone();
        let message = slot
            .fields
            .iter()
            .find(|(f, _)| f.name == "message")
            .and_then(|(_, cell)| match &cell.current {
                RuntimeValue::Str(s) => Some(s.clone()),
                _ => None,
            })
            .unwrap_or_default();
        let checked = self
            .ctx
            .loader
            .resolve(&class)
            .map(|r| r.info.is_checked_exception)
            .unwrap_or(false);
        ExecutionError::Contract {
            class_name: class,
            message,
            checked,
        }
    }
}

fn pop(frame: &mut Frame) -> Result<RuntimeValue, ExecutionError> {
    frame
        .stack
        .pop()
        .ok_or_else(|| ExecutionError::Illegal("operand stack underflow".into()))
}

fn pop_n(frame: &mut Frame, n: usize) -> Result<Vec<RuntimeValue>, ExecutionError> {
    if frame.stack.len() < n {
        return Err(ExecutionError::Illegal("operand stack underflow".into()));
    }
    Ok(frame.stack.split_off(frame.stack.len() - n))
}

fn pop_object(frame: &mut Frame) -> Result<usize, ExecutionError> {
    match pop(frame)? {
        RuntimeValue::Object(index) => Ok(index),
        RuntimeValue::Null => Err(ExecutionError::engine_exception(
            lang::NULL_POINTER_EXCEPTION,
            "null dereference",
        )),
        other => Err(ExecutionError::Illegal(format!(
            "object expected, found {other:?}"
        ))),
    }
}

fn constant_of(value: &StorageValue) -> Result<RuntimeValue, ExecutionError> {
    Ok(match value {
        StorageValue::Null => RuntimeValue::Null,
        StorageValue::Boolean(v) => RuntimeValue::Bool(*v),
        StorageValue::Byte(v) => RuntimeValue::Byte(*v),
        StorageValue::Char(v) => RuntimeValue::Char(*v),
        StorageValue::Short(v) => RuntimeValue::Short(*v),
        StorageValue::Int(v) => RuntimeValue::Int(*v),
        StorageValue::Long(v) => RuntimeValue::Long(*v),
        StorageValue::Float(v) => RuntimeValue::Float(*v),
        StorageValue::Double(v) => RuntimeValue::Double(*v),
        StorageValue::BigInteger(v) => RuntimeValue::BigInt(v.clone()),
        StorageValue::String(v) => RuntimeValue::Str(v.clone()),
        StorageValue::Enum { class, name } => RuntimeValue::Enum {
            class: class.clone(),
            name: name.clone(),
        },
        StorageValue::Reference(_) => {
            return Err(ExecutionError::Illegal(
                "storage reference literal escaped verification".into(),
            ))
        }
    })
}

enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

fn binary_arith(frame: &mut Frame, op: ArithOp) -> Result<(), ExecutionError> {
    let b = pop(frame)?;
    let a = pop(frame)?;
    let result = match (a, b) {
        (RuntimeValue::Int(x), RuntimeValue::Int(y)) => RuntimeValue::Int(int_op(x, y, &op)?),
        (RuntimeValue::Long(x), RuntimeValue::Long(y)) => RuntimeValue::Long(long_op(x, y, &op)?),
        (RuntimeValue::BigInt(x), RuntimeValue::BigInt(y)) => {
            RuntimeValue::BigInt(big_op(x, y, &op)?)
        }
        (RuntimeValue::Double(x), RuntimeValue::Double(y)) => RuntimeValue::Double(match op {
            ArithOp::Add => x + y,
            ArithOp::Sub => x - y,
            ArithOp::Mul => x * y,
            ArithOp::Div => x / y,
            ArithOp::Rem => x % y,
        }),
        (RuntimeValue::Float(x), RuntimeValue::Float(y)) => RuntimeValue::Float(match op {
            ArithOp::Add => x + y,
            ArithOp::Sub => x - y,
            ArithOp::Mul => x * y,
            ArithOp::Div => x / y,
            ArithOp::Rem => x % y,
        }),
        (RuntimeValue::Str(x), RuntimeValue::Str(y)) if matches!(op, ArithOp::Add) => {
            RuntimeValue::Str(x + &y)
        }
        (a, b) => {
            return Err(ExecutionError::Illegal(format!(
                "arithmetic on {a:?} and {b:?}"
            )))
        }
    };
    frame.stack.push(result);
    Ok(())
}

fn int_op(x: i32, y: i32, op: &ArithOp) -> Result<i32, ExecutionError> {
    match op {
        ArithOp::Add => Ok(x.wrapping_add(y)),
        ArithOp::Sub => Ok(x.wrapping_sub(y)),
        ArithOp::Mul => Ok(x.wrapping_mul(y)),
        ArithOp::Div if y == 0 => Err(div_by_zero()),
        ArithOp::Div => Ok(x.wrapping_div(y)),
        ArithOp::Rem if y == 0 => Err(div_by_zero()),
        ArithOp::Rem => Ok(x.wrapping_rem(y)),
    }
}

fn long_op(x: i64, y: i64, op: &ArithOp) -> Result<i64, ExecutionError> {
    match op {
        ArithOp::Add => Ok(x.wrapping_add(y)),
        ArithOp::Sub => Ok(x.wrapping_sub(y)),
        ArithOp::Mul => Ok(x.wrapping_mul(y)),
        ArithOp::Div if y == 0 => Err(div_by_zero()),
        ArithOp::Div => Ok(x.wrapping_div(y)),
        ArithOp::Rem if y == 0 => Err(div_by_zero()),
        ArithOp::Rem => Ok(x.wrapping_rem(y)),
    }
}

fn big_op(x: BigInt, y: BigInt, op: &ArithOp) -> Result<BigInt, ExecutionError> {
    match op {
        ArithOp::Add => Ok(x + y),
        ArithOp::Sub => Ok(x - y),
        ArithOp::Mul => Ok(x * y),
        ArithOp::Div if y == BigInt::from(0) => Err(div_by_zero()),
        ArithOp::Div => Ok(x / y),
        ArithOp::Rem if y == BigInt::from(0) => Err(div_by_zero()),
        ArithOp::Rem => Ok(x % y),
    }
}

fn div_by_zero() -> ExecutionError {
    ExecutionError::engine_exception(lang::ARITHMETIC_EXCEPTION, "division by zero")
}

fn negate(value: RuntimeValue) -> Result<RuntimeValue, ExecutionError> {
    Ok(match value {
        RuntimeValue::Int(v) => RuntimeValue::Int(v.wrapping_neg()),
        RuntimeValue::Long(v) => RuntimeValue::Long(v.wrapping_neg()),
        RuntimeValue::BigInt(v) => RuntimeValue::BigInt(-v),
        RuntimeValue::Float(v) => RuntimeValue::Float(-v),
        RuntimeValue::Double(v) => RuntimeValue::Double(-v),
        other => {
            return Err(ExecutionError::Illegal(format!("negation of {other:?}")))
        }
    })
}

fn compare(
    frame: &mut Frame,
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> Result<(), ExecutionError> {
    let b = pop(frame)?;
    let a = pop(frame)?;
    let ordering = match (&a, &b) {
        (RuntimeValue::Int(x), RuntimeValue::Int(y)) => x.cmp(y),
        (RuntimeValue::Long(x), RuntimeValue::Long(y)) => x.cmp(y),
        (RuntimeValue::BigInt(x), RuntimeValue::BigInt(y)) => x.cmp(y),
        (RuntimeValue::Byte(x), RuntimeValue::Byte(y)) => x.cmp(y),
        (RuntimeValue::Short(x), RuntimeValue::Short(y)) => x.cmp(y),
        (RuntimeValue::Char(x), RuntimeValue::Char(y)) => x.cmp(y),
        (RuntimeValue::Str(x), RuntimeValue::Str(y)) => x.cmp(y),
        (RuntimeValue::Double(x), RuntimeValue::Double(y)) => x
            .partial_cmp(y)
            .unwrap_or_else(|| x.to_bits().cmp(&y.to_bits())),
        (RuntimeValue::Float(x), RuntimeValue::Float(y)) => x
            .partial_cmp(y)
            .unwrap_or_else(|| x.to_bits().cmp(&y.to_bits())),
        _ => {
            return Err(ExecutionError::Illegal(format!(
                "comparison of {a:?} and {b:?}"
            )))
        }
    };
    frame.stack.push(RuntimeValue::Bool(accept(ordering)));
    Ok(())
}
