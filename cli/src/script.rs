//! Straight-line op interpreter for manifest-defined workers.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::trace;

use bvm_core::util::fast_map::{FastHashMap, fast_hash_map_new};
use bvm_core::val::{BError, BValue, ValueTag};
use bvm_core::vm::{ExecutionContext, Interpreter, Vm, VmError, WorkerExit};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Literal {
    pub fn tag(&self) -> ValueTag {
        match self {
            Literal::Bool(_) => ValueTag::Bool,
            Literal::Int(_) => ValueTag::Int,
            Literal::Float(_) => ValueTag::Float,
            Literal::Str(_) => ValueTag::Str,
        }
    }

    fn to_value(&self) -> BValue {
        match self {
            Literal::Bool(b) => BValue::Bool(*b),
            Literal::Int(i) => BValue::Int(*i),
            Literal::Float(f) => BValue::Float(*f),
            Literal::Str(s) => BValue::from(s.as_str()),
        }
    }
}

/// One instruction of a worker body. Register operands index the worker's local banks.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Const {
        dst: usize,
        value: Literal,
    },
    Add {
        bank: ValueTag,
        dst: usize,
        a: usize,
        b: usize,
    },
    Concat {
        dst: usize,
        a: usize,
        b: usize,
    },
    Move {
        bank: ValueTag,
        dst: usize,
        src: usize,
    },
    StoreRet {
        bank: ValueTag,
        src: usize,
        ret: usize,
    },
    Return,
    Raise {
        message: String,
    },
    StoreGlobal {
        bank: ValueTag,
        src: usize,
        global: usize,
    },
    LoadGlobal {
        bank: ValueTag,
        dst: usize,
        global: usize,
    },
    Call {
        package: String,
        function: String,
        #[serde(default)]
        args: Vec<usize>,
        #[serde(default)]
        rets: Vec<usize>,
    },
    Sleep {
        ms: u64,
    },
}

type BodyKey = (String, String, usize);

#[derive(Debug, Default)]
pub struct ScriptInterpreter {
    bodies: FastHashMap<BodyKey, Arc<[Op]>>,
}

impl ScriptInterpreter {
    pub fn new() -> Self {
        Self {
            bodies: fast_hash_map_new(),
        }
    }

    pub fn register(&mut self, package: &str, unit: &str, worker: usize, ops: Vec<Op>) {
        self.bodies
            .insert((package.to_string(), unit.to_string(), worker), Arc::from(ops));
    }
}

impl Interpreter for ScriptInterpreter {
    fn execute(&self, vm: &Vm, ctx: &mut ExecutionContext) -> Result<WorkerExit, VmError> {
        let (Some(unit), Some(worker)) = (ctx.unit(), ctx.worker()) else {
            return Ok(WorkerExit::Halt);
        };
        let key = (unit.package().to_string(), unit.name().to_string(), worker.index());
        let ops = self.bodies.get(&key).cloned().ok_or_else(|| VmError::NoWorkerBody {
            unit: Arc::from(unit.qualified_name()),
            worker: worker.index(),
        })?;

        for (pc, op) in ops.iter().enumerate() {
            trace!(target: "bvm::cli::script", ctx = ctx.id(), pc, ?op, "script.op");
            match op {
                Op::Const { dst, value } => {
                    let value = value.to_value();
                    // Literal tags always match their bank.
                    let _ = ctx.local.store(value.tag(), *dst, &value);
                }
                Op::Add { bank, dst, a, b } => match bank {
                    ValueTag::Int => ctx.local.longs[*dst] = ctx.local.longs[*a].wrapping_add(ctx.local.longs[*b]),
                    ValueTag::Float => ctx.local.doubles[*dst] = ctx.local.doubles[*a] + ctx.local.doubles[*b],
                    other => return Err(VmError::UnsupportedType(format!("add on {}", other))),
                },
                Op::Concat { dst, a, b } => {
                    let joined = format!("{}{}", ctx.local.strings[*a], ctx.local.strings[*b]);
                    ctx.local.strings[*dst] = Arc::from(joined);
                }
                Op::Move { bank, dst, src } => {
                    let value = ctx.local.load(*bank, *src);
                    let _ = ctx.local.store(*bank, *dst, &value);
                }
                Op::StoreRet { bank, src, ret } => {
                    let value = ctx.local.load(*bank, *src);
                    let _ = ctx.result.store(*bank, *ret, &value);
                }
                Op::Return => return Ok(WorkerExit::Return),
                Op::Raise { message } => {
                    ctx.raise(BError::new(message.as_str()));
                    return Ok(WorkerExit::Halt);
                }
                Op::StoreGlobal { bank, src, global } => {
                    let value = ctx.local.load(*bank, *src);
                    let _ = vm.program().globals().write(|regs| regs.store(*bank, *global, &value));
                }
                Op::LoadGlobal { bank, dst, global } => {
                    let value = vm.program().globals().read(|regs| regs.load(*bank, *global));
                    let _ = ctx.local.store(*bank, *dst, &value);
                }
                Op::Call {
                    package,
                    function,
                    args,
                    rets,
                } => {
                    let pkg = vm
                        .program()
                        .package(package)
                        .cloned()
                        .ok_or_else(|| VmError::PackageNotFound(package.clone()))?;
                    let callee = pkg
                        .function(function)
                        .cloned()
                        .ok_or_else(|| VmError::FunctionNotFound {
                            package: package.clone(),
                            function: function.clone(),
                        })?;
                    if rets.len() > callee.returns().len() {
                        return Err(VmError::ArityMismatch {
                            unit: Arc::from(callee.qualified_name()),
                            expected: callee.returns().len(),
                            actual: rets.len(),
                        });
                    }
                    vm.ensure_initialized(&pkg, ctx)?;
                    vm.invoke_callable(&callee, ctx, args, rets)?;
                }
                Op::Sleep { ms } => std::thread::sleep(Duration::from_millis(*ms)),
            }
        }
        Ok(WorkerExit::Halt)
    }
}
