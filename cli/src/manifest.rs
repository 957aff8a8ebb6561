//! TOML program manifests: packages, signatures and per-worker op lists.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use serde::Deserialize;

use bvm_core::val::{BType, ValueTag};
use bvm_core::vm::{CallableUnit, ConstAttr, PackageInfo, Program, RegisterCounts, UnitKind};

use crate::script::{Op, ScriptInterpreter};

pub const INIT_UNIT_NAME: &str = "<init>";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub globals: RegisterCounts,
    #[serde(default)]
    pub packages: Vec<PackageSpec>,
    /// Attributes resolved from package constants once their package has initialized.
    #[serde(default)]
    pub constants: Vec<ConstRef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageSpec {
    pub name: String,
    #[serde(default)]
    pub globals: Vec<GlobalSpec>,
    pub init: Option<UnitSpec>,
    #[serde(default)]
    pub functions: Vec<UnitSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSpec {
    pub name: String,
    pub index: usize,
    #[serde(rename = "type")]
    pub ty: BType,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub action: bool,
    #[serde(default)]
    pub params: Vec<BType>,
    #[serde(default)]
    pub returns: Vec<BType>,
    #[serde(default)]
    pub workers: Vec<WorkerSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerSpec {
    #[serde(default = "default_worker_name")]
    pub name: String,
    #[serde(default)]
    pub locals: RegisterCounts,
    #[serde(default)]
    pub ops: Vec<Op>,
}

fn default_worker_name() -> String {
    bvm_core::vm::DEFAULT_WORKER.to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstRef {
    pub package: String,
    pub name: String,
}

/// A manifest turned into something the VM can run.
pub struct Loaded {
    pub program: Program,
    pub interpreter: ScriptInterpreter,
    pub constants: Vec<ConstAttr>,
}

impl Manifest {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let src = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest '{}'", path.display()))?;
        Self::parse(&src).with_context(|| format!("Invalid manifest '{}'", path.display()))
    }

    pub fn parse(src: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(src)?)
    }

    pub fn load(self) -> anyhow::Result<Loaded> {
        let mut interpreter = ScriptInterpreter::new();
        let mut packages = Vec::with_capacity(self.packages.len());
        for spec in self.packages {
            let mut builder = PackageInfo::builder(&spec.name);
            for global in &spec.globals {
                let tag = global.ty.tag()?;
                if global.index >= self.globals.get(tag) {
                    bail!(
                        "global '{}:{}' uses {} slot {} but only {} are declared",
                        spec.name,
                        global.name,
                        tag,
                        global.index,
                        self.globals.get(tag)
                    );
                }
                builder = builder.global(&global.name, global.index, global.ty.clone());
            }
            if let Some(init) = spec.init {
                let unit = build_unit(&spec.name, INIT_UNIT_NAME, UnitKind::Init, init, &self.globals, &mut interpreter)?;
                builder = builder.init(unit);
            }
            for function in spec.functions {
                if function.name.is_empty() {
                    bail!("package '{}' declares a function without a name", spec.name);
                }
                let kind = if function.action { UnitKind::Action } else { UnitKind::Function };
                let name = function.name.clone();
                let unit = build_unit(&spec.name, &name, kind, function, &self.globals, &mut interpreter)?;
                builder = builder.function(unit);
            }
            packages.push(builder.build());
        }

        let program = Program::new(packages, self.globals);
        let mut constants = Vec::with_capacity(self.constants.len());
        for c in &self.constants {
            let attr = ConstAttr::new(&c.package, &c.name);
            program.defer_constant(attr.clone())?;
            constants.push(attr);
        }
        Ok(Loaded {
            program,
            interpreter,
            constants,
        })
    }
}

fn build_unit(
    package: &str,
    name: &str,
    kind: UnitKind,
    spec: UnitSpec,
    globals: &RegisterCounts,
    interpreter: &mut ScriptInterpreter,
) -> anyhow::Result<Arc<CallableUnit>> {
    let mut builder = CallableUnit::builder(package, name)
        .kind(kind)
        .params(spec.params)
        .returns(spec.returns);
    for worker in &spec.workers {
        builder = builder.worker(&worker.name, worker.locals);
    }
    let unit = builder.build()?;

    for (index, worker) in spec.workers.into_iter().enumerate() {
        let info = &unit.workers()[index];
        for (pc, op) in worker.ops.iter().enumerate() {
            check_op(op, info.locals(), unit.returns().counts(), globals).with_context(|| {
                format!("{}({}) op #{}", unit.qualified_name(), worker.name, pc)
            })?;
        }
        interpreter.register(package, name, index, worker.ops);
    }
    Ok(unit)
}

fn check_slot(what: &str, tag: ValueTag, idx: usize, counts: &RegisterCounts) -> anyhow::Result<()> {
    let available = counts.get(tag);
    if idx >= available {
        bail!("{} {} register {} out of range ({} declared)", what, tag, idx, available);
    }
    Ok(())
}

/// Reject ops that would index past a register bank or use a bank they cannot operate on.
fn check_op(op: &Op, locals: &RegisterCounts, rets: &RegisterCounts, globals: &RegisterCounts) -> anyhow::Result<()> {
    match op {
        Op::Const { dst, value } => check_slot("local", value.tag(), *dst, locals),
        Op::Add { bank, dst, a, b } => {
            if !matches!(bank, ValueTag::Int | ValueTag::Float) {
                bail!("add is not defined on {} registers", bank);
            }
            for idx in [dst, a, b] {
                check_slot("local", *bank, *idx, locals)?;
            }
            Ok(())
        }
        Op::Concat { dst, a, b } => {
            for idx in [dst, a, b] {
                check_slot("local", ValueTag::Str, *idx, locals)?;
            }
            Ok(())
        }
        Op::Move { bank, dst, src } => {
            check_slot("local", *bank, *dst, locals)?;
            check_slot("local", *bank, *src, locals)
        }
        Op::StoreRet { bank, src, ret } => {
            check_slot("local", *bank, *src, locals)?;
            check_slot("return", *bank, *ret, rets)
        }
        Op::StoreGlobal { bank, src, global } => {
            check_slot("local", *bank, *src, locals)?;
            check_slot("global", *bank, *global, globals)
        }
        Op::LoadGlobal { bank, dst, global } => {
            check_slot("local", *bank, *dst, locals)?;
            check_slot("global", *bank, *global, globals)
        }
        // Argument slots are checked against the callee when the call runs.
        Op::Call { .. } | Op::Return | Op::Raise { .. } | Op::Sleep { .. } => Ok(()),
    }
}

impl Loaded {
    /// Human-readable listing of every package, global and unit.
    pub fn describe(&self) -> String {
        let mut packages: Vec<_> = self.program.packages().collect();
        packages.sort_by(|a, b| a.name().cmp(b.name()));

        let mut out = String::new();
        for pkg in packages {
            out.push_str(&format!("package {}\n", pkg.name()));
            let mut globals: Vec<_> = pkg.globals().collect();
            globals.sort_by(|a, b| a.0.cmp(b.0));
            for (name, var) in globals {
                out.push_str(&format!("  global {}: {} @{}\n", name, var.ty, var.index));
            }
            if let Some(init) = pkg.init_unit() {
                out.push_str(&format!("  init {}\n", describe_unit(init)));
            }
            let mut functions: Vec<_> = pkg.functions().collect();
            functions.sort_by(|a, b| a.name().cmp(b.name()));
            for unit in functions {
                let label = match unit.kind() {
                    UnitKind::Action => "action",
                    _ => "function",
                };
                out.push_str(&format!("  {} {}\n", label, describe_unit(unit)));
            }
        }
        for attr in &self.constants {
            out.push_str(&format!("constant {}:{}\n", attr.package(), attr.name()));
        }
        out
    }
}

fn describe_unit(unit: &CallableUnit) -> String {
    let list = |tys: &[BType]| tys.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
    let workers: Vec<&str> = unit.workers().iter().map(|w| w.name().as_ref()).collect();
    format!(
        "{}({}) -> ({}) [workers: {}]",
        unit.name(),
        list(unit.params().types()),
        list(unit.returns().types()),
        workers.join(", ")
    )
}
