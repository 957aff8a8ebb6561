use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, ThreadId};

use once_cell::sync::OnceCell;
use tracing::{debug, error, warn};

use crate::val::{BType, BValue};
use crate::vm::{ConstAttr, ConstValue, ExecutionContext, PackageInfo, RegisterFile, VmError};

use super::{InitMark, Vm};

impl Vm {
    /// Run `pkg`'s init unit exactly once before any of its functions execute.
    ///
    /// Concurrent first callers block until the single run finishes and all observe its
    /// outcome. A failed init is cached: every later call into the package fails with the
    /// same fatal error. Calls made from inside the package's own init (`parent` descends
    /// from the init context) pass straight through.
    ///
    /// A call that would wait on an init its own thread is already running, or that closes
    /// a cycle of threads each initializing a package the next one needs, fails with
    /// [`VmError::InitCycle`] instead of blocking. Waits routed through a response (a
    /// scheduled worker of the init calling back into the package from a fresh root) are
    /// not detected and block.
    pub fn ensure_initialized(&self, pkg: &Arc<PackageInfo>, parent: &ExecutionContext) -> Result<(), VmError> {
        let me = thread::current().id();
        if let Some(mark) = self.inner.initializing.get(pkg.name()).map(|entry| *entry) {
            if self.arena().ancestry(parent.id()).contains(&mark.ctx) {
                return Ok(());
            }
            if mark.thread == me {
                return Err(self.init_cycle(pkg));
            }
        }
        let cell = self
            .inner
            .init_cells
            .entry(pkg.name().clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        if let Some(done) = cell.get() {
            return done.clone();
        }

        self.inner.init_waits.insert(me, pkg.name().clone());
        if self.waits_on_itself(me, pkg.name()) {
            self.inner.init_waits.remove(&me);
            return Err(self.init_cycle(pkg));
        }
        let outcome = cell
            .get_or_init(|| {
                // This thread runs the init rather than waiting for it.
                self.inner.init_waits.remove(&me);
                self.run_package_init(pkg, parent)
            })
            .clone();
        self.inner.init_waits.remove(&me);
        outcome
    }

    /// Follow init holders and the packages they wait on, starting at `package`.
    fn waits_on_itself(&self, me: ThreadId, package: &Arc<str>) -> bool {
        let mut package = package.clone();
        for _ in 0..=self.inner.init_waits.len() {
            let Some(holder) = self.inner.initializing.get(&package).map(|mark| mark.thread) else {
                return false;
            };
            if holder == me {
                return true;
            }
            match self.inner.init_waits.get(&holder) {
                Some(next) => package = next.clone(),
                None => return false,
            }
        }
        false
    }

    fn init_cycle(&self, pkg: &PackageInfo) -> VmError {
        warn!(target: "bvm::vm::init", package = %pkg.name(), "package.init.cycle");
        VmError::InitCycle(pkg.name().clone())
    }

    pub fn is_initialized(&self, package: &str) -> bool {
        self.inner
            .init_cells
            .get(package)
            .is_some_and(|cell| matches!(cell.get(), Some(Ok(()))))
    }

    fn run_package_init(&self, pkg: &Arc<PackageInfo>, parent: &ExecutionContext) -> Result<(), VmError> {
        let Some(init) = pkg.init_unit() else {
            return self.resolve_constants(pkg);
        };
        self.counters().package_inits.fetch_add(1, Ordering::Relaxed);
        debug!(target: "bvm::vm::init", package = %pkg.name(), "package.init.start");

        let mut ctx = ExecutionContext::child_root(parent);
        self.inner.initializing.insert(
            pkg.name().clone(),
            InitMark {
                ctx: ctx.id(),
                thread: thread::current().id(),
            },
        );
        let invoked = self.invoke_unit(init, &mut ctx);
        self.inner.initializing.remove(pkg.name());

        if let Some(err) = ctx.error() {
            let trace = self.diagnostics().printable_stack_trace(err);
            error!(target: "bvm::vm::init", package = %pkg.name(), %trace, "package.init.failed");
            return Err(VmError::PackageInitFailure {
                package: pkg.name().clone(),
                trace,
            });
        }
        if let Err(fault) = invoked {
            if fault.is_fatal() {
                return Err(fault);
            }
            error!(target: "bvm::vm::init", package = %pkg.name(), error = %fault, "package.init.faulted");
            return Err(VmError::PackageInitFailure {
                package: pkg.name().clone(),
                trace: fault.to_string(),
            });
        }

        self.resolve_constants(pkg)?;
        debug!(target: "bvm::vm::init", package = %pkg.name(), "package.init.done");
        Ok(())
    }

    /// Read every pending constant attribute of `pkg` out of global memory, then forget them.
    ///
    /// Nothing is resolved unless every attribute can be; on failure the pending list is
    /// left as it was.
    fn resolve_constants(&self, pkg: &PackageInfo) -> Result<(), VmError> {
        let pending = pkg.take_pending_constants();
        if pending.is_empty() {
            return Ok(());
        }
        let values = self.program().globals().read(|regs| {
            pending
                .iter()
                .map(|attr| read_constant(pkg, attr, regs))
                .collect::<Result<Vec<_>, _>>()
        });
        let values = match values {
            Ok(values) => values,
            Err(err) => {
                error!(target: "bvm::vm::init", package = %pkg.name(), error = %err, "package.constants.failed");
                pkg.restore_pending_constants(pending);
                return Err(err);
            }
        };
        for (attr, value) in pending.iter().zip(values) {
            attr.resolve(value);
        }
        debug!(target: "bvm::vm::init", package = %pkg.name(), resolved = pending.len(), "package.constants.resolved");
        Ok(())
    }
}

fn read_constant(pkg: &PackageInfo, attr: &ConstAttr, regs: &RegisterFile) -> Result<ConstValue, VmError> {
    let var = pkg.global(attr.name()).ok_or_else(|| VmError::UnknownConstant {
        package: attr.package().clone(),
        name: attr.name().clone(),
    })?;
    let unsupported = || VmError::UnsupportedConstantType {
        package: attr.package().clone(),
        name: attr.name().clone(),
        type_name: var.ty.to_string(),
    };
    let tag = match &var.ty {
        BType::Boolean | BType::Int | BType::Float | BType::String => var.ty.tag()?,
        _ => return Err(unsupported()),
    };
    let value = regs.get(tag, var.index).ok_or_else(|| VmError::GlobalOutOfRange {
        package: attr.package().clone(),
        name: attr.name().clone(),
        tag,
        index: var.index,
    })?;
    match value {
        BValue::Bool(b) => Ok(ConstValue::Bool(b)),
        BValue::Int(i) => Ok(ConstValue::Int(i)),
        BValue::Float(f) => Ok(ConstValue::Float(f)),
        BValue::Str(s) => Ok(ConstValue::Str(s)),
        _ => Err(unsupported()),
    }
}
