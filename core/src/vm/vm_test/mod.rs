pub(super) use std::sync::Arc;
pub(super) use std::sync::atomic::{AtomicUsize, Ordering};

pub(super) use crate::rt::ThreadScheduler;
pub(super) use crate::val::{BError, BType, BValue};
pub(super) use crate::vm::{
    CallableUnit, ExecutionContext, NativeInterpreter, PackageInfo, Program, RegisterCounts, Vm, VmError, WorkerExit,
};

/// A VM over `packages` that runs scheduled workers on plain threads.
pub(super) fn vm_with(packages: Vec<PackageInfo>, globals: RegisterCounts, interp: NativeInterpreter) -> Vm {
    Vm::builder(Arc::new(Program::new(packages, globals)), Arc::new(interp))
        .scheduler(Arc::new(ThreadScheduler::default()))
        .build()
        .unwrap()
}

pub(super) fn counts(longs: usize, strings: usize) -> RegisterCounts {
    RegisterCounts {
        longs,
        strings,
        ..Default::default()
    }
}

/// `calc:add(int, int) -> int`, counting how many times its body runs.
pub(super) fn add_unit() -> Arc<CallableUnit> {
    CallableUnit::builder("calc", "add")
        .params([BType::Int, BType::Int])
        .returns([BType::Int])
        .build()
        .unwrap()
}

pub(super) fn register_add(interp: &mut NativeInterpreter, runs: Arc<AtomicUsize>) {
    interp.register("calc", "add", 0, move |_, ctx: &mut ExecutionContext| {
        runs.fetch_add(1, Ordering::SeqCst);
        ctx.result.longs[0] = ctx.local.longs[0] + ctx.local.longs[1];
        Ok(WorkerExit::Return)
    });
}

mod invoke;
mod response;
mod workers;
