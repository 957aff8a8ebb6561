//! Invocation core of the register VM
//!
//! Marshals boxed arguments into typed register banks, dispatches a callable unit's
//! workers (worker 0 on the caller's path, the rest through the scheduler), aggregates
//! their results in a response context and gates every package behind a one-time init.

mod context;
mod diagnostics;
mod error;
mod interp;
mod marshal;
mod native;
mod program;
mod registers;
mod response;
#[allow(clippy::module_inception)]
mod vm;

pub use context::{ContextArena, ContextId, ContextRecord, ExecutionContext, GlobalProps, WorkerState};
pub use diagnostics::{DefaultDiagnostics, Diagnostics};
pub use error::VmError;
pub use interp::{Interpreter, WorkerExit};
pub use marshal::{copy_returns, lower_arguments, lower_into, raise_returns, seed_worker_locals};
pub use native::{NativeBody, NativeInterpreter};
pub use program::{
    CallableUnit, CallableUnitBuilder, ConstAttr, ConstValue, DEFAULT_WORKER, GlobalMemory, GlobalVar, PackageBuilder,
    PackageInfo, Program, UnitKind, WorkerInfo,
};
pub use registers::{RegisterCounts, RegisterFile, RegisterLayout};
pub use response::{ResponseContext, ResponseOutcome, WorkerOutcome};
pub use vm::{Invocation, Vm, VmBuilder, VmStats, WorkerTask};

#[cfg(test)]
mod vm_test;
