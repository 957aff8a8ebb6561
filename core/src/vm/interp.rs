use super::{ExecutionContext, Vm, VmError};

/// How a worker body left the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Executed a return; the context's result registers hold the values.
    Return,
    /// Reached the end of its body without returning values.
    Halt,
}

/// The instruction loop that runs a worker once it becomes `Running`.
///
/// Errors raised by the program go into the context's error slot (or come back as
/// [`VmError::Propagated`]); any other `Err` is treated as a fault of the worker.
pub trait Interpreter: Send + Sync {
    fn execute(&self, vm: &Vm, ctx: &mut ExecutionContext) -> Result<WorkerExit, VmError>;
}
