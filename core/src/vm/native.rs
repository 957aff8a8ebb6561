//! Closure-table interpreter for embedders and tests.

use std::fmt;
use std::sync::Arc;

use crate::util::fast_map::{FastHashMap, fast_hash_map_new};

use super::{ExecutionContext, Interpreter, Vm, VmError, WorkerExit};

pub type NativeBody = Arc<dyn Fn(&Vm, &mut ExecutionContext) -> Result<WorkerExit, VmError> + Send + Sync>;

/// Runs each worker by calling a Rust closure registered for `(package, unit, worker)`.
#[derive(Default, Clone)]
pub struct NativeInterpreter {
    bodies: FastHashMap<(String, String, usize), NativeBody>,
}

impl fmt::Debug for NativeInterpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeInterpreter")
            .field("bodies", &self.bodies.len())
            .finish()
    }
}

impl NativeInterpreter {
    pub fn new() -> Self {
        Self {
            bodies: fast_hash_map_new(),
        }
    }

    pub fn register<F>(&mut self, package: &str, unit: &str, worker: usize, body: F) -> &mut Self
    where
        F: Fn(&Vm, &mut ExecutionContext) -> Result<WorkerExit, VmError> + Send + Sync + 'static,
    {
        self.bodies
            .insert((package.to_string(), unit.to_string(), worker), Arc::new(body));
        self
    }

    pub fn with<F>(mut self, package: &str, unit: &str, worker: usize, body: F) -> Self
    where
        F: Fn(&Vm, &mut ExecutionContext) -> Result<WorkerExit, VmError> + Send + Sync + 'static,
    {
        self.register(package, unit, worker, body);
        self
    }
}

impl Interpreter for NativeInterpreter {
    fn execute(&self, vm: &Vm, ctx: &mut ExecutionContext) -> Result<WorkerExit, VmError> {
        let (Some(unit), Some(worker)) = (ctx.unit(), ctx.worker()) else {
            return Ok(WorkerExit::Halt);
        };
        let key = (unit.package().to_string(), unit.name().to_string(), worker.index());
        let body = self.bodies.get(&key).cloned().ok_or_else(|| VmError::NoWorkerBody {
            unit: Arc::from(unit.qualified_name()),
            worker: worker.index(),
        })?;
        body(vm, ctx)
    }
}
