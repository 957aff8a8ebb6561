mod init;
mod invoke;
mod task;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::ThreadId;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tracing::debug;

use crate::config::VmConfig;
use crate::rt::Scheduler;

use super::{
    ContextArena, ContextId, DefaultDiagnostics, Diagnostics, ExecutionContext, GlobalProps, Interpreter, Program, VmError,
};

pub use invoke::Invocation;
pub use task::WorkerTask;

type InitCell = Arc<OnceCell<Result<(), VmError>>>;

/// The context and thread currently running a package's init unit.
#[derive(Debug, Clone, Copy)]
struct InitMark {
    ctx: ContextId,
    thread: ThreadId,
}

#[derive(Debug, Default)]
struct VmCounters {
    contexts: AtomicU64,
    scheduled: AtomicU64,
    synchronous: AtomicU64,
    responses: AtomicU64,
    package_inits: AtomicU64,
}

/// Snapshot of invocation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmStats {
    pub contexts_created: u64,
    pub workers_scheduled: u64,
    pub workers_run_in_caller: u64,
    pub responses_created: u64,
    pub package_inits: u64,
}

struct VmInner {
    program: Arc<Program>,
    interpreter: Arc<dyn Interpreter>,
    scheduler: Arc<dyn Scheduler>,
    diagnostics: Arc<dyn Diagnostics>,
    arena: Arc<ContextArena>,
    props: GlobalProps,
    init_cells: DashMap<Arc<str>, InitCell>,
    initializing: DashMap<Arc<str>, InitMark>,
    /// Package each thread is blocked on while another thread initializes it.
    init_waits: DashMap<ThreadId, Arc<str>>,
    counters: VmCounters,
}

/// Invocation core bound to one program, interpreter and scheduler.
///
/// Cheap to clone; clones share every piece of state.
#[derive(Clone)]
pub struct Vm {
    inner: Arc<VmInner>,
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("scheduler", &self.inner.scheduler)
            .field("live_contexts", &self.inner.arena.len())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Vm {
    pub fn builder(program: Arc<Program>, interpreter: Arc<dyn Interpreter>) -> VmBuilder {
        VmBuilder {
            program,
            interpreter,
            scheduler: None,
            diagnostics: None,
            props: None,
            config: VmConfig::default(),
        }
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.inner.program
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.inner.scheduler
    }

    pub fn diagnostics(&self) -> &Arc<dyn Diagnostics> {
        &self.inner.diagnostics
    }

    pub fn interpreter(&self) -> &Arc<dyn Interpreter> {
        &self.inner.interpreter
    }

    pub fn arena(&self) -> &Arc<ContextArena> {
        &self.inner.arena
    }

    pub fn props(&self) -> &GlobalProps {
        &self.inner.props
    }

    /// A fresh root context on the host's path, sharing the machine's properties.
    pub fn root_context(&self) -> ExecutionContext {
        ExecutionContext::root(self.inner.arena.clone(), self.inner.props.clone())
    }

    pub fn stats(&self) -> VmStats {
        let c = &self.inner.counters;
        VmStats {
            contexts_created: c.contexts.load(Ordering::Relaxed),
            workers_scheduled: c.scheduled.load(Ordering::Relaxed),
            workers_run_in_caller: c.synchronous.load(Ordering::Relaxed),
            responses_created: c.responses.load(Ordering::Relaxed),
            package_inits: c.package_inits.load(Ordering::Relaxed),
        }
    }

    fn counters(&self) -> &VmCounters {
        &self.inner.counters
    }
}

pub struct VmBuilder {
    program: Arc<Program>,
    interpreter: Arc<dyn Interpreter>,
    scheduler: Option<Arc<dyn Scheduler>>,
    diagnostics: Option<Arc<dyn Diagnostics>>,
    props: Option<GlobalProps>,
    config: VmConfig,
}

impl VmBuilder {
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn props(mut self, props: GlobalProps) -> Self {
        self.props = Some(props);
        self
    }

    /// Configuration used to build a scheduler when none is supplied.
    pub fn config(mut self, config: VmConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Vm, VmError> {
        let scheduler = match self.scheduler {
            Some(scheduler) => scheduler,
            None => self.config.scheduler.build()?,
        };
        debug!(target: "bvm::vm::invoke", scheduler = ?scheduler, "vm.build");
        Ok(Vm {
            inner: Arc::new(VmInner {
                program: self.program,
                interpreter: self.interpreter,
                scheduler,
                diagnostics: self.diagnostics.unwrap_or_else(|| Arc::new(DefaultDiagnostics)),
                arena: Arc::new(ContextArena::new()),
                props: self.props.unwrap_or_default(),
                init_cells: DashMap::new(),
                initializing: DashMap::new(),
                init_waits: DashMap::new(),
                counters: VmCounters::default(),
            }),
        })
    }
}
