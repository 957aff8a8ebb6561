use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::debug;

use crate::val::BValue;
use crate::vm::{
    CallableUnit, ContextArena, ContextId, ExecutionContext, RegisterFile, ResponseContext, ResponseOutcome,
    VmError, WorkerInfo, WorkerState, lower_arguments, raise_returns, seed_worker_locals,
};

use super::{Vm, WorkerTask};

/// An invocation whose workers have been dispatched but whose caller has not joined yet.
///
/// Worker 0 is held here until the caller runs it on its own path, either explicitly via
/// [`Invocation::run_caller_worker`] or implicitly when joining.
pub struct Invocation {
    vm: Vm,
    unit: Arc<CallableUnit>,
    parent: ContextId,
    response: Arc<ResponseContext>,
    caller_worker: Option<WorkerTask>,
}

impl Invocation {
    pub fn unit(&self) -> &Arc<CallableUnit> {
        &self.unit
    }

    pub fn response(&self) -> &Arc<ResponseContext> {
        &self.response
    }

    /// Run worker 0 to completion on the current path. Later calls are no-ops.
    pub fn run_caller_worker(&mut self) -> Option<WorkerState> {
        let task = self.caller_worker.take()?;
        self.vm.counters().synchronous.fetch_add(1, Ordering::Relaxed);
        Some(self.vm.scheduler().run_synchronously(task))
    }

    /// Mark the parent as waiting, finish worker 0 if still pending, park until every worker
    /// has contributed, then copy the return values into `target` at `ret_regs`.
    pub fn wait_into(mut self, target: &mut RegisterFile, ret_regs: &[usize]) -> Result<(), VmError> {
        suspend_parent(self.vm.arena(), self.parent)?;
        self.run_caller_worker();
        self.vm.scheduler().park_until_response(&self.response);
        resume_parent(self.vm.arena(), self.parent);
        match self.response.outcome() {
            ResponseOutcome::Values => {
                self.response.deliver_into(target, ret_regs);
                Ok(())
            }
            ResponseOutcome::Error(err) => Err(VmError::Propagated(err)),
            ResponseOutcome::Fault(fault) => Err(fault),
        }
    }
}

impl Drop for Invocation {
    fn drop(&mut self) {
        resume_parent(self.vm.arena(), self.parent);
    }
}

/// A released parent has nothing to mark; one already waiting stays waiting.
fn suspend_parent(arena: &ContextArena, parent: ContextId) -> Result<(), VmError> {
    match arena.state(parent) {
        Some(WorkerState::Running) => arena.transition(parent, WorkerState::WaitingForResponse).map(|_| ()),
        Some(WorkerState::WaitingForResponse) | None => Ok(()),
        Some(other) => Err(VmError::InvalidTransition {
            id: parent,
            from: Some(other),
            to: WorkerState::WaitingForResponse,
        }),
    }
}

fn resume_parent(arena: &ContextArena, parent: ContextId) {
    if arena.state(parent) == Some(WorkerState::WaitingForResponse) {
        let _ = arena.transition(parent, WorkerState::Running);
    }
}

fn check_arity(unit: &CallableUnit, actual: usize) -> Result<(), VmError> {
    let expected = unit.params().len();
    if expected != actual {
        return Err(VmError::ArityMismatch {
            unit: Arc::from(unit.qualified_name()),
            expected,
            actual,
        });
    }
    Ok(())
}

impl Vm {
    /// Resolve `package:function`, initialize its package once, and invoke it from a
    /// throwaway root context.
    pub fn invoke_by_name(&self, package: &str, function: &str, args: &[BValue]) -> Result<Vec<BValue>, VmError> {
        let mut root = self.root_context();
        self.invoke_by_name_in(&mut root, package, function, args)
    }

    pub fn invoke_by_name_in(
        &self,
        parent: &mut ExecutionContext,
        package: &str,
        function: &str,
        args: &[BValue],
    ) -> Result<Vec<BValue>, VmError> {
        let pkg = self
            .program()
            .package(package)
            .ok_or_else(|| VmError::PackageNotFound(package.to_string()))?
            .clone();
        let unit = pkg
            .function(function)
            .ok_or_else(|| VmError::FunctionNotFound {
                package: package.to_string(),
                function: function.to_string(),
            })?
            .clone();
        check_arity(&unit, args.len())?;
        self.ensure_initialized(&pkg, parent)?;
        self.invoke_with_args(&unit, parent, args)
    }

    /// Invoke `unit` with boxed arguments and return its boxed results.
    ///
    /// Package init is not gated here; callers resolving `unit` themselves must go through
    /// [`Vm::ensure_initialized`] first.
    pub fn invoke_with_args(
        &self,
        unit: &Arc<CallableUnit>,
        parent: &mut ExecutionContext,
        args: &[BValue],
    ) -> Result<Vec<BValue>, VmError> {
        check_arity(unit, args.len())?;
        let arg_regs = lower_arguments(unit.params(), args)?;
        let mut ret_regs = RegisterFile::new(unit.returns().counts());
        let invocation = self.dispatch(unit, parent, &arg_regs, unit.params().regs(), true)?;
        invocation.wait_into(&mut ret_regs, unit.returns().regs())?;
        Ok(raise_returns(unit.returns(), &ret_regs))
    }

    /// Register-level blocking call: arguments come from `parent.local` at `arg_regs`, results
    /// land in `parent.local` at `ret_regs`.
    ///
    /// A propagated error is also left in the parent's error slot. As with
    /// [`Vm::invoke_with_args`], the caller gates the callee's package init.
    pub fn invoke_callable(
        &self,
        unit: &Arc<CallableUnit>,
        parent: &mut ExecutionContext,
        arg_regs: &[usize],
        ret_regs: &[usize],
    ) -> Result<(), VmError> {
        let invocation = self.dispatch(unit, parent, &parent.local, arg_regs, true)?;
        match invocation.wait_into(&mut parent.local, ret_regs) {
            Err(VmError::Propagated(err)) => {
                parent.raise(err.clone());
                Err(VmError::Propagated(err))
            }
            other => other,
        }
    }

    /// Invoke a unit that takes no arguments and returns nothing, waiting for it.
    pub fn invoke_unit(&self, unit: &Arc<CallableUnit>, parent: &mut ExecutionContext) -> Result<(), VmError> {
        self.invoke_callable(unit, parent, &[], &[])
    }

    /// Dispatch every worker of `unit` without blocking; the caller runs worker 0 and joins.
    ///
    /// The parent keeps running until it joins through [`Invocation::wait_into`], which marks
    /// it as waiting for the rest of the join. Package init is not gated here.
    pub fn begin_invocation(
        &self,
        unit: &Arc<CallableUnit>,
        parent: &ExecutionContext,
        source: &RegisterFile,
        arg_regs: &[usize],
    ) -> Result<Invocation, VmError> {
        self.dispatch(unit, parent, source, arg_regs, false)
    }

    fn dispatch(
        &self,
        unit: &Arc<CallableUnit>,
        parent: &ExecutionContext,
        source: &RegisterFile,
        arg_regs: &[usize],
        wait_for_response: bool,
    ) -> Result<Invocation, VmError> {
        check_arity(unit, arg_regs.len())?;
        let workers = unit.workers();
        let response = Arc::new(ResponseContext::new(unit.returns().clone(), wait_for_response));
        self.counters().responses.fetch_add(1, Ordering::Relaxed);
        response.expect(workers.len());
        debug!(
            target: "bvm::vm::invoke",
            unit = %unit.qualified_name(),
            workers = workers.len(),
            wait = wait_for_response,
            parent = parent.id(),
            "invoke.dispatch"
        );

        if wait_for_response {
            self.scheduler().switch_to_wait_for_response(parent)?;
        }
        let mut invocation = Invocation {
            vm: self.clone(),
            unit: unit.clone(),
            parent: parent.id(),
            response: response.clone(),
            caller_worker: None,
        };

        for worker in &workers[1..] {
            let task = self.worker_task(unit, worker, parent, source, arg_regs, &response, false)?;
            self.counters().scheduled.fetch_add(1, Ordering::Relaxed);
            self.scheduler().schedule(task)?;
        }
        invocation.caller_worker = Some(self.worker_task(unit, &workers[0], parent, source, arg_regs, &response, true)?);
        Ok(invocation)
    }

    #[allow(clippy::too_many_arguments)]
    fn worker_task(
        &self,
        unit: &Arc<CallableUnit>,
        worker: &Arc<WorkerInfo>,
        parent: &ExecutionContext,
        source: &RegisterFile,
        arg_regs: &[usize],
        response: &Arc<ResponseContext>,
        run_in_caller: bool,
    ) -> Result<WorkerTask, VmError> {
        let local = seed_worker_locals(worker.locals(), unit.params(), source, arg_regs);
        let result = RegisterFile::new(unit.returns().counts());
        let ctx = ExecutionContext::for_worker(
            parent.arena().clone(),
            parent.id(),
            unit.clone(),
            worker.clone(),
            local,
            result,
            parent.props().clone(),
            run_in_caller,
        );
        self.counters().contexts.fetch_add(1, Ordering::Relaxed);
        WorkerTask::new(self.clone(), ctx, response.clone())
    }
}
