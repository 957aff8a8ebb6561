use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{trace, warn};

use crate::val::BError;
use crate::vm::{ContextId, ExecutionContext, ResponseContext, VmError, WorkerExit, WorkerOutcome, WorkerState};

use super::Vm;

struct TaskParts {
    vm: Vm,
    ctx: ExecutionContext,
    response: Arc<ResponseContext>,
}

/// A runnable worker context bound to the response it reports to.
///
/// Running the task drives the context to a terminal state and hands exactly one
/// contribution to the response. A task dropped without running contributes a fault, so
/// the waiting caller is never left hanging.
pub struct WorkerTask {
    id: ContextId,
    parts: Option<TaskParts>,
}

impl WorkerTask {
    pub(crate) fn new(vm: Vm, ctx: ExecutionContext, response: Arc<ResponseContext>) -> Result<Self, VmError> {
        ctx.transition(WorkerState::Runnable)?;
        Ok(Self {
            id: ctx.id(),
            parts: Some(TaskParts { vm, ctx, response }),
        })
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn runs_in_caller(&self) -> bool {
        self.parts.as_ref().is_some_and(|p| p.ctx.runs_in_caller())
    }

    /// Execute the worker on the current thread until it completes or fails.
    pub fn run(mut self) -> WorkerState {
        let Some(TaskParts { vm, mut ctx, response }) = self.parts.take() else {
            return WorkerState::Failed;
        };
        if let Err(err) = ctx.transition(WorkerState::Running) {
            response.contribute(ctx.id(), WorkerOutcome::Faulted(err), &ctx.result);
            return WorkerState::Failed;
        }

        let executed = catch_unwind(AssertUnwindSafe(|| vm.interpreter().execute(&vm, &mut ctx)));
        let outcome = match executed {
            Ok(Ok(exit)) => match ctx.take_error() {
                Some(err) => WorkerOutcome::Raised(with_frame(&ctx, err)),
                None => match exit {
                    WorkerExit::Return => WorkerOutcome::Returned,
                    WorkerExit::Halt => WorkerOutcome::Finished,
                },
            },
            Ok(Err(VmError::Propagated(err))) => WorkerOutcome::Raised(with_frame(&ctx, err)),
            Ok(Err(fault)) => WorkerOutcome::Faulted(fault),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(target: "bvm::vm::invoke", ctx = ctx.id(), %message, "worker.panicked");
                WorkerOutcome::Faulted(VmError::WorkerPanicked {
                    unit: ctx.unit().map(|u| u.name().clone()).unwrap_or_else(|| Arc::from("<root>")),
                    worker: ctx.worker().map(|w| w.name().clone()).unwrap_or_else(|| Arc::from("?")),
                    message,
                })
            }
        };

        let terminal = match outcome {
            WorkerOutcome::Returned | WorkerOutcome::Finished => WorkerState::Completed,
            WorkerOutcome::Raised(_) | WorkerOutcome::Faulted(_) => WorkerState::Failed,
        };
        // A panic mid-invocation can leave the context parked as waiting.
        if ctx.state() == Some(WorkerState::WaitingForResponse) {
            let _ = ctx.transition(WorkerState::Running);
        }
        if let Err(err) = ctx.transition(terminal) {
            warn!(target: "bvm::vm::invoke", ctx = ctx.id(), error = %err, "worker.terminal_transition");
        }
        trace!(target: "bvm::vm::invoke", ctx = ctx.id(), state = ?terminal, "worker.done");
        response.contribute(ctx.id(), outcome, &ctx.result);
        terminal
    }
}

impl Drop for WorkerTask {
    fn drop(&mut self) {
        if let Some(TaskParts { ctx, response, .. }) = self.parts.take() {
            warn!(target: "bvm::vm::invoke", ctx = ctx.id(), "worker.dropped_unrun");
            let fault = VmError::Schedule(format!("worker context {} dropped before running", ctx.id()));
            response.contribute(ctx.id(), WorkerOutcome::Faulted(fault), &ctx.result);
        }
    }
}

fn with_frame(ctx: &ExecutionContext, mut err: BError) -> BError {
    if let Some(frame) = ctx.error_frame() {
        err.push_frame(frame);
    }
    err
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
