use std::fmt::Debug;

use crate::vm::{ExecutionContext, ResponseContext, VmError, WorkerState, WorkerTask};

/// Counters reported by a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub flavor: &'static str,
    pub scheduled: u64,
    pub active: usize,
}

/// Contract between the invocation core and whatever executes workers.
///
/// Suspension is two-phase: [`Scheduler::switch_to_wait_for_response`] only marks the
/// caller as waiting and never blocks; [`Scheduler::park_until_response`] is the actual
/// block and must return promptly when the response already completed.
pub trait Scheduler: Send + Sync + Debug {
    /// Hand `task` off for independent execution without blocking the caller.
    /// No ordering is promised between tasks scheduled here.
    fn schedule(&self, task: WorkerTask) -> Result<(), VmError>;

    /// Run `task` to completion on the calling thread.
    fn run_synchronously(&self, task: WorkerTask) -> WorkerState {
        task.run()
    }

    /// Mark `ctx` as waiting for a response.
    fn switch_to_wait_for_response(&self, ctx: &ExecutionContext) -> Result<(), VmError> {
        match ctx.state() {
            Some(WorkerState::WaitingForResponse) => Ok(()),
            _ => ctx.transition(WorkerState::WaitingForResponse).map(|_| ()),
        }
    }

    /// Block the calling thread until `response` has every contribution.
    fn park_until_response(&self, response: &ResponseContext) {
        response.wait_for_response();
    }

    fn stats(&self) -> SchedulerStats;
}
