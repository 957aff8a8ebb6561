//! Aggregation of worker contributions for one invocation.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace, warn};

use crate::util::fast_map::{FastHashSet, fast_hash_set_new};
use crate::val::BError;

use super::{ContextId, RegisterFile, RegisterLayout, VmError, copy_returns};

/// How a worker ended, as reported to its response context.
#[derive(Debug, Clone)]
pub enum WorkerOutcome {
    /// Exited through a return; the result registers hold its values.
    Returned,
    /// Ran to the end without returning values.
    Finished,
    /// Raised an error value through its error slot.
    Raised(BError),
    /// Broke down outside the language's error model (panic, scheduler failure, fatal error).
    Faulted(VmError),
}

#[derive(Debug)]
struct ResponseState {
    pending: usize,
    contributed: FastHashSet<ContextId>,
    staged: RegisterFile,
    returned: bool,
    error: Option<BError>,
    fault: Option<VmError>,
    completions: usize,
}

/// Synchronization point between an invocation's workers and its caller.
///
/// Each worker contributes exactly once. Values come from the first worker that returns,
/// the recorded error from the first worker that fails, and completion is signalled once,
/// when the last outstanding contribution arrives.
#[derive(Debug)]
pub struct ResponseContext {
    returns: RegisterLayout,
    wait_for_response: bool,
    state: Mutex<ResponseState>,
    done: Condvar,
}

/// Final result of a completed response.
#[derive(Debug, Clone)]
pub enum ResponseOutcome {
    Values,
    Error(BError),
    Fault(VmError),
}

impl ResponseContext {
    pub fn new(returns: RegisterLayout, wait_for_response: bool) -> Self {
        let staged = RegisterFile::new(returns.counts());
        Self {
            returns,
            wait_for_response,
            state: Mutex::new(ResponseState {
                pending: 0,
                contributed: fast_hash_set_new(),
                staged,
                returned: false,
                error: None,
                fault: None,
                completions: 0,
            }),
            done: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ResponseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn returns(&self) -> &RegisterLayout {
        &self.returns
    }

    pub fn waits_for_response(&self) -> bool {
        self.wait_for_response
    }

    /// Record `n` more outstanding worker contributions.
    pub fn expect(&self, n: usize) {
        let mut state = self.lock();
        state.pending += n;
        trace!(target: "bvm::vm::response", pending = state.pending, "response.expect");
    }

    /// Accept the contribution of `worker`.
    ///
    /// Returns `true` when this contribution completed the response. A second contribution
    /// from the same worker, or one arriving after completion, is ignored.
    pub fn contribute(&self, worker: ContextId, outcome: WorkerOutcome, result: &RegisterFile) -> bool {
        let mut state = self.lock();
        if state.pending == 0 || !state.contributed.insert(worker) {
            warn!(target: "bvm::vm::response", worker, "response.duplicate_contribution");
            return false;
        }
        match outcome {
            WorkerOutcome::Returned => {
                if !state.returned {
                    let regs = self.returns.regs();
                    copy_returns(&self.returns, result, regs, &mut state.staged, regs);
                    state.returned = true;
                }
            }
            WorkerOutcome::Finished => {}
            WorkerOutcome::Raised(err) => {
                if state.error.is_none() {
                    state.error = Some(err);
                }
            }
            WorkerOutcome::Faulted(fault) => {
                if state.fault.is_none() {
                    state.fault = Some(fault);
                }
            }
        }
        state.pending -= 1;
        if state.pending > 0 {
            return false;
        }
        state.completions += 1;
        debug!(
            target: "bvm::vm::response",
            contributions = state.contributed.len(),
            returned = state.returned,
            failed = state.error.is_some() || state.fault.is_some(),
            "response.complete"
        );
        self.done.notify_all();
        true
    }

    /// Block until no contribution is outstanding. Returns at once if none is.
    pub fn wait_for_response(&self) {
        let mut state = self.lock();
        while state.pending > 0 {
            state = self.done.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn is_complete(&self) -> bool {
        let state = self.lock();
        state.pending == 0 && state.completions > 0
    }

    /// Times completion has been signalled; at most one for a well-formed invocation.
    pub fn completions(&self) -> usize {
        self.lock().completions
    }

    pub fn outstanding(&self) -> usize {
        self.lock().pending
    }

    /// Outcome of the completed response; faults win over raised errors.
    pub fn outcome(&self) -> ResponseOutcome {
        let state = self.lock();
        if let Some(fault) = &state.fault {
            return ResponseOutcome::Fault(fault.clone());
        }
        if let Some(err) = &state.error {
            return ResponseOutcome::Error(err.clone());
        }
        ResponseOutcome::Values
    }

    /// Copy the collected return values into `target` at the caller's `target_regs`.
    pub fn deliver_into(&self, target: &mut RegisterFile, target_regs: &[usize]) {
        let state = self.lock();
        copy_returns(&self.returns, &state.staged, self.returns.regs(), target, target_regs);
    }
}
