use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tracing::trace;

use crate::vm::{VmError, WorkerTask};

use super::{Scheduler, SchedulerStats};

/// Runs every scheduled worker on its own OS thread.
#[derive(Debug)]
pub struct ThreadScheduler {
    thread_name: String,
    stack_size: Option<usize>,
    scheduled: AtomicU64,
    active: Arc<AtomicUsize>,
}

impl ThreadScheduler {
    pub fn new(thread_name: impl Into<String>) -> Self {
        Self {
            thread_name: thread_name.into(),
            stack_size: None,
            scheduled: AtomicU64::new(0),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new("bvm-worker")
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, task: WorkerTask) -> Result<(), VmError> {
        let id = task.id();
        let mut builder = std::thread::Builder::new().name(format!("{}-{}", self.thread_name, id));
        if let Some(bytes) = self.stack_size {
            builder = builder.stack_size(bytes);
        }
        let active = self.active.clone();
        active.fetch_add(1, Ordering::SeqCst);
        let spawned = builder.spawn(move || {
            let state = task.run();
            active.fetch_sub(1, Ordering::SeqCst);
            trace!(target: "bvm::rt::scheduler", ctx = id, ?state, "scheduler.thread.done");
        });
        match spawned {
            Ok(_) => {
                self.scheduled.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                // The unrun task was dropped with the closure and has already reported a fault.
                self.active.fetch_sub(1, Ordering::SeqCst);
                Err(VmError::Schedule(format!("failed to spawn worker thread: {}", e)))
            }
        }
    }

    fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            flavor: "threads",
            scheduled: self.scheduled.load(Ordering::Relaxed),
            active: self.active.load(Ordering::SeqCst),
        }
    }
}
