//! Tokio-backed scheduler
//!
//! Workers are interpreter loops that may block (on nested invocations or I/O), so they
//! run on tokio's blocking pool rather than on the async worker threads.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tracing::{debug, trace};

use crate::config::SchedulerConfig;
use crate::vm::{VmError, WorkerTask};

use super::{Scheduler, SchedulerStats};

pub struct TokioScheduler {
    tokio_runtime: Option<tokio::runtime::Runtime>,
    multi_threaded: bool,
    scheduled: AtomicU64,
    active: Arc<AtomicUsize>,
}

impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("multi_threaded", &self.multi_threaded)
            .field("active", &self.active.load(Ordering::Relaxed))
            .finish()
    }
}

impl TokioScheduler {
    /// Create a scheduler over a multi-threaded runtime
    pub fn new_multi_thread(config: &SchedulerConfig) -> Result<Self, VmError> {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        if let Some(threads) = config.worker_threads {
            builder.worker_threads(threads);
        }
        Self::from_builder(builder, config, true)
    }

    /// Create a scheduler over a current-thread runtime; workers still get blocking threads
    pub fn new_current_thread(config: &SchedulerConfig) -> Result<Self, VmError> {
        Self::from_builder(tokio::runtime::Builder::new_current_thread(), config, false)
    }

    fn from_builder(
        mut builder: tokio::runtime::Builder,
        config: &SchedulerConfig,
        multi_threaded: bool,
    ) -> Result<Self, VmError> {
        if let Some(max) = config.max_blocking_threads {
            builder.max_blocking_threads(max);
        }
        let tokio_runtime = builder
            .thread_name(config.thread_name.clone())
            .enable_all()
            .build()
            .map_err(|e| VmError::Schedule(format!("Failed to create tokio runtime: {}", e)))?;
        debug!(target: "bvm::rt::scheduler", multi_threaded, "scheduler.tokio.start");
        Ok(Self {
            tokio_runtime: Some(tokio_runtime),
            multi_threaded,
            scheduled: AtomicU64::new(0),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn handle(&self) -> Result<&tokio::runtime::Runtime, VmError> {
        self.tokio_runtime
            .as_ref()
            .ok_or_else(|| VmError::Schedule("runtime already shut down".to_string()))
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, task: WorkerTask) -> Result<(), VmError> {
        let runtime = self.handle()?;
        let id = task.id();
        let active = self.active.clone();
        active.fetch_add(1, Ordering::SeqCst);
        self.scheduled.fetch_add(1, Ordering::Relaxed);
        // Detached: the response context, not the join handle, carries the result.
        let _ = runtime.spawn_blocking(move || {
            let state = task.run();
            active.fetch_sub(1, Ordering::SeqCst);
            trace!(target: "bvm::rt::scheduler", ctx = id, ?state, "scheduler.tokio.done");
            state
        });
        trace!(target: "bvm::rt::scheduler", ctx = id, "scheduler.tokio.spawn");
        Ok(())
    }

    fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            flavor: if self.multi_threaded {
                "multi_thread"
            } else {
                "current_thread"
            },
            scheduled: self.scheduled.load(Ordering::Relaxed),
            active: self.active.load(Ordering::SeqCst),
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        if let Some(runtime) = self.tokio_runtime.take() {
            // Dropping a runtime from inside another runtime's context panics.
            if tokio::runtime::Handle::try_current().is_ok() {
                runtime.shutdown_background();
            } else {
                drop(runtime);
            }
        }
    }
}
