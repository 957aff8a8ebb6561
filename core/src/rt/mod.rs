//! Schedulers that run worker tasks off the caller's path.

mod runtime;
mod scheduler;
mod threads;

pub use runtime::TokioScheduler;
pub use scheduler::{Scheduler, SchedulerStats};
pub use threads::ThreadScheduler;
