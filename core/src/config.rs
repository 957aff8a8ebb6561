//! Runtime configuration, loadable from TOML and overridable from the environment.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::rt::{Scheduler, ThreadScheduler, TokioScheduler};
use crate::vm::VmError;

pub const ENV_SCHEDULER: &str = "BVM_SCHEDULER";
pub const ENV_WORKER_THREADS: &str = "BVM_WORKER_THREADS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    #[default]
    MultiThread,
    CurrentThread,
    Threads,
}

impl SchedulerKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "multi_thread" | "multi" => Some(SchedulerKind::MultiThread),
            "current_thread" | "single" => Some(SchedulerKind::CurrentThread),
            "threads" | "thread" => Some(SchedulerKind::Threads),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub kind: SchedulerKind,
    pub worker_threads: Option<usize>,
    pub max_blocking_threads: Option<usize>,
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            kind: SchedulerKind::MultiThread,
            worker_threads: None,
            max_blocking_threads: None,
            thread_name: "bvm-worker".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn build(&self) -> Result<Arc<dyn Scheduler>, VmError> {
        if self.worker_threads == Some(0) {
            return Err(VmError::Config("worker_threads must be greater than zero".to_string()));
        }
        if self.max_blocking_threads == Some(0) {
            return Err(VmError::Config("max_blocking_threads must be greater than zero".to_string()));
        }
        Ok(match self.kind {
            SchedulerKind::MultiThread => Arc::new(TokioScheduler::new_multi_thread(self)?),
            SchedulerKind::CurrentThread => Arc::new(TokioScheduler::new_current_thread(self)?),
            SchedulerKind::Threads => Arc::new(ThreadScheduler::new(self.thread_name.clone())),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    pub scheduler: SchedulerConfig,
}

impl VmConfig {
    pub fn from_toml_str(src: &str) -> Result<Self, VmError> {
        toml::from_str(src).map_err(|e| VmError::Config(e.to_string()))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, VmError> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path)
            .map_err(|e| VmError::Config(format!("Failed to read '{}': {}", path.display(), e)))?;
        Self::from_toml_str(&src)
    }

    /// Apply `BVM_SCHEDULER` / `BVM_WORKER_THREADS` from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), VmError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`, which maps a variable name to its value.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), VmError> {
        if let Some(raw) = lookup(ENV_SCHEDULER) {
            self.scheduler.kind = SchedulerKind::parse(&raw)
                .ok_or_else(|| VmError::Config(format!("unknown scheduler kind '{}'", raw)))?;
        }
        if let Some(raw) = lookup(ENV_WORKER_THREADS) {
            let threads = raw
                .trim()
                .parse::<usize>()
                .map_err(|e| VmError::Config(format!("{}: {}", ENV_WORKER_THREADS, e)))?;
            self.scheduler.worker_threads = Some(threads);
        }
        Ok(())
    }
}
