use std::sync::Arc;

use thiserror::Error;

use crate::val::{BError, ValueTag};

use super::WorkerState;

/// Failures surfaced by the invocation core.
///
/// Everything except [`VmError::PackageInitFailure`] is returned to the direct caller as
/// ordinary error data. A failed package initialization is fatal to the call chain.
#[derive(Debug, Clone, Error)]
pub enum VmError {
    #[error("arity mismatch calling '{unit}': expected {expected} argument(s), got {actual}")]
    ArityMismatch {
        unit: Arc<str>,
        expected: usize,
        actual: usize,
    },
    #[error("package '{0}' is not defined")]
    PackageNotFound(String),
    #[error("function '{function}' is not defined in package '{package}'")]
    FunctionNotFound { package: String, function: String },
    #[error("argument {position}: declared {declared}, found {actual}")]
    TypeTagMismatch {
        position: usize,
        declared: ValueTag,
        actual: ValueTag,
    },
    #[error("type '{0}' has no register category")]
    UnsupportedType(String),
    #[error("constant '{package}:{name}' has type '{type_name}', which cannot be a constant")]
    UnsupportedConstantType {
        package: Arc<str>,
        name: Arc<str>,
        type_name: String,
    },
    #[error("constant '{package}:{name}' is not a global of its package")]
    UnknownConstant { package: Arc<str>, name: Arc<str> },
    #[error("constant '{package}:{name}' lives at {tag} slot {index}, outside global memory")]
    GlobalOutOfRange {
        package: Arc<str>,
        name: Arc<str>,
        tag: ValueTag,
        index: usize,
    },
    #[error("{0}")]
    Propagated(BError),
    #[error("error: {trace}")]
    PackageInitFailure { package: Arc<str>, trace: String },
    #[error("initialization of package '{0}' depends on itself")]
    InitCycle(Arc<str>),
    #[error("no body registered for worker {worker} of '{unit}'")]
    NoWorkerBody { unit: Arc<str>, worker: usize },
    #[error("worker '{worker}' of '{unit}' panicked: {message}")]
    WorkerPanicked {
        unit: Arc<str>,
        worker: Arc<str>,
        message: String,
    },
    #[error("failed to schedule worker: {0}")]
    Schedule(String),
    #[error("context {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: u64,
        from: Option<WorkerState>,
        to: WorkerState,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl VmError {
    /// Whether the error must abort the enclosing call chain instead of being handed back.
    pub fn is_fatal(&self) -> bool {
        matches!(self, VmError::PackageInitFailure { .. })
    }

    pub fn propagated(&self) -> Option<&BError> {
        match self {
            VmError::Propagated(err) => Some(err),
            _ => None,
        }
    }
}

impl From<BError> for VmError {
    fn from(err: BError) -> Self {
        VmError::Propagated(err)
    }
}
