use std::fmt;
use std::sync::Arc;

/// One entry of an error's call trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorFrame {
    pub package: Arc<str>,
    pub unit: Arc<str>,
    pub worker: Arc<str>,
}

impl fmt::Display for ErrorFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}({})", self.package, self.unit, self.worker)
    }
}

/// Error value raised by a worker's own logic.
///
/// Frames are appended innermost first as the error crosses each invocation boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct BError {
    message: Arc<str>,
    frames: Vec<ErrorFrame>,
    cause: Option<Arc<BError>>,
}

impl BError {
    pub fn new(message: impl Into<Arc<str>>) -> Self {
        Self {
            message: message.into(),
            frames: Vec::new(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: BError) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn push_frame(&mut self, frame: ErrorFrame) {
        self.frames.push(frame);
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn frames(&self) -> &[ErrorFrame] {
        &self.frames
    }

    pub fn cause(&self) -> Option<&BError> {
        self.cause.as_deref()
    }
}

impl fmt::Display for BError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}
