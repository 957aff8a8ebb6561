use std::fmt::Write as _;

use crate::val::BError;

/// Renders propagated errors for the fatal package-init path.
pub trait Diagnostics: Send + Sync {
    fn printable_stack_trace(&self, err: &BError) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDiagnostics;

impl Diagnostics for DefaultDiagnostics {
    fn printable_stack_trace(&self, err: &BError) -> String {
        let mut out = String::new();
        let mut current = Some(err);
        let mut first = true;
        while let Some(err) = current {
            if !first {
                out.push_str("\ncaused by: ");
            }
            first = false;
            out.push_str(err.message());
            for frame in err.frames() {
                let _ = write!(out, "\n\tat {}", frame);
            }
            current = err.cause();
        }
        out
    }
}
