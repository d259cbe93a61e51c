//! Exception values and the control-flow markers of the unwinding machinery.

use std::fmt::Write as _;

use strum::{Display, EnumString, IntoStaticStr};

use crate::intern::Name;

/// Result type alias for operations that can raise or abort execution.
pub type RunResult<T> = Result<T, RunError>;

/// Control-flow outcome of a failed operation.
///
/// `Handled`, `Unhandled`, and `ToBeRaised` are internal markers that never
/// escape the execution driver: a handler was entered (restart the loop), the
/// current frame has no handler (pop it and keep unwinding), or the exception
/// crossed into frames owned by an enclosing driver invocation and must be
/// re-raised there. `Surface` carries an exception that emptied the call
/// stack; `Fatal` is an interpreter bug, not a user-raisable condition.
#[derive(Debug)]
pub enum RunError {
    Handled,
    Unhandled,
    ToBeRaised,
    Surface(PyException),
    Fatal(String),
}

/// The built-in raisable exception kinds.
///
/// User programs may raise any name; this enum covers the kinds the VM and
/// the builtin library raise themselves. The string form matches the variant
/// name exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ExcType {
    Exception,
    NameError,
    AttributeError,
    TypeError,
    ValueError,
    IndexError,
    KeyError,
    IOError,
    ZeroDivisionError,
    AssertionError,
    ImportError,
    RecursionError,
    NotImplementedError,
    SyntaxError,
}

/// One traceback entry, captured as an exception leaves a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub file: Name,
    pub line: u32,
    pub name: Name,
}

/// An exception in flight (or caught): type-name, message, re-raise flag, and
/// the traceback accumulated while unwinding.
#[derive(Debug, Clone)]
pub struct PyException {
    pub type_name: Name,
    pub msg: String,
    pub is_re: bool,
    pub stacktrace: Vec<StackFrame>,
}

impl PyException {
    pub(crate) fn new(type_name: Name, msg: String) -> Self {
        Self {
            type_name,
            msg,
            is_re: false,
            stacktrace: Vec::new(),
        }
    }

    /// Whether an `except NAME:` clause catches this exception.
    ///
    /// Matching is by type-name; user-defined subclasses carry their own
    /// names and match textually.
    pub(crate) fn match_type(&self, name: &str) -> bool {
        &*self.type_name == name
    }

    pub(crate) fn trace_push(&mut self, frame: StackFrame) {
        self.stacktrace.push(frame);
    }

    /// Human-readable summary: traceback (outermost frame first) followed by
    /// the `Type: message` line. Written to the error sink when an exception
    /// reaches the host.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = String::new();
        if !self.stacktrace.is_empty() {
            out.push_str("Traceback (most recent call last):\n");
            for frame in self.stacktrace.iter().rev() {
                let _ = writeln!(out, "  File \"{}\", line {}, in {}", frame.file, frame.line, frame.name);
            }
        }
        if self.msg.is_empty() {
            out.push_str(&self.type_name);
        } else {
            let _ = write!(out, "{}: {}", self.type_name, self.msg);
        }
        out
    }
}
