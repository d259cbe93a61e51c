//! Injected output sinks.
//!
//! The VM never touches the process streams directly: `print`, `PRINT_EXPR`,
//! and exception summaries go through a [`PrintWriter`]. `StdPrint` borrows
//! the process streams ("stdio" mode); `CollectStringPrint` owns in-memory
//! sinks ("capture" mode) behind a cloneable handle so the host can read the
//! output after a run.

use std::{
    cell::RefCell,
    fmt,
    io::{self, Write as _},
    rc::Rc,
};

/// Destination for interpreter output and error summaries.
pub trait PrintWriter: fmt::Debug {
    /// Writes to the output sink. No separators or terminators are added.
    fn stdout_write(&mut self, output: &str);

    /// Writes to the error sink. Used for exception summaries and internal
    /// error reports.
    fn stderr_write(&mut self, output: &str);
}

/// `PrintWriter` that borrows the process streams.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn stdout_write(&mut self, output: &str) {
        let mut out = io::stdout();
        let _ = out.write_all(output.as_bytes());
        let _ = out.flush();
    }

    fn stderr_write(&mut self, output: &str) {
        let mut err = io::stderr();
        let _ = err.write_all(output.as_bytes());
        let _ = err.flush();
    }
}

/// `PrintWriter` that collects both streams into shared strings.
///
/// Cloning shares the underlying buffers: keep one handle, give the other to
/// the VM, and read [`output`](Self::output) after execution.
#[derive(Debug, Clone, Default)]
pub struct CollectStringPrint {
    out: Rc<RefCell<String>>,
    err: Rc<RefCell<String>>,
}

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written to the output sink so far.
    #[must_use]
    pub fn output(&self) -> String {
        self.out.borrow().clone()
    }

    /// Everything written to the error sink so far.
    #[must_use]
    pub fn error_output(&self) -> String {
        self.err.borrow().clone()
    }
}

impl PrintWriter for CollectStringPrint {
    fn stdout_write(&mut self, output: &str) {
        self.out.borrow_mut().push_str(output);
    }

    fn stderr_write(&mut self, output: &str) {
        self.err.borrow_mut().push_str(output);
    }
}

/// `PrintWriter` that discards everything. Useful for benchmarks and tests
/// that only inspect return values.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn stdout_write(&mut self, _output: &str) {}

    fn stderr_write(&mut self, _output: &str) {}
}
