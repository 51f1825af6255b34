use std::io::{ErrorKind, Read};

use crate::device::protocol::DisplayCallbacks;
use crate::foundation::error::InkResult;

/// Exit code the interpreter uses for a normal `quit`.
pub const QUIT_CODE: i32 = -101;

/// Codes at or below this value leave the interpreter instance unusable.
pub const FATAL_CODE_LIMIT: i32 = -100;

/// Nonzero completion of an interpreter run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterpreterExit {
    /// Return code of the run (or of the callback that aborted it).
    pub code: i32,
    /// First callback refusal, if one caused the abort.
    pub detail: Option<String>,
}

impl InterpreterExit {
    /// Exit with a bare code.
    pub fn code(code: i32) -> Self {
        Self { code, detail: None }
    }

    /// `true` for the normal `quit` code, which is not a failure.
    pub fn is_quit(&self) -> bool {
        self.code == QUIT_CODE
    }

    /// `true` when the instance must be torn down before the next run.
    pub fn is_fatal(&self) -> bool {
        self.code <= FATAL_CODE_LIMIT && !self.is_quit()
    }
}

/// Standard streams of one interpreter run.
pub trait InterpreterIo {
    /// Fill `buf` with program text. Returns the byte count, 0 at end of input, -1 on error.
    fn read_input(&mut self, buf: &mut [u8]) -> i32;

    /// Text the program wrote to standard output.
    fn write_stdout(&mut self, bytes: &[u8]);

    /// Text the interpreter wrote to standard error.
    fn write_stderr(&mut self, bytes: &[u8]);
}

/// An embedded PostScript interpreter.
///
/// One `execute` call is one complete render: the implementation feeds the program from `io`,
/// drives `display` through the callback protocol and returns once the interpreter has exited.
/// Calls are never reentrant.
pub trait Interpreter {
    /// Run the interpreter with `args` (switches only; program text comes from `io`).
    fn execute(
        &mut self,
        args: &[String],
        io: &mut dyn InterpreterIo,
        display: &mut dyn DisplayCallbacks,
    ) -> Result<(), InterpreterExit>;
}

/// Creates interpreter instances for a worker. Called lazily, and again after a recycle.
pub trait InterpreterFactory: Send {
    /// Build a fresh interpreter.
    fn create(&mut self) -> InkResult<Box<dyn Interpreter>>;
}

impl<F> InterpreterFactory for F
where
    F: FnMut() -> InkResult<Box<dyn Interpreter>> + Send,
{
    fn create(&mut self) -> InkResult<Box<dyn Interpreter>> {
        self()
    }
}

const DIAGNOSTIC_LIMIT: usize = 4096;

/// [`InterpreterIo`] that streams a program and keeps the tail of stderr for fault reports.
pub struct ProgramIo<'a> {
    input: Box<dyn Read + 'a>,
    diagnostics: String,
}

impl<'a> ProgramIo<'a> {
    /// Stream `parts` to the interpreter back to back.
    pub fn new(parts: &[&'a [u8]]) -> Self {
        let mut input: Box<dyn Read + 'a> = Box::new(std::io::empty());
        for part in parts {
            input = Box::new(input.chain(*part));
        }
        Self::from_reader(input)
    }

    /// Stream from an arbitrary reader.
    pub fn from_reader(input: impl Read + 'a) -> Self {
        Self {
            input: Box::new(input),
            diagnostics: String::new(),
        }
    }

    /// Collected stderr text, trimmed to the most recent few kilobytes.
    pub fn diagnostics(&self) -> &str {
        self.diagnostics.trim()
    }
}

impl InterpreterIo for ProgramIo<'_> {
    fn read_input(&mut self, buf: &mut [u8]) -> i32 {
        let cap = buf.len().min(i32::MAX as usize);
        loop {
            match self.input.read(&mut buf[..cap]) {
                Ok(n) => return n as i32,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read program input");
                    return -1;
                }
            }
        }
    }

    fn write_stdout(&mut self, bytes: &[u8]) {
        for line in String::from_utf8_lossy(bytes).lines() {
            if !line.is_empty() {
                tracing::debug!(target: "inkraster::interpreter", "{line}");
            }
        }
    }

    fn write_stderr(&mut self, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        for line in text.lines() {
            if !line.is_empty() {
                tracing::warn!(target: "inkraster::interpreter", "{line}");
            }
        }
        self.diagnostics.push_str(&text);
        if self.diagnostics.len() > DIAGNOSTIC_LIMIT {
            let mut cut = self.diagnostics.len() - DIAGNOSTIC_LIMIT;
            while !self.diagnostics.is_char_boundary(cut) {
                cut += 1;
            }
            self.diagnostics.drain(..cut);
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/interp/session.rs"]
mod tests;
