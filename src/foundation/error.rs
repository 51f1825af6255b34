/// Crate result alias.
pub type InkResult<T> = Result<T, InkError>;

/// Errors raised by the host side of the crate: configuration, wire protocol and binding setup.
///
/// Render failures are not reported through this type. They travel as [`RenderFault`] data so a
/// failing job never unwinds across the pool or scheduler.
#[derive(thiserror::Error, Debug)]
pub enum InkError {
    /// Invalid input or configuration.
    #[error("validation error: {0}")]
    Validation(String),

    /// Malformed or unexpected message on a worker link.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The interpreter library could not be bound or refused to start.
    #[error("interpreter error: {0}")]
    Interpreter(String),

    /// I/O failure with context.
    #[error("io error: {0}")]
    Io(String),

    /// Anything else, with its source chain preserved.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl InkError {
    /// Build an [`InkError::Validation`].
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build an [`InkError::Protocol`].
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Build an [`InkError::Interpreter`].
    pub fn interpreter(msg: impl Into<String>) -> Self {
        Self::Interpreter(msg.into())
    }

    /// Build an [`InkError::Io`] from an I/O error and a short description of what failed.
    pub fn io(what: impl std::fmt::Display, err: std::io::Error) -> Self {
        Self::Io(format!("{what}: {err}"))
    }
}

/// Why a single render job failed.
///
/// Carried as plain data inside [`crate::JobOutcome`]; serializable so it crosses the process
/// boundary unchanged.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderFault {
    /// The device rejected the pixel format at presize.
    #[error("unsupported display format 0x{format:08x}: {detail}")]
    FormatUnsupported {
        /// Raw display format bits.
        format: u32,
        /// What was wrong with it.
        detail: String,
    },

    /// A callback or the interpreter itself returned a nonzero code.
    #[error("interpreter failed with code {code}: {detail}")]
    Interpreter {
        /// Interpreter or callback return code.
        code: i32,
        /// Collected diagnostics.
        detail: String,
    },

    /// The external image asset could not be read or decoded.
    #[error("asset '{path}' unreadable: {detail}")]
    AssetIo {
        /// Asset path as given in the job.
        path: String,
        /// Underlying error text.
        detail: String,
    },

    /// An uncaught fault inside a worker, or the worker process died.
    #[error("worker process failure: {detail}")]
    WorkerFailure {
        /// Panic message or exit status.
        detail: String,
    },

    /// The program ran to completion without emitting a page.
    #[error("interpreter finished without producing a page")]
    NoPage,

    /// The job exceeded the per-job watchdog and its worker was recycled.
    #[error("render timed out after {after_ms} ms")]
    Timeout {
        /// Configured timeout.
        after_ms: u64,
    },
}

impl RenderFault {
    /// One-line summary suitable for a status bar.
    pub fn summary(&self) -> &'static str {
        match self {
            Self::FormatUnsupported { .. } => "unsupported display format",
            Self::Interpreter { .. } => "PostScript error",
            Self::AssetIo { .. } => "image asset unreadable",
            Self::WorkerFailure { .. } => "render worker failed",
            Self::NoPage => "no page produced",
            Self::Timeout { .. } => "render timed out",
        }
    }

    /// Full detail text.
    pub fn detail(&self) -> String {
        self.to_string()
    }

    /// `true` when the fault leaves the interpreter in a state that must not be reused.
    pub fn recycles_interpreter(&self) -> bool {
        matches!(self, Self::WorkerFailure { .. } | Self::Timeout { .. })
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
