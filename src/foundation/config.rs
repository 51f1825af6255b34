use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::foundation::error::{InkError, InkResult};

/// Top-level configuration, usually loaded from a JSON file.
///
/// Every section is optional in the file; missing fields take their defaults.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct InkConfig {
    /// Worker pool sizing and supervision.
    pub pool: PoolConfig,
    /// Debounce policy.
    pub scheduler: SchedulerConfig,
    /// Interpreter arguments.
    pub render: RenderConfig,
}

impl InkConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(s: &str) -> InkResult<Self> {
        let cfg: Self = serde_json::from_str(s)
            .map_err(|e| InkError::validation(format!("invalid config JSON: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a JSON config file.
    pub fn load(path: &Path) -> InkResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| InkError::io(format!("read config '{}'", path.display()), e))?;
        Self::from_json_str(&text)
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> InkResult<()> {
        if self.pool.processes == 0 {
            return Err(InkError::validation("pool.processes must be >= 1"));
        }
        if self.pool.job_timeout_ms == Some(0) {
            return Err(InkError::validation(
                "pool.job_timeout_ms must be > 0 (omit it to disable the watchdog)",
            ));
        }
        if self.render.resolution_dpi == 0 {
            return Err(InkError::validation("render.resolution_dpi must be > 0"));
        }
        for bits in [self.render.text_alpha_bits, self.render.graphics_alpha_bits] {
            if !matches!(bits, 1 | 2 | 4) {
                return Err(InkError::validation(
                    "render alpha bits must be one of 1, 2 or 4",
                ));
            }
        }
        Ok(())
    }
}

/// Worker pool configuration.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker processes. Defaults to the number of logical CPUs.
    pub processes: usize,
    /// Per-job watchdog in milliseconds; `None` waits forever.
    pub job_timeout_ms: Option<u64>,
    /// Program launched for each worker. `None` re-executes the current binary.
    pub worker_program: Option<PathBuf>,
    /// Arguments passed to the worker program.
    pub worker_args: Vec<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            processes: default_processes(),
            job_timeout_ms: Some(30_000),
            worker_program: None,
            worker_args: vec!["worker".to_string()],
        }
    }
}

impl PoolConfig {
    /// Pool of `processes` workers with the other settings at their defaults.
    pub fn new(processes: usize) -> Self {
        Self {
            processes,
            ..Self::default()
        }
    }

    /// Set the per-job watchdog.
    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    /// Per-job watchdog as a [`Duration`].
    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_ms.map(Duration::from_millis)
    }
}

/// Debounce policy for the job scheduler.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Quiescence window in milliseconds.
    pub debounce_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { debounce_ms: 250 }
    }
}

impl SchedulerConfig {
    /// Quiescence window as a [`Duration`].
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Arguments used to initialize the interpreter for every render.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Explicit path to the Ghostscript shared library. `None` searches the platform names.
    pub library_path: Option<PathBuf>,
    /// Output resolution in dots per inch.
    pub resolution_dpi: u32,
    /// Text anti-aliasing bits (1, 2 or 4).
    pub text_alpha_bits: u8,
    /// Graphics anti-aliasing bits (1, 2 or 4).
    pub graphics_alpha_bits: u8,
    /// Crop the page to the EPS bounding box.
    pub crop_to_content: bool,
    /// Extra interpreter switches appended before the input.
    pub extra_args: Vec<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            library_path: None,
            resolution_dpi: 72,
            text_alpha_bits: 4,
            graphics_alpha_bits: 4,
            crop_to_content: true,
            extra_args: Vec::new(),
        }
    }
}

fn default_processes() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/config.rs"]
mod tests;
