use crate::device::raster::{CapturedPage, RasterDevice};
use crate::format::display_format::DisplayFormat;
use crate::foundation::config::RenderConfig;
use crate::foundation::error::RenderFault;
use crate::interp::ghostscript::render_args;
use crate::interp::session::{
    FATAL_CODE_LIMIT, Interpreter, InterpreterFactory, ProgramIo,
};

/// Lazily created interpreter owned by one worker.
///
/// The instance is built on first use and dropped by [`InterpreterSlot::recycle`] whenever a run
/// leaves it unusable; the next use builds a fresh one.
pub struct InterpreterSlot {
    factory: Box<dyn InterpreterFactory>,
    live: Option<Box<dyn Interpreter>>,
    generation: u64,
}

impl std::fmt::Debug for InterpreterSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterpreterSlot")
            .field("live", &self.live.is_some())
            .field("generation", &self.generation)
            .finish()
    }
}

impl InterpreterSlot {
    /// Empty slot.
    pub fn new(factory: impl InterpreterFactory + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            live: None,
            generation: 0,
        }
    }

    /// The live interpreter, creating it if needed.
    fn get(&mut self) -> Result<&mut dyn Interpreter, RenderFault> {
        if self.live.is_none() {
            let interp = self.factory.create().map_err(|e| RenderFault::Interpreter {
                code: FATAL_CODE_LIMIT,
                detail: e.to_string(),
            })?;
            self.generation += 1;
            tracing::debug!(generation = self.generation, "created interpreter");
            self.live = Some(interp);
        }
        match self.live.as_deref_mut() {
            Some(interp) => Ok(interp),
            None => Err(RenderFault::WorkerFailure {
                detail: "interpreter slot empty after creation".to_string(),
            }),
        }
    }

    /// Tear down the live interpreter, if any.
    pub fn recycle(&mut self) {
        if self.live.take().is_some() {
            tracing::info!(generation = self.generation, "recycling interpreter");
        }
    }

    /// `true` while an interpreter instance exists.
    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    /// How many interpreters this slot has created.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Runs one program through the interpreter and captures its page.
#[derive(Debug)]
pub struct Renderer {
    slot: InterpreterSlot,
    config: RenderConfig,
}

impl Renderer {
    /// Renderer over interpreters from `factory`.
    pub fn new(factory: impl InterpreterFactory + 'static, config: RenderConfig) -> Self {
        Self {
            slot: InterpreterSlot::new(factory),
            config,
        }
    }

    /// The interpreter slot.
    pub fn slot(&self) -> &InterpreterSlot {
        &self.slot
    }

    /// Drop the interpreter so the next render starts from a fresh instance.
    pub fn recycle(&mut self) {
        self.slot.recycle();
    }

    /// Render `parts` (concatenated) at `format`.
    ///
    /// A format rejected at presize wins over the interpreter's own exit code. Fatal exit codes
    /// recycle the interpreter before returning.
    pub fn render(
        &mut self,
        parts: &[&[u8]],
        format: DisplayFormat,
    ) -> Result<CapturedPage, RenderFault> {
        let args = render_args(&self.config, format);
        let interp = self.slot.get()?;
        let mut io = ProgramIo::new(parts);
        let mut device = RasterDevice::new();

        let result = interp.execute(&args, &mut io, &mut device);
        let exit = match result {
            Ok(()) => return device.finish(),
            Err(exit) if exit.is_quit() => return device.finish(),
            Err(exit) => exit,
        };

        if exit.is_fatal() {
            self.slot.recycle();
        }
        if let Some(fault) = device.rejection() {
            return Err(fault.clone());
        }
        let detail = exit
            .detail
            .filter(|d| !d.is_empty())
            .or_else(|| Some(io.diagnostics().to_string()).filter(|d| !d.is_empty()))
            .unwrap_or_else(|| format!("exit code {}", exit.code));
        tracing::debug!(code = exit.code, %detail, "render failed");
        Err(RenderFault::Interpreter {
            code: exit.code,
            detail,
        })
    }
}

#[cfg(test)]
#[path = "../../tests/unit/interp/renderer.rs"]
mod tests;
