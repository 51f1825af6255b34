use std::io::{Read, Write};
use std::panic::{self, AssertUnwindSafe};

use crate::foundation::config::RenderConfig;
use crate::foundation::error::{InkResult, RenderFault};
use crate::interp::renderer::Renderer;
use crate::interp::session::InterpreterFactory;
use crate::worker::asset::AssetCache;
use crate::worker::protocol::{
    self, ClientKey, JobOutcome, RenderJob, RenderOutput, Request,
};

/// One worker: an interpreter slot, its display device and the asset cache, executing jobs
/// strictly one at a time.
///
/// Any panic during a job is caught here, reported as [`RenderFault::WorkerFailure`] and the
/// interpreter is recycled, so the worker keeps serving.
#[derive(Debug)]
pub struct WorkerProcess {
    renderer: Renderer,
    assets: AssetCache,
    jobs: u64,
}

impl WorkerProcess {
    /// Worker over interpreters from `factory`. No interpreter is created until the first job.
    pub fn new(factory: impl InterpreterFactory + 'static, config: RenderConfig) -> Self {
        Self {
            renderer: Renderer::new(factory, config),
            assets: AssetCache::new(),
            jobs: 0,
        }
    }

    /// Run one job to completion.
    #[tracing::instrument(level = "debug", skip_all, fields(key = %job.key, job = self.jobs))]
    pub fn execute(&mut self, job: &RenderJob) -> JobOutcome {
        self.jobs += 1;
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.run(job))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let detail = panic_message(payload.as_ref());
                tracing::error!(%detail, "job panicked");
                Err(RenderFault::WorkerFailure { detail })
            }
        };
        if let Err(fault) = &outcome {
            tracing::debug!(%fault, "job failed");
            if fault.recycles_interpreter() {
                self.renderer.recycle();
            }
        }
        outcome
    }

    fn run(&mut self, job: &RenderJob) -> JobOutcome {
        let prelude = match &job.options.asset {
            Some(path) => Some(self.assets.prelude_for(job.key, path)?),
            None => None,
        };
        let mut parts: Vec<&[u8]> = Vec::with_capacity(2);
        if let Some(prelude) = &prelude {
            parts.push(prelude.as_slice());
        }
        parts.push(&job.input);

        let page = self.renderer.render(&parts, job.format)?;
        let decoded = page
            .decode(&job.options.decode)
            .map_err(|e| RenderFault::WorkerFailure {
                detail: e.to_string(),
            })?;
        Ok(RenderOutput {
            decoded,
            raw: job.options.keep_raw.then_some(page),
        })
    }

    /// Drop cached state for `key`.
    pub fn forget_client(&mut self, key: ClientKey) {
        self.assets.forget(key);
    }

    /// Client whose asset is currently cached.
    pub fn cached_client(&self) -> Option<ClientKey> {
        self.assets.cached_key()
    }

    /// Asset loads performed so far.
    pub fn asset_loads(&self) -> u64 {
        self.assets.loads()
    }

    /// `true` while the worker holds an interpreter instance.
    pub fn has_interpreter(&self) -> bool {
        self.renderer.slot().is_live()
    }

    /// Answer framed requests from `input` on `output` until `Shutdown` or end of input.
    pub fn serve<R: Read, W: Write>(&mut self, mut input: R, mut output: W) -> InkResult<()> {
        tracing::info!("worker ready");
        while let Some(request) = protocol::read_request(&mut input)? {
            match request {
                Request::Render(job) => {
                    let outcome = self.execute(&job);
                    protocol::write_outcome(&mut output, &outcome)?;
                }
                Request::ForgetClient(key) => self.forget_client(key),
                Request::Shutdown => break,
            }
        }
        tracing::info!(jobs = self.jobs, "worker exiting");
        Ok(())
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/worker/process.rs"]
mod tests;
