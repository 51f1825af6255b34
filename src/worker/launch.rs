use std::io::BufReader;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::foundation::config::PoolConfig;
use crate::foundation::error::{InkError, InkResult};
use crate::worker::process::WorkerProcess;
use crate::worker::protocol::{self, ClientKey, JobOutcome, RenderJob, Request};

/// Why a link could not produce an outcome. The pool drops the link either way.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum LinkError {
    /// The worker died, closed its pipe or sent garbage.
    #[error("worker link failed: {0}")]
    Failed(String),

    /// No reply within the job timeout.
    #[error("worker did not reply within {0:?}")]
    TimedOut(Duration),
}

/// Connection from a pool dispatcher to one worker.
pub trait WorkerLink: Send {
    /// Run a job and wait for its outcome, at most `timeout` when given.
    fn run(&mut self, job: &RenderJob, timeout: Option<Duration>) -> Result<JobOutcome, LinkError>;

    /// Ask the worker to drop cached state for `key`.
    fn forget_client(&mut self, key: ClientKey) -> Result<(), LinkError>;

    /// Stop the worker and wait for it to exit.
    fn shutdown(self: Box<Self>);
}

/// Starts workers for a pool. `index` identifies the dispatcher slot (for logs).
pub trait WorkerLauncher: Send + Sync {
    /// Start a worker and connect to it.
    fn launch(&self, index: usize) -> InkResult<Box<dyn WorkerLink>>;
}

/// Launches worker OS processes speaking the framed protocol over stdin/stdout.
///
/// stderr is inherited so worker logs land next to the host's.
#[derive(Clone, Debug)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    /// Launch `program` with `args`.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Launcher described by a pool config; re-executes the current binary unless the config
    /// names another program.
    pub fn from_config(config: &PoolConfig) -> InkResult<Self> {
        let program = match &config.worker_program {
            Some(program) => program.clone(),
            None => std::env::current_exe()
                .map_err(|e| InkError::io("locate current executable", e))?,
        };
        Ok(Self::new(program, config.worker_args.clone()))
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, index: usize) -> InkResult<Box<dyn WorkerLink>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| InkError::io(format!("spawn worker '{}'", self.program.display()), e))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| InkError::protocol("worker stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| InkError::protocol("worker stdout was not captured"))?;

        let (tx, replies) = mpsc::channel();
        let reader = thread::Builder::new()
            .name(format!("inkraster-link-{index}"))
            .spawn(move || read_replies(BufReader::new(stdout), tx))
            .map_err(|e| InkError::io("spawn link reader thread", e))?;

        tracing::info!(index, pid = child.id(), "launched worker process");
        Ok(Box::new(ChildLink {
            child,
            stdin: Some(stdin),
            replies,
            reader: Some(reader),
        }))
    }
}

fn read_replies(mut stdout: impl std::io::Read, tx: Sender<InkResult<JobOutcome>>) {
    loop {
        let reply = match protocol::read_outcome(&mut stdout) {
            Ok(Some(outcome)) => Ok(outcome),
            Ok(None) => return,
            Err(e) => Err(e),
        };
        let failed = reply.is_err();
        if tx.send(reply).is_err() || failed {
            return;
        }
    }
}

struct ChildLink {
    child: Child,
    stdin: Option<ChildStdin>,
    replies: Receiver<InkResult<JobOutcome>>,
    reader: Option<JoinHandle<()>>,
}

impl ChildLink {
    fn send(&mut self, request: &Request) -> Result<(), LinkError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| LinkError::Failed("worker stdin already closed".to_string()))?;
        protocol::write_request(stdin, request).map_err(|e| LinkError::Failed(e.to_string()))
    }

    fn exit_status(&mut self) -> String {
        match self.child.try_wait() {
            Ok(Some(status)) => format!("worker exited with {status}"),
            Ok(None) => "worker closed its output".to_string(),
            Err(e) => format!("worker state unknown: {e}"),
        }
    }
}

impl WorkerLink for ChildLink {
    fn run(&mut self, job: &RenderJob, timeout: Option<Duration>) -> Result<JobOutcome, LinkError> {
        self.send(&Request::Render(job.clone()))?;
        let reply = match timeout {
            Some(limit) => self.replies.recv_timeout(limit).map_err(|e| match e {
                RecvTimeoutError::Timeout => LinkError::TimedOut(limit),
                RecvTimeoutError::Disconnected => LinkError::Failed(String::new()),
            }),
            None => self
                .replies
                .recv()
                .map_err(|_| LinkError::Failed(String::new())),
        };
        match reply {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(LinkError::Failed(e.to_string())),
            Err(LinkError::Failed(_)) => Err(LinkError::Failed(self.exit_status())),
            Err(e) => Err(e),
        }
    }

    fn forget_client(&mut self, key: ClientKey) -> Result<(), LinkError> {
        self.send(&Request::ForgetClient(key))
    }

    fn shutdown(mut self: Box<Self>) {
        if self.send(&Request::Shutdown).is_ok() {
            drop(self.stdin.take());
            match self.child.wait() {
                Ok(status) => tracing::debug!(%status, "worker process exited"),
                Err(e) => tracing::warn!(error = %e, "failed to wait for worker process"),
            }
        }
    }
}

impl Drop for ChildLink {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Ok(None) = self.child.try_wait() {
            if let Err(e) = self.child.kill() {
                tracing::warn!(error = %e, "failed to kill worker process");
            }
            let _ = self.child.wait();
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

type WorkerBuilder = dyn Fn() -> WorkerProcess + Send + Sync;

/// Runs each worker on a dedicated thread of this process.
///
/// Every worker still owns its interpreter exclusively, but they share one address space: with a
/// single-instance interpreter such as Ghostscript, use a pool of one.
#[derive(Clone)]
pub struct InProcessLauncher {
    build: Arc<WorkerBuilder>,
}

impl std::fmt::Debug for InProcessLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessLauncher").finish_non_exhaustive()
    }
}

impl InProcessLauncher {
    /// `build` is called on the worker thread to create its [`WorkerProcess`].
    pub fn new(build: impl Fn() -> WorkerProcess + Send + Sync + 'static) -> Self {
        Self {
            build: Arc::new(build),
        }
    }
}

impl WorkerLauncher for InProcessLauncher {
    fn launch(&self, index: usize) -> InkResult<Box<dyn WorkerLink>> {
        let (requests, rx) = mpsc::channel::<Request>();
        let (tx, replies) = mpsc::channel::<JobOutcome>();
        let build = self.build.clone();
        let thread = thread::Builder::new()
            .name(format!("inkraster-worker-{index}"))
            .spawn(move || {
                let mut worker = build();
                for request in rx {
                    match request {
                        Request::Render(job) => {
                            if tx.send(worker.execute(&job)).is_err() {
                                return;
                            }
                        }
                        Request::ForgetClient(key) => worker.forget_client(key),
                        Request::Shutdown => return,
                    }
                }
            })
            .map_err(|e| InkError::io("spawn worker thread", e))?;
        Ok(Box::new(ThreadLink {
            requests,
            replies,
            thread: Some(thread),
        }))
    }
}

struct ThreadLink {
    requests: Sender<Request>,
    replies: Receiver<JobOutcome>,
    thread: Option<JoinHandle<()>>,
}

impl ThreadLink {
    fn send(&self, request: Request) -> Result<(), LinkError> {
        self.requests
            .send(request)
            .map_err(|_| LinkError::Failed("worker thread exited".to_string()))
    }
}

impl WorkerLink for ThreadLink {
    fn run(&mut self, job: &RenderJob, timeout: Option<Duration>) -> Result<JobOutcome, LinkError> {
        self.send(Request::Render(job.clone()))?;
        match timeout {
            Some(limit) => self.replies.recv_timeout(limit).map_err(|e| match e {
                RecvTimeoutError::Timeout => {
                    // A thread cannot be killed; it is abandoned and exits once its job ends.
                    self.thread.take();
                    LinkError::TimedOut(limit)
                }
                RecvTimeoutError::Disconnected => {
                    LinkError::Failed("worker thread exited".to_string())
                }
            }),
            None => self
                .replies
                .recv()
                .map_err(|_| LinkError::Failed("worker thread exited".to_string())),
        }
    }

    fn forget_client(&mut self, key: ClientKey) -> Result<(), LinkError> {
        self.send(Request::ForgetClient(key))
    }

    fn shutdown(mut self: Box<Self>) {
        let _ = self.requests.send(Request::Shutdown);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::warn!("worker thread panicked during shutdown");
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/worker/launch.rs"]
mod tests;
