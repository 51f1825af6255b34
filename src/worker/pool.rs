use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::foundation::config::PoolConfig;
use crate::foundation::error::{InkError, InkResult, RenderFault};
use crate::worker::launch::{LinkError, WorkerLauncher, WorkerLink};
use crate::worker::protocol::{ClientKey, JobOutcome, RenderJob};

/// Handle for one submitted job; echoed back in its [`Completion`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(u64);

impl Ticket {
    /// Ticket with a given sequence number, for sinks other than [`WorkerPool`].
    pub fn from_id(id: u64) -> Self {
        Self(id)
    }

    /// Submission sequence number.
    pub fn id(self) -> u64 {
        self.0
    }
}

/// A finished job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    /// Ticket returned by `submit`.
    pub ticket: Ticket,
    /// The job's client.
    pub key: ClientKey,
    /// Result or fault.
    pub outcome: JobOutcome,
}

struct Queued {
    ticket: Ticket,
    job: RenderJob,
}

enum Work {
    Job(Queued),
    Forget(ClientKey),
    Shutdown,
}

struct QueueState {
    jobs: VecDeque<Queued>,
    /// Pending cache invalidations, one queue per dispatcher.
    forgets: Vec<VecDeque<ClientKey>>,
    busy: usize,
    shutdown: bool,
}

impl QueueState {
    /// Oldest job for `affinity` if one is queued, else the oldest job.
    fn take_job(&mut self, affinity: Option<ClientKey>) -> Option<Queued> {
        let pos = affinity
            .and_then(|key| self.jobs.iter().position(|q| q.job.key == key))
            .unwrap_or(0);
        self.jobs.remove(pos)
    }
}

struct Shared {
    state: Mutex<QueueState>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_work(&self, index: usize, affinity: Option<ClientKey>) -> Work {
        let mut st = self.lock();
        loop {
            if st.shutdown {
                return Work::Shutdown;
            }
            if let Some(key) = st.forgets[index].pop_front() {
                return Work::Forget(key);
            }
            if let Some(queued) = st.take_job(affinity) {
                st.busy += 1;
                return Work::Job(queued);
            }
            st = self.wake.wait(st).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn finish_job(&self) {
        let mut st = self.lock();
        st.busy = st.busy.saturating_sub(1);
    }
}

/// A fixed set of workers fed from one queue.
///
/// Each worker has a dispatcher thread that owns its link, takes the next job (preferring the
/// client it served last, so the worker's asset cache stays warm), waits for the outcome and
/// posts a [`Completion`]. At most `size()` jobs run at once; every fault, including a dead or
/// hung worker, comes back as an outcome. A worker that dies or times out is dropped and
/// relaunched for the next job.
pub struct WorkerPool {
    shared: Arc<Shared>,
    dispatchers: Vec<JoinHandle<()>>,
    completions: Receiver<Completion>,
    next_ticket: AtomicU64,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.dispatchers.len())
            .field("queued", &self.queued())
            .field("busy", &self.busy())
            .finish()
    }
}

impl WorkerPool {
    /// Start `config.processes` dispatchers. Workers are launched on their first job.
    pub fn new(config: &PoolConfig, launcher: impl WorkerLauncher + 'static) -> InkResult<Self> {
        if config.processes == 0 {
            return Err(InkError::validation("worker pool needs at least one process"));
        }
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                forgets: vec![VecDeque::new(); config.processes],
                busy: 0,
                shutdown: false,
            }),
            wake: Condvar::new(),
        });
        let launcher: Arc<dyn WorkerLauncher> = Arc::new(launcher);
        let timeout = config.job_timeout();
        let (tx, completions) = mpsc::channel();

        let mut dispatchers = Vec::with_capacity(config.processes);
        for index in 0..config.processes {
            let dispatcher = Dispatcher {
                index,
                shared: shared.clone(),
                launcher: launcher.clone(),
                completions: tx.clone(),
                timeout,
                link: None,
                last_key: None,
            };
            let handle = thread::Builder::new()
                .name(format!("inkraster-dispatch-{index}"))
                .spawn(move || dispatcher.run())
                .map_err(|e| InkError::io("spawn dispatcher thread", e))?;
            dispatchers.push(handle);
        }
        tracing::info!(processes = config.processes, ?timeout, "worker pool started");

        Ok(Self {
            shared,
            dispatchers,
            completions,
            next_ticket: AtomicU64::new(1),
        })
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.dispatchers.len()
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared.lock().jobs.len()
    }

    /// Jobs currently running.
    pub fn busy(&self) -> usize {
        self.shared.lock().busy
    }

    /// Queue a job. Returns immediately.
    pub fn submit(&self, job: RenderJob) -> Ticket {
        let ticket = Ticket(self.next_ticket.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(ticket = ticket.0, key = %job.key, "job submitted");
        self.shared.lock().jobs.push_back(Queued { ticket, job });
        self.shared.wake.notify_all();
        ticket
    }

    /// A completion if one is ready.
    pub fn try_completion(&self) -> Option<Completion> {
        self.completions.try_recv().ok()
    }

    /// Wait up to `timeout` for a completion.
    pub fn wait_completion(&self, timeout: Duration) -> Option<Completion> {
        match self.completions.recv_timeout(timeout) {
            Ok(c) => Some(c),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drop queued jobs for `key` and tell every worker to forget its cached state. Returns the
    /// tickets of the discarded jobs; they produce no completion.
    pub fn remove_client(&self, key: ClientKey) -> Vec<Ticket> {
        let mut st = self.shared.lock();
        let mut dropped = Vec::new();
        st.jobs.retain(|q| {
            if q.job.key == key {
                dropped.push(q.ticket);
                false
            } else {
                true
            }
        });
        for queue in &mut st.forgets {
            queue.push_back(key);
        }
        drop(st);
        self.shared.wake.notify_all();
        tracing::debug!(%key, dropped = dropped.len(), "client removed");
        dropped
    }

    /// Stop all workers and wait for the dispatchers. Queued jobs are discarded.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.wake.notify_all();
        for handle in self.dispatchers.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("dispatcher thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Dispatcher {
    index: usize,
    shared: Arc<Shared>,
    launcher: Arc<dyn WorkerLauncher>,
    completions: Sender<Completion>,
    timeout: Option<Duration>,
    link: Option<Box<dyn WorkerLink>>,
    last_key: Option<ClientKey>,
}

impl Dispatcher {
    fn run(mut self) {
        loop {
            match self.shared.next_work(self.index, self.last_key) {
                Work::Shutdown => break,
                Work::Forget(key) => self.forget(key),
                Work::Job(queued) => {
                    let key = queued.job.key;
                    let outcome = self.execute(&queued.job);
                    self.shared.finish_job();
                    let completion = Completion {
                        ticket: queued.ticket,
                        key,
                        outcome,
                    };
                    if self.completions.send(completion).is_err() {
                        break;
                    }
                }
            }
        }
        if let Some(link) = self.link.take() {
            link.shutdown();
        }
        tracing::debug!(index = self.index, "dispatcher stopped");
    }

    fn forget(&mut self, key: ClientKey) {
        if self.last_key == Some(key) {
            self.last_key = None;
        }
        if let Some(link) = self.link.as_mut()
            && let Err(e) = link.forget_client(key)
        {
            tracing::warn!(index = self.index, error = %e, "dropping worker link");
            self.link = None;
        }
    }

    fn execute(&mut self, job: &RenderJob) -> JobOutcome {
        if self.link.is_none() {
            match self.launcher.launch(self.index) {
                Ok(link) => self.link = Some(link),
                Err(e) => {
                    tracing::error!(index = self.index, error = %e, "failed to launch worker");
                    return Err(RenderFault::WorkerFailure {
                        detail: e.to_string(),
                    });
                }
            }
        }
        let Some(link) = self.link.as_mut() else {
            return Err(RenderFault::WorkerFailure {
                detail: "no worker link".to_string(),
            });
        };

        self.last_key = Some(job.key);
        match link.run(job, self.timeout) {
            Ok(outcome) => outcome,
            Err(LinkError::TimedOut(after)) => {
                tracing::warn!(
                    index = self.index,
                    key = %job.key,
                    ?after,
                    "job timed out; relaunching worker"
                );
                self.link = None;
                self.last_key = None;
                Err(RenderFault::Timeout {
                    after_ms: after.as_millis() as u64,
                })
            }
            Err(LinkError::Failed(detail)) => {
                tracing::warn!(index = self.index, %detail, "worker failed; relaunching");
                self.link = None;
                self.last_key = None;
                Err(RenderFault::WorkerFailure { detail })
            }
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/worker/pool.rs"]
mod tests;
