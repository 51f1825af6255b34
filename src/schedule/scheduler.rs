use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::foundation::config::SchedulerConfig;
use crate::schedule::timer::{Clock, DebounceTimer, SystemClock};
use crate::worker::pool::{Completion, Ticket, WorkerPool};
use crate::worker::protocol::{ClientKey, RenderJob};

/// Where the scheduler sends jobs it has decided to run.
pub trait JobSink {
    /// Start a job. Must not block on the job itself.
    fn submit(&mut self, job: RenderJob) -> Ticket;

    /// Wait up to `timeout` for any submitted job to finish.
    fn wait_completion(&mut self, timeout: Duration) -> Option<Completion>;

    /// Drop whatever the sink holds for `key`. Returns the tickets it discarded before they
    /// started; those never complete.
    fn forget_client(&mut self, key: ClientKey) -> Vec<Ticket>;
}

impl JobSink for WorkerPool {
    fn submit(&mut self, job: RenderJob) -> Ticket {
        WorkerPool::submit(self, job)
    }

    fn wait_completion(&mut self, timeout: Duration) -> Option<Completion> {
        WorkerPool::wait_completion(self, timeout)
    }

    fn forget_client(&mut self, key: ClientKey) -> Vec<Ticket> {
        self.remove_client(key)
    }
}

/// Where a client is in its render cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyPhase {
    /// Nothing pending or running.
    Idle,
    /// A request is waiting for its quiescence window.
    PendingDebounce,
    /// A job is running; a newer request may be waiting behind it.
    InFlight,
}

#[derive(Debug)]
struct KeyEntry {
    in_flight: Option<Ticket>,
    pending: Option<RenderJob>,
    timer: DebounceTimer,
}

impl KeyEntry {
    fn phase(&self) -> KeyPhase {
        match (self.in_flight, &self.pending) {
            (Some(_), _) => KeyPhase::InFlight,
            (None, Some(_)) => KeyPhase::PendingDebounce,
            (None, None) => KeyPhase::Idle,
        }
    }
}

type Relevance = Box<dyn FnMut(ClientKey) -> bool>;

/// Debounces and coalesces render requests per client.
///
/// For each key: a request is submitted only after the debounce window passes with no newer
/// request; at most one job runs at a time; requests made while a job runs collapse into a
/// single follow-up carrying the latest payload. Jobs and results for keys the relevance check
/// rejects are dropped silently.
///
/// Single-threaded: drive it from the thread that owns the UI state with [`JobScheduler::poll`]
/// and [`JobScheduler::complete`], or [`JobScheduler::run_once`].
pub struct JobScheduler<S, C = SystemClock> {
    sink: S,
    clock: C,
    window: Duration,
    keys: HashMap<ClientKey, KeyEntry>,
    tickets: HashMap<Ticket, ClientKey>,
    abandoned: HashMap<Ticket, ClientKey>,
    relevant: Relevance,
    submitted: u64,
}

impl<S: JobSink> JobScheduler<S, SystemClock> {
    /// Scheduler on wall-clock time.
    pub fn new(sink: S, config: &SchedulerConfig) -> Self {
        Self::with_clock(sink, config, SystemClock)
    }
}

impl<S: JobSink, C: Clock> JobScheduler<S, C> {
    /// Scheduler on an explicit clock.
    pub fn with_clock(sink: S, config: &SchedulerConfig, clock: C) -> Self {
        Self {
            sink,
            clock,
            window: config.debounce(),
            keys: HashMap::new(),
            tickets: HashMap::new(),
            abandoned: HashMap::new(),
            relevant: Box::new(|_| true),
            submitted: 0,
        }
    }

    /// Install the check deciding whether a key's target still wants results.
    pub fn with_relevance(mut self, relevant: impl FnMut(ClientKey) -> bool + 'static) -> Self {
        self.relevant = Box::new(relevant);
        self
    }

    /// Ask for a render. Supersedes any request for the same key that has not started yet.
    pub fn request(&mut self, job: RenderJob) {
        let now = self.clock.now();
        let window = self.window;
        let key = job.key;
        let entry = self.keys.entry(key).or_insert_with(|| KeyEntry {
            in_flight: None,
            pending: None,
            timer: DebounceTimer::new(window),
        });
        if entry.pending.replace(job).is_some() {
            tracing::trace!(%key, "request superseded");
        }
        entry.timer.arm(now);
    }

    /// Submit every pending request whose window has elapsed and whose key is idle. Returns the
    /// number of jobs submitted.
    pub fn poll(&mut self) -> usize {
        let now = self.clock.now();
        let mut due: Vec<ClientKey> = self
            .keys
            .iter()
            .filter(|(k, e)| {
                e.in_flight.is_none()
                    && e.pending.is_some()
                    && e.timer.is_due(now)
                    && !self.is_draining(**k)
            })
            .map(|(k, _)| *k)
            .collect();
        due.sort();

        let mut started = 0;
        for key in due {
            if !(self.relevant)(key) {
                tracing::debug!(%key, "dropping request for irrelevant client");
                self.keys.remove(&key);
                continue;
            }
            let Some(entry) = self.keys.get_mut(&key) else {
                continue;
            };
            let Some(job) = entry.pending.take() else {
                continue;
            };
            entry.timer.cancel();
            let ticket = self.sink.submit(job);
            entry.in_flight = Some(ticket);
            self.tickets.insert(ticket, key);
            self.submitted += 1;
            started += 1;
        }
        started
    }

    /// Account for a finished job. Returns it when it should be delivered to the client.
    ///
    /// A result is withheld when a newer request for the same key is already waiting; only the
    /// follow-up's result reaches the client.
    pub fn complete(&mut self, completion: Completion) -> Option<Completion> {
        if let Some(key) = self.abandoned.remove(&completion.ticket) {
            tracing::debug!(%key, ticket = completion.ticket.id(), "completion for removed client");
            return None;
        }
        let Some(key) = self.tickets.remove(&completion.ticket) else {
            tracing::debug!(ticket = completion.ticket.id(), "completion for unknown ticket");
            return None;
        };
        let entry = self.keys.get_mut(&key)?;
        if entry.in_flight != Some(completion.ticket) {
            return None;
        }
        entry.in_flight = None;

        if !(self.relevant)(key) {
            tracing::debug!(%key, "dropping result for irrelevant client");
            self.keys.remove(&key);
            return None;
        }
        if entry.pending.is_some() {
            tracing::debug!(%key, "dropping superseded result");
            return None;
        }
        self.keys.remove(&key);
        Some(completion)
    }

    /// Earliest instant a pending request becomes due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.keys
            .iter()
            .filter(|(k, e)| e.in_flight.is_none() && !self.is_draining(**k))
            .filter_map(|(_, e)| e.timer.deadline())
            .min()
    }

    /// A job for `key` started before the client was removed and has not finished yet.
    fn is_draining(&self, key: ClientKey) -> bool {
        self.abandoned.values().any(|k| *k == key)
    }

    /// One turn of the control loop: submit due requests, then wait up to `max_wait` (less if a
    /// window closes sooner) for a completion and account for it.
    pub fn run_once(&mut self, max_wait: Duration) -> Option<Completion> {
        self.poll();
        let now = self.clock.now();
        let wait = self
            .next_deadline()
            .map(|d| d.saturating_duration_since(now).min(max_wait))
            .unwrap_or(max_wait);

        let delivered = if self.tickets.is_empty() && self.abandoned.is_empty() {
            self.clock.sleep(wait);
            None
        } else {
            self.sink
                .wait_completion(wait)
                .and_then(|c| self.complete(c))
        };
        self.poll();
        delivered
    }

    /// Forget a client: pending and in-flight work is abandoned and the sink drops its state.
    ///
    /// A job that already started keeps running; its result is discarded and a new request for
    /// the same key is held back until it finishes.
    pub fn remove_client(&mut self, key: ClientKey) {
        self.keys.remove(&key);
        let owned: Vec<Ticket> = self
            .tickets
            .iter()
            .filter(|(_, k)| **k == key)
            .map(|(t, _)| *t)
            .collect();
        let discarded = self.sink.forget_client(key);
        for ticket in owned {
            self.tickets.remove(&ticket);
            if !discarded.contains(&ticket) {
                self.abandoned.insert(ticket, key);
            }
        }
    }

    /// Current phase of `key`.
    pub fn phase(&self, key: ClientKey) -> KeyPhase {
        self.keys.get(&key).map_or(KeyPhase::Idle, KeyEntry::phase)
    }

    /// Jobs submitted and not yet completed, including those of removed clients.
    pub fn in_flight(&self) -> usize {
        self.tickets.len() + self.abandoned.len()
    }

    /// Total jobs submitted so far.
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    /// The sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// The sink, mutably.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

#[cfg(test)]
#[path = "../../tests/unit/schedule/scheduler.rs"]
mod tests;
