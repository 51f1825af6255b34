use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Source of time for the scheduler.
pub trait Clock {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Block for `duration` (a manual clock advances instead).
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Clock frozen at the current instant.
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// A cancellable one-shot deadline, re-armed by each new request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DebounceTimer {
    window: Duration,
    deadline: Option<Instant>,
}

impl DebounceTimer {
    /// Disarmed timer with the given quiescence window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Restart the window from `now`.
    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    /// Disarm.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// When the timer fires, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// `true` when armed and the window has elapsed at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/schedule/timer.rs"]
mod tests;
