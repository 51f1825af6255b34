use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use super::*;
use crate::format::display_format::DisplayFormat;
use crate::foundation::error::RenderFault;
use crate::schedule::timer::ManualClock;

/// Records submissions; completions are released by the test.
#[derive(Default)]
struct FakeSink {
    submitted: Vec<(Ticket, RenderJob)>,
    ready: VecDeque<Completion>,
    forgotten: Vec<ClientKey>,
    not_started: Vec<Ticket>,
    next: u64,
}

impl FakeSink {
    fn finish(&mut self, ticket: Ticket) {
        let (_, job) = self
            .submitted
            .iter()
            .find(|(t, _)| *t == ticket)
            .cloned()
            .unwrap();
        self.ready.push_back(Completion {
            ticket,
            key: job.key,
            outcome: Err(RenderFault::NoPage),
        });
    }

    fn last_ticket(&self) -> Ticket {
        self.submitted.last().unwrap().0
    }
}

impl JobSink for FakeSink {
    fn submit(&mut self, job: RenderJob) -> Ticket {
        self.next += 1;
        let ticket = Ticket::from_id(self.next);
        self.submitted.push((ticket, job));
        ticket
    }

    fn wait_completion(&mut self, _timeout: Duration) -> Option<Completion> {
        self.ready.pop_front()
    }

    fn forget_client(&mut self, key: ClientKey) -> Vec<Ticket> {
        self.forgotten.push(key);
        let submitted = &self.submitted;
        let (dropped, kept): (Vec<Ticket>, Vec<Ticket>) = self
            .not_started
            .drain(..)
            .partition(|t| submitted.iter().any(|(s, j)| s == t && j.key == key));
        self.not_started = kept;
        dropped
    }
}

const WINDOW: Duration = Duration::from_millis(100);

fn scheduler(clock: &ManualClock) -> JobScheduler<FakeSink, ManualClock> {
    let config = SchedulerConfig { debounce_ms: 100 };
    JobScheduler::with_clock(FakeSink::default(), &config, clock.clone())
}

fn job(key: u64, payload: &str) -> RenderJob {
    RenderJob::new(ClientKey(key), payload.as_bytes().to_vec(), DisplayFormat::BGRX)
}

#[test]
fn nothing_is_submitted_before_the_window_elapses() {
    let clock = ManualClock::new();
    let mut s = scheduler(&clock);
    s.request(job(1, "a"));
    assert_eq!(s.phase(ClientKey(1)), KeyPhase::PendingDebounce);

    clock.advance(WINDOW - Duration::from_millis(1));
    assert_eq!(s.poll(), 0);
    clock.advance(Duration::from_millis(1));
    assert_eq!(s.poll(), 1);
    assert_eq!(s.phase(ClientKey(1)), KeyPhase::InFlight);
}

#[test]
fn a_burst_collapses_into_the_last_request() {
    let clock = ManualClock::new();
    let mut s = scheduler(&clock);
    for payload in ["a", "b", "c", "d"] {
        s.request(job(1, payload));
        clock.advance(Duration::from_millis(50));
        assert_eq!(s.poll(), 0);
    }
    clock.advance(Duration::from_millis(50));
    assert_eq!(s.poll(), 1);

    let submitted = &s.sink().submitted;
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].1.input, b"d");
}

#[test]
fn requests_during_a_job_become_one_follow_up() {
    let clock = ManualClock::new();
    let mut s = scheduler(&clock);
    s.request(job(1, "first"));
    clock.advance(WINDOW);
    s.poll();
    let first = s.sink().last_ticket();

    s.request(job(1, "second"));
    s.request(job(1, "third"));
    clock.advance(WINDOW * 3);
    assert_eq!(s.poll(), 0, "only one job per key at a time");
    assert_eq!(s.phase(ClientKey(1)), KeyPhase::InFlight);

    s.sink_mut().finish(first);
    let done = s.sink_mut().wait_completion(Duration::ZERO).unwrap();
    assert!(s.complete(done).is_none(), "superseded result is withheld");
    assert_eq!(s.phase(ClientKey(1)), KeyPhase::PendingDebounce);

    assert_eq!(s.poll(), 1);
    let submitted = &s.sink().submitted;
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[1].1.input, b"third");

    let follow_up = s.sink().last_ticket();
    s.sink_mut().finish(follow_up);
    let done = s.sink_mut().wait_completion(Duration::ZERO).unwrap();
    assert_eq!(s.complete(done).map(|c| c.ticket), Some(follow_up));
    assert_eq!(s.phase(ClientKey(1)), KeyPhase::Idle);
}

#[test]
fn completion_without_follow_up_returns_to_idle() {
    let clock = ManualClock::new();
    let mut s = scheduler(&clock);
    s.request(job(7, "x"));
    clock.advance(WINDOW);
    s.poll();
    let t = s.sink().last_ticket();
    s.sink_mut().finish(t);

    let delivered = s.run_once(Duration::from_millis(10)).unwrap();
    assert_eq!(delivered.key, ClientKey(7));
    assert_eq!(s.phase(ClientKey(7)), KeyPhase::Idle);
    assert_eq!(s.in_flight(), 0);
}

#[test]
fn keys_are_debounced_independently() {
    let clock = ManualClock::new();
    let mut s = scheduler(&clock);
    s.request(job(1, "a"));
    clock.advance(Duration::from_millis(60));
    s.request(job(2, "b"));
    clock.advance(Duration::from_millis(40));
    assert_eq!(s.poll(), 1);
    assert_eq!(s.sink().submitted[0].1.key, ClientKey(1));
    clock.advance(Duration::from_millis(60));
    assert_eq!(s.poll(), 1);
    assert_eq!(s.sink().submitted[1].1.key, ClientKey(2));
}

#[test]
fn irrelevant_requests_are_never_submitted() {
    let clock = ManualClock::new();
    let alive = Rc::new(Cell::new(true));
    let flag = alive.clone();
    let mut s = scheduler(&clock).with_relevance(move |_| flag.get());
    s.request(job(1, "a"));
    alive.set(false);
    clock.advance(WINDOW);
    assert_eq!(s.poll(), 0);
    assert!(s.sink().submitted.is_empty());
    assert_eq!(s.phase(ClientKey(1)), KeyPhase::Idle);
}

#[test]
fn results_for_irrelevant_clients_are_dropped() {
    let clock = ManualClock::new();
    let gone = Rc::new(RefCell::new(Vec::<ClientKey>::new()));
    let check = gone.clone();
    let mut s = scheduler(&clock).with_relevance(move |k| !check.borrow().contains(&k));
    s.request(job(1, "a"));
    s.request(job(2, "b"));
    clock.advance(WINDOW);
    assert_eq!(s.poll(), 2);

    gone.borrow_mut().push(ClientKey(2));
    let tickets: Vec<Ticket> = s.sink().submitted.iter().map(|(t, _)| *t).collect();
    for t in tickets {
        s.sink_mut().finish(t);
    }
    let mut delivered = Vec::new();
    while let Some(c) = s.sink_mut().wait_completion(Duration::ZERO) {
        delivered.extend(s.complete(c));
    }
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].key, ClientKey(1));
}

#[test]
fn removed_client_is_forgotten_everywhere() {
    let clock = ManualClock::new();
    let mut s = scheduler(&clock);
    s.request(job(3, "a"));
    clock.advance(WINDOW);
    s.poll();
    let t = s.sink().last_ticket();
    s.request(job(3, "b"));

    s.remove_client(ClientKey(3));
    assert_eq!(s.sink().forgotten, vec![ClientKey(3)]);
    assert_eq!(s.phase(ClientKey(3)), KeyPhase::Idle);

    s.sink_mut().finish(t);
    let c = s.sink_mut().wait_completion(Duration::ZERO).unwrap();
    assert!(s.complete(c).is_none());
    clock.advance(WINDOW);
    assert_eq!(s.poll(), 0);
}

#[test]
fn re_request_after_removal_waits_for_the_running_job() {
    let clock = ManualClock::new();
    let mut s = scheduler(&clock);
    s.request(job(3, "a"));
    clock.advance(WINDOW);
    s.poll();
    let running = s.sink().last_ticket();

    s.remove_client(ClientKey(3));
    s.request(job(3, "b"));
    clock.advance(WINDOW * 2);
    assert_eq!(s.poll(), 0, "old job for the key is still running");
    assert_eq!(s.next_deadline(), None);
    assert_eq!(s.in_flight(), 1);

    s.sink_mut().finish(running);
    let c = s.sink_mut().wait_completion(Duration::ZERO).unwrap();
    assert!(s.complete(c).is_none());
    assert_eq!(s.in_flight(), 0);
    assert_eq!(s.poll(), 1);
    assert_eq!(s.sink().submitted[1].1.input, b"b");
}

#[test]
fn re_request_after_removal_of_a_queued_job_is_not_held_back() {
    let clock = ManualClock::new();
    let mut s = scheduler(&clock);
    s.request(job(3, "a"));
    clock.advance(WINDOW);
    s.poll();
    let queued = s.sink().last_ticket();
    s.sink_mut().not_started.push(queued);

    s.remove_client(ClientKey(3));
    assert_eq!(s.in_flight(), 0);
    s.request(job(3, "b"));
    clock.advance(WINDOW);
    assert_eq!(s.poll(), 1);
}

#[test]
fn run_once_drains_completions_of_removed_clients() {
    let clock = ManualClock::new();
    let mut s = scheduler(&clock);
    s.request(job(3, "a"));
    clock.advance(WINDOW);
    s.poll();
    let running = s.sink().last_ticket();
    s.remove_client(ClientKey(3));
    s.request(job(3, "b"));

    s.sink_mut().finish(running);
    assert!(s.run_once(Duration::from_millis(10)).is_none());
    assert_eq!(s.in_flight(), 0);
    clock.advance(WINDOW);
    assert_eq!(s.poll(), 1);
}

#[test]
fn next_deadline_tracks_the_earliest_pending_window() {
    let clock = ManualClock::new();
    let mut s = scheduler(&clock);
    assert_eq!(s.next_deadline(), None);
    let start = clock.now();
    s.request(job(1, "a"));
    clock.advance(Duration::from_millis(30));
    s.request(job(2, "b"));
    assert_eq!(s.next_deadline(), Some(start + WINDOW));
}

#[test]
fn run_once_sleeps_until_the_window_closes() {
    let clock = ManualClock::new();
    let mut s = scheduler(&clock);
    let start = clock.now();
    s.request(job(1, "a"));
    assert!(s.run_once(Duration::from_secs(5)).is_none());
    assert_eq!(clock.now() - start, WINDOW);
    assert_eq!(s.submitted(), 1);
}
