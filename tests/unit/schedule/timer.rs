use super::*;

#[test]
fn rearming_pushes_the_deadline_out() {
    let clock = ManualClock::new();
    let mut t = DebounceTimer::new(Duration::from_millis(100));
    assert!(!t.is_due(clock.now()));

    t.arm(clock.now());
    clock.advance(Duration::from_millis(60));
    assert!(!t.is_due(clock.now()));
    t.arm(clock.now());
    clock.advance(Duration::from_millis(60));
    assert!(!t.is_due(clock.now()));
    clock.advance(Duration::from_millis(40));
    assert!(t.is_due(clock.now()));

    t.cancel();
    assert!(!t.is_due(clock.now()));
    assert_eq!(t.deadline(), None);
}

#[test]
fn manual_clock_clones_share_time() {
    let a = ManualClock::new();
    let b = a.clone();
    let start = a.now();
    b.sleep(Duration::from_secs(3));
    assert_eq!(a.now() - start, Duration::from_secs(3));
}

#[test]
fn system_clock_moves_forward() {
    let clock = SystemClock;
    let start = clock.now();
    clock.sleep(Duration::from_millis(1));
    assert!(clock.now() > start);
}
