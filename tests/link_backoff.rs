#![allow(missing_docs)]
//! Host-level tests for reconnect backoff and the link monitor schedule.

use embassy_time::{Duration, Instant};
use terralog::backoff::Backoff;
use terralog::fault::{FaultMask, FaultRegister};
use terralog::wifi_link::{LinkConfig, LinkMonitor, ReconnectOutcome};

#[test]
fn backoff_doubles_until_the_cap() {
    let mut backoff = Backoff::new(Duration::from_secs(10), Duration::from_secs(300));

    for expected in [10, 20, 40, 80] {
        assert_eq!(backoff.delay(), Duration::from_secs(expected));
        assert!(!backoff.advance());
    }

    // The next doubling would pass 300s, so this advance saturates.
    assert_eq!(backoff.delay(), Duration::from_secs(160));
    assert!(backoff.advance());
    assert_eq!(backoff.delay(), Duration::from_secs(300));

    // Saturated stays saturated.
    assert!(backoff.advance());
    assert_eq!(backoff.delay(), Duration::from_secs(300));

    backoff.reset();
    assert_eq!(backoff.delay(), Duration::from_secs(10));
}

#[test]
fn first_check_lands_one_interval_after_startup() {
    let start = Instant::from_secs(0);
    let monitor = LinkMonitor::new(&LinkConfig::default(), start);

    assert!(monitor.is_connected());
    assert_eq!(monitor.next_check_at(), start + Duration::from_secs(10));
    assert!(!monitor.should_check(start + Duration::from_secs(9)));
    assert!(monitor.should_check(start + Duration::from_secs(10)));
}

#[test]
fn healthy_checks_never_grow_the_delay() {
    let faults = FaultRegister::new();
    let mut monitor = LinkMonitor::new(&LinkConfig::default(), Instant::from_secs(0));

    for round in 1..=4 {
        let now = Instant::from_secs(round * 10);
        monitor.note_link_up(now, &faults);
        assert_eq!(monitor.retry_delay(), Duration::from_secs(10));
        assert_eq!(monitor.next_check_at(), now + Duration::from_secs(10));
    }
    assert!(faults.query().is_empty());
}

#[test]
fn fifth_straight_failure_saturates_and_latches_the_fault() {
    let faults = FaultRegister::new();
    let mut monitor = LinkMonitor::new(&LinkConfig::default(), Instant::from_secs(0));

    // Delay before each failed attempt: 10, 20, 40, 80, then 160 seconds.
    let mut now = Instant::from_secs(10);
    for expected_delay in [10, 20, 40, 80] {
        let outcome = monitor.note_reconnect(false, now, &faults);
        assert_eq!(outcome, ReconnectOutcome::Failed { saturated: false });
        assert!(!monitor.is_connected());
        assert_eq!(
            monitor.next_check_at(),
            now + Duration::from_secs(expected_delay)
        );
        assert!(!faults.query().intersects(FaultMask::WIFI_DISCONNECTED));
        now = monitor.next_check_at();
    }

    let outcome = monitor.note_reconnect(false, now, &faults);
    assert_eq!(outcome, ReconnectOutcome::Failed { saturated: true });
    assert_eq!(monitor.next_check_at(), now + Duration::from_secs(160));
    assert!(faults.query().intersects(FaultMask::WIFI_DISCONNECTED));

    // Once saturated, every further failure keeps the capped delay.
    now = monitor.next_check_at();
    let outcome = monitor.note_reconnect(false, now, &faults);
    assert_eq!(outcome, ReconnectOutcome::Failed { saturated: true });
    assert_eq!(monitor.next_check_at(), now + Duration::from_secs(300));
}

#[test]
fn recovery_clears_the_fault_and_resets_the_schedule() {
    let faults = FaultRegister::new();
    let mut monitor = LinkMonitor::new(&LinkConfig::default(), Instant::from_secs(0));

    let mut now = Instant::from_secs(10);
    for _ in 0..5 {
        monitor.note_reconnect(false, now, &faults);
        now = monitor.next_check_at();
    }
    assert!(faults.query().intersects(FaultMask::WIFI_DISCONNECTED));

    let outcome = monitor.note_reconnect(true, now, &faults);
    assert_eq!(outcome, ReconnectOutcome::Recovered);
    assert!(monitor.is_connected());
    assert!(!faults.query().intersects(FaultMask::WIFI_DISCONNECTED));
    assert_eq!(monitor.retry_delay(), Duration::from_secs(10));
    assert_eq!(monitor.next_check_at(), now + Duration::from_secs(10));
}
