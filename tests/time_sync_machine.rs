#![allow(missing_docs)]
//! Host-level tests driving the NTP state machine with synthetic time.

use core::net::Ipv4Addr;
use embassy_time::{Duration, Instant};
use terralog::clock::UnixSeconds;
use terralog::fault::{FaultMask, FaultRegister};
use terralog::ntp;
use terralog::time_sync::{PollAction, SyncConfig, SyncMachine, SyncPhase};

const SERVER: Ipv4Addr = Ipv4Addr::new(129, 6, 15, 28);

/// A well-formed 48-byte response carrying the given transmit seconds.
fn response_with_transmit_seconds(seconds: u32) -> [u8; ntp::PACKET_LEN] {
    let mut packet = [0u8; ntp::PACKET_LEN];
    for (target, byte) in packet.iter_mut().skip(40).zip(seconds.to_be_bytes()) {
        *target = byte;
    }
    packet
}

/// Runs one full successful request cycle starting at `now`.
fn sync_once(machine: &mut SyncMachine, now: Instant, faults: &FaultRegister) {
    match machine.poll(now, true, faults) {
        PollAction::Resolve => {
            assert_eq!(machine.on_dns_resolved(SERVER, now), PollAction::Send(SERVER));
        }
        PollAction::Send(addr) => assert_eq!(addr, SERVER),
        other => panic!("cycle could not start: {other:?}"),
    }
    let response = response_with_transmit_seconds(3_908_988_800);
    let unix = machine.on_response(&response, now, faults);
    assert_eq!(unix, Some(UnixSeconds::new(1_700_000_000)));
    machine.on_committed(now, faults);
}

#[test]
fn first_sync_commits_and_arms_the_resync_deadline() {
    let faults = FaultRegister::new();
    let start = Instant::from_secs(0);
    let mut machine = SyncMachine::new(SyncConfig::default(), start);

    assert_eq!(machine.poll(start, true, &faults), PollAction::Resolve);
    assert_eq!(machine.phase(), SyncPhase::ResolvingDns);

    assert_eq!(
        machine.on_dns_resolved(SERVER, start),
        PollAction::Send(SERVER)
    );
    assert_eq!(machine.phase(), SyncPhase::AwaitingResponse);
    // The very first request runs against the short startup deadline.
    assert_eq!(machine.request_deadline(), start + Duration::from_secs(2));

    // 1,700,000,000 Unix seconds, in NTP's 1900-based epoch.
    let response = response_with_transmit_seconds(3_908_988_800);
    let unix = machine.on_response(&response, start, &faults);
    assert_eq!(unix, Some(UnixSeconds::new(1_700_000_000)));
    // The machine waits for the RTC verdict before going idle.
    assert_eq!(machine.phase(), SyncPhase::AwaitingResponse);

    machine.on_committed(start, &faults);
    assert_eq!(machine.phase(), SyncPhase::Idle);
    assert!(machine.first_sync_done());
    assert_eq!(machine.attempts(), 0);
    assert!(machine.is_synchronized(start));
    assert!(faults.query().is_empty());
}

#[test]
fn resync_expiry_is_lazy_and_sets_no_fault() {
    let faults = FaultRegister::new();
    let start = Instant::from_secs(0);
    let mut machine = SyncMachine::new(SyncConfig::default(), start);
    sync_once(&mut machine, start, &faults);

    let last_valid = start + Duration::from_secs(86_399);
    assert!(machine.is_synchronized(last_valid));

    let expired = start + Duration::from_secs(86_400);
    assert!(!machine.is_synchronized(expired));
    assert!(faults.query().is_empty());
}

#[test]
fn down_link_defers_without_counting_an_attempt() {
    let faults = FaultRegister::new();
    let start = Instant::from_secs(0);
    let mut machine = SyncMachine::new(SyncConfig::default(), start);

    assert_eq!(machine.poll(start, false, &faults), PollAction::AwaitLink);
    assert_eq!(
        machine.poll(start + Duration::from_secs(60), false, &faults),
        PollAction::AwaitLink
    );
    assert_eq!(machine.attempts(), 0);

    assert_eq!(
        machine.poll(start + Duration::from_secs(61), true, &faults),
        PollAction::Resolve
    );
}

#[test]
fn wrong_length_responses_are_single_failures_with_immediate_retry() {
    let faults = FaultRegister::new();
    let start = Instant::from_secs(0);
    let mut machine = SyncMachine::new(SyncConfig::default(), start);

    assert_eq!(machine.poll(start, true, &faults), PollAction::Resolve);
    machine.on_dns_resolved(SERVER, start);

    // One byte short: rejected without parsing, one failure.
    let undersized = [0u8; 47];
    assert_eq!(machine.on_response(&undersized, start, &faults), None);
    assert_eq!(machine.attempts(), 1);
    assert_eq!(machine.phase(), SyncPhase::Idle);

    // Before the first sync the retry is immediate, and the resolved
    // address is reused without another DNS pass.
    assert_eq!(machine.poll(start, true, &faults), PollAction::Send(SERVER));
    // Later requests get the full response deadline.
    assert_eq!(machine.request_deadline(), start + Duration::from_secs(10));

    let oversized = [0u8; 49];
    assert_eq!(machine.on_response(&oversized, start, &faults), None);
    assert_eq!(machine.attempts(), 2);
    assert_eq!(machine.poll(start, true, &faults), PollAction::Send(SERVER));
}

#[test]
fn passed_deadline_fails_the_request_within_poll() {
    let faults = FaultRegister::new();
    let start = Instant::from_secs(0);
    let mut machine = SyncMachine::new(SyncConfig::default(), start);

    assert_eq!(machine.poll(start, true, &faults), PollAction::Resolve);
    let deadline = machine.request_deadline();
    assert_eq!(deadline, start + Duration::from_secs(5));

    assert_eq!(
        machine.poll(start + Duration::from_secs(1), true, &faults),
        PollAction::InFlight
    );
    assert_eq!(machine.attempts(), 0);

    // At the deadline the hung resolution counts as a failure and the
    // same poll starts the next cycle.
    assert_eq!(machine.poll(deadline, true, &faults), PollAction::Resolve);
    assert_eq!(machine.attempts(), 1);
}

#[test]
fn rtc_rejection_is_an_ordinary_failure() {
    let faults = FaultRegister::new();
    let start = Instant::from_secs(0);
    let mut machine = SyncMachine::new(SyncConfig::default(), start);

    assert_eq!(machine.poll(start, true, &faults), PollAction::Resolve);
    machine.on_dns_resolved(SERVER, start);
    let response = response_with_transmit_seconds(3_908_988_800);
    assert!(machine.on_response(&response, start, &faults).is_some());

    machine.on_commit_rejected(start, &faults);
    assert_eq!(machine.phase(), SyncPhase::Idle);
    assert_eq!(machine.attempts(), 1);
    assert!(!machine.first_sync_done());
    assert_eq!(machine.poll(start, true, &faults), PollAction::Send(SERVER));
}

#[test]
fn post_sync_failures_back_off_and_latch_the_fault_at_saturation() {
    let faults = FaultRegister::new();
    let start = Instant::from_secs(0);
    let mut machine = SyncMachine::new(SyncConfig::default(), start);
    sync_once(&mut machine, start, &faults);

    // First resync attempt, one interval later.
    let mut now = start + Duration::from_secs(86_400);
    assert_eq!(machine.poll(now, true, &faults), PollAction::Send(SERVER));

    // Failure 1 retries immediately; 2 through 5 space out as
    // 30, 60, 120, then 240 seconds.
    machine.on_timeout(machine.request_deadline(), &faults);
    assert_eq!(machine.attempts(), 1);
    now = machine.request_deadline();
    assert_eq!(machine.poll(now, true, &faults), PollAction::Send(SERVER));

    for (failure, spacing) in [(2, 30), (3, 60), (4, 120)] {
        machine.on_timeout(now, &faults);
        assert_eq!(machine.attempts(), failure);
        assert!(!faults.query().intersects(FaultMask::NTP_SYNC_FAILED));
        assert_eq!(
            machine.poll(now, true, &faults),
            PollAction::Wait {
                until: now + Duration::from_secs(spacing)
            }
        );
        now += Duration::from_secs(spacing);
        assert_eq!(machine.poll(now, true, &faults), PollAction::Send(SERVER));
    }

    // The fifth failure saturates the backoff and latches the fault.
    machine.on_timeout(now, &faults);
    assert_eq!(machine.attempts(), 5);
    assert!(faults.query().intersects(FaultMask::NTP_SYNC_FAILED));
    assert_eq!(
        machine.poll(now, true, &faults),
        PollAction::Wait {
            until: now + Duration::from_secs(240)
        }
    );

    // One success clears the fault and restores the base delay.
    now += Duration::from_secs(240);
    sync_once(&mut machine, now, &faults);
    assert!(!faults.query().intersects(FaultMask::NTP_SYNC_FAILED));
    assert_eq!(machine.attempts(), 0);
    assert_eq!(machine.retry_delay(), Duration::from_secs(30));
}

#[test]
fn request_bytes_and_epoch_conversion_match_the_wire_format() {
    let request = ntp::client_request();
    assert_eq!(request.len(), 48);
    assert_eq!(request.first(), Some(&ntp::CLIENT_REQUEST_HEADER));
    assert!(request.iter().skip(1).all(|&byte| byte == 0));

    assert_eq!(ntp::transmit_seconds(&[0u8; 47]), None);
    assert_eq!(ntp::transmit_seconds(&[0u8; 49]), None);
    let response = response_with_transmit_seconds(3_908_988_800);
    assert_eq!(ntp::transmit_seconds(&response), Some(3_908_988_800));

    assert_eq!(ntp::to_unix_seconds(3_908_988_800), 1_700_000_000);
    // The NTP epoch itself is the Unix epoch minus the 1900 offset.
    assert_eq!(ntp::to_unix_seconds(0), -ntp::NTP_TO_UNIX_OFFSET);
}
