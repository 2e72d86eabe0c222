#![allow(missing_docs)]
//! Host-level tests for the fault register and the LED pattern priority.

use terralog::fault::{FaultMask, FaultRegister};
use terralog::indicator::{FLASH_PERIOD, FLICKER_PERIOD, IndicatorEngine, LedPattern};

#[test]
fn from_bits_drops_unknown_bits() {
    assert_eq!(FaultMask::from_bits(0xFF), FaultMask::ALL);
    assert_eq!(FaultMask::from_bits(0b0100_0000), FaultMask::NONE);
    assert!(FaultMask::from_bits(0).is_empty());
}

#[test]
fn startup_codes_outrank_every_combination() {
    let startup = FaultMask::INITIALIZING.union(FaultMask::RECALIBRATING);
    for bits in 0..=FaultMask::ALL.bits() {
        let mask = FaultMask::from_bits(bits);
        if mask.intersects(startup) {
            assert_eq!(LedPattern::from_faults(mask), LedPattern::flicker());
        }
    }
}

#[test]
fn connectivity_codes_outrank_threshold_alerts() {
    let startup = FaultMask::INITIALIZING.union(FaultMask::RECALIBRATING);
    let connectivity = FaultMask::WIFI_DISCONNECTED
        .union(FaultMask::NTP_SYNC_FAILED)
        .union(FaultMask::SENSOR_READ_FAILED);
    for bits in 0..=FaultMask::ALL.bits() {
        let mask = FaultMask::from_bits(bits);
        if mask.intersects(connectivity) && !mask.intersects(startup) {
            assert_eq!(LedPattern::from_faults(mask), LedPattern::flash());
        }
    }
}

#[test]
fn threshold_alone_holds_the_led_steady() {
    assert_eq!(
        LedPattern::from_faults(FaultMask::SENSOR_THRESHOLD),
        LedPattern::On
    );
    assert_eq!(LedPattern::from_faults(FaultMask::NONE), LedPattern::Off);
}

#[test]
fn pattern_periods_match_their_rates() {
    assert_eq!(LedPattern::flicker().period(), Some(FLICKER_PERIOD));
    assert_eq!(LedPattern::flash().period(), Some(FLASH_PERIOD));
    assert_eq!(LedPattern::On.period(), None);
    assert_eq!(LedPattern::Off.period(), None);
}

#[test]
fn register_recomputes_the_pattern_on_every_set() {
    let register = FaultRegister::new();
    register.init(FaultMask::NONE);
    assert_eq!(register.indicator().pattern(), LedPattern::Off);

    register.set(FaultMask::WIFI_DISCONNECTED, true);
    assert_eq!(register.indicator().pattern(), LedPattern::flash());

    // A lower-priority code appears; the pattern must not regress.
    register.set(FaultMask::SENSOR_THRESHOLD, true);
    assert_eq!(register.indicator().pattern(), LedPattern::flash());

    register.set(FaultMask::WIFI_DISCONNECTED, false);
    assert_eq!(register.indicator().pattern(), LedPattern::On);

    register.set(FaultMask::SENSOR_THRESHOLD, false);
    assert_eq!(register.indicator().pattern(), LedPattern::Off);
    assert!(register.query().is_empty());
}

#[test]
fn set_and_clear_touch_only_their_own_code() {
    let register = FaultRegister::new();
    register.init(FaultMask::INITIALIZING);

    register.set(FaultMask::SENSOR_READ_FAILED, true);
    register.set(FaultMask::SENSOR_READ_FAILED, true);
    assert_eq!(
        register.query(),
        FaultMask::INITIALIZING.union(FaultMask::SENSOR_READ_FAILED)
    );

    // Clearing a code that was never set changes nothing.
    register.set(FaultMask::NTP_SYNC_FAILED, false);
    assert_eq!(
        register.query(),
        FaultMask::INITIALIZING.union(FaultMask::SENSOR_READ_FAILED)
    );
}

#[test]
fn init_replaces_any_previous_codes() {
    let register = FaultRegister::new();
    register.init(FaultMask::INITIALIZING.union(FaultMask::RECALIBRATING));
    register.init(FaultMask::NONE);
    assert!(register.query().is_empty());
    assert_eq!(register.indicator().pattern(), LedPattern::Off);
}

#[test]
fn unchanged_pattern_is_not_signaled_again() {
    let engine = IndicatorEngine::new();
    engine.refresh(FaultMask::SENSOR_READ_FAILED);
    assert_eq!(engine.try_take_change(), Some(LedPattern::flash()));

    // Same pattern from a different code: the LED task must not be poked,
    // or a running flash would restart mid-cycle.
    engine.refresh(FaultMask::NTP_SYNC_FAILED);
    assert_eq!(engine.try_take_change(), None);

    engine.refresh(FaultMask::NONE);
    assert_eq!(engine.try_take_change(), Some(LedPattern::Off));
}
