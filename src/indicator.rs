//! Status-LED indicator: maps the fault mask to an LED pattern and drives
//! the LED from a background task.
//!
//! The mapping is a strict priority: startup and calibration flicker beats
//! connectivity flash beats threshold steady-on beats off. See
//! [`LedPattern::from_faults`].

#![allow(clippy::future_not_send, reason = "single-threaded")]

use core::cell::Cell;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::Duration;

#[cfg(not(feature = "host"))]
use embassy_executor::Spawner;
#[cfg(not(feature = "host"))]
use embassy_futures::select::{Either, select};
#[cfg(not(feature = "host"))]
use embassy_rp::Peri;
#[cfg(not(feature = "host"))]
use embassy_rp::gpio::{Drive, Level, Output, Pin};
#[cfg(not(feature = "host"))]
use embassy_time::Timer;

use crate::fault::FaultMask;

/// Toggle period while initializing or recalibrating.
pub const FLICKER_PERIOD: Duration = Duration::from_millis(50);
/// Toggle period while a connectivity or sensor fault is latched.
pub const FLASH_PERIOD: Duration = Duration::from_millis(500);

/// What the status LED should be doing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LedPattern {
    /// Off: no faults.
    Off,
    /// Steadily on: a sensor threshold alert.
    On,
    /// Slow toggle: a connectivity or sensor fault.
    Flash(Duration),
    /// Fast toggle: the device is initializing or recalibrating.
    Flicker(Duration),
}

impl LedPattern {
    /// The flash pattern at its standard period.
    #[must_use]
    pub const fn flash() -> Self {
        Self::Flash(FLASH_PERIOD)
    }

    /// The flicker pattern at its standard period.
    #[must_use]
    pub const fn flicker() -> Self {
        Self::Flicker(FLICKER_PERIOD)
    }

    /// Derives the pattern for a fault mask.
    ///
    /// The priority is strict and independent of the order in which codes
    /// were set:
    ///
    /// 1. `INITIALIZING` or `RECALIBRATING`: flicker
    /// 2. `WIFI_DISCONNECTED`, `NTP_SYNC_FAILED`, or `SENSOR_READ_FAILED`: flash
    /// 3. `SENSOR_THRESHOLD`: on
    /// 4. empty mask: off
    #[must_use]
    pub fn from_faults(mask: FaultMask) -> Self {
        if mask.intersects(FaultMask::INITIALIZING.union(FaultMask::RECALIBRATING)) {
            Self::flicker()
        } else if mask.intersects(
            FaultMask::WIFI_DISCONNECTED
                .union(FaultMask::NTP_SYNC_FAILED)
                .union(FaultMask::SENSOR_READ_FAILED),
        ) {
            Self::flash()
        } else if mask.intersects(FaultMask::SENSOR_THRESHOLD) {
            Self::On
        } else {
            Self::Off
        }
    }

    /// The toggle period for periodic patterns, `None` for steady levels.
    #[must_use]
    pub const fn period(self) -> Option<Duration> {
        match self {
            Self::Off | Self::On => None,
            Self::Flash(period) | Self::Flicker(period) => Some(period),
        }
    }
}

type PatternSignal = Signal<CriticalSectionRawMutex, LedPattern>;

/// Holds the current LED pattern and hands pattern changes to the LED task.
///
/// [`refresh`](Self::refresh) diffs the derived pattern against the current
/// one and stays silent when they match, so a periodic pattern keeps its
/// toggle phase while unrelated fault bits churn.
pub struct IndicatorEngine {
    pattern: Mutex<CriticalSectionRawMutex, Cell<LedPattern>>,
    changes: PatternSignal,
}

impl IndicatorEngine {
    /// Creates an engine with the LED off.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pattern: Mutex::new(Cell::new(LedPattern::Off)),
            changes: Signal::new(),
        }
    }

    /// Recomputes the pattern for `mask`, signaling the LED task only when
    /// the pattern actually changes.
    pub fn refresh(&self, mask: FaultMask) {
        let next = LedPattern::from_faults(mask);
        let changed = self.pattern.lock(|cell| {
            if cell.get() == next {
                false
            } else {
                cell.set(next);
                true
            }
        });
        if changed {
            self.changes.signal(next);
        }
    }

    /// The currently armed pattern.
    #[must_use]
    pub fn pattern(&self) -> LedPattern {
        self.pattern.lock(Cell::get)
    }

    /// Waits for the next pattern change.
    pub async fn wait_for_change(&self) -> LedPattern {
        self.changes.wait().await
    }

    /// Takes a queued pattern change without waiting, if one is pending.
    pub fn try_take_change(&self) -> Option<LedPattern> {
        self.changes.try_take()
    }
}

impl Default for IndicatorEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(feature = "host"))]
impl IndicatorEngine {
    /// Connects the status LED and starts the LED task.
    ///
    /// The pad drives at 12 mA to keep an external LED with a series
    /// resistor visible.
    pub fn drive_led<P: Pin>(&'static self, pin: Peri<'static, P>, spawner: Spawner) {
        let mut led = Output::new(pin, Level::Low);
        led.set_drive_strength(Drive::_12mA);
        defmt::unwrap!(spawner.spawn(led_task(self, led)));
    }
}

#[cfg(not(feature = "host"))]
#[embassy_executor::task]
async fn led_task(engine: &'static IndicatorEngine, mut led: Output<'static>) -> ! {
    let mut pattern = engine.pattern();
    loop {
        match pattern.period() {
            None => {
                let level = if matches!(pattern, LedPattern::On) {
                    Level::High
                } else {
                    Level::Low
                };
                led.set_level(level);
                pattern = engine.wait_for_change().await;
            }
            Some(period) => {
                let mut lit = true;
                led.set_level(Level::High);
                pattern = loop {
                    match select(engine.wait_for_change(), Timer::after(period)).await {
                        Either::First(next) => break next,
                        Either::Second(()) => {
                            lit = !lit;
                            led.set_level(if lit { Level::High } else { Level::Low });
                        }
                    }
                };
            }
        }
    }
}
