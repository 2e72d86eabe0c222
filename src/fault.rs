//! Fault register: the shared bitmask of fault, warning, and notice codes.
//!
//! Any subsystem may set or clear its own codes at any time. Every mutation
//! synchronously recomputes the LED pattern in the owned
//! [`IndicatorEngine`], so the status LED always reflects the mask that the
//! last mutation produced. See [`FaultRegister`] for a usage example.

use portable_atomic::{AtomicU8, Ordering};

use crate::indicator::IndicatorEngine;

/// A set of fault codes, one bit per code.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FaultMask(u8);

impl FaultMask {
    /// No codes set.
    pub const NONE: Self = Self(0);
    /// The WiFi link is down and reconnection backoff has saturated.
    pub const WIFI_DISCONNECTED: Self = Self(0b1);
    /// Time synchronization keeps failing and its backoff has saturated.
    pub const NTP_SYNC_FAILED: Self = Self(0b10);
    /// A sensor read returned invalid data.
    pub const SENSOR_READ_FAILED: Self = Self(0b100);
    /// Sensor calibration is in progress.
    pub const RECALIBRATING: Self = Self(0b1000);
    /// Device startup has not completed yet.
    pub const INITIALIZING: Self = Self(0b1_0000);
    /// A sensor reading crossed its alert threshold.
    pub const SENSOR_THRESHOLD: Self = Self(0b10_0000);
    /// Every defined code.
    pub const ALL: Self = Self(0b11_1111);

    /// Builds a mask from raw bits, discarding undefined bits.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// The raw bit representation.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// The union of two masks.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// True if any code in `other` is also set in `self`.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// True if no code is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl core::ops::BitOr for FaultMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// The device-wide fault register.
///
/// Construct one as a `static`, seed it with [`init`](Self::init) during
/// startup, then mutate it with [`set`](Self::set) for the life of the
/// device. Reads through [`query`](Self::query) and writes through `set` are
/// atomic, so tasks never coordinate around it.
///
/// # Example
///
/// ```rust
/// use terralog::fault::{FaultMask, FaultRegister};
/// use terralog::indicator::LedPattern;
///
/// static FAULTS: FaultRegister = FaultRegister::new();
///
/// FAULTS.init(FaultMask::INITIALIZING);
/// assert_eq!(FAULTS.indicator().pattern(), LedPattern::flicker());
///
/// FAULTS.set(FaultMask::INITIALIZING, false);
/// FAULTS.set(FaultMask::SENSOR_THRESHOLD, true);
/// assert_eq!(FAULTS.query(), FaultMask::SENSOR_THRESHOLD);
/// assert_eq!(FAULTS.indicator().pattern(), LedPattern::On);
/// ```
pub struct FaultRegister {
    mask: AtomicU8,
    indicator: IndicatorEngine,
}

impl FaultRegister {
    /// Creates an empty register with its indicator off.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            mask: AtomicU8::new(0),
            indicator: IndicatorEngine::new(),
        }
    }

    /// Stores the startup mask and publishes the first LED pattern.
    ///
    /// A datalogger typically boots with `INITIALIZING | RECALIBRATING` so
    /// the LED flickers until startup and calibration complete.
    pub fn init(&self, initial: FaultMask) {
        self.mask.store(initial.bits(), Ordering::Release);
        self.indicator.refresh(initial);
    }

    /// Sets or clears the codes in `code`, leaving all other codes alone.
    ///
    /// The indicator pattern is recomputed before this returns, so a read
    /// immediately afterwards sees the pattern for the new mask.
    pub fn set(&self, code: FaultMask, enabled: bool) {
        let bits = if enabled {
            self.mask.fetch_or(code.bits(), Ordering::AcqRel) | code.bits()
        } else {
            self.mask.fetch_and(!code.bits(), Ordering::AcqRel) & !code.bits()
        };
        self.indicator.refresh(FaultMask::from_bits(bits));
    }

    /// The current mask.
    #[must_use]
    pub fn query(&self) -> FaultMask {
        FaultMask::from_bits(self.mask.load(Ordering::Acquire))
    }

    /// The indicator engine fed by this register.
    #[must_use]
    pub const fn indicator(&self) -> &IndicatorEngine {
        &self.indicator
    }
}

impl Default for FaultRegister {
    fn default() -> Self {
        Self::new()
    }
}
