//! Wall-clock support: Unix-seconds conversion, timestamp formatting, and
//! the hardware RTC device.
//!
//! The free functions are pure and run anywhere; [`Clock`] owns the RP2040
//! RTC and is the commit target for time sync.

#![allow(clippy::future_not_send, reason = "single-threaded")]

use core::fmt::Write as _;
use heapless::String;
use time::OffsetDateTime;

#[cfg(not(feature = "host"))]
use core::cell::RefCell;
#[cfg(not(feature = "host"))]
use embassy_rp::Peri;
#[cfg(not(feature = "host"))]
use embassy_rp::peripherals::RTC;
#[cfg(not(feature = "host"))]
use embassy_rp::rtc::{DateTime, DayOfWeek, Rtc};
#[cfg(not(feature = "host"))]
use embassy_sync::blocking_mutex::Mutex;
#[cfg(not(feature = "host"))]
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
#[cfg(not(feature = "host"))]
use embassy_time::{Duration, Instant, Timer};
#[cfg(not(feature = "host"))]
use portable_atomic::{AtomicBool, Ordering};
#[cfg(not(feature = "host"))]
use static_cell::StaticCell;
#[cfg(not(feature = "host"))]
use time::Weekday;

use crate::error::{Error, Result};

/// Seconds since the Unix epoch, as delivered by time sync.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct UnixSeconds(i64);

impl UnixSeconds {
    /// Wraps a raw seconds count.
    #[must_use]
    pub const fn new(seconds: i64) -> Self {
        Self(seconds)
    }

    /// The raw seconds count.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

/// Capacity of formatted timestamp strings.
pub const TIMESTAMP_CAPACITY: usize = 24;

/// A formatted timestamp.
pub type TimestampString = String<TIMESTAMP_CAPACITY>;

/// Returned in place of a timestamp before the first successful sync.
pub const TIME_NOT_SET: &str = "time not set";

/// Converts Unix seconds to a UTC calendar date-time.
pub fn calendar_from_unix(unix: UnixSeconds) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(unix.as_i64()).map_err(|_| Error::InvalidTime)
}

/// Formats `dt` as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn format_utc(dt: &OffsetDateTime) -> Result<TimestampString> {
    let mut out = TimestampString::new();
    write!(
        out,
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        dt.year(),
        u8::from(dt.month()),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second()
    )?;
    Ok(out)
}

/// Formats `dt` as `YYYY-MM-DD HH:MM:SS`, with no zone suffix.
pub fn format_local(dt: &OffsetDateTime) -> Result<TimestampString> {
    let mut out = TimestampString::new();
    write!(
        out,
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        dt.year(),
        u8::from(dt.month()),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second()
    )?;
    Ok(out)
}

/// Shifts a UTC date-time by a fixed offset in minutes.
#[must_use]
pub fn apply_offset(dt: OffsetDateTime, offset_minutes: i32) -> OffsetDateTime {
    dt.saturating_add(time::Duration::minutes(i64::from(offset_minutes)))
}

#[cfg(not(feature = "host"))]
fn sentinel() -> TimestampString {
    let mut out = TimestampString::new();
    // TIMESTAMP_CAPACITY always holds the sentinel text.
    let _ = out.push_str(TIME_NOT_SET);
    out
}

/// Unix seconds for 2025-01-01 00:00:00 UTC, programmed before the first
/// sync so the RTC counter has a valid calendar value to run from.
#[cfg(not(feature = "host"))]
const DEFAULT_CALENDAR: UnixSeconds = UnixSeconds::new(1_735_689_600);

/// How long to wait for the RTC counter to start ticking.
#[cfg(not(feature = "host"))]
const RTC_START_TIMEOUT: Duration = Duration::from_secs(5);

/// Resources for [`Clock`]. See [`Clock::new`] for usage.
#[cfg(not(feature = "host"))]
pub struct ClockStatic {
    cell: StaticCell<Clock>,
}

/// The hardware RTC behind a timestamp API.
///
/// Brought up once at startup with [`Clock::new`], which programs a default
/// calendar value and verifies the counter is running. Timestamp reads
/// return the [`TIME_NOT_SET`] sentinel until the first sync lands through
/// [`commit`](Self::commit).
#[cfg(not(feature = "host"))]
pub struct Clock {
    rtc: Mutex<CriticalSectionRawMutex, RefCell<Rtc<'static, RTC>>>,
    offset_minutes: i32,
    set: AtomicBool,
}

#[cfg(not(feature = "host"))]
impl Clock {
    /// Creates [`Clock`] resources.
    #[must_use]
    pub const fn new_static() -> ClockStatic {
        ClockStatic {
            cell: StaticCell::new(),
        }
    }

    /// Brings up the hardware RTC.
    ///
    /// Programs the default calendar value, then waits (bounded) for the
    /// counter to start. `offset_minutes` is the fixed UTC offset applied by
    /// [`local_timestamp`](Self::local_timestamp).
    pub async fn new(
        clock_static: &'static ClockStatic,
        rtc: Peri<'static, RTC>,
        offset_minutes: i32,
    ) -> Result<&'static Self> {
        let mut rtc = Rtc::new(rtc);
        let default = calendar_from_unix(DEFAULT_CALENDAR)?;
        rtc.set_datetime(to_rtc_datetime(&default)?)
            .map_err(|_| Error::RtcRejected)?;
        let deadline = Instant::now() + RTC_START_TIMEOUT;
        while !rtc.is_running() {
            if Instant::now() >= deadline {
                return Err(Error::RtcNotRunning);
            }
            Timer::after_millis(10).await;
        }
        let clock = Self {
            rtc: Mutex::new(RefCell::new(rtc)),
            offset_minutes,
            set: AtomicBool::new(false),
        };
        Ok(clock_static.cell.init(clock))
    }

    /// Commits freshly synchronized time to the hardware RTC.
    pub fn commit(&self, unix: UnixSeconds) -> Result<()> {
        let dt = calendar_from_unix(unix)?;
        let dt = to_rtc_datetime(&dt)?;
        self.rtc
            .lock(|rtc| rtc.borrow_mut().set_datetime(dt))
            .map_err(|_| Error::RtcRejected)?;
        self.set.store(true, Ordering::Release);
        Ok(())
    }

    /// True once any sync has been committed.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }

    /// The current UTC time as `YYYY-MM-DDTHH:MM:SSZ`, or the sentinel
    /// before the first sync.
    #[must_use]
    pub fn utc_timestamp(&self) -> TimestampString {
        match self.read_utc() {
            Some(dt) => format_utc(&dt).unwrap_or_else(|_| sentinel()),
            None => sentinel(),
        }
    }

    /// The current local time (fixed UTC offset applied) as
    /// `YYYY-MM-DD HH:MM:SS`, or the sentinel before the first sync.
    #[must_use]
    pub fn local_timestamp(&self) -> TimestampString {
        match self.read_utc() {
            Some(dt) => {
                let local = apply_offset(dt, self.offset_minutes);
                format_local(&local).unwrap_or_else(|_| sentinel())
            }
            None => sentinel(),
        }
    }

    fn read_utc(&self) -> Option<OffsetDateTime> {
        if !self.is_set() {
            return None;
        }
        let now = self.rtc.lock(|rtc| rtc.borrow_mut().now().ok())?;
        from_rtc_datetime(&now)
    }
}

#[cfg(not(feature = "host"))]
fn to_rtc_datetime(dt: &OffsetDateTime) -> Result<DateTime> {
    Ok(DateTime {
        year: u16::try_from(dt.year()).map_err(|_| Error::InvalidTime)?,
        month: u8::from(dt.month()),
        day: dt.day(),
        day_of_week: day_of_week(dt.weekday()),
        hour: dt.hour(),
        minute: dt.minute(),
        second: dt.second(),
    })
}

#[cfg(not(feature = "host"))]
fn from_rtc_datetime(dt: &DateTime) -> Option<OffsetDateTime> {
    let month = time::Month::try_from(dt.month).ok()?;
    let date = time::Date::from_calendar_date(i32::from(dt.year), month, dt.day).ok()?;
    let clock_time = time::Time::from_hms(dt.hour, dt.minute, dt.second).ok()?;
    Some(time::PrimitiveDateTime::new(date, clock_time).assume_utc())
}

#[cfg(not(feature = "host"))]
fn day_of_week(weekday: Weekday) -> DayOfWeek {
    match weekday {
        Weekday::Sunday => DayOfWeek::Sunday,
        Weekday::Monday => DayOfWeek::Monday,
        Weekday::Tuesday => DayOfWeek::Tuesday,
        Weekday::Wednesday => DayOfWeek::Wednesday,
        Weekday::Thursday => DayOfWeek::Thursday,
        Weekday::Friday => DayOfWeek::Friday,
        Weekday::Saturday => DayOfWeek::Saturday,
    }
}
