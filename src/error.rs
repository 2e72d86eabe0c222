//! Error and result types used throughout the crate.

use derive_more::{Display, Error, From};

/// Result type for fallible operations in this crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Errors that can abort device bring-up.
///
/// Steady-state trouble (a dropped link, a missed sync response) never shows
/// up here. Those conditions are recorded in the
/// [`FaultRegister`](crate::fault::FaultRegister) and retried. An `Error`
/// means the device could not reach a working state at all.
#[derive(Debug, Display, Error, From)]
pub enum Error {
    /// The first WiFi association failed or did not finish within its timeout.
    #[display("wifi join failed or timed out")]
    WifiJoin,
    /// DHCP never produced a usable network configuration.
    #[display("dhcp configuration timed out")]
    DhcpTimeout,
    /// The hardware RTC did not start ticking within its bounded wait.
    #[display("rtc failed to start")]
    RtcNotRunning,
    /// The hardware RTC rejected a calendar value.
    #[display("rtc rejected calendar value")]
    RtcRejected,
    /// A seconds count outside the representable calendar range.
    #[display("timestamp outside calendar range")]
    InvalidTime,
    /// A formatted timestamp did not fit its fixed-capacity buffer.
    #[display("formatted timestamp exceeded its buffer")]
    #[from]
    Format(core::fmt::Error),
}
