//! Connectivity, time sync, and fault indication for a Pico W environmental
//! datalogger.
//!
//! Four pieces work together:
//!
//! - [`fault`]: the shared register of fault, warning, and notice codes.
//!   Setting or clearing a code synchronously recomputes the status-LED
//!   pattern.
//! - [`indicator`]: maps the fault mask to an LED pattern (off, on, flash,
//!   flicker) and drives the LED from a background task.
//! - [`wifi_link`]: brings the CYW43 radio up once with bounded waits, then
//!   watches the link and reconnects with exponential backoff.
//! - [`time_sync`]: an NTP client that commits accepted time to the
//!   hardware RTC and keeps it fresh with a daily resync.
//!
//! The pure state (fault masks, retry schedules, the sync machine) compiles
//! and tests on the host under the `host` feature. The device layers
//! compile for the Pico 1 W under the `embedded` feature.

#![cfg_attr(not(feature = "host"), no_std)]
#![cfg_attr(not(feature = "host"), no_main)]

// Compile-time checks: a target must be selected, and only one
#[cfg(all(not(feature = "pico1"), not(feature = "host")))]
compile_error!("Must enable the 'pico1' board feature, or 'host' for host-side tests");

#[cfg(all(feature = "pico1", feature = "host"))]
compile_error!("Cannot enable both 'pico1' and 'host' features simultaneously");

pub mod backoff;
// The button requires embassy_rp and is excluded when testing on host
#[cfg(not(feature = "host"))]
pub mod button;
pub mod clock;
mod error;
pub mod fault;
pub mod indicator;
pub mod ntp;
pub mod time_sync;
pub mod wifi_link;

// Re-export error types and result (used throughout)
pub use crate::error::{Error, Result};
