#![allow(missing_docs)]
//! WiFi + NTP datalogger skeleton that logs a timestamp once a minute.

#![no_std]
#![no_main]
#![cfg(feature = "wifi")]
#![allow(clippy::future_not_send, reason = "single-threaded")]

use core::{convert::Infallible, panic};
use defmt::info;
use embassy_executor::Spawner;
use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Timer};
use terralog::{
    Result,
    button::{Button, PressDuration, PressedTo},
    clock::{Clock, ClockStatic},
    fault::{FaultMask, FaultRegister},
    time_sync::{SyncConfig, TimeSync, TimeSyncStatic},
    wifi_link::{LinkConfig, WifiLink},
};
use {defmt_rtt as _, panic_probe as _};

const WIFI_SSID: &str = "your-ssid";
const WIFI_PASSWORD: &str = "your-password";

/// UTC minus 5 hours, e.g. US Eastern standard time.
const OFFSET_MINUTES: i32 = -300;

const LOG_INTERVAL: Duration = Duration::from_secs(60);

#[embassy_executor::main]
async fn main(spawner: Spawner) -> ! {
    let err = inner_main(spawner).await.unwrap_err();
    panic!("{err}");
}

async fn inner_main(spawner: Spawner) -> Result<Infallible> {
    let p = embassy_rp::init(Default::default());

    static FAULTS: FaultRegister = FaultRegister::new();
    FAULTS.init(FaultMask::INITIALIZING | FaultMask::RECALIBRATING);
    FAULTS.indicator().drive_led(p.PIN_2, spawner);

    let (stack, wifi) = WifiLink::new(
        p.PIN_23,
        p.PIN_25,
        p.PIN_24,
        p.PIN_29,
        p.PIO0,
        p.DMA_CH0,
        WIFI_SSID,
        WIFI_PASSWORD,
        LinkConfig::default(),
        &FAULTS,
        spawner,
    )
    .await?;

    static CLOCK_STATIC: ClockStatic = Clock::new_static();
    let clock = Clock::new(&CLOCK_STATIC, p.RTC, OFFSET_MINUTES).await?;

    // Blocks until the first NTP sync lands, then keeps the clock fresh.
    static TIME_SYNC_STATIC: TimeSyncStatic = TimeSync::new_static();
    let time_sync = TimeSync::new(
        &TIME_SYNC_STATIC,
        stack,
        wifi,
        clock,
        SyncConfig::default(),
        &FAULTS,
        spawner,
    )
    .await;

    // Sensor warm-up would happen here.
    FAULTS.set(FaultMask::RECALIBRATING, false);
    info!("ready, local time {}", clock.local_timestamp().as_str());

    let mut button = Button::new(p.PIN_13, PressedTo::Ground);
    loop {
        match select(button.wait_for_press_duration(), Timer::after(LOG_INTERVAL)).await {
            Either::First(PressDuration::Short) => {
                if FAULTS.query().intersects(FaultMask::SENSOR_THRESHOLD) {
                    FAULTS.set(FaultMask::SENSOR_THRESHOLD, false);
                    info!("threshold alert acknowledged");
                } else {
                    FAULTS.set(FaultMask::SENSOR_THRESHOLD, true);
                    info!("threshold alert raised");
                }
            }
            Either::First(PressDuration::Long) => {
                FAULTS.set(FaultMask::RECALIBRATING, true);
                info!("recalibrating for 10s");
                Timer::after(Duration::from_secs(10)).await;
                FAULTS.set(FaultMask::RECALIBRATING, false);
                info!("recalibration done");
                button.wait_for_release().await;
            }
            Either::Second(()) => {
                info!(
                    "utc {}, local {}, synced {}",
                    clock.utc_timestamp().as_str(),
                    clock.local_timestamp().as_str(),
                    time_sync.is_synchronized()
                );
            }
        }
    }
}
