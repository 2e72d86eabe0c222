#![allow(missing_docs)]
//! Fault register demo that maps fault codes onto the status LED.

#![no_std]
#![no_main]
#![allow(clippy::future_not_send, reason = "single-threaded")]

use core::{convert::Infallible, panic};
use defmt::info;
use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use terralog::{
    Result,
    button::{Button, PressDuration, PressedTo},
    fault::{FaultMask, FaultRegister},
};
use {defmt_rtt as _, panic_probe as _};

#[embassy_executor::main]
async fn main(spawner: Spawner) -> ! {
    let err = inner_main(spawner).await.unwrap_err();
    panic!("{err}");
}

async fn inner_main(spawner: Spawner) -> Result<Infallible> {
    let p = embassy_rp::init(Default::default());

    static FAULTS: FaultRegister = FaultRegister::new();
    FAULTS.init(FaultMask::INITIALIZING);
    FAULTS.indicator().drive_led(p.PIN_2, spawner);

    // Pretend startup work while the LED flickers, then clear the code.
    Timer::after(Duration::from_secs(5)).await;
    FAULTS.set(FaultMask::INITIALIZING, false);
    info!("startup done, led off");

    // Short press toggles the threshold alert (steady LED). A long hold
    // runs a pretend recalibration, which flickers while it lasts.
    let mut button = Button::new(p.PIN_13, PressedTo::Ground);
    loop {
        match button.wait_for_press_duration().await {
            PressDuration::Short => {
                if FAULTS.query().intersects(FaultMask::SENSOR_THRESHOLD) {
                    FAULTS.set(FaultMask::SENSOR_THRESHOLD, false);
                    info!("threshold alert acknowledged");
                } else {
                    FAULTS.set(FaultMask::SENSOR_THRESHOLD, true);
                    info!("threshold alert raised");
                }
            }
            PressDuration::Long => {
                FAULTS.set(FaultMask::RECALIBRATING, true);
                info!("recalibrating for 10s");
                Timer::after(Duration::from_secs(10)).await;
                FAULTS.set(FaultMask::RECALIBRATING, false);
                info!("recalibration done");
            }
        }
        button.wait_for_release().await;
    }
}
