//! WiFi link management: bounded bring-up, periodic link checks, and
//! exponential-backoff reconnection.
//!
//! [`LinkMonitor`] is the pure scheduling state and can run anywhere;
//! [`WifiLink`] brings up the CYW43 radio and network stack and drives the
//! monitor from a background task. See [`WifiLink`] for the bring-up story.

#![allow(clippy::future_not_send, reason = "single-threaded")]

use embassy_time::{Duration, Instant};

#[cfg(all(feature = "wifi", not(feature = "host")))]
use cyw43::{Control, JoinOptions, PowerManagementMode};
#[cfg(all(feature = "wifi", not(feature = "host")))]
use cyw43_pio::{DEFAULT_CLOCK_DIVIDER, PioSpi};
#[cfg(all(feature = "wifi", not(feature = "host")))]
use embassy_executor::Spawner;
#[cfg(all(feature = "wifi", not(feature = "host")))]
use embassy_net::{Stack, StackResources};
#[cfg(all(feature = "wifi", not(feature = "host")))]
use embassy_rp::gpio::{Level, Output};
#[cfg(all(feature = "wifi", not(feature = "host")))]
use embassy_rp::peripherals::{DMA_CH0, PIN_23, PIN_24, PIN_25, PIN_29, PIO0};
#[cfg(all(feature = "wifi", not(feature = "host")))]
use embassy_rp::pio::{InterruptHandler, Pio};
#[cfg(all(feature = "wifi", not(feature = "host")))]
use embassy_rp::{Peri, bind_interrupts};
#[cfg(all(feature = "wifi", not(feature = "host")))]
use embassy_time::{Timer, with_timeout};
#[cfg(all(feature = "wifi", not(feature = "host")))]
use portable_atomic::{AtomicBool, Ordering};
#[cfg(all(feature = "wifi", not(feature = "host")))]
use static_cell::StaticCell;

use crate::backoff::Backoff;
use crate::fault::{FaultMask, FaultRegister};
#[cfg(all(feature = "wifi", not(feature = "host")))]
use crate::{Error, Result};

/// Tunables for the link manager.
#[derive(Clone, Copy, Debug)]
pub struct LinkConfig {
    /// Interval between link checks while the link is healthy. Doubles as
    /// the backoff base after a failed reconnect.
    pub check_interval: Duration,
    /// Backoff cap. `WIFI_DISCONNECTED` latches when the delay saturates.
    pub max_retry_delay: Duration,
    /// Bound on each association attempt, including the first at startup.
    pub join_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            max_retry_delay: Duration::from_secs(300),
            join_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of a reconnect attempt, as judged by [`LinkMonitor`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReconnectOutcome {
    /// The link came back. Delay reset, `WIFI_DISCONNECTED` cleared.
    Recovered,
    /// Still down. The next check is pushed out by the doubled delay.
    Failed {
        /// True once the retry delay has reached its cap, which is the
        /// moment `WIFI_DISCONNECTED` latches.
        saturated: bool,
    },
}

/// Link-check scheduling state: last observed status, retry delay, and the
/// next check deadline.
///
/// Time is always passed in, so the monitor can be driven with synthetic
/// instants.
#[derive(Debug)]
pub struct LinkMonitor {
    connected: bool,
    backoff: Backoff,
    next_check_at: Instant,
}

impl LinkMonitor {
    /// Creates a monitor right after a successful first association.
    #[must_use]
    pub fn new(config: &LinkConfig, now: Instant) -> Self {
        Self {
            connected: true,
            backoff: Backoff::new(config.check_interval, config.max_retry_delay),
            next_check_at: now + config.check_interval,
        }
    }

    /// True once the next link check is due.
    #[must_use]
    pub fn should_check(&self, now: Instant) -> bool {
        now >= self.next_check_at
    }

    /// When the next link check is due.
    #[must_use]
    pub const fn next_check_at(&self) -> Instant {
        self.next_check_at
    }

    /// Last observed link status.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    /// The delay that will space out the next failed reconnect.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        self.backoff.delay()
    }

    /// Records a healthy link check: the delay resets to the base interval
    /// and `WIFI_DISCONNECTED` is cleared.
    pub fn note_link_up(&mut self, now: Instant, faults: &FaultRegister) {
        self.connected = true;
        self.backoff.reset();
        self.next_check_at = now + self.backoff.delay();
        faults.set(FaultMask::WIFI_DISCONNECTED, false);
    }

    /// Records the outcome of a reconnect attempt after a down check.
    ///
    /// A failure doubles the retry delay; `WIFI_DISCONNECTED` latches only
    /// once the delay saturates.
    pub fn note_reconnect(
        &mut self,
        success: bool,
        now: Instant,
        faults: &FaultRegister,
    ) -> ReconnectOutcome {
        if success {
            self.note_link_up(now, faults);
            return ReconnectOutcome::Recovered;
        }
        self.connected = false;
        self.next_check_at = now + self.backoff.delay();
        let saturated = self.backoff.advance();
        if saturated {
            faults.set(FaultMask::WIFI_DISCONNECTED, true);
        }
        ReconnectOutcome::Failed { saturated }
    }
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
bind_interrupts!(struct Irqs {
    PIO0_IRQ_0 => InterruptHandler<PIO0>;
});

/// Bound on waiting for a DHCP lease after the first association.
#[cfg(all(feature = "wifi", not(feature = "host")))]
const DHCP_TIMEOUT: Duration = Duration::from_secs(15);

#[cfg(all(feature = "wifi", not(feature = "host")))]
struct WifiLinkStatic {
    cyw43_state: StaticCell<cyw43::State>,
    stack_resources: StaticCell<StackResources<4>>,
    stack: StaticCell<Stack<'static>>,
    link_cell: StaticCell<WifiLink>,
    connected: AtomicBool,
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
impl WifiLinkStatic {
    const fn new() -> Self {
        Self {
            cyw43_state: StaticCell::new(),
            stack_resources: StaticCell::new(),
            stack: StaticCell::new(),
            link_cell: StaticCell::new(),
            connected: AtomicBool::new(false),
        }
    }
}

/// The CYW43 radio and its link-watch task as one device.
///
/// [`WifiLink::new`] performs the bounded part of bring-up: radio init,
/// one association attempt, and the DHCP wait. It either returns a working
/// network stack plus this handle, or an [`Error`] the caller can halt on.
/// After that, a background task re-checks the link on the monitor's
/// schedule and re-associates as needed; steady-state trouble goes through
/// the fault register instead of errors.
#[cfg(all(feature = "wifi", not(feature = "host")))]
pub struct WifiLink {
    connected: &'static AtomicBool,
    mac: [u8; 6],
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
impl WifiLink {
    /// Brings up the radio, associates once (bounded), and waits for DHCP.
    ///
    /// On success the first link check is scheduled `check_interval` out,
    /// `WIFI_DISCONNECTED` is cleared, and the network stack is returned
    /// alongside the link handle. The Pico W wires the CYW43 to fixed pins,
    /// so the peripherals here are the only valid choices.
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        pwr: Peri<'static, PIN_23>,
        cs: Peri<'static, PIN_25>,
        dio: Peri<'static, PIN_24>,
        clk: Peri<'static, PIN_29>,
        pio: Peri<'static, PIO0>,
        dma: Peri<'static, DMA_CH0>,
        ssid: &'static str,
        password: &'static str,
        config: LinkConfig,
        faults: &'static FaultRegister,
        spawner: Spawner,
    ) -> Result<(&'static Stack<'static>, &'static Self)> {
        static WIFI_LINK_STATIC: WifiLinkStatic = WifiLinkStatic::new();
        let wifi_link_static = &WIFI_LINK_STATIC;

        let pwr = Output::new(pwr, Level::Low);
        let cs = Output::new(cs, Level::High);
        let mut pio = Pio::new(pio, Irqs);
        let spi = PioSpi::new(
            &mut pio.common,
            pio.sm0,
            DEFAULT_CLOCK_DIVIDER,
            pio.irq0,
            cs,
            dio,
            clk,
            dma,
        );

        let state = wifi_link_static.cyw43_state.init(cyw43::State::new());
        let (net_device, mut control, runner) =
            cyw43::new(state, pwr, spi, cyw43_firmware::CYW43_43439A0).await;
        defmt::unwrap!(spawner.spawn(wifi_task(runner)));

        control.init(cyw43_firmware::CYW43_43439A0_CLM).await;
        control
            .set_power_management(PowerManagementMode::PowerSave)
            .await;
        let mac = control.address().await;
        defmt::info!(
            "wifi: radio up, mac {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            mac[0],
            mac[1],
            mac[2],
            mac[3],
            mac[4],
            mac[5]
        );

        // The DHCP client wants some entropy; the MAC is stable per board.
        let seed = u64::from_le_bytes([mac[0], mac[1], mac[2], mac[3], mac[4], mac[5], 0x9e, 0x37]);
        let resources = wifi_link_static.stack_resources.init(StackResources::new());
        let (stack, net_runner) = embassy_net::new(
            net_device,
            embassy_net::Config::dhcpv4(Default::default()),
            resources,
            seed,
        );
        let stack = wifi_link_static.stack.init(stack);
        defmt::unwrap!(spawner.spawn(net_task(net_runner)));

        join(&mut control, ssid, password, config.join_timeout).await?;
        defmt::info!("wifi: associated with {}", ssid);

        if with_timeout(DHCP_TIMEOUT, stack.wait_config_up()).await.is_err() {
            return Err(Error::DhcpTimeout);
        }
        defmt::info!("wifi: dhcp configuration up");

        faults.set(FaultMask::WIFI_DISCONNECTED, false);
        wifi_link_static.connected.store(true, Ordering::Release);
        let monitor = LinkMonitor::new(&config, Instant::now());
        defmt::unwrap!(spawner.spawn(link_task(
            control,
            monitor,
            config,
            ssid,
            password,
            faults,
            &wifi_link_static.connected,
            stack,
        )));

        let link = WifiLink {
            connected: &wifi_link_static.connected,
            mac,
        };
        Ok((stack, wifi_link_static.link_cell.init(link)))
    }

    /// Last observed link status, as published by the link task.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// The radio's MAC address.
    #[must_use]
    pub const fn mac_address(&self) -> [u8; 6] {
        self.mac
    }
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
async fn join(
    control: &mut Control<'static>,
    ssid: &str,
    password: &str,
    timeout: Duration,
) -> Result<()> {
    match with_timeout(timeout, control.join(ssid, JoinOptions::new(password.as_bytes()))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            defmt::warn!("wifi: join rejected, status {}", err.status);
            Err(Error::WifiJoin)
        }
        Err(_) => {
            defmt::warn!("wifi: join timed out");
            Err(Error::WifiJoin)
        }
    }
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
#[embassy_executor::task]
async fn wifi_task(
    runner: cyw43::Runner<'static, Output<'static>, PioSpi<'static, PIO0, 0, DMA_CH0>>,
) -> ! {
    runner.run().await
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
#[embassy_executor::task]
async fn net_task(mut runner: embassy_net::Runner<'static, cyw43::NetDriver<'static>>) -> ! {
    runner.run().await
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
#[embassy_executor::task]
#[allow(clippy::too_many_arguments)]
async fn link_task(
    mut control: Control<'static>,
    mut monitor: LinkMonitor,
    config: LinkConfig,
    ssid: &'static str,
    password: &'static str,
    faults: &'static FaultRegister,
    connected: &'static AtomicBool,
    stack: &'static Stack<'static>,
) -> ! {
    loop {
        Timer::at(monitor.next_check_at()).await;
        let now = Instant::now();
        if stack.is_link_up() {
            monitor.note_link_up(now, faults);
            connected.store(true, Ordering::Release);
            continue;
        }
        defmt::warn!("wifi: link down, attempting reconnect");
        let rejoined = join(&mut control, ssid, password, config.join_timeout).await;
        let now = Instant::now();
        let outcome = monitor.note_reconnect(rejoined.is_ok(), now, faults);
        connected.store(monitor.is_connected(), Ordering::Release);
        match outcome {
            ReconnectOutcome::Recovered => defmt::info!("wifi: link restored"),
            ReconnectOutcome::Failed { saturated } => defmt::warn!(
                "wifi: reconnect failed, next attempt in {} s (saturated: {})",
                (monitor.next_check_at() - now).as_secs(),
                saturated
            ),
        }
    }
}
