//! NTP time synchronization: a non-blocking protocol machine and the
//! network task that drives it against DNS, UDP, and the RTC.
//!
//! [`SyncMachine`] owns every deadline, counter, and flag but performs no
//! I/O, so it can be driven with synthetic time. [`TimeSync`] is the device:
//! it resolves the server, exchanges the 48-byte records, and commits
//! accepted time to the [`Clock`](crate::clock::Clock).

#![allow(clippy::future_not_send, reason = "single-threaded")]

use core::net::Ipv4Addr;
use embassy_time::{Duration, Instant};

#[cfg(all(feature = "wifi", not(feature = "host")))]
use core::cell::RefCell;
#[cfg(all(feature = "wifi", not(feature = "host")))]
use embassy_executor::Spawner;
#[cfg(all(feature = "wifi", not(feature = "host")))]
use embassy_futures::select::{Either, select};
#[cfg(all(feature = "wifi", not(feature = "host")))]
use embassy_net::dns::DnsQueryType;
#[cfg(all(feature = "wifi", not(feature = "host")))]
use embassy_net::udp::{PacketMetadata, UdpSocket};
#[cfg(all(feature = "wifi", not(feature = "host")))]
use embassy_net::{IpAddress, Stack};
#[cfg(all(feature = "wifi", not(feature = "host")))]
use embassy_sync::blocking_mutex::Mutex;
#[cfg(all(feature = "wifi", not(feature = "host")))]
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
#[cfg(all(feature = "wifi", not(feature = "host")))]
use embassy_time::{Timer, with_timeout};
#[cfg(all(feature = "wifi", not(feature = "host")))]
use static_cell::StaticCell;

use crate::backoff::Backoff;
use crate::clock::UnixSeconds;
use crate::fault::{FaultMask, FaultRegister};
use crate::ntp;

#[cfg(all(feature = "wifi", not(feature = "host")))]
use crate::clock::Clock;
#[cfg(all(feature = "wifi", not(feature = "host")))]
use crate::wifi_link::WifiLink;

/// Tunables for the sync client.
#[derive(Clone, Copy, Debug)]
pub struct SyncConfig {
    /// NTP server host name.
    pub server: &'static str,
    /// NTP server UDP port.
    pub port: u16,
    /// Deadline for resolving the server name.
    pub dns_timeout: Duration,
    /// Response deadline for the very first attempt after boot.
    pub first_response_timeout: Duration,
    /// Response deadline for every later attempt.
    pub response_timeout: Duration,
    /// Base retry delay once backoff applies.
    pub retry_delay: Duration,
    /// Retry delay cap. `NTP_SYNC_FAILED` latches at saturation.
    pub max_retry_delay: Duration,
    /// How long a successful sync remains valid.
    pub resync_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server: "pool.ntp.org",
            port: 123,
            dns_timeout: Duration::from_secs(5),
            first_response_timeout: Duration::from_secs(2),
            response_timeout: Duration::from_secs(10),
            retry_delay: Duration::from_secs(30),
            max_retry_delay: Duration::from_secs(300),
            resync_interval: Duration::from_secs(86_400),
        }
    }
}

/// Protocol phase of the sync client.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncPhase {
    /// No request outstanding.
    Idle,
    /// Waiting for the server name to resolve.
    ResolvingDns,
    /// Request sent; waiting for the 48-byte response.
    AwaitingResponse,
}

/// The driver's next step, as decided by [`SyncMachine::poll`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PollAction {
    /// A request is outstanding and has not timed out yet.
    InFlight,
    /// Idle until the retry deadline.
    Wait {
        /// When the next attempt may start.
        until: Instant,
    },
    /// The link is down. Nothing was attempted and nothing was counted.
    AwaitLink,
    /// Resolve the configured server name.
    Resolve,
    /// Send a request to the cached server address.
    Send(Ipv4Addr),
}

/// The sync client state machine.
///
/// Failures of any kind (DNS, send, timeout, malformed response, RTC
/// rejection) funnel through one shared failure path: attempts always
/// count up, but the retry delay backs off only once a first sync exists
/// and at least one attempt has already failed. Before that, retries run
/// immediately so boot converges as fast as the network allows.
///
/// # Example
///
/// ```rust
/// use embassy_time::Instant;
/// use terralog::fault::FaultRegister;
/// use terralog::time_sync::{PollAction, SyncConfig, SyncMachine};
///
/// static FAULTS: FaultRegister = FaultRegister::new();
///
/// let now = Instant::from_secs(0);
/// let mut machine = SyncMachine::new(SyncConfig::default(), now);
///
/// // No link yet: nothing is attempted and nothing is counted.
/// assert_eq!(machine.poll(now, false, &FAULTS), PollAction::AwaitLink);
/// assert_eq!(machine.attempts(), 0);
///
/// // Link up: the first step is resolving the server name.
/// assert_eq!(machine.poll(now, true, &FAULTS), PollAction::Resolve);
/// ```
#[derive(Debug)]
pub struct SyncMachine {
    config: SyncConfig,
    phase: SyncPhase,
    request_deadline: Instant,
    retry_at: Instant,
    resync_at: Instant,
    attempts: u32,
    backoff: Backoff,
    synchronized: bool,
    first_sync_done: bool,
    server_addr: Option<Ipv4Addr>,
}

impl SyncMachine {
    /// Creates an unsynchronized machine ready to attempt immediately.
    #[must_use]
    pub fn new(config: SyncConfig, now: Instant) -> Self {
        Self {
            config,
            phase: SyncPhase::Idle,
            request_deadline: now,
            retry_at: now,
            resync_at: now,
            attempts: 0,
            backoff: Backoff::new(config.retry_delay, config.max_retry_delay),
            synchronized: false,
            first_sync_done: false,
            server_addr: None,
        }
    }

    /// Decides the next step of the request cycle.
    ///
    /// An in-flight request whose deadline has passed is treated as a
    /// failure, and the machine falls through to normal retry evaluation in
    /// the same call.
    pub fn poll(&mut self, now: Instant, link_up: bool, faults: &FaultRegister) -> PollAction {
        if self.phase != SyncPhase::Idle {
            if now < self.request_deadline {
                return PollAction::InFlight;
            }
            self.fail(now, faults);
        }
        if now < self.retry_at {
            return PollAction::Wait {
                until: self.retry_at,
            };
        }
        if !link_up {
            return PollAction::AwaitLink;
        }
        if let Some(addr) = self.server_addr {
            self.begin_awaiting_response(now);
            PollAction::Send(addr)
        } else {
            self.phase = SyncPhase::ResolvingDns;
            self.request_deadline = now + self.config.dns_timeout;
            PollAction::Resolve
        }
    }

    /// Records a resolved server address and moves straight to the send.
    ///
    /// The address stays cached for every later attempt.
    pub fn on_dns_resolved(&mut self, addr: Ipv4Addr, now: Instant) -> PollAction {
        self.server_addr = Some(addr);
        self.begin_awaiting_response(now);
        PollAction::Send(addr)
    }

    /// Records a DNS resolution failure.
    pub fn on_dns_failed(&mut self, now: Instant, faults: &FaultRegister) {
        self.fail(now, faults);
    }

    /// Records a send failure.
    pub fn on_send_failed(&mut self, now: Instant, faults: &FaultRegister) {
        self.fail(now, faults);
    }

    /// Records an elapsed response deadline.
    pub fn on_timeout(&mut self, now: Instant, faults: &FaultRegister) {
        self.fail(now, faults);
    }

    /// Validates a response payload and extracts its Unix time.
    ///
    /// A payload of any length other than 48 bytes is rejected as a single
    /// failure without being parsed. A valid payload returns the time and
    /// leaves the machine waiting for the RTC verdict:
    /// [`on_committed`](Self::on_committed) or
    /// [`on_commit_rejected`](Self::on_commit_rejected).
    pub fn on_response(
        &mut self,
        payload: &[u8],
        now: Instant,
        faults: &FaultRegister,
    ) -> Option<UnixSeconds> {
        match ntp::transmit_seconds(payload) {
            Some(seconds) => Some(UnixSeconds::new(ntp::to_unix_seconds(seconds))),
            None => {
                self.fail(now, faults);
                None
            }
        }
    }

    /// Records a successful RTC commit.
    ///
    /// The machine becomes synchronized, the resync deadline is armed one
    /// interval out, counters and backoff reset, and `NTP_SYNC_FAILED`
    /// clears.
    pub fn on_committed(&mut self, now: Instant, faults: &FaultRegister) {
        self.phase = SyncPhase::Idle;
        self.synchronized = true;
        self.first_sync_done = true;
        self.resync_at = now + self.config.resync_interval;
        self.attempts = 0;
        self.backoff.reset();
        self.retry_at = now;
        faults.set(FaultMask::NTP_SYNC_FAILED, false);
    }

    /// Records the RTC rejecting the converted calendar value.
    pub fn on_commit_rejected(&mut self, now: Instant, faults: &FaultRegister) {
        self.fail(now, faults);
    }

    /// Whether the last sync is still valid.
    ///
    /// Expiry is lazy: once the resync deadline passes, the flag clears on
    /// the read that observes it. Expiry alone never sets `NTP_SYNC_FAILED`;
    /// only failed resync attempts can do that.
    pub fn is_synchronized(&mut self, now: Instant) -> bool {
        if self.synchronized && now >= self.resync_at {
            self.synchronized = false;
        }
        self.synchronized
    }

    /// Consecutive failed attempts since the last success.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Current protocol phase.
    #[must_use]
    pub const fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Deadline of the in-flight request. Meaningful only outside `Idle`.
    #[must_use]
    pub const fn request_deadline(&self) -> Instant {
        self.request_deadline
    }

    /// The delay that will space out the next failed attempt.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        self.backoff.delay()
    }

    /// True once any sync has ever completed.
    #[must_use]
    pub const fn first_sync_done(&self) -> bool {
        self.first_sync_done
    }

    fn begin_awaiting_response(&mut self, now: Instant) {
        // The very first request after boot gets a short deadline so a dead
        // network cannot stall startup behind a full response timeout.
        let timeout = if self.first_sync_done || self.attempts > 0 {
            self.config.response_timeout
        } else {
            self.config.first_response_timeout
        };
        self.phase = SyncPhase::AwaitingResponse;
        self.request_deadline = now + timeout;
    }

    fn fail(&mut self, now: Instant, faults: &FaultRegister) {
        self.phase = SyncPhase::Idle;
        if self.first_sync_done && self.attempts > 0 {
            self.retry_at = now + self.backoff.delay();
            if self.backoff.advance() {
                faults.set(FaultMask::NTP_SYNC_FAILED, true);
            }
        } else {
            self.retry_at = now;
        }
        self.attempts = self.attempts.saturating_add(1);
    }
}

/// Pause between polls while the machine is converging.
#[cfg(all(feature = "wifi", not(feature = "host")))]
const POLL_PAUSE: Duration = Duration::from_millis(10);

/// Pause before re-checking a down link.
#[cfg(all(feature = "wifi", not(feature = "host")))]
const LINK_WAIT_PAUSE: Duration = Duration::from_secs(1);

/// How often the steady-state task re-checks sync validity.
#[cfg(all(feature = "wifi", not(feature = "host")))]
const VALIDITY_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[cfg(all(feature = "wifi", not(feature = "host")))]
type MachineCell = Mutex<CriticalSectionRawMutex, RefCell<Option<SyncMachine>>>;

/// Resources for [`TimeSync`]. See [`TimeSync::new`] for usage.
#[cfg(all(feature = "wifi", not(feature = "host")))]
pub struct TimeSyncStatic {
    cell: StaticCell<TimeSync>,
    machine: MachineCell,
}

/// The time-sync device: the machine wired to DNS, UDP, and the RTC.
#[cfg(all(feature = "wifi", not(feature = "host")))]
pub struct TimeSync {
    machine: &'static MachineCell,
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
impl TimeSync {
    /// Creates [`TimeSync`] resources.
    #[must_use]
    pub const fn new_static() -> TimeSyncStatic {
        TimeSyncStatic {
            cell: StaticCell::new(),
            machine: Mutex::new(RefCell::new(None)),
        }
    }

    /// Brings up time sync and waits for the first successful sync.
    ///
    /// Retries run at zero delay before the first sync, so this converges as
    /// soon as the network allows. It is the device's one indefinite wait,
    /// run once at startup. On success `INITIALIZING` clears and steady-state
    /// resyncs move to a background task.
    pub async fn new(
        time_sync_static: &'static TimeSyncStatic,
        stack: &'static Stack<'static>,
        wifi: &'static WifiLink,
        clock: &'static Clock,
        config: SyncConfig,
        faults: &'static FaultRegister,
        spawner: Spawner,
    ) -> &'static Self {
        time_sync_static.machine.lock(|cell| {
            *cell.borrow_mut() = Some(SyncMachine::new(config, Instant::now()));
        });
        let time_sync = time_sync_static.cell.init(TimeSync {
            machine: &time_sync_static.machine,
        });

        while !time_sync.is_synchronized() {
            step(time_sync.machine, stack, wifi, clock, &config, faults).await;
            Timer::after(POLL_PAUSE).await;
        }
        faults.set(FaultMask::INITIALIZING, false);
        defmt::info!("ntp: first sync done, utc {}", clock.utc_timestamp().as_str());

        defmt::unwrap!(spawner.spawn(sync_task(
            time_sync.machine,
            stack,
            wifi,
            clock,
            config,
            faults,
        )));
        time_sync
    }

    /// Whether the last sync is still valid. Reading past the resync
    /// deadline expires it.
    #[must_use]
    pub fn is_synchronized(&self) -> bool {
        let now = Instant::now();
        self.machine.lock(|cell| {
            cell.borrow_mut()
                .as_mut()
                .is_some_and(|machine| machine.is_synchronized(now))
        })
    }
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
fn with_machine<R>(machine: &MachineCell, f: impl FnOnce(&mut SyncMachine) -> R) -> Option<R> {
    machine.lock(|cell| cell.borrow_mut().as_mut().map(f))
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
#[embassy_executor::task]
async fn sync_task(
    machine: &'static MachineCell,
    stack: &'static Stack<'static>,
    wifi: &'static WifiLink,
    clock: &'static Clock,
    config: SyncConfig,
    faults: &'static FaultRegister,
) -> ! {
    loop {
        let now = Instant::now();
        let synchronized =
            with_machine(machine, |m| m.is_synchronized(now)).unwrap_or(false);
        if synchronized {
            Timer::after(VALIDITY_CHECK_INTERVAL).await;
            continue;
        }
        step(machine, stack, wifi, clock, &config, faults).await;
        Timer::after(POLL_PAUSE).await;
    }
}

/// Runs one machine-directed step: poll, then carry out the action.
#[cfg(all(feature = "wifi", not(feature = "host")))]
async fn step(
    machine: &'static MachineCell,
    stack: &'static Stack<'static>,
    wifi: &'static WifiLink,
    clock: &'static Clock,
    config: &SyncConfig,
    faults: &'static FaultRegister,
) {
    let now = Instant::now();
    let link_up = wifi.is_connected();
    let Some(action) = with_machine(machine, |m| m.poll(now, link_up, faults)) else {
        return;
    };

    let addr = match action {
        PollAction::InFlight => return,
        PollAction::Wait { until } => {
            Timer::at(until).await;
            return;
        }
        PollAction::AwaitLink => {
            Timer::after(LINK_WAIT_PAUSE).await;
            return;
        }
        PollAction::Send(addr) => addr,
        PollAction::Resolve => {
            let Some(addr) = resolve_server(stack, config).await else {
                defmt::warn!("ntp: dns lookup for {} failed", config.server);
                with_machine(machine, |m| m.on_dns_failed(Instant::now(), faults));
                return;
            };
            let resolved = with_machine(machine, |m| m.on_dns_resolved(addr, Instant::now()));
            let Some(PollAction::Send(addr)) = resolved else {
                return;
            };
            addr
        }
    };
    exchange(machine, stack, clock, config, faults, addr).await;
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
async fn resolve_server(stack: &'static Stack<'static>, config: &SyncConfig) -> Option<Ipv4Addr> {
    let query = with_timeout(
        config.dns_timeout,
        stack.dns_query(config.server, DnsQueryType::A),
    )
    .await;
    let addresses = match query {
        Ok(Ok(addresses)) => addresses,
        Ok(Err(_)) | Err(_) => return None,
    };
    match addresses.first()? {
        IpAddress::Ipv4(addr) => Some(*addr),
    }
}

/// Sends one request to `addr` and feeds whatever happens back into the
/// machine, committing accepted time to the RTC.
#[cfg(all(feature = "wifi", not(feature = "host")))]
async fn exchange(
    machine: &'static MachineCell,
    stack: &'static Stack<'static>,
    clock: &'static Clock,
    config: &SyncConfig,
    faults: &'static FaultRegister,
    addr: Ipv4Addr,
) {
    let mut rx_meta = [PacketMetadata::EMPTY; 1];
    let mut rx_buffer = [0u8; 128];
    let mut tx_meta = [PacketMetadata::EMPTY; 1];
    let mut tx_buffer = [0u8; 128];
    let mut socket = UdpSocket::new(
        *stack,
        &mut rx_meta,
        &mut rx_buffer,
        &mut tx_meta,
        &mut tx_buffer,
    );
    if socket.bind(0).is_err() {
        with_machine(machine, |m| m.on_send_failed(Instant::now(), faults));
        return;
    }

    let request = ntp::client_request();
    if socket
        .send_to(&request, (IpAddress::Ipv4(addr), config.port))
        .await
        .is_err()
    {
        defmt::warn!("ntp: send failed");
        with_machine(machine, |m| m.on_send_failed(Instant::now(), faults));
        return;
    }

    // Leave headroom past 48 bytes so an oversized record shows its real
    // length instead of being silently truncated to a valid one.
    let mut response = [0u8; 64];
    let deadline = with_machine(machine, |m| m.request_deadline()).unwrap_or_else(Instant::now);
    let len = match select(socket.recv_from(&mut response), Timer::at(deadline)).await {
        Either::First(Ok((len, _meta))) => len,
        // A datagram too big for the buffer; fails the length check below.
        Either::First(Err(_)) => response.len(),
        Either::Second(()) => {
            defmt::warn!("ntp: response timed out");
            with_machine(machine, |m| m.on_timeout(Instant::now(), faults));
            return;
        }
    };

    let payload = response.get(..len).unwrap_or(&response);
    let unix = with_machine(machine, |m| m.on_response(payload, Instant::now(), faults)).flatten();
    let Some(unix) = unix else {
        defmt::warn!("ntp: rejected {} byte response", len);
        return;
    };

    match clock.commit(unix) {
        Ok(()) => {
            with_machine(machine, |m| m.on_committed(Instant::now(), faults));
            defmt::info!("ntp: synced, unix {}", unix.as_i64());
        }
        Err(_) => {
            defmt::warn!("ntp: rtc rejected synced time");
            with_machine(machine, |m| m.on_commit_rejected(Instant::now(), faults));
        }
    }
}
