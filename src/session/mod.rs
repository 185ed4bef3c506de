//! Session manager: the process-wide power state machine and the transport
//! handoff policy. A channel-driven reactor that never touches a socket
//! itself; transports report events in, the manager transitions state and
//! signals back out (stopping/spawning the wireless transport, promoting
//! the enable watchdog, persisting pairing).

pub mod pairing;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::Receiver;
use tokio::time::Instant;

use crate::config::Config;
use crate::drivers::DriverSlot;
use crate::ds3::Ds3Emulator;
use crate::session::pairing::PairingStore;
use crate::state::{BdAddr, Shared};
use crate::transport::bt::WirelessHandle;
use crate::transport::{LinkEvent, LinkState};

/// How long READY may wait for the console's enable handshake before being
/// promoted anyway. Some consoles skip the handshake on reconnect.
pub const READY_WATCHDOG: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerState {
    #[default]
    Active,
    Standby,
    Waking,
}

/// Shared read handle on the power state; the pumps consult it.
pub type PowerHandle = Arc<Mutex<PowerState>>;

/// Everything the transports and drivers report to the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    UsbEnabled,
    UsbDisabled,
    UsbSuspended,
    UsbUnbound,
    PairingCaptured(BdAddr),
    /// The controller's HOME key went down (wake trigger in standby).
    HomePressed,
    /// Wireless link substate progress.
    Link(LinkEvent),
    /// Wireless connect/session failure with its diagnostic.
    WirelessFailed(String),
}

/// Spawns the wireless transport toward a console. Injected so the
/// reactor's policy is testable without a radio.
pub trait WirelessConnector: Send {
    fn connect(&mut self, addr: BdAddr, wake_pulse: bool) -> WirelessHandle;
}

pub struct SessionManager {
    rx: Receiver<SessionEvent>,
    emulator: Arc<Mutex<Ds3Emulator>>,
    shared: Arc<Shared>,
    pairing: Arc<PairingStore>,
    power: PowerHandle,
    driver_slot: Arc<DriverSlot>,
    config: Config,
    local_addr: BdAddr,
    connector: Box<dyn WirelessConnector>,

    wireless: Option<WirelessHandle>,
    link: LinkState,
    watchdog_deadline: Option<Instant>,
    wake_deadline: Option<Instant>,
    wake_attempts_left: u32,
}

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rx: Receiver<SessionEvent>,
        emulator: Arc<Mutex<Ds3Emulator>>,
        shared: Arc<Shared>,
        pairing: Arc<PairingStore>,
        power: PowerHandle,
        driver_slot: Arc<DriverSlot>,
        config: Config,
        local_addr: BdAddr,
        connector: Box<dyn WirelessConnector>,
    ) -> Self {
        Self {
            rx,
            emulator,
            shared,
            pairing,
            power,
            driver_slot,
            config,
            local_addr,
            connector,
            wireless: None,
            link: LinkState::Disconnected,
            watchdog_deadline: None,
            wake_deadline: None,
            wake_attempts_left: 0,
        }
    }

    fn power(&self) -> PowerState {
        *self.power.lock().unwrap()
    }

    fn set_power(&self, next: PowerState) {
        let mut power = self.power.lock().unwrap();
        if *power != next {
            log::info!("Power state {:?} -> {next:?}", *power);
            *power = next;
        }
    }

    pub async fn run(&mut self) {
        log::debug!("Session manager running");
        while self.shared.flags.running() {
            let deadline = match (self.watchdog_deadline, self.wake_deadline) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };

            tokio::select! {
                event = self.rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => break,
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() => {
                    self.fire_timers();
                }
            }
        }

        if let Some(wireless) = self.wireless.take() {
            wireless.stop();
        }
        log::debug!("Session manager stopped");
    }

    fn handle_event(&mut self, event: SessionEvent) {
        log::trace!("Session event: {event:?}");
        match event {
            SessionEvent::UsbEnabled => {
                // The wired transport is back: it owns the console now.
                if let Some(wireless) = self.wireless.take() {
                    log::info!("Wired session enabled, closing wireless link");
                    self.shared.flags.set_mode_switching(true);
                    wireless.stop();
                }
                self.cancel_wake();
                self.set_power(PowerState::Active);
            }
            SessionEvent::UsbDisabled => {
                if self.power() == PowerState::Standby {
                    return;
                }
                let Some(record) = self.pairing.record() else {
                    log::debug!("Wired session ended, no pairing for wireless handoff");
                    return;
                };
                if self.wireless.is_none() {
                    log::info!("Wired session ended, handing off to wireless");
                    self.shared.flags.set_mode_switching(true);
                    self.start_wireless(record.console, false);
                }
            }
            SessionEvent::UsbSuspended => self.enter_standby(),
            SessionEvent::UsbUnbound => {
                if self.shared.flags.mode_switching() {
                    log::debug!("Orderly unbind during transport switch");
                } else {
                    log::info!("USB function unbound, shutting down");
                    self.shared.flags.stop();
                }
            }
            SessionEvent::PairingCaptured(console) => {
                if let Err(e) = self.pairing.store(console, self.local_addr) {
                    log::error!("Failed to persist pairing record: {e}");
                }
                self.shared.flags.set_pairing_complete();
            }
            SessionEvent::HomePressed => {
                if self.power() == PowerState::Standby {
                    log::info!("HOME pressed in standby, waking console");
                    self.set_power(PowerState::Waking);
                    self.wake_attempts_left = self.config.wake_attempts;
                    self.fire_wake();
                }
            }
            SessionEvent::Link(event) => self.handle_link_event(event),
            SessionEvent::WirelessFailed(reason) => {
                // Expected while the console sleeps; actionable otherwise.
                if self.power() == PowerState::Waking {
                    log::debug!("Wake attempt failed: {reason}");
                } else {
                    log::warn!("Wireless session failed: {reason}");
                }
            }
        }
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        let next = match self.link.advance(event) {
            Ok(next) => next,
            Err(e) => {
                log::debug!("Session mirror: {e}");
                return;
            }
        };
        let entered = next != self.link;
        self.link = next;

        match next {
            LinkState::Ready if entered => {
                self.watchdog_deadline = Some(Instant::now() + READY_WATCHDOG);
            }
            LinkState::Enabled => {
                self.watchdog_deadline = None;
                self.shared.flags.set_mode_switching(false);
                if self.power() == PowerState::Waking {
                    // The console came up on the wireless side directly.
                    self.cancel_wake();
                    self.set_power(PowerState::Active);
                }
            }
            LinkState::Disconnected | LinkState::Error => {
                self.watchdog_deadline = None;
                if next == LinkState::Disconnected {
                    self.wireless = None;
                    self.shared.flags.set_mode_switching(false);
                    self.schedule_reconnect();
                }
            }
            _ => {}
        }
    }

    /// Decide whether a dropped link warrants another attempt.
    fn schedule_reconnect(&mut self) {
        match self.power() {
            PowerState::Waking => {
                if self.wake_attempts_left == 0 {
                    log::info!("Wake attempts exhausted, returning to standby");
                    self.set_power(PowerState::Standby);
                    self.cancel_wake();
                } else {
                    self.wake_deadline =
                        Some(Instant::now() + Duration::from_millis(self.config.wake_interval_ms));
                }
            }
            PowerState::Active => {
                // Auto-reconnect policy: only while the console is not on
                // the wired transport and pairing is on record.
                if !self.shared.flags.usb_enabled() && self.pairing.record().is_some() {
                    if self.wake_attempts_left == 0 {
                        self.wake_attempts_left = self.config.wake_attempts;
                    }
                    self.wake_deadline =
                        Some(Instant::now() + Duration::from_millis(self.config.wake_interval_ms));
                }
            }
            PowerState::Standby => {}
        }
    }

    fn fire_timers(&mut self) {
        let now = Instant::now();
        if self.watchdog_deadline.is_some_and(|at| at <= now) {
            self.watchdog_deadline = None;
            self.fire_watchdog();
        }
        if self.wake_deadline.is_some_and(|at| at <= now) {
            self.wake_deadline = None;
            self.fire_wake();
        }
    }

    fn fire_watchdog(&mut self) {
        if self.link != LinkState::Ready {
            return;
        }
        log::info!("Console skipped the enable handshake, promoting link");
        if let Some(wireless) = &self.wireless {
            wireless.promote();
        }
        self.handle_link_event(LinkEvent::WatchdogFired);
    }

    fn fire_wake(&mut self) {
        let Some(record) = self.pairing.record() else {
            log::warn!("No pairing on record, cannot reach the console");
            self.set_power(PowerState::Standby);
            return;
        };
        if self.wake_attempts_left == 0 {
            if self.power() == PowerState::Waking {
                log::info!("Wake attempts exhausted, returning to standby");
                self.set_power(PowerState::Standby);
            }
            return;
        }
        self.wake_attempts_left -= 1;
        let wake_pulse = self.power() == PowerState::Waking;
        log::debug!(
            "Wireless connect attempt to {} ({} retries left)",
            record.console,
            self.wake_attempts_left
        );
        self.start_wireless(record.console, wake_pulse);
    }

    fn start_wireless(&mut self, addr: BdAddr, wake_pulse: bool) {
        if self.wireless.is_some() {
            log::debug!("Wireless transport already active");
            return;
        }
        self.link = LinkState::Disconnected;
        self.wireless = Some(self.connector.connect(addr, wake_pulse));
    }

    fn enter_standby(&mut self) {
        log::info!("Console suspended, entering standby");
        self.set_power(PowerState::Standby);
        self.cancel_wake();
        if let Some(wireless) = self.wireless.take() {
            self.shared.flags.set_mode_switching(true);
            wireless.stop();
        }
        if let Some(driver) = self.driver_slot.get() {
            if let Err(e) = driver.enter_low_power() {
                log::debug!("Driver low-power entry failed: {e}");
            }
        }
        // Standby discards any held rumble.
        self.emulator.lock().unwrap().clear_rumble();
        self.shared.output.clear_rumble();
    }

    fn cancel_wake(&mut self) {
        self.wake_deadline = None;
        self.wake_attempts_left = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LinkEvent::*;
    use tokio::sync::mpsc::{channel, Sender};

    struct StubConnector {
        attempts: Arc<Mutex<Vec<(BdAddr, bool)>>>,
    }

    impl WirelessConnector for StubConnector {
        fn connect(&mut self, addr: BdAddr, wake_pulse: bool) -> WirelessHandle {
            self.attempts.lock().unwrap().push((addr, wake_pulse));
            WirelessHandle::detached()
        }
    }

    struct Fixture {
        tx: Sender<SessionEvent>,
        power: PowerHandle,
        shared: Arc<Shared>,
        attempts: Arc<Mutex<Vec<(BdAddr, bool)>>>,
        task: tokio::task::JoinHandle<()>,
    }

    const CONSOLE: BdAddr = BdAddr([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
    const LOCAL: BdAddr = BdAddr([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

    fn pairing_store(name: &str, paired: bool) -> Arc<PairingStore> {
        let path = std::env::temp_dir().join(format!(
            "rosettapad-session-{}-{name}",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let store = Arc::new(PairingStore::open(path));
        if paired {
            store.store(CONSOLE, LOCAL).unwrap();
        }
        store
    }

    fn fixture(name: &str, paired: bool, power: PowerState) -> Fixture {
        let (tx, rx) = channel(32);
        let shared = Shared::new();
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let power = Arc::new(Mutex::new(power));
        let config = Config {
            wake_interval_ms: 20,
            ..Config::default()
        };

        let mut manager = SessionManager::new(
            rx,
            Arc::new(Mutex::new(Ds3Emulator::new())),
            shared.clone(),
            pairing_store(name, paired),
            power.clone(),
            Arc::new(DriverSlot::default()),
            config,
            LOCAL,
            Box::new(StubConnector {
                attempts: attempts.clone(),
            }),
        );
        let task = tokio::spawn(async move { manager.run().await });

        Fixture {
            tx,
            power,
            shared,
            attempts,
            task,
        }
    }

    impl Fixture {
        async fn send(&self, event: SessionEvent) {
            self.tx.send(event).await.unwrap();
            // Let the reactor drain its inbox.
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        fn power(&self) -> PowerState {
            *self.power.lock().unwrap()
        }

        async fn finish(self) {
            drop(self.tx);
            let _ = self.task.await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn standby_wake_to_active() {
        let fx = fixture("wake", true, PowerState::Standby);

        fx.send(SessionEvent::HomePressed).await;
        assert_eq!(fx.power(), PowerState::Waking);
        {
            let attempts = fx.attempts.lock().unwrap();
            assert_eq!(attempts.len(), 1);
            assert_eq!(attempts[0], (CONSOLE, true));
        }

        // Connect succeeds; the console enables the wired side afterwards.
        for event in [ConnectStarted, ControlOpened, InterruptOpened, EnableSent] {
            fx.send(SessionEvent::Link(event)).await;
        }
        assert_eq!(fx.power(), PowerState::Waking);
        fx.send(SessionEvent::UsbEnabled).await;
        assert_eq!(fx.power(), PowerState::Active);

        fx.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn wake_retries_then_gives_up() {
        let fx = fixture("exhaust", true, PowerState::Standby);

        fx.send(SessionEvent::HomePressed).await;
        for round in 0..5 {
            assert_eq!(fx.power(), PowerState::Waking, "round {round}");
            fx.send(SessionEvent::WirelessFailed("console not responding".into()))
                .await;
            fx.send(SessionEvent::Link(Failed)).await;
            fx.send(SessionEvent::Link(Closed)).await;
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        assert_eq!(fx.power(), PowerState::Standby);
        assert_eq!(fx.attempts.lock().unwrap().len(), 5);

        fx.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_promotes_skipped_handshake() {
        let fx = fixture("watchdog", true, PowerState::Standby);

        fx.send(SessionEvent::HomePressed).await;
        for event in [ConnectStarted, ControlOpened, InterruptOpened, EnableSent] {
            fx.send(SessionEvent::Link(event)).await;
        }
        assert_eq!(fx.power(), PowerState::Waking);

        // No enable handshake arrives; the watchdog promotes and the wake
        // completes on the wireless side.
        tokio::time::sleep(READY_WATCHDOG + Duration::from_millis(50)).await;
        assert_eq!(fx.power(), PowerState::Active);

        fx.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn usb_disable_hands_off_to_wireless() {
        let fx = fixture("handoff", true, PowerState::Active);

        fx.send(SessionEvent::UsbDisabled).await;
        {
            let attempts = fx.attempts.lock().unwrap();
            assert_eq!(attempts.len(), 1);
            assert_eq!(attempts[0], (CONSOLE, false));
        }
        assert!(fx.shared.flags.mode_switching());

        // The wired transport coming back tears the wireless link down.
        fx.send(SessionEvent::UsbEnabled).await;
        fx.send(SessionEvent::Link(Closed)).await;
        assert_eq!(fx.power(), PowerState::Active);

        fx.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unpaired_disable_does_not_connect() {
        let fx = fixture("unpaired", false, PowerState::Active);
        fx.send(SessionEvent::UsbDisabled).await;
        assert!(fx.attempts.lock().unwrap().is_empty());
        fx.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unbind_shuts_down_unless_switching() {
        let fx = fixture("unbind", true, PowerState::Active);
        // Handoff marks the unbind as orderly.
        fx.send(SessionEvent::UsbDisabled).await;
        fx.send(SessionEvent::UsbUnbound).await;
        assert!(fx.shared.flags.running());

        // A second unbind with no switch in progress is a real shutdown.
        fx.send(SessionEvent::Link(ConnectStarted)).await;
        fx.send(SessionEvent::Link(Failed)).await;
        fx.send(SessionEvent::Link(Closed)).await;
        fx.send(SessionEvent::UsbUnbound).await;
        assert!(!fx.shared.flags.running());

        fx.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn suspend_enters_standby_and_pairing_persists() {
        let fx = fixture("suspend", false, PowerState::Active);

        fx.send(SessionEvent::PairingCaptured(CONSOLE)).await;
        assert!(fx.shared.flags.pairing_complete());

        fx.send(SessionEvent::UsbSuspended).await;
        assert_eq!(fx.power(), PowerState::Standby);

        fx.finish().await;
    }
}
