//! Wireless transport: two L2CAP channels to the console carrying framed
//! HID traffic. The sender paces input reports against the kernel's
//! outstanding-byte count so at most one report is ever queued; the
//! receiver answers feature traffic on the control channel and feeds
//! output reports from the interrupt channel into the output slot.

pub mod framing;
pub mod hci;
pub mod l2cap;

use std::io;
use std::os::fd::AsFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tokio::sync::mpsc::Sender;

use crate::constants::{PSM_HID_CONTROL, PSM_HID_INTERRUPT};
use crate::ds3::feature::{ENABLE_PAYLOAD, REPORT_ENABLE};
use crate::ds3::{Ds3Emulator, SetReportAction};
use crate::session::SessionEvent;
use crate::state::{BdAddr, ButtonSet, InputSnapshot, Shared};
use crate::transport::{LinkEvent, LinkState, TransportError};

use framing::{Frame, HandshakeCode};
use l2cap::L2capSocket;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Receive poll across both channels.
const RECV_POLL_MS: u16 = 100;
/// Pre-enable cadence and the bound after which we force full rate.
const INIT_INTERVAL: Duration = Duration::from_millis(100);
const INIT_LIMIT: Duration = Duration::from_secs(60);
/// Sleep while a report is still queued in the kernel.
const PENDING_SLEEP: Duration = Duration::from_millis(5);
/// Tight-poll interval between outstanding-byte checks.
const SEND_POLL: Duration = Duration::from_micros(500);
/// Cadence when the kernel cannot report outstanding bytes.
const FALLBACK_CADENCE: Duration = Duration::from_millis(45);
/// Back off briefly when the socket would block.
const SEND_BACKOFF: Duration = Duration::from_millis(2);
/// Feature replies must fit the outbound MTU with their header.
const REPLY_LIMIT: usize = (l2cap::OUTPUT_MTU - 1) as usize;

/// Control surface the session manager holds while the transport runs.
#[derive(Clone)]
pub struct WirelessHandle {
    stop: Arc<AtomicBool>,
    state: Arc<Mutex<LinkState>>,
}

impl WirelessHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// READY→ENABLED promotion driven by the session watchdog.
    pub fn promote(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == LinkState::Ready {
            *state = LinkState::Enabled;
        }
    }

    /// A handle with no transport behind it, for exercising session policy.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(LinkState::Disconnected)),
        }
    }
}

/// The production connector: spawns the real transport.
pub struct Connector {
    pub emulator: Arc<Mutex<Ds3Emulator>>,
    pub shared: Arc<Shared>,
    pub session_tx: Sender<SessionEvent>,
}

impl crate::session::WirelessConnector for Connector {
    fn connect(&mut self, addr: BdAddr, wake_pulse: bool) -> WirelessHandle {
        WirelessTransport::spawn(
            self.emulator.clone(),
            self.shared.clone(),
            self.session_tx.clone(),
            addr,
            wake_pulse,
        )
    }
}

pub struct WirelessTransport {
    emulator: Arc<Mutex<Ds3Emulator>>,
    shared: Arc<Shared>,
    session_tx: Sender<SessionEvent>,
    state: Arc<Mutex<LinkState>>,
    stop: Arc<AtomicBool>,
    /// Pulse HOME after connecting (standby wake).
    wake_pulse: bool,
}

impl WirelessTransport {
    /// Start the transport toward `addr` on the blocking pool and return
    /// its handle. Progress and failures arrive as session events.
    pub fn spawn(
        emulator: Arc<Mutex<Ds3Emulator>>,
        shared: Arc<Shared>,
        session_tx: Sender<SessionEvent>,
        addr: BdAddr,
        wake_pulse: bool,
    ) -> WirelessHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let state = Arc::new(Mutex::new(LinkState::Disconnected));
        let handle = WirelessHandle {
            stop: stop.clone(),
            state: state.clone(),
        };

        let transport = WirelessTransport {
            emulator,
            shared,
            session_tx,
            state,
            stop,
            wake_pulse,
        };
        tokio::task::spawn_blocking(move || transport.run(addr));

        handle
    }

    fn run(self, addr: BdAddr) {
        if let Err(e) = self.connect_and_pump(addr) {
            log::warn!("Wireless transport to {addr}: {e}");
            let _ = self
                .session_tx
                .blocking_send(SessionEvent::WirelessFailed(e.to_string()));
            self.advance(LinkEvent::Failed);
        }
        self.advance(LinkEvent::Closed);
        self.emulator.lock().unwrap().reset_enabled();
        log::debug!("Wireless transport to {addr} finished");
    }

    fn connect_and_pump(&self, addr: BdAddr) -> Result<(), TransportError> {
        self.advance(LinkEvent::ConnectStarted);
        let control = L2capSocket::connect(addr, PSM_HID_CONTROL, CONNECT_TIMEOUT)?;
        self.advance(LinkEvent::ControlOpened);
        let interrupt = L2capSocket::connect(addr, PSM_HID_INTERRUPT, CONNECT_TIMEOUT)?;
        self.advance(LinkEvent::InterruptOpened);

        // Ask the console to activate us, the same 0xF4 a real pad sends.
        let enable = framing::set_feature_report(REPORT_ENABLE, &ENABLE_PAYLOAD);
        control.send(&enable).map_err(TransportError::Io)?;
        self.advance(LinkEvent::EnableSent);

        if self.wake_pulse {
            self.send_home_pulse(&interrupt);
        }

        let interrupt = Arc::new(interrupt);
        let sender = {
            let transport = self.clone_for_sender();
            let interrupt = interrupt.clone();
            std::thread::spawn(move || transport.send_loop(&interrupt))
        };

        let result = self.receive_loop(&control, &interrupt);
        self.stop.store(true, Ordering::Relaxed);
        let _ = sender.join();
        result
    }

    fn clone_for_sender(&self) -> WirelessTransport {
        WirelessTransport {
            emulator: self.emulator.clone(),
            shared: self.shared.clone(),
            session_tx: self.session_tx.clone(),
            state: self.state.clone(),
            stop: self.stop.clone(),
            wake_pulse: false,
        }
    }

    fn running(&self) -> bool {
        !self.stop.load(Ordering::Relaxed) && self.shared.flags.running()
    }

    fn advance(&self, event: LinkEvent) {
        let mut state = self.state.lock().unwrap();
        match state.advance(event) {
            Ok(next) => {
                if *state != next {
                    log::debug!("Wireless link {:?} -> {next:?}", *state);
                }
                *state = next;
                let _ = self.session_tx.blocking_send(SessionEvent::Link(event));
            }
            Err(e) => log::debug!("Ignoring link event: {e}"),
        }
    }

    fn link_state(&self) -> LinkState {
        *self.state.lock().unwrap()
    }

    /// A brief HOME press and release, used to wake the console.
    fn send_home_pulse(&self, interrupt: &L2capSocket) {
        let mut snapshot = InputSnapshot::default();
        snapshot.buttons = ButtonSet::HOME;
        let pressed = self.emulator.lock().unwrap().build_input_wireless(&snapshot);
        if interrupt.send(&pressed).is_err() {
            return;
        }
        std::thread::sleep(Duration::from_millis(100));
        let released = self
            .emulator
            .lock()
            .unwrap()
            .build_input_wireless(&InputSnapshot::default());
        let _ = interrupt.send(&released);
    }

    /// Input-report pump. Two modes: a slow init cadence until the console
    /// enables us, then per-report flow control against the socket queue.
    fn send_loop(&self, interrupt: &L2capSocket) {
        let started = Instant::now();
        let mut last_sent = Instant::now() - INIT_INTERVAL;
        let mut outq_supported = true;

        while self.running() {
            match self.link_state() {
                LinkState::Ready => {
                    if started.elapsed() > INIT_LIMIT {
                        log::warn!("Console never enabled the link, forcing full rate");
                        self.advance(LinkEvent::WatchdogFired);
                        continue;
                    }
                    if last_sent.elapsed() >= INIT_INTERVAL {
                        if self.send_report(interrupt).is_break() {
                            return;
                        }
                        last_sent = Instant::now();
                    }
                    std::thread::sleep(PENDING_SLEEP);
                }
                LinkState::Enabled => {
                    if outq_supported {
                        match interrupt.outstanding_bytes() {
                            Ok(pending) if pending > 0 => {
                                std::thread::sleep(PENDING_SLEEP);
                                continue;
                            }
                            Ok(_) => {}
                            Err(e) => {
                                log::debug!("TIOCOUTQ unsupported, fixed cadence: {e}");
                                outq_supported = false;
                            }
                        }
                    }
                    if self.send_report(interrupt).is_break() {
                        return;
                    }
                    if outq_supported {
                        std::thread::sleep(SEND_POLL);
                    } else {
                        std::thread::sleep(FALLBACK_CADENCE);
                    }
                }
                LinkState::Disconnected | LinkState::Error => return,
                // Still connecting; the connect path owns these states.
                _ => std::thread::sleep(PENDING_SLEEP),
            }
        }
    }

    fn send_report(&self, interrupt: &L2capSocket) -> std::ops::ControlFlow<()> {
        let snapshot = self.shared.input.get();
        let report = self.emulator.lock().unwrap().build_input_wireless(&snapshot);
        match interrupt.send(&report) {
            Ok(_) => std::ops::ControlFlow::Continue(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(SEND_BACKOFF);
                std::ops::ControlFlow::Continue(())
            }
            Err(e) => {
                log::warn!("Wireless send failed: {e}");
                self.stop.store(true, Ordering::Relaxed);
                std::ops::ControlFlow::Break(())
            }
        }
    }

    /// Poll both channels and dispatch inbound datagrams.
    fn receive_loop(
        &self,
        control: &L2capSocket,
        interrupt: &L2capSocket,
    ) -> Result<(), TransportError> {
        let mut buf = [0u8; 128];
        let wake = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;

        while self.running() {
            let mut fds = [
                PollFd::new(control.as_fd(), PollFlags::POLLIN),
                PollFd::new(interrupt.as_fd(), PollFlags::POLLIN),
            ];
            match poll(&mut fds, PollTimeout::from(RECV_POLL_MS)) {
                Ok(0) => continue,
                Ok(_) => {}
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(TransportError::Io(io::Error::from(e))),
            }
            let control_ready = fds[0].revents().is_some_and(|r| r.intersects(wake));
            let interrupt_ready = fds[1].revents().is_some_and(|r| r.intersects(wake));

            if control_ready {
                let read = match control.recv(&mut buf) {
                    Ok(0) => return Err(TransportError::LinkLost("control closed".into())),
                    Ok(read) => read,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
                    Err(e) => return Err(TransportError::Io(e)),
                };
                if read > 0 {
                    self.handle_control(control, &buf[..read]);
                }
            }
            if interrupt_ready {
                let read = match interrupt.recv(&mut buf) {
                    Ok(0) => return Err(TransportError::LinkLost("interrupt closed".into())),
                    Ok(read) => read,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
                    Err(e) => return Err(TransportError::Io(e)),
                };
                if read > 0 {
                    self.handle_interrupt(&buf[..read]);
                }
            }
        }
        Ok(())
    }

    fn handle_control(&self, control: &L2capSocket, data: &[u8]) {
        let Some(frame) = framing::parse(data) else {
            log::debug!("Unparseable control datagram ({} bytes)", data.len());
            return;
        };

        match frame {
            Frame::GetReport {
                report_type,
                id: _,
                buffer_size,
            } if report_type == framing::REPORT_TYPE_INPUT => {
                let report = self.emulator.lock().unwrap().cached_input_report();
                let limit = buffer_size
                    .map(|size| size as usize)
                    .unwrap_or(REPLY_LIMIT)
                    .min(REPLY_LIMIT);
                let reply = framing::get_report_reply(&report, limit);
                if let Err(e) = control.send(&reply) {
                    log::warn!("Failed to answer GET_REPORT: {e}");
                }
            }
            Frame::GetReport {
                id, buffer_size, ..
            } => {
                let emulator = self.emulator.lock().unwrap();
                let reply = match emulator.get_feature(id) {
                    Some((entry, name)) => {
                        log::debug!("GET_REPORT {id:#04x} ({name})");
                        let limit = buffer_size
                            .map(|size| size as usize)
                            .unwrap_or(REPLY_LIMIT)
                            .min(REPLY_LIMIT);
                        framing::get_report_reply(entry, limit)
                    }
                    None => {
                        log::debug!("GET_REPORT for unknown id {id:#04x}");
                        framing::handshake(HandshakeCode::InvalidReportId).to_vec()
                    }
                };
                drop(emulator);
                if let Err(e) = control.send(&reply) {
                    log::warn!("Failed to answer GET_REPORT: {e}");
                }
            }
            Frame::SetReport { id, payload, .. } => {
                let action = self.emulator.lock().unwrap().handle_set_report(id, payload);
                match action {
                    Some(SetReportAction::PairingCaptured(addr)) => {
                        let _ = self
                            .session_tx
                            .blocking_send(SessionEvent::PairingCaptured(addr));
                    }
                    Some(SetReportAction::Enabled) => self.advance(LinkEvent::EnableAcked),
                    None => {}
                }
                let _ = control.send(&framing::handshake(HandshakeCode::Ok));
            }
            Frame::Handshake(code) => {
                // The console acking our 0xF4 completes the handshake.
                if code == HandshakeCode::Ok as u8 && self.link_state() == LinkState::Ready {
                    self.advance(LinkEvent::EnableAcked);
                } else {
                    log::debug!("Handshake {code:#04x} in {:?}", self.link_state());
                }
            }
            Frame::Data { payload, .. } => self.dispatch_output(payload),
            Frame::SetProtocol => {
                let _ = control.send(&framing::handshake(HandshakeCode::Ok));
            }
            Frame::Unsupported(header) => {
                log::debug!("Unsupported transaction {header:#04x}");
                let _ = control.send(&framing::handshake(HandshakeCode::UnsupportedRequest));
            }
        }
    }

    fn handle_interrupt(&self, data: &[u8]) {
        match framing::parse(data) {
            Some(Frame::Data { payload, .. }) => self.dispatch_output(payload),
            _ => log::debug!("Ignoring interrupt datagram ({} bytes)", data.len()),
        }
    }

    fn dispatch_output(&self, payload: &[u8]) {
        let parsed = self.emulator.lock().unwrap().parse_output(payload);
        if let Some(output) = parsed {
            self.shared.output.set_rumble_and_leds(
                output.rumble_left,
                output.rumble_right,
                output.player_leds,
            );
        }
    }
}
