//! Wired transport: the FunctionFS HID gadget facing the console. Three
//! long-lived workers: the ep0 setup handler, the 250 Hz input pump on the
//! interrupt-IN endpoint, and the output pump on the interrupt-OUT
//! endpoint.

pub mod ffs;

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tokio::sync::mpsc::Sender;

use crate::constants::PRODUCT;
use crate::ds3::{Ds3Emulator, SetReportAction};
use crate::session::{PowerHandle, PowerState, SessionEvent};
use crate::state::Shared;
use crate::transport::TransportError;

use ffs::{Event, EventType, SetupRequest};

/// Input-report cadence on the wire (≈250 Hz).
const INPUT_INTERVAL: Duration = Duration::from_millis(4);
/// Poll bound so every loop observes shutdown promptly.
const POLL_TIMEOUT_MS: u16 = 100;
/// Endpoint packet size; also caps SET_REPORT payloads.
const PACKET_SIZE: usize = 64;

pub struct WiredTransport;

impl WiredTransport {
    /// Bind to the FunctionFS directory and start the three workers.
    /// Failure to open the endpoints is configuration-fatal.
    pub fn spawn(
        emulator: Arc<Mutex<Ds3Emulator>>,
        shared: Arc<Shared>,
        session_tx: Sender<SessionEvent>,
        power: PowerHandle,
        ffs_dir: &Path,
    ) -> Result<(), TransportError> {
        let mut ep0 = open_endpoint(ffs_dir, "ep0")?;
        ep0.write_all(&ffs::descriptors_blob())
            .map_err(|e| TransportError::Setup(format!("writing descriptors: {e}")))?;
        ep0.write_all(&ffs::strings_blob(PRODUCT))
            .map_err(|e| TransportError::Setup(format!("writing strings: {e}")))?;
        let ep_in = open_endpoint(ffs_dir, "ep1")?;
        let ep_out = open_endpoint(ffs_dir, "ep2")?;
        log::info!(
            "FunctionFS gadget bound at {} (expects ConfigFS identity {:04X}:{:04X} \"{}\" / \"{}\" serial {})",
            ffs_dir.display(),
            crate::constants::SONY_VID,
            crate::constants::DS3_PID,
            crate::constants::MANUFACTURER,
            PRODUCT,
            crate::constants::SERIAL,
        );

        {
            let emulator = emulator.clone();
            let shared = shared.clone();
            let session_tx = session_tx.clone();
            tokio::task::spawn_blocking(move || {
                setup_loop(ep0, emulator, shared, session_tx);
            });
        }
        {
            let emulator = emulator.clone();
            let shared = shared.clone();
            tokio::task::spawn_blocking(move || {
                input_pump(ep_in, emulator, shared, power);
            });
        }
        tokio::task::spawn_blocking(move || {
            output_pump(ep_out, emulator, shared);
        });

        Ok(())
    }
}

fn open_endpoint(dir: &Path, name: &str) -> Result<File, TransportError> {
    let path: PathBuf = dir.join(name);
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .map_err(|e| TransportError::Setup(format!("opening {}: {e}", path.display())))
}

fn poll_readable(fd: BorrowedFd) -> io::Result<bool> {
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    match poll(&mut fds, PollTimeout::from(POLL_TIMEOUT_MS)) {
        Ok(0) => Ok(false),
        Ok(_) => Ok(true),
        Err(nix::errno::Errno::EINTR) => Ok(false),
        Err(e) => Err(io::Error::from(e)),
    }
}

/// ep0 worker: decodes bus events and answers SETUP traffic.
fn setup_loop(
    mut ep0: File,
    emulator: Arc<Mutex<Ds3Emulator>>,
    shared: Arc<Shared>,
    session_tx: Sender<SessionEvent>,
) {
    let mut buf = [0u8; ffs::EVENT_SIZE * 4];

    while shared.flags.running() {
        match poll_readable(ep0.as_fd()) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(e) => {
                log::error!("ep0 poll failed: {e}");
                break;
            }
        }
        let read = match ep0.read(&mut buf) {
            Ok(read) => read,
            Err(e) => {
                log::error!("ep0 read failed: {e}");
                break;
            }
        };

        for event in ffs::parse_events(&buf[..read]) {
            if !handle_event(&mut ep0, event, &emulator, &shared, &session_tx) {
                return;
            }
        }
    }
}

/// Returns false when the function was unbound and the worker must exit.
fn handle_event(
    ep0: &mut File,
    event: Event,
    emulator: &Arc<Mutex<Ds3Emulator>>,
    shared: &Shared,
    session_tx: &Sender<SessionEvent>,
) -> bool {
    match event.event_type {
        EventType::Enable => {
            log::info!("USB session enabled by host");
            shared.flags.set_usb_enabled(true);
            let _ = session_tx.blocking_send(SessionEvent::UsbEnabled);
        }
        EventType::Disable => {
            log::info!("USB session disabled");
            shared.flags.set_usb_enabled(false);
            emulator.lock().unwrap().clear_rumble();
            shared.output.clear_rumble();
            let _ = session_tx.blocking_send(SessionEvent::UsbDisabled);
        }
        EventType::Suspend => {
            log::info!("USB bus suspended");
            let _ = session_tx.blocking_send(SessionEvent::UsbSuspended);
        }
        EventType::Unbind => {
            log::info!("USB function unbound");
            shared.flags.set_usb_enabled(false);
            let _ = session_tx.blocking_send(SessionEvent::UsbUnbound);
            return false;
        }
        EventType::Setup => handle_setup(ep0, event.setup, emulator, session_tx),
        EventType::Bind | EventType::Resume => {
            log::debug!("USB event: {:?}", event.event_type);
        }
    }
    true
}

fn handle_setup(
    ep0: &mut File,
    setup: SetupRequest,
    emulator: &Arc<Mutex<Ds3Emulator>>,
    session_tx: &Sender<SessionEvent>,
) {
    if setup.is_in() {
        handle_setup_in(ep0, setup, emulator);
    } else {
        handle_setup_out(ep0, setup, emulator, session_tx);
    }
}

fn handle_setup_in(ep0: &mut File, setup: SetupRequest, emulator: &Arc<Mutex<Ds3Emulator>>) {
    match setup.request {
        // wValue: report type in the high byte, report ID in the low one.
        ffs::HID_GET_REPORT if (setup.value >> 8) as u8 == 0x01 => {
            let report = emulator.lock().unwrap().cached_input_report();
            let len = (setup.length as usize).min(report.len());
            if let Err(e) = ep0.write_all(&report[..len]) {
                log::warn!("GET_REPORT(input) reply failed: {e}");
            }
        }
        ffs::HID_GET_REPORT => {
            let id = (setup.value & 0xFF) as u8;
            let emulator = emulator.lock().unwrap();
            match emulator.get_feature(id) {
                Some((entry, name)) => {
                    log::debug!("GET_REPORT {id:#04x} ({name}), {} bytes", setup.length);
                    let len = (setup.length as usize).min(entry.len());
                    let response = entry[..len].to_vec();
                    drop(emulator);
                    if let Err(e) = ep0.write_all(&response) {
                        log::warn!("GET_REPORT reply failed: {e}");
                    }
                }
                None => {
                    log::debug!("GET_REPORT for unknown id {id:#04x}, stalling");
                    drop(emulator);
                    stall_in(ep0);
                }
            }
        }
        ffs::USB_GET_DESCRIPTOR if (setup.value >> 8) as u8 == ffs::DESCRIPTOR_TYPE_REPORT => {
            let len = (setup.length as usize).min(ffs::REPORT_DESCRIPTOR.len());
            if let Err(e) = ep0.write_all(&ffs::REPORT_DESCRIPTOR[..len]) {
                log::warn!("Report-descriptor reply failed: {e}");
            }
        }
        _ => {
            log::debug!(
                "Stalling unsupported IN request {:#04x}/{:#04x}",
                setup.request_type,
                setup.request
            );
            stall_in(ep0);
        }
    }
}

fn handle_setup_out(
    ep0: &mut File,
    setup: SetupRequest,
    emulator: &Arc<Mutex<Ds3Emulator>>,
    session_tx: &Sender<SessionEvent>,
) {
    match setup.request {
        ffs::HID_SET_REPORT => {
            let mut payload = [0u8; PACKET_SIZE];
            let want = (setup.length as usize).min(PACKET_SIZE);
            let read = if want > 0 {
                match ep0.read(&mut payload[..want]) {
                    Ok(read) => read,
                    Err(e) => {
                        log::warn!("SET_REPORT data stage failed: {e}");
                        return;
                    }
                }
            } else {
                0
            };

            let id = (setup.value & 0xFF) as u8;
            let action = emulator
                .lock()
                .unwrap()
                .handle_set_report(id, &payload[..read]);
            match action {
                Some(SetReportAction::PairingCaptured(addr)) => {
                    let _ = session_tx.blocking_send(SessionEvent::PairingCaptured(addr));
                }
                Some(SetReportAction::Enabled) => {
                    log::debug!("Console activated the pad over USB");
                }
                None => {}
            }
        }
        ffs::HID_SET_IDLE => {
            zero_ack(ep0);
        }
        _ => {
            log::debug!(
                "Stalling unsupported OUT request {:#04x}/{:#04x}",
                setup.request_type,
                setup.request
            );
            stall_out(ep0);
        }
    }
}

/// Stalling a setup is IO in the opposite direction: read for IN requests,
/// write for OUT requests.
fn stall_in(ep0: &File) {
    let rc = unsafe { libc::read(ep0.as_raw_fd(), std::ptr::null_mut(), 0) };
    if rc < 0 {
        log::trace!("stall: {}", io::Error::last_os_error());
    }
}

fn stall_out(ep0: &File) {
    let rc = unsafe { libc::write(ep0.as_raw_fd(), std::ptr::null(), 0) };
    if rc < 0 {
        log::trace!("stall: {}", io::Error::last_os_error());
    }
}

/// Acknowledge a zero-length OUT request's status stage.
fn zero_ack(ep0: &File) {
    let rc = unsafe { libc::read(ep0.as_raw_fd(), std::ptr::null_mut(), 0) };
    if rc < 0 {
        log::trace!("zero-ack: {}", io::Error::last_os_error());
    }
}

/// Interrupt-IN worker: a fresh report from the input slot every 4 ms
/// while the session is enabled and awake. Writes are fire-and-forget.
fn input_pump(
    mut ep_in: File,
    emulator: Arc<Mutex<Ds3Emulator>>,
    shared: Arc<Shared>,
    power: PowerHandle,
) {
    while shared.flags.running() {
        std::thread::sleep(INPUT_INTERVAL);
        if !shared.flags.usb_enabled() {
            continue;
        }
        if *power.lock().unwrap() != PowerState::Active {
            continue;
        }

        let snapshot = shared.input.get();
        let report = emulator.lock().unwrap().build_input(&snapshot);
        if let Err(e) = ep_in.write(&report) {
            // The host may have just disabled the endpoint; the next
            // ENABLE restarts the stream.
            log::trace!("Input write dropped: {e}");
        }
    }
}

/// Interrupt-OUT worker: every report read is a rumble/LED command.
fn output_pump(mut ep_out: File, emulator: Arc<Mutex<Ds3Emulator>>, shared: Arc<Shared>) {
    let mut buf = [0u8; PACKET_SIZE];

    while shared.flags.running() {
        match poll_readable(ep_out.as_fd()) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(e) => {
                log::error!("ep2 poll failed: {e}");
                break;
            }
        }
        match ep_out.read(&mut buf) {
            Ok(0) => continue,
            Ok(read) => {
                let parsed = emulator.lock().unwrap().parse_output(&buf[..read]);
                if let Some(output) = parsed {
                    shared.output.set_rumble_and_leds(
                        output.rumble_left,
                        output.rumble_right,
                        output.player_leds,
                    );
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => {
                // ESHUTDOWN while the host has the endpoint disabled.
                log::debug!("ep2 read: {e}");
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }
}
