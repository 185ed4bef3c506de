//! Physical controller drivers.
//!
//! A driver is a [ControllerDriver] trait object plus a static
//! [DriverMetadata] block declaring identity and capabilities. Discovery
//! walks the hidapi device list against each registered descriptor. The
//! driver is the only component that knows button mappings, deadzones,
//! motion calibration, and touchpad emulation for its hardware.

pub mod crc32;
pub mod dualsense;
pub mod dualshock4;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use hidapi::{DeviceInfo, HidApi};
use thiserror::Error;
use tokio::sync::mpsc::Sender;

use crate::config::Config;
use crate::session::SessionEvent;
use crate::state::{ButtonSet, Capability, InputSnapshot, OutputSnapshot, Shared};

/// How long a blocking input read may stall before the loop rechecks the
/// running flag.
pub(crate) const READ_TIMEOUT_MS: i32 = 100;
/// Rescan cadence while no supported controller is present.
const SCAN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("device disconnected: {0}")]
    Disconnected(String),
    #[error("malformed input report: {0}")]
    Malformed(String),
    #[error(transparent)]
    Hid(#[from] hidapi::HidError),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Static identity and capability block of a driver.
#[derive(Debug, Clone, Copy)]
pub struct DriverMetadata {
    pub name: &'static str,
    pub vendor_id: u16,
    pub product_ids: &'static [u16],
    pub capabilities: Capability,
}

impl DriverMetadata {
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        vid == self.vendor_id && self.product_ids.contains(&pid)
    }
}

/// Contract every physical-controller driver implements. Methods take
/// `&self`: device handles and small parse state live behind internal
/// mutexes so the input reader and the output throttler can run
/// concurrently.
pub trait ControllerDriver: Send + Sync {
    fn metadata(&self) -> &DriverMetadata;

    /// Blocking read of one raw frame with a bounded timeout, parsed into a
    /// snapshot. `Ok(None)` on timeout.
    fn read_input(&self) -> DriverResult<Option<InputSnapshot>>;

    /// Parse one raw report. Exposed separately so report translation is
    /// testable without hardware.
    fn parse_input(&self, data: &[u8]) -> DriverResult<InputSnapshot>;

    /// Send rumble and LED state to the device.
    fn emit_output(&self, output: &OutputSnapshot) -> DriverResult<()>;

    fn enter_low_power(&self) -> DriverResult<()> {
        Ok(())
    }

    fn on_disconnect(&self) {}
}

/// Registry entry: a cheap VID/PID predicate plus an open function.
pub struct DriverDescriptor {
    pub name: &'static str,
    pub matches: fn(u16, u16) -> bool,
    pub open:
        fn(&HidApi, &DeviceInfo, &Config) -> Result<Arc<dyn ControllerDriver>, DriverError>,
}

/// All built-in drivers, in match priority order.
pub fn registry() -> Vec<DriverDescriptor> {
    vec![
        DriverDescriptor {
            name: dualsense::driver::NAME,
            matches: dualsense::driver::matches,
            open: dualsense::driver::open,
        },
        DriverDescriptor {
            name: dualshock4::driver::NAME,
            matches: dualshock4::driver::matches,
            open: dualshock4::driver::open,
        },
    ]
}

/// Scan the raw-HID device list for the first supported controller.
pub fn find_device(
    api: &HidApi,
    descriptors: &[DriverDescriptor],
    config: &Config,
) -> Option<Arc<dyn ControllerDriver>> {
    for info in api.device_list() {
        for descriptor in descriptors {
            if !(descriptor.matches)(info.vendor_id(), info.product_id()) {
                continue;
            }
            match (descriptor.open)(api, info, config) {
                Ok(driver) => {
                    log::info!(
                        "Opened {} ({:04x}:{:04x}) at {:?}",
                        descriptor.name,
                        info.vendor_id(),
                        info.product_id(),
                        info.path()
                    );
                    return Some(driver);
                }
                Err(e) => {
                    log::warn!("Failed to open {}: {e}", descriptor.name);
                }
            }
        }
    }
    None
}

/// Shared slot naming the currently active driver. The input reader owns
/// the writes; the output throttler only reads.
#[derive(Default)]
pub struct DriverSlot(Mutex<Option<Arc<dyn ControllerDriver>>>);

impl DriverSlot {
    pub fn set(&self, driver: Option<Arc<dyn ControllerDriver>>) {
        *self.0.lock().unwrap() = driver;
    }

    pub fn get(&self) -> Option<Arc<dyn ControllerDriver>> {
        self.0.lock().unwrap().clone()
    }
}

/// Controller-input reader: scans until a controller appears, then pumps
/// raw frames into the input slot until it disconnects, then rescans.
/// HOME key-down edges are reported to the session manager (standby wake).
pub async fn run_input_reader(
    shared: Arc<Shared>,
    slot: Arc<DriverSlot>,
    config: Config,
    session_tx: Sender<SessionEvent>,
) {
    let result = tokio::task::spawn_blocking(move || {
        reader_loop(shared, slot, config, session_tx);
    })
    .await;
    if let Err(e) = result {
        log::error!("Input reader task failed: {e}");
    }
}

fn reader_loop(
    shared: Arc<Shared>,
    slot: Arc<DriverSlot>,
    config: Config,
    session_tx: Sender<SessionEvent>,
) {
    let mut api = match HidApi::new() {
        Ok(api) => api,
        Err(e) => {
            log::error!("Failed to initialize HID API: {e}");
            shared.flags.stop();
            return;
        }
    };
    let descriptors = registry();

    while shared.flags.running() {
        if let Err(e) = api.refresh_devices() {
            log::warn!("Device scan failed: {e}");
        }
        let Some(driver) = find_device(&api, &descriptors, &config) else {
            std::thread::sleep(SCAN_INTERVAL);
            continue;
        };

        slot.set(Some(driver.clone()));
        pump_driver(&shared, driver.as_ref(), &session_tx);
        driver.on_disconnect();
        slot.set(None);
    }
}

fn pump_driver(shared: &Shared, driver: &dyn ControllerDriver, session_tx: &Sender<SessionEvent>) {
    let mut last_buttons = ButtonSet::empty();

    while shared.flags.running() {
        match driver.read_input() {
            Ok(Some(snapshot)) => {
                shared.input.set(snapshot);
                let pressed = snapshot.buttons - last_buttons;
                if pressed.contains(ButtonSet::HOME) {
                    let _ = session_tx.try_send(SessionEvent::HomePressed);
                }
                last_buttons = snapshot.buttons;
            }
            Ok(None) => continue,
            Err(e) => {
                log::warn!("Controller read failed, rescanning: {e}");
                // Park a neutral frame so the console does not see a stuck
                // input while we rescan.
                shared.input.set(InputSnapshot::default());
                return;
            }
        }
    }
}

/// Clamp a stick axis into the neutral point when inside the deadzone.
pub fn apply_deadzone(value: u8, deadzone: u8) -> u8 {
    let offset = (value as i16 - 0x80).unsigned_abs();
    if offset <= deadzone as u16 {
        0x80
    } else {
        value
    }
}

/// Relative touchpad-to-right-stick emulation: a single contact's delta
/// from its initial touch point deflects the stick, full deflection at
/// `sensitivity` pixels.
#[derive(Debug, Default)]
pub struct TouchStick {
    origin: Option<(u16, u16)>,
}

impl TouchStick {
    pub fn reset(&mut self) {
        self.origin = None;
    }

    /// Returns the emulated (x, y) axes for the current contact, or `None`
    /// when not touching (the origin resets).
    pub fn update(&mut self, active: bool, x: u16, y: u16, sensitivity: u16) -> Option<(u8, u8)> {
        if !active {
            self.origin = None;
            return None;
        }
        let (ox, oy) = *self.origin.get_or_insert((x, y));
        let scale = sensitivity.max(1) as i32;
        let axis = |delta: i32| -> u8 { (0x80 + delta * 0x80 / scale).clamp(0, 0xFF) as u8 };
        Some((axis(x as i32 - ox as i32), axis(y as i32 - oy as i32)))
    }
}

/// Fill one frame's worth of timestamped snapshot scaffolding. Drivers
/// populate the rest from their parsed report.
pub(crate) fn stamped_snapshot() -> InputSnapshot {
    InputSnapshot {
        timestamp_ms: InputSnapshot::now_ms(),
        ..InputSnapshot::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadzone_clamps_to_center() {
        assert_eq!(apply_deadzone(0x80, 8), 0x80);
        assert_eq!(apply_deadzone(0x84, 8), 0x80);
        assert_eq!(apply_deadzone(0x7C, 8), 0x80);
        assert_eq!(apply_deadzone(0x90, 8), 0x90);
        assert_eq!(apply_deadzone(0x00, 8), 0x00);
    }

    #[test]
    fn touch_stick_deflects_from_origin() {
        let mut stick = TouchStick::default();
        // First contact establishes the origin: neutral output.
        assert_eq!(stick.update(true, 960, 540, 400), Some((0x80, 0x80)));
        // Full deflection right at +sensitivity pixels.
        let (x, y) = stick.update(true, 1360, 540, 400).unwrap();
        assert_eq!(x, 0xFF);
        assert_eq!(y, 0x80);
        // Past full deflection clamps.
        let (x, _) = stick.update(true, 1919, 540, 400).unwrap();
        assert_eq!(x, 0xFF);
        // Negative deltas clamp at zero.
        let (x, y) = stick.update(true, 0, 0, 400).unwrap();
        assert_eq!(x, 0x00);
        assert_eq!(y, 0x00);
        // Lift resets the origin.
        assert_eq!(stick.update(false, 0, 0, 400), None);
        assert_eq!(stick.update(true, 100, 100, 400), Some((0x80, 0x80)));
    }
}
