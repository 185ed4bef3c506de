//! DualShock 4 driver. Same Sony button block as the DualSense behind
//! different report framing: USB reports are 0x01 with buttons right after
//! the sticks, Bluetooth extended reports are 0x11 with a two-byte header
//! and a CRC-32 trailer.
use std::sync::{Arc, Mutex};

use hidapi::{BusType, DeviceInfo, HidApi, HidDevice};

use crate::config::Config;
use crate::drivers::crc32;
use crate::drivers::{
    apply_deadzone, stamped_snapshot, ControllerDriver, DriverError, DriverMetadata, DriverResult,
};
use crate::state::{ButtonSet, Capability, InputSnapshot, OutputSnapshot};

pub const NAME: &str = "DualShock 4";

pub const VID: u16 = 0x054C;
pub const PID_V1: u16 = 0x05C4;
pub const PID_V2: u16 = 0x09CC;
pub const PIDS: [u16; 2] = [PID_V1, PID_V2];

pub const INPUT_REPORT_USB: u8 = 0x01;
pub const INPUT_REPORT_USB_SIZE: usize = 64;
pub const INPUT_REPORT_BT: u8 = 0x11;
pub const INPUT_REPORT_BT_SIZE: usize = 78;
pub const OUTPUT_REPORT_USB: u8 = 0x05;
pub const OUTPUT_REPORT_USB_SIZE: usize = 32;
pub const OUTPUT_REPORT_BT: u8 = 0x11;
pub const OUTPUT_REPORT_BT_SIZE: usize = 79;

const CAPABILITIES: Capability = Capability::BUTTONS
    .union(Capability::STICKS)
    .union(Capability::TRIGGERS)
    .union(Capability::RUMBLE)
    .union(Capability::MOTION)
    .union(Capability::LIGHTBAR)
    .union(Capability::BATTERY);

const METADATA: DriverMetadata = DriverMetadata {
    name: NAME,
    vendor_id: VID,
    product_ids: &PIDS,
    capabilities: CAPABILITIES,
};

pub fn matches(vid: u16, pid: u16) -> bool {
    METADATA.matches(vid, pid)
}

pub fn open(
    api: &HidApi,
    info: &DeviceInfo,
    config: &Config,
) -> Result<Arc<dyn ControllerDriver>, DriverError> {
    let path = info.path().to_owned();
    let input = api.open_path(&path)?;
    let output = api.open_path(&path)?;
    let bluetooth = matches!(info.bus_type(), BusType::Bluetooth);
    // The DS4 calibration report (0x02) is not decoded; raw values are
    // already in the shared 8192/g and 1024/deg-s units.
    log::warn!("DualShock 4 motion runs uncalibrated");

    Ok(Arc::new(Dualshock4Driver {
        input: Mutex::new(input),
        output: Mutex::new(output),
        bluetooth,
        deadzone: config.stick_deadzone,
    }))
}

pub struct Dualshock4Driver {
    input: Mutex<HidDevice>,
    output: Mutex<HidDevice>,
    bluetooth: bool,
    deadzone: u8,
}

impl ControllerDriver for Dualshock4Driver {
    fn metadata(&self) -> &DriverMetadata {
        &METADATA
    }

    fn read_input(&self) -> DriverResult<Option<InputSnapshot>> {
        let mut buf = [0u8; 128];
        let read = {
            let device = self.input.lock().unwrap();
            device
                .read_timeout(&mut buf, crate::drivers::READ_TIMEOUT_MS)
                .map_err(|e| DriverError::Disconnected(e.to_string()))?
        };
        if read == 0 {
            return Ok(None);
        }
        match self.parse_input(&buf[..read]) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(DriverError::Malformed(reason)) => {
                log::debug!("Dropping frame: {reason}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn parse_input(&self, data: &[u8]) -> DriverResult<InputSnapshot> {
        parse_report(data, self.deadzone)
    }

    fn emit_output(&self, output: &OutputSnapshot) -> DriverResult<()> {
        let device = self.output.lock().unwrap();
        if self.bluetooth {
            device.write(&build_output_bt(output))?;
        } else {
            device.write(&build_output_usb(output))?;
        }
        Ok(())
    }

    fn enter_low_power(&self) -> DriverResult<()> {
        self.emit_output(&OutputSnapshot::default())
    }
}

/// Dispatch on the report ID and frame length, then decode.
pub fn parse_report(data: &[u8], deadzone: u8) -> DriverResult<InputSnapshot> {
    let Some(&report_id) = data.first() else {
        return Err(DriverError::Malformed("empty report".into()));
    };
    match report_id {
        INPUT_REPORT_USB if data.len() >= INPUT_REPORT_USB_SIZE => snapshot_at(data, 1, deadzone),
        INPUT_REPORT_BT if data.len() >= INPUT_REPORT_BT_SIZE => {
            if !crc32::verify(crc32::SEED_INPUT, &data[..INPUT_REPORT_BT_SIZE]) {
                return Err(DriverError::Malformed("bad input CRC".into()));
            }
            snapshot_at(data, 3, deadzone)
        }
        _ => Err(DriverError::Malformed(format!(
            "unexpected report {report_id:#04x} ({} bytes)",
            data.len()
        ))),
    }
}

/// Decode the button/stick/motion block at `off` (1 on USB, 3 on BT).
fn snapshot_at(data: &[u8], off: usize, deadzone: u8) -> DriverResult<InputSnapshot> {
    if data.len() < off + 30 {
        return Err(DriverError::Malformed(format!(
            "report truncated: {} bytes",
            data.len()
        )));
    }

    let mut snapshot = stamped_snapshot();

    let b0 = data[off + 4];
    let b1 = data[off + 5];
    let b2 = data[off + 6];
    let mut buttons = decode_hat(b0 & 0x0F);
    buttons.set(ButtonSet::WEST, b0 & 0x10 != 0);
    buttons.set(ButtonSet::SOUTH, b0 & 0x20 != 0);
    buttons.set(ButtonSet::EAST, b0 & 0x40 != 0);
    buttons.set(ButtonSet::NORTH, b0 & 0x80 != 0);
    buttons.set(ButtonSet::L1, b1 & 0x01 != 0);
    buttons.set(ButtonSet::R1, b1 & 0x02 != 0);
    buttons.set(ButtonSet::L2, b1 & 0x04 != 0);
    buttons.set(ButtonSet::R2, b1 & 0x08 != 0);
    buttons.set(ButtonSet::SELECT, b1 & 0x10 != 0);
    buttons.set(ButtonSet::START, b1 & 0x20 != 0);
    buttons.set(ButtonSet::L3, b1 & 0x40 != 0);
    buttons.set(ButtonSet::R3, b1 & 0x80 != 0);
    buttons.set(ButtonSet::HOME, b2 & 0x01 != 0);
    buttons.set(ButtonSet::TOUCHPAD, b2 & 0x02 != 0);
    snapshot.buttons = buttons;

    snapshot.left_stick_x = apply_deadzone(data[off], deadzone);
    snapshot.left_stick_y = apply_deadzone(data[off + 1], deadzone);
    snapshot.right_stick_x = apply_deadzone(data[off + 2], deadzone);
    snapshot.right_stick_y = apply_deadzone(data[off + 3], deadzone);
    snapshot.left_trigger = data[off + 7];
    snapshot.right_trigger = data[off + 8];

    let word = |at: usize| i16::from_le_bytes([data[at], data[at + 1]]);
    snapshot.gyro = [word(off + 12), word(off + 14), word(off + 16)];
    snapshot.accel = [word(off + 18), word(off + 20), word(off + 22)];

    let status = data[off + 29];
    let level = status & 0x0F;
    let cable = status & 0x10 != 0;
    if cable {
        if level >= 11 {
            snapshot.battery_percent = 100;
            snapshot.battery_full = true;
        } else {
            snapshot.battery_percent = (level * 10).min(100);
            snapshot.battery_charging = true;
        }
    } else {
        snapshot.battery_percent = (level as u16 * 10 + 5).min(100) as u8;
    }

    Ok(snapshot)
}

fn decode_hat(hat: u8) -> ButtonSet {
    match hat {
        0 => ButtonSet::DPAD_UP,
        1 => ButtonSet::DPAD_UP | ButtonSet::DPAD_RIGHT,
        2 => ButtonSet::DPAD_RIGHT,
        3 => ButtonSet::DPAD_DOWN | ButtonSet::DPAD_RIGHT,
        4 => ButtonSet::DPAD_DOWN,
        5 => ButtonSet::DPAD_DOWN | ButtonSet::DPAD_LEFT,
        6 => ButtonSet::DPAD_LEFT,
        7 => ButtonSet::DPAD_UP | ButtonSet::DPAD_LEFT,
        _ => ButtonSet::empty(),
    }
}

fn build_output_usb(output: &OutputSnapshot) -> [u8; OUTPUT_REPORT_USB_SIZE] {
    let mut buf = [0u8; OUTPUT_REPORT_USB_SIZE];
    buf[0] = OUTPUT_REPORT_USB;
    buf[1] = 0x07; // rumble + lightbar
    buf[4] = output.rumble_right;
    buf[5] = output.rumble_left;
    buf[6] = output.lightbar_red;
    buf[7] = output.lightbar_green;
    buf[8] = output.lightbar_blue;
    buf
}

fn build_output_bt(output: &OutputSnapshot) -> [u8; OUTPUT_REPORT_BT_SIZE] {
    let mut buf = [0u8; OUTPUT_REPORT_BT_SIZE];
    buf[0] = OUTPUT_REPORT_BT;
    buf[1] = 0x80; // HID output flag
    buf[3] = 0xF7; // rumble + lightbar + flash enable
    buf[6] = output.rumble_right;
    buf[7] = output.rumble_left;
    buf[8] = output.lightbar_red;
    buf[9] = output.lightbar_green;
    buf[10] = output.lightbar_blue;
    crc32::stamp(crc32::SEED_OUTPUT, &mut buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usb_report() -> [u8; 64] {
        let mut data = [0u8; 64];
        data[0] = INPUT_REPORT_USB;
        data[1] = 0x80;
        data[2] = 0x80;
        data[3] = 0x80;
        data[4] = 0x80;
        data[5] = 0x08; // hat released
        data
    }

    #[test]
    fn hat_decode_corners() {
        assert_eq!(decode_hat(3), ButtonSet::DPAD_DOWN | ButtonSet::DPAD_RIGHT);
        assert_eq!(decode_hat(8), ButtonSet::empty());
        assert_eq!(decode_hat(0x0F), ButtonSet::empty());
    }

    #[test]
    fn usb_report_decodes() {
        let mut data = usb_report();
        data[5] = 0x40; // circle + hat north
        data[6] = 0x10; // share
        data[9] = 0xC8; // r2 analog
        data[30] = 0x1B; // cable + level 11 → full

        let snapshot = parse_report(&data, 8).unwrap();
        assert!(snapshot.buttons.contains(ButtonSet::EAST));
        assert!(snapshot.buttons.contains(ButtonSet::DPAD_UP));
        assert!(snapshot.buttons.contains(ButtonSet::SELECT));
        assert_eq!(snapshot.right_trigger, 0xC8);
        assert!(snapshot.battery_full);
        assert_eq!(snapshot.battery_percent, 100);
    }

    #[test]
    fn usb_motion_words() {
        let mut data = usb_report();
        data[13..15].copy_from_slice(&(-512i16).to_le_bytes()); // gyro pitch
        data[23..25].copy_from_slice(&8192i16.to_le_bytes()); // accel z

        let snapshot = parse_report(&data, 8).unwrap();
        assert_eq!(snapshot.gyro[0], -512);
        assert_eq!(snapshot.accel[2], 8192);
    }

    #[test]
    fn bt_report_requires_valid_crc() {
        let mut data = [0u8; INPUT_REPORT_BT_SIZE];
        data[0] = INPUT_REPORT_BT;
        data[7] = 0x08; // hat released at off 3 + 4
        assert!(parse_report(&data, 8).is_err());

        crc32::stamp(crc32::SEED_INPUT, &mut data);
        let snapshot = parse_report(&data, 8).unwrap();
        assert_eq!(snapshot.buttons & ButtonSet::DPAD_UP, ButtonSet::empty());
    }

    #[test]
    fn battery_on_battery_power() {
        let mut data = usb_report();
        data[30] = 0x05; // no cable, level 5
        let snapshot = parse_report(&data, 8).unwrap();
        assert_eq!(snapshot.battery_percent, 55);
        assert!(!snapshot.battery_charging);
        assert!(!snapshot.battery_full);
    }

    #[test]
    fn usb_output_report_layout() {
        let output = OutputSnapshot {
            rumble_left: 128,
            rumble_right: 64,
            lightbar_green: 255,
            ..OutputSnapshot::default()
        };
        let report = build_output_usb(&output);
        assert_eq!(report[0], 0x05);
        assert_eq!(report[4], 64);
        assert_eq!(report[5], 128);
        assert_eq!(report[7], 255);
    }

    #[test]
    fn bt_output_report_has_valid_crc() {
        let report = build_output_bt(&OutputSnapshot::default());
        assert_eq!(report.len(), 79);
        assert_eq!(report[0], 0x11);
        assert!(crc32::verify(crc32::SEED_OUTPUT, &report));
    }
}
