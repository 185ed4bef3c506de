// Calibration decode follows the kernel's hid-playstation driver.
use std::sync::{Arc, Mutex};

use hidapi::{BusType, DeviceInfo, HidApi, HidDevice};
use packed_struct::prelude::*;

use crate::config::Config;
use crate::drivers::crc32;
use crate::drivers::{
    apply_deadzone, stamped_snapshot, ControllerDriver, DriverError, DriverMetadata, DriverResult,
    TouchStick,
};
use crate::state::{ButtonSet, Capability, InputSnapshot, OutputSnapshot, TouchContact};

use super::hid_report::{
    Direction, InputState, SimpleInputState, INPUT_REPORT_BT, INPUT_REPORT_BT_SIMPLE_SIZE,
    INPUT_REPORT_BT_SIZE, INPUT_REPORT_USB, INPUT_REPORT_USB_SIZE, OUTPUT_REPORT_BT,
    OUTPUT_REPORT_BT_SIZE, OUTPUT_REPORT_USB, OUTPUT_REPORT_USB_SIZE,
};

pub const NAME: &str = "DualSense";

pub const VID: u16 = 0x054C;
pub const PID: u16 = 0x0CE6;
pub const EDGE_PID: u16 = 0x0DF2;
pub const PIDS: [u16; 2] = [PID, EDGE_PID];

pub const FEATURE_REPORT_CALIBRATION: u8 = 0x05;
pub const FEATURE_REPORT_CALIBRATION_SIZE: usize = 41;

/// Native sensor resolutions; the snapshot units are defined to match.
pub const ACC_RES_PER_G: i32 = 8192;
pub const GYRO_RES_PER_DEG_S: i32 = 1024;

const CAPABILITIES: Capability = Capability::BUTTONS
    .union(Capability::STICKS)
    .union(Capability::TRIGGERS)
    .union(Capability::RUMBLE)
    .union(Capability::MOTION)
    .union(Capability::TOUCHPAD)
    .union(Capability::LIGHTBAR)
    .union(Capability::PLAYER_LEDS)
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
    let driver = DualSenseDriver::new(api, info, config)?;
    Ok(Arc::new(driver))
}

/// Per-axis calibration: calibrated = (raw - bias) * numer / denom.
#[derive(Debug, Clone, Copy)]
pub struct MotionCalibration {
    pub bias: i16,
    pub numer: i32,
    pub denom: i32,
}

impl MotionCalibration {
    pub fn identity() -> Self {
        Self {
            bias: 0,
            numer: 1,
            denom: 1,
        }
    }

    pub fn apply(&self, raw: i16) -> i16 {
        let value = (raw as i64 - self.bias as i64) * self.numer as i64 / self.denom as i64;
        value.clamp(i16::MIN as i64, i16::MAX as i64) as i16
    }
}

/// Raw report → snapshot translation, kept apart from the device handles
/// so it can be exercised without hardware.
pub struct ReportTranslator {
    /// Gyro pitch/yaw/roll then accel x/y/z.
    calibration: [MotionCalibration; 6],
    deadzone: u8,
    touch_stick_enabled: bool,
    touch_sensitivity: u16,
    touch_stick: Mutex<TouchStick>,
}

impl ReportTranslator {
    pub fn new(calibration: [MotionCalibration; 6], config: &Config) -> Self {
        Self {
            calibration,
            deadzone: config.stick_deadzone,
            touch_stick_enabled: config.touchpad_as_right_stick,
            touch_sensitivity: config.touchpad_sensitivity,
            touch_stick: Mutex::new(TouchStick::default()),
        }
    }

    pub fn translate(&self, data: &[u8]) -> DriverResult<InputSnapshot> {
        let Some(&report_id) = data.first() else {
            return Err(DriverError::Malformed("empty report".into()));
        };

        match report_id {
            INPUT_REPORT_USB if data.len() >= INPUT_REPORT_USB_SIZE => {
                let state = unpack_state(&data[1..1 + 63])?;
                Ok(self.snapshot_from_state(&state))
            }
            // Bluetooth pads fall back to the short form until extended
            // reports are switched on by an output report.
            INPUT_REPORT_USB if data.len() >= INPUT_REPORT_BT_SIMPLE_SIZE => {
                let mut body = [0u8; 9];
                body.copy_from_slice(&data[1..10]);
                let state = SimpleInputState::unpack(&body)
                    .map_err(|e| DriverError::Malformed(e.to_string()))?;
                Ok(self.snapshot_from_simple(&state))
            }
            INPUT_REPORT_BT if data.len() >= INPUT_REPORT_BT_SIZE => {
                if !crc32::verify(crc32::SEED_INPUT, &data[..INPUT_REPORT_BT_SIZE]) {
                    return Err(DriverError::Malformed("bad input CRC".into()));
                }
                let state = unpack_state(&data[2..2 + 63])?;
                Ok(self.snapshot_from_state(&state))
            }
            _ => Err(DriverError::Malformed(format!(
                "unexpected report {report_id:#04x} ({} bytes)",
                data.len()
            ))),
        }
    }

    pub fn reset(&self) {
        self.touch_stick.lock().unwrap().reset();
    }

    fn snapshot_from_state(&self, state: &InputState) -> InputSnapshot {
        let mut snapshot = stamped_snapshot();

        let mut buttons = dpad_buttons(state.dpad);
        buttons.set(ButtonSet::SOUTH, state.cross);
        buttons.set(ButtonSet::EAST, state.circle);
        buttons.set(ButtonSet::WEST, state.square);
        buttons.set(ButtonSet::NORTH, state.triangle);
        buttons.set(ButtonSet::L1, state.l1);
        buttons.set(ButtonSet::R1, state.r1);
        buttons.set(ButtonSet::L2, state.l2);
        buttons.set(ButtonSet::R2, state.r2);
        buttons.set(ButtonSet::L3, state.l3);
        buttons.set(ButtonSet::R3, state.r3);
        buttons.set(ButtonSet::SELECT, state.create);
        buttons.set(ButtonSet::START, state.options);
        buttons.set(ButtonSet::HOME, state.ps);
        buttons.set(ButtonSet::TOUCHPAD, state.touchpad);
        buttons.set(ButtonSet::MUTE, state.mute);
        snapshot.buttons = buttons;

        snapshot.left_stick_x = apply_deadzone(state.joystick_l_x, self.deadzone);
        snapshot.left_stick_y = apply_deadzone(state.joystick_l_y, self.deadzone);
        snapshot.right_stick_x = apply_deadzone(state.joystick_r_x, self.deadzone);
        snapshot.right_stick_y = apply_deadzone(state.joystick_r_y, self.deadzone);
        snapshot.left_trigger = state.l2_trigger;
        snapshot.right_trigger = state.r2_trigger;

        snapshot.gyro = [
            self.calibration[0].apply(state.gyro_x.to_primitive()),
            self.calibration[1].apply(state.gyro_y.to_primitive()),
            self.calibration[2].apply(state.gyro_z.to_primitive()),
        ];
        snapshot.accel = [
            self.calibration[3].apply(state.accel_x.to_primitive()),
            self.calibration[4].apply(state.accel_y.to_primitive()),
            self.calibration[5].apply(state.accel_z.to_primitive()),
        ];

        for (slot, finger) in snapshot.touch.iter_mut().zip(state.touch.iter()) {
            *slot = TouchContact {
                active: finger.active(),
                x: finger.x(),
                y: finger.y(),
            };
        }

        let (percent, charging, full) = state.battery();
        snapshot.battery_percent = percent;
        snapshot.battery_charging = charging;
        snapshot.battery_full = full;

        if self.touch_stick_enabled {
            let contact = snapshot.touch[0];
            let emulated = self.touch_stick.lock().unwrap().update(
                contact.active,
                contact.x,
                contact.y,
                self.touch_sensitivity,
            );
            if let Some((x, y)) = emulated {
                snapshot.right_stick_x = x;
                snapshot.right_stick_y = y;
            }
        }

        snapshot
    }

    fn snapshot_from_simple(&self, state: &SimpleInputState) -> InputSnapshot {
        let mut snapshot = stamped_snapshot();

        let mut buttons = dpad_buttons(state.dpad);
        buttons.set(ButtonSet::SOUTH, state.cross);
        buttons.set(ButtonSet::EAST, state.circle);
        buttons.set(ButtonSet::WEST, state.square);
        buttons.set(ButtonSet::NORTH, state.triangle);
        buttons.set(ButtonSet::L1, state.l1);
        buttons.set(ButtonSet::R1, state.r1);
        buttons.set(ButtonSet::L2, state.l2);
        buttons.set(ButtonSet::R2, state.r2);
        buttons.set(ButtonSet::L3, state.l3);
        buttons.set(ButtonSet::R3, state.r3);
        buttons.set(ButtonSet::SELECT, state.create);
        buttons.set(ButtonSet::START, state.options);
        buttons.set(ButtonSet::HOME, state.ps);
        buttons.set(ButtonSet::TOUCHPAD, state.touchpad);
        snapshot.buttons = buttons;

        snapshot.left_stick_x = apply_deadzone(state.joystick_l_x, self.deadzone);
        snapshot.left_stick_y = apply_deadzone(state.joystick_l_y, self.deadzone);
        snapshot.right_stick_x = apply_deadzone(state.joystick_r_x, self.deadzone);
        snapshot.right_stick_y = apply_deadzone(state.joystick_r_y, self.deadzone);
        snapshot.left_trigger = state.l2_trigger;
        snapshot.right_trigger = state.r2_trigger;

        snapshot
    }
}

pub struct DualSenseDriver {
    /// Read side of the hidraw node. Separate open from the write side so
    /// the input reader and the output throttler never contend.
    input: Mutex<HidDevice>,
    output: Mutex<HidDevice>,
    bluetooth: bool,
    translator: ReportTranslator,
}

impl DualSenseDriver {
    pub fn new(api: &HidApi, info: &DeviceInfo, config: &Config) -> Result<Self, DriverError> {
        let path = info.path().to_owned();
        let input = api.open_path(&path)?;
        let output = api.open_path(&path)?;
        let bluetooth = matches!(info.bus_type(), BusType::Bluetooth);

        let calibration = match read_calibration(&input) {
            Ok(calibration) => calibration,
            Err(e) => {
                log::warn!("Calibration read failed, using identity: {e}");
                [MotionCalibration::identity(); 6]
            }
        };

        Ok(Self {
            input: Mutex::new(input),
            output: Mutex::new(output),
            bluetooth,
            translator: ReportTranslator::new(calibration, config),
        })
    }

    fn build_output_usb(&self, output: &OutputSnapshot) -> [u8; OUTPUT_REPORT_USB_SIZE] {
        let mut buf = [0u8; OUTPUT_REPORT_USB_SIZE];
        buf[0] = OUTPUT_REPORT_USB;
        buf[1] = 0x0F; // valid_flag0: rumble emulation + haptics select
        buf[2] = 0x55; // valid_flag1: mute LED + lightbar + player LEDs
        buf[3] = output.rumble_right;
        buf[4] = output.rumble_left;
        buf[39] = 0x02; // valid_flag2: lightbar setup control
        buf[42] = 0x02; // lightbar_setup: fade out the default blue
        buf[43] = brightness_value(output.brightness);
        buf[44] = player_led_pattern(output.player_leds);
        buf[45] = output.lightbar_red;
        buf[46] = output.lightbar_green;
        buf[47] = output.lightbar_blue;
        buf
    }

    fn build_output_bt(&self, output: &OutputSnapshot) -> [u8; OUTPUT_REPORT_BT_SIZE] {
        let mut buf = [0u8; OUTPUT_REPORT_BT_SIZE];
        buf[0] = OUTPUT_REPORT_BT;
        buf[1] = 0x02; // data tag, no sequence numbering
        buf[2] = 0x0F;
        buf[3] = 0x55;
        buf[4] = output.rumble_right;
        buf[5] = output.rumble_left;
        buf[40] = 0x02;
        buf[43] = 0x02;
        buf[44] = brightness_value(output.brightness);
        buf[45] = player_led_pattern(output.player_leds);
        buf[46] = output.lightbar_red;
        buf[47] = output.lightbar_green;
        buf[48] = output.lightbar_blue;
        crc32::stamp(crc32::SEED_OUTPUT, &mut buf);
        buf
    }
}

impl ControllerDriver for DualSenseDriver {
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
        self.translator.translate(data)
    }

    fn emit_output(&self, output: &OutputSnapshot) -> DriverResult<()> {
        let device = self.output.lock().unwrap();
        if self.bluetooth {
            device.write(&self.build_output_bt(output))?;
        } else {
            device.write(&self.build_output_usb(output))?;
        }
        Ok(())
    }

    fn enter_low_power(&self) -> DriverResult<()> {
        // Dim everything; the pad manages its own sleep.
        let dark = OutputSnapshot::default();
        self.emit_output(&dark)
    }

    fn on_disconnect(&self) {
        self.translator.reset();
    }
}

fn unpack_state(body: &[u8]) -> DriverResult<InputState> {
    let mut bytes = [0u8; 63];
    bytes.copy_from_slice(body);
    InputState::unpack(&bytes).map_err(|e| DriverError::Malformed(e.to_string()))
}

fn dpad_buttons(direction: Direction) -> ButtonSet {
    match direction {
        Direction::North => ButtonSet::DPAD_UP,
        Direction::NorthEast => ButtonSet::DPAD_UP | ButtonSet::DPAD_RIGHT,
        Direction::East => ButtonSet::DPAD_RIGHT,
        Direction::SouthEast => ButtonSet::DPAD_DOWN | ButtonSet::DPAD_RIGHT,
        Direction::South => ButtonSet::DPAD_DOWN,
        Direction::SouthWest => ButtonSet::DPAD_DOWN | ButtonSet::DPAD_LEFT,
        Direction::West => ButtonSet::DPAD_LEFT,
        Direction::NorthWest => ButtonSet::DPAD_UP | ButtonSet::DPAD_LEFT,
        Direction::None => ButtonSet::empty(),
    }
}

/// DS3 player bitmask → DualSense 5-LED pattern (centered dots, no fade).
pub fn player_led_pattern(mask: u8) -> u8 {
    let player = (0..4).rev().find(|bit| mask & (1 << bit) != 0);
    match player {
        Some(3) => 0x1B | 0x20,
        Some(2) => 0x15 | 0x20,
        Some(1) => 0x0A | 0x20,
        Some(0) => 0x04 | 0x20,
        _ => 0x00,
    }
}

fn brightness_value(brightness: f32) -> u8 {
    if brightness <= 0.0 || brightness > 0.66 {
        0x00 // high (also the default when unset)
    } else if brightness > 0.33 {
        0x01 // mid
    } else {
        0x02 // dim
    }
}

/// Read and decode feature report 0x05 into the six calibration triples,
/// gyro pitch/yaw/roll then accel x/y/z.
fn read_calibration(device: &HidDevice) -> Result<[MotionCalibration; 6], DriverError> {
    let mut buf = [0u8; FEATURE_REPORT_CALIBRATION_SIZE];
    buf[0] = FEATURE_REPORT_CALIBRATION;
    let read = device.get_feature_report(&mut buf)?;
    if read < FEATURE_REPORT_CALIBRATION_SIZE {
        return Err(DriverError::Malformed(format!(
            "calibration report truncated: {read} bytes"
        )));
    }
    Ok(decode_calibration(&buf))
}

pub fn decode_calibration(buf: &[u8; FEATURE_REPORT_CALIBRATION_SIZE]) -> [MotionCalibration; 6] {
    let word = |offset: usize| i16::from_le_bytes([buf[offset], buf[offset + 1]]);

    let speed_2x = word(19) as i32 + word(21) as i32;
    let gyro = |bias_off: usize, plus_off: usize, minus_off: usize| {
        let bias = word(bias_off);
        let denom = (word(plus_off) as i32 - bias as i32).abs()
            + (word(minus_off) as i32 - bias as i32).abs();
        if denom == 0 {
            log::warn!("Invalid gyro calibration range, using identity");
            return MotionCalibration::identity();
        }
        MotionCalibration {
            bias,
            numer: speed_2x * GYRO_RES_PER_DEG_S,
            denom,
        }
    };
    let accel = |plus_off: usize, minus_off: usize| {
        let range_2g = word(plus_off) as i32 - word(minus_off) as i32;
        if range_2g == 0 {
            log::warn!("Invalid accelerometer calibration range, using identity");
            return MotionCalibration::identity();
        }
        MotionCalibration {
            bias: (word(plus_off) as i32 - range_2g / 2) as i16,
            numer: 2 * ACC_RES_PER_G,
            denom: range_2g,
        }
    };

    [
        gyro(1, 7, 9),   // pitch
        gyro(3, 11, 13), // yaw
        gyro(5, 15, 17), // roll
        accel(23, 25),
        accel(27, 29),
        accel(31, 33),
    ]
}
