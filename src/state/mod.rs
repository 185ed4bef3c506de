//! Shared snapshot slots and process-wide flags.
//!
//! The input slot is written by the active controller driver and read by the
//! console emulators; the output slot flows the other way. Both are
//! copy-in/copy-out behind short-lived mutexes. No reference to a driver or
//! transport buffer ever escapes into a slot, and no IO happens under lock.

use std::fmt::Display;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;

bitflags! {
    /// Abstract button enumeration shared by every driver and emulator.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ButtonSet: u32 {
        const SOUTH      = 1 << 0;
        const EAST       = 1 << 1;
        const WEST       = 1 << 2;
        const NORTH      = 1 << 3;
        const L1         = 1 << 4;
        const R1         = 1 << 5;
        const L2         = 1 << 6;
        const R2         = 1 << 7;
        const L3         = 1 << 8;
        const R3         = 1 << 9;
        const SELECT     = 1 << 10;
        const START      = 1 << 11;
        const HOME       = 1 << 12;
        const TOUCHPAD   = 1 << 13;
        const MUTE       = 1 << 14;
        const DPAD_UP    = 1 << 15;
        const DPAD_DOWN  = 1 << 16;
        const DPAD_LEFT  = 1 << 17;
        const DPAD_RIGHT = 1 << 18;
    }
}

bitflags! {
    /// Capability tags a driver declares. Fields of [InputSnapshot] backed
    /// by an unset capability are zero/neutral and must be ignored
    /// downstream.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Capability: u32 {
        const BUTTONS     = 1 << 0;
        const STICKS      = 1 << 1;
        const TRIGGERS    = 1 << 2;
        const RUMBLE      = 1 << 3;
        const MOTION      = 1 << 4;
        const TOUCHPAD    = 1 << 5;
        const LIGHTBAR    = 1 << 6;
        const PLAYER_LEDS = 1 << 7;
        const BATTERY     = 1 << 8;
        const AUDIO       = 1 << 9;
    }
}

/// A single capacitive touch contact. Coordinates are 12-bit touchpad
/// units (X 0–1919, Y 0–1079 on Sony pads).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TouchContact {
    pub active: bool,
    pub x: u16,
    pub y: u16,
}

/// One observed controller state. Produced exclusively by the active
/// driver; consumed read-only by the emulators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSnapshot {
    pub buttons: ButtonSet,
    pub left_stick_x: u8,
    pub left_stick_y: u8,
    pub right_stick_x: u8,
    pub right_stick_y: u8,
    pub left_trigger: u8,
    pub right_trigger: u8,
    /// Calibrated accelerometer, 8192 units per g.
    pub accel: [i16; 3],
    /// Calibrated gyroscope, 1024 units per degree-per-second.
    pub gyro: [i16; 3],
    pub touch: [TouchContact; 2],
    /// 0–100.
    pub battery_percent: u8,
    pub battery_charging: bool,
    pub battery_full: bool,
    pub timestamp_ms: u64,
}

impl Default for InputSnapshot {
    fn default() -> Self {
        Self {
            buttons: ButtonSet::empty(),
            left_stick_x: 0x80,
            left_stick_y: 0x80,
            right_stick_x: 0x80,
            right_stick_y: 0x80,
            left_trigger: 0,
            right_trigger: 0,
            accel: [0; 3],
            gyro: [0; 3],
            touch: [TouchContact::default(); 2],
            battery_percent: 100,
            battery_charging: false,
            battery_full: false,
            timestamp_ms: 0,
        }
    }
}

impl InputSnapshot {
    /// Milliseconds since the epoch, for the snapshot timestamp field.
    pub fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Desired controller-facing output state: rumble, lightbar, player LEDs.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OutputSnapshot {
    pub rumble_left: u8,
    pub rumble_right: u8,
    pub lightbar_red: u8,
    pub lightbar_green: u8,
    pub lightbar_blue: u8,
    /// Bits 0..3 → players 1..4, as decoded from the DS3 output report.
    pub player_leds: u8,
    /// 0.0–1.0.
    pub brightness: f32,
}

/// Latest input snapshot, copy-in/copy-out.
#[derive(Debug, Default)]
pub struct InputSlot(Mutex<InputSnapshot>);

impl InputSlot {
    pub fn set(&self, snapshot: InputSnapshot) {
        *self.0.lock().unwrap() = snapshot;
    }

    pub fn get(&self) -> InputSnapshot {
        *self.0.lock().unwrap()
    }
}

/// Latest output snapshot, copy-in/copy-out.
#[derive(Debug, Default)]
pub struct OutputSlot(Mutex<OutputSnapshot>);

impl OutputSlot {
    pub fn set(&self, snapshot: OutputSnapshot) {
        *self.0.lock().unwrap() = snapshot;
    }

    pub fn get(&self) -> OutputSnapshot {
        *self.0.lock().unwrap()
    }

    /// Merge rumble and LED state coming from an emulator without
    /// clobbering a lightbar override installed by the IPC poller.
    pub fn set_rumble_and_leds(&self, rumble_left: u8, rumble_right: u8, player_leds: u8) {
        let mut slot = self.0.lock().unwrap();
        slot.rumble_left = rumble_left;
        slot.rumble_right = rumble_right;
        slot.player_leds = player_leds;
    }

    /// Kill the motors, e.g. when the console link drops mid-rumble.
    pub fn clear_rumble(&self) {
        let mut slot = self.0.lock().unwrap();
        slot.rumble_left = 0;
        slot.rumble_right = 0;
    }
}

/// Process-wide boolean flags. Each one has a single conceptual writer.
#[derive(Debug)]
pub struct Flags {
    running: AtomicBool,
    usb_enabled: AtomicBool,
    pairing_complete: AtomicBool,
    mode_switching: AtomicBool,
    touchpad_as_right_stick: AtomicBool,
}

impl Flags {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            usb_enabled: AtomicBool::new(false),
            pairing_complete: AtomicBool::new(false),
            mode_switching: AtomicBool::new(false),
            touchpad_as_right_stick: AtomicBool::new(false),
        }
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Clearing this makes every worker loop exit at its next wake.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn usb_enabled(&self) -> bool {
        self.usb_enabled.load(Ordering::Relaxed)
    }

    pub fn set_usb_enabled(&self, enabled: bool) {
        self.usb_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn pairing_complete(&self) -> bool {
        self.pairing_complete.load(Ordering::Relaxed)
    }

    pub fn set_pairing_complete(&self) {
        self.pairing_complete.store(true, Ordering::Relaxed);
    }

    pub fn mode_switching(&self) -> bool {
        self.mode_switching.load(Ordering::Relaxed)
    }

    pub fn set_mode_switching(&self, switching: bool) {
        self.mode_switching.store(switching, Ordering::Relaxed);
    }

    pub fn touchpad_as_right_stick(&self) -> bool {
        self.touchpad_as_right_stick.load(Ordering::Relaxed)
    }

    pub fn set_touchpad_as_right_stick(&self, enabled: bool) {
        self.touchpad_as_right_stick.store(enabled, Ordering::Relaxed);
    }
}

/// The bundle handed to every subsystem by the composition root.
#[derive(Debug)]
pub struct Shared {
    pub input: InputSlot,
    pub output: OutputSlot,
    pub flags: Flags,
}

impl Shared {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            input: InputSlot::default(),
            output: OutputSlot::default(),
            flags: Flags::new(),
        })
    }
}

/// A Bluetooth device address in natural (display) byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BdAddr(pub [u8; 6]);

impl Display for BdAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for BdAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 6 {
            return Err(format!("invalid address '{s}'"));
        }
        let mut addr = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            addr[i] =
                u8::from_str_radix(part, 16).map_err(|e| format!("invalid address '{s}': {e}"))?;
        }
        Ok(BdAddr(addr))
    }
}
