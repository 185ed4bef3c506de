//! Protocol-level tests for the DS3 emulator: report shape, translation
//! scenarios, framing, and the feature-report round trips.

#![cfg(test)]

use super::hid_report::SIGNATURE;
use super::{Ds3Emulator, SetReportAction};
use crate::state::{BdAddr, ButtonSet, InputSnapshot};

fn neutral() -> InputSnapshot {
    InputSnapshot {
        battery_percent: 100,
        battery_full: true,
        ..InputSnapshot::default()
    }
}

#[test]
fn report_shape_is_fixed() {
    let mut emu = Ds3Emulator::new();
    let mut snapshot = neutral();
    snapshot.buttons = ButtonSet::all();
    snapshot.accel = [8192, -8192, 123];
    snapshot.gyro = [0, 1024, -1024];

    for snap in [neutral(), snapshot] {
        let report = emu.build_input(&snap);
        assert_eq!(report.len(), 49);
        assert_eq!(report[0], 0x01);
        assert_eq!(report[48], 0x02);
        assert_eq!(&report[36..=39], &SIGNATURE);
    }
}

#[test]
fn neutral_frame() {
    // Scenario: sticks centered, battery full on USB.
    let mut emu = Ds3Emulator::new();
    let report = emu.build_input(&neutral());

    assert_eq!(report[2], 0x00);
    assert_eq!(report[3], 0x00);
    assert_eq!(report[4], 0x00);
    for offset in [10, 11, 12, 13, 18, 19, 20, 21, 22, 23, 24, 25] {
        assert_eq!(report[offset], 0x00, "pressure byte {offset}");
    }
    for offset in [6, 7, 8, 9] {
        assert_eq!(report[offset], 0x80, "stick byte {offset}");
    }
    assert_eq!(report[29], 0x02);
    assert_eq!(report[30], 0xEF);
    assert_eq!(report[31], 0x12);
}

#[test]
fn build_is_deterministic() {
    let mut emu = Ds3Emulator::new();
    let mut snapshot = neutral();
    snapshot.buttons = ButtonSet::SOUTH | ButtonSet::R1 | ButtonSet::DPAD_LEFT;
    snapshot.left_trigger = 44;
    snapshot.accel = [100, -200, 300];

    let a = emu.build_input(&snapshot);
    let b = emu.build_input(&snapshot);
    assert_eq!(a, b);
}

#[test]
fn home_cross_left_trigger() {
    // Scenario: HOME + cross held with an analog left trigger.
    let mut emu = Ds3Emulator::new();
    let mut snapshot = neutral();
    snapshot.buttons = ButtonSet::SOUTH | ButtonSet::HOME;
    snapshot.left_trigger = 200;

    let report = emu.build_input(&snapshot);
    assert_eq!(report[2], 0x00);
    assert_eq!(report[3], 0x40);
    assert_eq!(report[4], 0x01);
    assert_eq!(report[18], 200);
    assert_eq!(report[24], 0xFF);
}

#[test]
fn dpad_down_right() {
    let mut emu = Ds3Emulator::new();
    let mut snapshot = neutral();
    snapshot.buttons = ButtonSet::DPAD_DOWN | ButtonSet::DPAD_RIGHT;

    let report = emu.build_input(&snapshot);
    assert_eq!(report[2], 0x60);
    assert_eq!(report[11], 0xFF);
    assert_eq!(report[12], 0xFF);
}

#[test]
fn battery_ladder() {
    let mut emu = Ds3Emulator::new();
    let mut snapshot = neutral();
    snapshot.battery_full = false;

    for (percent, expected) in [(3, 0x00), (10, 0x01), (20, 0x02), (50, 0x03), (70, 0x04), (90, 0x05)]
    {
        snapshot.battery_percent = percent;
        let report = emu.build_input(&snapshot);
        assert_eq!(report[30], expected, "battery {percent}%");
    }

    snapshot.battery_charging = true;
    let report = emu.build_input(&snapshot);
    assert_eq!(report[30], 0xEE);
}

#[test]
fn wireless_framing() {
    // Scenario: the wireless payload is the wired report behind a 0xA1
    // header, with big-endian motion words and a forced BT battery block.
    let mut emu = Ds3Emulator::new();
    let mut snapshot = neutral();
    snapshot.buttons = ButtonSet::SOUTH | ButtonSet::HOME;
    snapshot.left_trigger = 200;
    snapshot.accel = [8192, -4000, 123];
    snapshot.gyro = [0, 2048, 0];

    let wired = emu.build_input(&snapshot);
    let framed = emu.build_input_wireless(&snapshot);

    assert_eq!(framed.len(), 50);
    assert_eq!(framed[0], 0xA1);
    // Unframed body matches the wired report outside the forced bytes and
    // the motion block.
    for i in 0..49 {
        match i {
            29 | 31 | 40..=47 => continue,
            _ => assert_eq!(framed[1 + i], wired[i], "body byte {i}"),
        }
    }
    assert_eq!(framed[1 + 29], 0x03);
    assert_eq!(framed[1 + 31], 0x16);
    for pair in (40..48).step_by(2) {
        assert_eq!(framed[1 + pair], wired[pair + 1], "motion byte {pair}");
        assert_eq!(framed[1 + pair + 1], wired[pair], "motion byte {}", pair + 1);
    }
}

#[test]
fn motion_scaling_centers() {
    let mut emu = Ds3Emulator::new();
    let report = emu.build_input(&neutral());
    // At rest: accel words read 512, the gyro word reads 498.
    let accel_x = u16::from_le_bytes([report[40], report[41]]);
    let gyro = u16::from_le_bytes([report[46], report[47]]);
    assert_eq!(accel_x, 512);
    assert_eq!(gyro, 498);

    // One g on X lands above center, inside the 10-bit range.
    let mut snapshot = neutral();
    snapshot.accel[0] = 8192;
    let report = emu.build_input(&snapshot);
    let accel_x = u16::from_le_bytes([report[40], report[41]]);
    assert!(accel_x > 512 && accel_x < 1024, "got {accel_x}");

    // Saturation clamps instead of wrapping.
    snapshot.accel[0] = i16::MAX;
    snapshot.gyro[1] = i16::MIN;
    let report = emu.build_input(&snapshot);
    let accel_x = u16::from_le_bytes([report[40], report[41]]);
    let gyro = u16::from_le_bytes([report[46], report[47]]);
    assert!(accel_x <= 1023);
    assert!(gyro <= 1023);
}

/// Output report as a genuine console sends it: motor block up front,
/// LED bitmask at byte 10.
fn console_output_capture(weak_on: u8, strong: u8, leds: u8) -> [u8; 48] {
    let mut report = [0u8; 48];
    report[0] = 0x01;
    report[1] = 0x00;
    report[2] = 0xFF; // right motor duration
    report[3] = weak_on;
    report[4] = 0xFF; // left motor duration
    report[5] = strong;
    report[10] = leds;
    // LED config blocks present on real captures
    report[11] = 0xFF;
    report[12] = 0x27;
    report[13] = 0x10;
    report[15] = 0x32;
    report
}

#[test]
fn parse_output_decodes_motors_and_leds() {
    let mut emu = Ds3Emulator::new();

    let out = emu.parse_output(&console_output_capture(0x01, 0x80, 0x02)).unwrap();
    assert_eq!(out.rumble_right, 0xFF);
    assert_eq!(out.rumble_left, 0x80);
    assert_eq!(out.player_leds, 0x01); // LED bit 1 → player 1

    let out = emu.parse_output(&console_output_capture(0x00, 0x00, 0x08)).unwrap();
    assert_eq!(out.rumble_right, 0x00);
    assert_eq!(out.rumble_left, 0x00);
    assert_eq!(out.player_leds, 0x04); // LED bit 3 → player 3
}

#[test]
fn parse_output_is_total() {
    // Truncated frames never panic; frames shorter than the motor block
    // are rejected, anything longer decodes.
    let mut emu = Ds3Emulator::new();
    let capture = console_output_capture(0x01, 0x40, 0x04);
    for len in 0..capture.len() {
        let result = emu.parse_output(&capture[..len]);
        if len < 6 {
            assert!(result.is_none(), "len {len}");
        } else {
            let out = result.unwrap();
            assert_eq!(out.rumble_left, 0x40);
        }
    }
}

#[test]
fn rumble_state_drives_connection_byte() {
    let mut emu = Ds3Emulator::new();
    let _ = emu.parse_output(&console_output_capture(0x01, 0xFF, 0x02));
    let report = emu.build_input(&neutral());
    assert_eq!(report[31], 0x10);
    let framed = emu.build_input_wireless(&neutral());
    assert_eq!(framed[1 + 31], 0x14);

    let _ = emu.parse_output(&console_output_capture(0x00, 0x00, 0x02));
    let report = emu.build_input(&neutral());
    assert_eq!(report[31], 0x12);
}

#[test]
fn pairing_round_trip() {
    let mut emu = Ds3Emulator::new();
    let payload = [0x01, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66];

    let action = emu.handle_set_report(0xF5, &payload);
    assert_eq!(
        action,
        Some(SetReportAction::PairingCaptured(BdAddr([
            0x11, 0x22, 0x33, 0x44, 0x55, 0x66
        ])))
    );

    let (response, name) = emu.get_feature(0xF5).unwrap();
    assert_eq!(name, "paired host MAC");
    assert_eq!(&response[2..=7], &payload[2..8]);
}

#[test]
fn config_echo_round_trip() {
    let mut emu = Ds3Emulator::new();
    let payload = [0xAA, 0xBB, 0xCC, 0x01, 0x02];

    assert!(emu.handle_set_report(0xEF, &payload).is_none());
    let (response, _) = emu.get_feature(0xEF).unwrap();
    assert_eq!(response[0], 0xEF);
    assert_eq!(&response[1..1 + payload.len()], &payload);
}

#[test]
fn unknown_ids() {
    let mut emu = Ds3Emulator::new();
    // Unknown GET → absent; the transport answers with a handshake error.
    assert!(emu.get_feature(0x42).is_none());
    // Unknown SET → acknowledged without effect.
    assert!(emu.handle_set_report(0x42, &[0x00; 8]).is_none());
}

#[test]
fn cached_report_tracks_last_build() {
    let mut emu = Ds3Emulator::new();
    let mut snapshot = neutral();
    snapshot.buttons = ButtonSet::NORTH;

    let built = emu.build_input(&snapshot);
    assert_eq!(emu.cached_input_report(), built);
}

#[test]
fn enable_latches() {
    let mut emu = Ds3Emulator::new();
    assert!(!emu.console_enabled());
    let action = emu.handle_set_report(0xF4, &[0x42, 0x03, 0x00, 0x00]);
    assert_eq!(action, Some(SetReportAction::Enabled));
    assert!(emu.console_enabled());
    emu.reset_enabled();
    assert!(!emu.console_enabled());
}
