//! Report translation and calibration tests for the DualSense driver.

#![cfg(test)]

use packed_struct::prelude::*;

use super::driver::{
    decode_calibration, player_led_pattern, MotionCalibration, ReportTranslator,
    FEATURE_REPORT_CALIBRATION_SIZE,
};
use super::hid_report::{Direction, InputState, SimpleInputState, TouchFingerData};
use crate::config::Config;
use crate::drivers::crc32;
use crate::state::ButtonSet;

/// Build a state block the way the pad sends it: a 63-byte body with the
/// given button bytes and stick positions.
fn state_body() -> [u8; 63] {
    let mut body = [0u8; 63];
    body[0] = 0x80; // left stick centered
    body[1] = 0x80;
    body[2] = 0x80;
    body[3] = 0x80;
    body[7] = 0x08; // hat released
    body
}

#[test]
fn unpack_buttons() {
    let mut body = state_body();
    body[7] = 0x20 | 0x02; // cross + hat east
    body[8] = 0x01 | 0x20; // l1 + options
    body[9] = 0x01 | 0x04; // ps + mute

    let state = InputState::unpack(&body).unwrap();
    assert!(state.cross);
    assert!(!state.triangle);
    assert_eq!(state.dpad, Direction::East);
    assert!(state.l1);
    assert!(state.options);
    assert!(!state.create);
    assert!(state.ps);
    assert!(state.mute);
    assert!(!state.touchpad);
}

#[test]
fn unpack_sticks_triggers_motion() {
    let mut body = state_body();
    body[0] = 0x20;
    body[3] = 0xE0;
    body[4] = 200; // l2 analog
    // gyro_x = -100, accel_z = 8192
    body[15..17].copy_from_slice(&(-100i16).to_le_bytes());
    body[25..27].copy_from_slice(&8192i16.to_le_bytes());

    let state = InputState::unpack(&body).unwrap();
    assert_eq!(state.joystick_l_x, 0x20);
    assert_eq!(state.joystick_r_y, 0xE0);
    assert_eq!(state.l2_trigger, 200);
    assert_eq!(state.gyro_x.to_primitive(), -100);
    assert_eq!(state.accel_z.to_primitive(), 8192);
}

#[test]
fn touch_finger_coordinates() {
    // X = 1919 (0x77F), Y = 1079 (0x437), active contact id 1
    let raw = [0x01, 0x7F, (0x07 << 4) | 0x07, 0x43];
    let finger = TouchFingerData::unpack(&raw).unwrap();
    assert!(finger.active());
    assert_eq!(finger.x(), 1919);
    assert_eq!(finger.y(), 1079);

    let raw = [0x81, 0x00, 0x00, 0x00];
    let finger = TouchFingerData::unpack(&raw).unwrap();
    assert!(!finger.active());
}

#[test]
fn battery_decode() {
    let mut body = state_body();
    // Low nibble capacity, high nibble state: 70% discharging.
    body[52] = 0x07;
    let state = InputState::unpack(&body).unwrap();
    assert_eq!(state.battery(), (70, false, false));

    body[52] = 0x15; // charging at 50%
    let state = InputState::unpack(&body).unwrap();
    assert_eq!(state.battery(), (50, true, false));

    body[52] = 0x2A; // charge complete
    let state = InputState::unpack(&body).unwrap();
    assert_eq!(state.battery(), (100, false, true));
}

#[test]
fn unpack_simple_form() {
    let mut body = [0u8; 9];
    body[0] = 0x80;
    body[1] = 0x80;
    body[2] = 0x80;
    body[3] = 0x80;
    body[4] = 0x20 | 0x08; // cross + hat released
    body[5] = 0x10; // create
    body[6] = 0x01; // ps
    body[8] = 0xFF; // r2 analog

    let state = SimpleInputState::unpack(&body).unwrap();
    assert!(state.cross);
    assert_eq!(state.dpad, Direction::None);
    assert!(state.create);
    assert!(state.ps);
    assert_eq!(state.r2_trigger, 0xFF);
}

fn calibration_report() -> [u8; FEATURE_REPORT_CALIBRATION_SIZE] {
    let mut buf = [0u8; FEATURE_REPORT_CALIBRATION_SIZE];
    buf[0] = 0x05;
    let mut put = |offset: usize, value: i16| {
        buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    };
    // Gyro biases
    put(1, 10);
    put(3, -20);
    put(5, 0);
    // Gyro plus/minus per axis
    put(7, 1000);
    put(9, -980);
    put(11, 990);
    put(13, -1010);
    put(15, 1005);
    put(17, -995);
    // Gyro speed
    put(19, 540);
    put(21, 540);
    // Accel plus/minus per axis
    put(23, 8300);
    put(25, -8100);
    put(27, 8200);
    put(29, -8200);
    put(31, 8250);
    put(33, -8150);
    buf
}

#[test]
fn calibration_decode_matches_kernel_rules() {
    let calibration = decode_calibration(&calibration_report());

    // Gyro pitch: denom spans both swing extremes around the bias.
    assert_eq!(calibration[0].bias, 10);
    assert_eq!(calibration[0].denom, 990 + 990);
    assert_eq!(calibration[0].numer, 1080 * 1024);

    // Accel x: bias sits mid-range, sensitivity covers 2 g.
    assert_eq!(calibration[3].bias, 100);
    assert_eq!(calibration[3].denom, 16400);
    assert_eq!(calibration[3].numer, 2 * 8192);

    // A one-g raw reading calibrates to ~8192 units.
    let one_g = calibration[3].apply(8300);
    assert!((one_g - 8192).abs() <= 8, "got {one_g}");

    // A full-scale gyro swing calibrates to speed_2x * res / 2 per side.
    let swing = calibration[0].apply(1000);
    assert!(swing > 0);
}

#[test]
fn calibration_zero_range_falls_back_to_identity() {
    let buf = [0u8; FEATURE_REPORT_CALIBRATION_SIZE];
    let calibration = decode_calibration(&buf);
    for axis in calibration {
        assert_eq!(axis.bias, 0);
        assert_eq!(axis.numer, 1);
        assert_eq!(axis.denom, 1);
        assert_eq!(axis.apply(1234), 1234);
    }
}

#[test]
fn identity_calibration_is_transparent() {
    let identity = MotionCalibration::identity();
    assert_eq!(identity.apply(i16::MAX), i16::MAX);
    assert_eq!(identity.apply(i16::MIN), i16::MIN);
    assert_eq!(identity.apply(0), 0);
}

fn translator(touch_stick: bool) -> ReportTranslator {
    let config = Config {
        touchpad_as_right_stick: touch_stick,
        ..Config::default()
    };
    ReportTranslator::new([MotionCalibration::identity(); 6], &config)
}

#[test]
fn translate_usb_report() {
    let mut data = [0u8; 64];
    data[0] = 0x01;
    data[1..64].copy_from_slice(&state_body());
    data[1 + 7] = 0x20 | 0x08; // cross, hat released
    data[1 + 9] = 0x01; // ps
    data[1 + 4] = 0xC8; // l2 analog

    let snapshot = translator(false).translate(&data).unwrap();
    assert!(snapshot.buttons.contains(ButtonSet::SOUTH));
    assert!(snapshot.buttons.contains(ButtonSet::HOME));
    assert_eq!(snapshot.left_trigger, 0xC8);
    assert_eq!(snapshot.left_stick_x, 0x80);
    assert!(snapshot.timestamp_ms > 0);
}

#[test]
fn translate_bt_report_checks_crc() {
    let mut data = [0u8; 78];
    data[0] = 0x31;
    data[1] = 0x01;
    data[2..65].copy_from_slice(&state_body());
    assert!(translator(false).translate(&data).is_err());

    crc32::stamp(crc32::SEED_INPUT, &mut data);
    let snapshot = translator(false).translate(&data).unwrap();
    assert_eq!(snapshot.buttons, ButtonSet::empty());
}

#[test]
fn translate_simple_bt_form() {
    let mut data = [0u8; 10];
    data[0] = 0x01;
    data[1] = 0x80;
    data[2] = 0x80;
    data[3] = 0x80;
    data[4] = 0x80;
    data[5] = 0x88; // triangle + hat released
    let snapshot = translator(false).translate(&data).unwrap();
    assert!(snapshot.buttons.contains(ButtonSet::NORTH));
    // Short form carries no motion or touch.
    assert_eq!(snapshot.accel, [0; 3]);
}

#[test]
fn touch_stick_overrides_right_stick() {
    let translator = translator(true);

    let mut data = [0u8; 64];
    data[0] = 0x01;
    data[1..64].copy_from_slice(&state_body());
    // Contact at (960, 540)
    data[1 + 32] = 0x01;
    data[1 + 33] = (960u16 & 0xFF) as u8;
    data[1 + 34] = ((960u16 >> 8) as u8) | (((540u16 & 0x0F) as u8) << 4);
    data[1 + 35] = (540u16 >> 4) as u8;

    let snapshot = translator.translate(&data).unwrap();
    assert_eq!(snapshot.right_stick_x, 0x80); // origin frame is neutral

    // Drag 200 px right: half deflection at the default sensitivity.
    let x = 1160u16;
    data[1 + 33] = (x & 0xFF) as u8;
    data[1 + 34] = ((x >> 8) as u8) | (((540u16 & 0x0F) as u8) << 4);
    let snapshot = translator.translate(&data).unwrap();
    assert!(snapshot.right_stick_x > 0xB0, "got {}", snapshot.right_stick_x);
    assert_eq!(snapshot.right_stick_y, 0x80);
}

#[test]
fn player_led_patterns_center_out() {
    assert_eq!(player_led_pattern(0x00), 0x00);
    assert_eq!(player_led_pattern(0x01), 0x04 | 0x20);
    assert_eq!(player_led_pattern(0x02), 0x0A | 0x20);
    assert_eq!(player_led_pattern(0x04), 0x15 | 0x20);
    assert_eq!(player_led_pattern(0x08), 0x1B | 0x20);
    // Multiple bits: the highest player wins.
    assert_eq!(player_led_pattern(0x09), 0x1B | 0x20);
}
