//! DualShock 3 protocol emulator, independent of transport. Answers the
//! console's feature-report traffic, builds input reports from the shared
//! snapshot, and decodes inbound rumble/LED output reports.

pub mod feature;
pub mod hid_report;
pub mod hid_report_test;

use packed_struct::prelude::*;

use crate::state::{BdAddr, ButtonSet, InputSnapshot, OutputSnapshot};

use feature::{FeatureTable, REPORT_CONFIG, REPORT_ENABLE, REPORT_PAIRING};
use hid_report::{
    battery_value, scale_accel, scale_gyro, Ds3InputReport, BT_INPUT_HEADER, CONNECTION_BT,
    CONNECTION_BT_RUMBLE, CONNECTION_USB, CONNECTION_USB_RUMBLE, INPUT_REPORT_SIZE, PLUGGED,
    UNPLUGGED,
};

/// Size of the framed wireless input payload (header + report).
pub const BT_INPUT_REPORT_SIZE: usize = INPUT_REPORT_SIZE + 1;

/// Minimum length of a console output report we will decode.
const OUTPUT_REPORT_MIN: usize = 6;
/// Offset of the player-LED bitmask in the output report.
const OUTPUT_LED_OFFSET: usize = 10;

/// Side effects of a SET_REPORT that the owning transport must forward to
/// the session manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetReportAction {
    /// The console wrote its wireless MAC (0xF5): persist the pairing.
    PairingCaptured(BdAddr),
    /// The console activated the device (0xF4).
    Enabled,
}

/// The DS3 device state machine. One instance is shared (behind a mutex)
/// by the wired and wireless transports.
#[derive(Debug)]
pub struct Ds3Emulator {
    features: FeatureTable,
    report: Ds3InputReport,
    rumble_active: bool,
    enabled: bool,
}

impl Ds3Emulator {
    pub fn new() -> Self {
        Self {
            features: FeatureTable::new(),
            report: Ds3InputReport::new(),
            rumble_active: false,
            enabled: false,
        }
    }

    /// Install the bridge radio's address into the 0xF2 response. Done once
    /// at startup when the adapter address is known.
    pub fn set_own_mac(&mut self, addr: BdAddr) {
        self.features.set_own_mac(addr);
    }

    /// Restore a previously persisted console MAC into the 0xF5 response.
    pub fn set_host_mac(&mut self, addr: BdAddr) {
        self.features.set_host_mac(addr);
    }

    /// Canned feature-report lookup. `None` means the transport must answer
    /// with a HID "invalid report ID" handshake; the session continues.
    pub fn get_feature(&self, id: u8) -> Option<(&[u8; 64], &'static str)> {
        self.features.get(id)
    }

    /// The most recently built input report, for GET_REPORT requests with
    /// the input report type.
    pub fn cached_input_report(&self) -> [u8; INPUT_REPORT_SIZE] {
        self.report.pack().unwrap_or([0; INPUT_REPORT_SIZE])
    }

    /// Apply a SET_REPORT from the console. Unknown IDs are acknowledged
    /// without effect: the console is permitted to probe.
    pub fn handle_set_report(&mut self, id: u8, payload: &[u8]) -> Option<SetReportAction> {
        match id {
            REPORT_PAIRING => {
                if payload.len() < feature::HOST_MAC_OFFSET + 6 {
                    log::warn!("Short 0xF5 pairing payload ({} bytes)", payload.len());
                    return None;
                }
                let mut mac = [0u8; 6];
                mac.copy_from_slice(
                    &payload[feature::HOST_MAC_OFFSET..feature::HOST_MAC_OFFSET + 6],
                );
                let addr = BdAddr(mac);
                self.features.set_host_mac(addr);
                log::info!("Console pairing MAC captured: {addr}");
                Some(SetReportAction::PairingCaptured(addr))
            }
            REPORT_CONFIG => {
                self.features.store_config_echo(payload);
                None
            }
            REPORT_ENABLE => {
                log::debug!("Console sent enable (0xF4)");
                self.enabled = true;
                Some(SetReportAction::Enabled)
            }
            _ => {
                log::debug!("Ignoring SET_REPORT for unknown id {id:#04x}");
                None
            }
        }
    }

    /// Whether the console has activated the device with 0xF4 since the
    /// last transport reset.
    pub fn console_enabled(&self) -> bool {
        self.enabled
    }

    pub fn reset_enabled(&mut self) {
        self.enabled = false;
    }

    /// Zero the rumble-active latch, e.g. when the wired link drops.
    pub fn clear_rumble(&mut self) {
        self.rumble_active = false;
    }

    /// Build the 49-octet wired input report from a snapshot. The built
    /// report is also cached for transports that resend the last frame.
    pub fn build_input(&mut self, snapshot: &InputSnapshot) -> [u8; INPUT_REPORT_SIZE] {
        let buttons = snapshot.buttons;
        let mut report = Ds3InputReport::new();

        report.select = buttons.contains(ButtonSet::SELECT);
        report.l3 = buttons.contains(ButtonSet::L3);
        report.r3 = buttons.contains(ButtonSet::R3);
        report.start = buttons.contains(ButtonSet::START);
        report.dpad_up = buttons.contains(ButtonSet::DPAD_UP);
        report.dpad_right = buttons.contains(ButtonSet::DPAD_RIGHT);
        report.dpad_down = buttons.contains(ButtonSet::DPAD_DOWN);
        report.dpad_left = buttons.contains(ButtonSet::DPAD_LEFT);

        report.l2 = buttons.contains(ButtonSet::L2);
        report.r2 = buttons.contains(ButtonSet::R2);
        report.l1 = buttons.contains(ButtonSet::L1);
        report.r1 = buttons.contains(ButtonSet::R1);
        report.triangle = buttons.contains(ButtonSet::NORTH);
        report.circle = buttons.contains(ButtonSet::EAST);
        report.cross = buttons.contains(ButtonSet::SOUTH);
        report.square = buttons.contains(ButtonSet::WEST);
        report.ps = buttons.contains(ButtonSet::HOME);

        report.left_stick_x = snapshot.left_stick_x;
        report.left_stick_y = snapshot.left_stick_y;
        report.right_stick_x = snapshot.right_stick_x;
        report.right_stick_y = snapshot.right_stick_y;

        report.pressure_dpad_up = pressure(report.dpad_up);
        report.pressure_dpad_right = pressure(report.dpad_right);
        report.pressure_dpad_down = pressure(report.dpad_down);
        report.pressure_dpad_left = pressure(report.dpad_left);

        report.pressure_l2 = snapshot.left_trigger;
        report.pressure_r2 = snapshot.right_trigger;
        report.pressure_l1 = pressure(report.l1);
        report.pressure_r1 = pressure(report.r1);
        report.pressure_triangle = pressure(report.triangle);
        report.pressure_circle = pressure(report.circle);
        report.pressure_cross = pressure(report.cross);
        report.pressure_square = pressure(report.square);

        report.plugged = PLUGGED;
        report.battery = battery_value(
            snapshot.battery_percent,
            snapshot.battery_charging,
            snapshot.battery_full,
        );
        report.connection = if self.rumble_active {
            CONNECTION_USB_RUMBLE
        } else {
            CONNECTION_USB
        };

        report.accel_x = Integer::from_primitive(scale_accel(snapshot.accel[0]));
        report.accel_y = Integer::from_primitive(scale_accel(snapshot.accel[1]));
        report.accel_z = Integer::from_primitive(scale_accel(snapshot.accel[2]));
        // The DS3 carries a single gyro axis: yaw.
        report.gyro_z = Integer::from_primitive(scale_gyro(snapshot.gyro[1]));

        self.report = report;
        // Only size mismatches can fail a pack, and the layout is fixed.
        report.pack().unwrap_or([0; INPUT_REPORT_SIZE])
    }

    /// Build the wireless framing of the same report: HIDP DATA|input header,
    /// big-endian motion words, battery block forced to unplugged/BT.
    pub fn build_input_wireless(&mut self, snapshot: &InputSnapshot) -> [u8; BT_INPUT_REPORT_SIZE] {
        let wired = self.build_input(snapshot);
        let mut framed = [0u8; BT_INPUT_REPORT_SIZE];
        framed[0] = BT_INPUT_HEADER;
        framed[1..].copy_from_slice(&wired);

        framed[1 + 29] = UNPLUGGED;
        framed[1 + 31] = if self.rumble_active {
            CONNECTION_BT_RUMBLE
        } else {
            CONNECTION_BT
        };

        // Motion words go out big-endian on this transport.
        for pair in (1 + 40..1 + 48).step_by(2) {
            framed.swap(pair, pair + 1);
        }
        framed
    }

    /// Decode a console output report (rumble + player LEDs). Returns `None`
    /// for frames too short to carry the motor block.
    pub fn parse_output(&mut self, data: &[u8]) -> Option<OutputSnapshot> {
        if data.len() < OUTPUT_REPORT_MIN {
            log::debug!("Output report too short: {} bytes", data.len());
            return None;
        }

        let rumble_right = if data[3] != 0 { 0xFF } else { 0x00 };
        let rumble_left = data[5];
        let player_leds = if data.len() > OUTPUT_LED_OFFSET {
            (data[OUTPUT_LED_OFFSET] >> 1) & 0x0F
        } else {
            0
        };

        self.rumble_active = rumble_left > 0 || rumble_right > 0;

        Some(OutputSnapshot {
            rumble_left,
            rumble_right,
            player_leds,
            ..OutputSnapshot::default()
        })
    }
}

impl Default for Ds3Emulator {
    fn default() -> Self {
        Self::new()
    }
}

fn pressure(pressed: bool) -> u8 {
    if pressed {
        0xFF
    } else {
        0x00
    }
}
