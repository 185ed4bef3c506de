//! Canned feature-report table answered during console enumeration.
//!
//! The six entries below were captured from a genuine DualShock 3. Two are
//! dynamic: 0xF2 and 0xF5 carry 6-byte MAC slots rewritten at runtime, and
//! 0xEF echoes back whatever the console last wrote to it.

use crate::state::BdAddr;

pub const REPORT_CAPABILITIES: u8 = 0x01;
pub const REPORT_OWN_MAC: u8 = 0xF2;
pub const REPORT_ENABLE: u8 = 0xF4;
pub const REPORT_PAIRING: u8 = 0xF5;
pub const REPORT_CALIBRATION: u8 = 0xF7;
pub const REPORT_STATUS: u8 = 0xF8;
pub const REPORT_CONFIG: u8 = 0xEF;

pub const FEATURE_REPORT_SIZE: usize = 64;

/// Offset of the bridge's own MAC inside the 0xF2 response.
const OWN_MAC_OFFSET: usize = 4;
/// Offset of the paired console's MAC inside the 0xF5 response. Matches the
/// MAC offset of the inbound 0xF5 SET_REPORT payload.
pub const HOST_MAC_OFFSET: usize = 2;

/// Payload of the 0xF4 "enable" SET_REPORT the bridge itself sends when
/// acting as the initiator on the wireless transport.
pub const ENABLE_PAYLOAD: [u8; 4] = [0x42, 0x03, 0x00, 0x00];

const CAPABILITIES: [u8; 64] = [
    0x01, 0x04, 0x00, 0x0B, 0x0C, 0x01, 0x02, 0x18, 0x18, 0x18, 0x18, 0x09, 0x0A, 0x10, 0x11,
    0x12, 0x13, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x02, 0x02, 0x02, 0x02, 0x00, 0x00, 0x00,
    0x04, 0x04, 0x04, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00,
];

const OWN_MAC: [u8; 64] = [
    0xF2, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x50, 0x81, 0xD8,
    0x01, 0x8A, 0x13, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00,
];

const PAIRING: [u8; 64] = [
    0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00,
];

const CALIBRATION: [u8; 64] = [
    0x01, 0x02, 0xFA, 0x01, 0xFE, 0x01, 0xFE, 0x01, 0x02, 0x02, 0xF6, 0x01, 0x00, 0x02, 0x00,
    0x02, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00,
];

const STATUS: [u8; 64] = [
    0x01, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00,
];

const CONFIG: [u8; 64] = [
    0xEF, 0x04, 0x00, 0x0B, 0x03, 0x01, 0xA0, 0x10, 0x01, 0x81, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00,
];

/// The six canned responses, keyed by report ID.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    capabilities: [u8; 64],
    own_mac: [u8; 64],
    pairing: [u8; 64],
    calibration: [u8; 64],
    status: [u8; 64],
    config: [u8; 64],
}

impl FeatureTable {
    pub fn new() -> Self {
        Self {
            capabilities: CAPABILITIES,
            own_mac: OWN_MAC,
            pairing: PAIRING,
            calibration: CALIBRATION,
            status: STATUS,
            config: CONFIG,
        }
    }

    /// Look up the canned response and a human-readable name for logging.
    pub fn get(&self, id: u8) -> Option<(&[u8; 64], &'static str)> {
        match id {
            REPORT_CAPABILITIES => Some((&self.capabilities, "capabilities")),
            REPORT_OWN_MAC => Some((&self.own_mac, "own wireless MAC")),
            REPORT_PAIRING => Some((&self.pairing, "paired host MAC")),
            REPORT_CALIBRATION => Some((&self.calibration, "calibration")),
            REPORT_STATUS => Some((&self.status, "status")),
            REPORT_CONFIG => Some((&self.config, "config echo")),
            _ => None,
        }
    }

    /// Install the bridge's own wireless MAC into the 0xF2 response.
    pub fn set_own_mac(&mut self, addr: BdAddr) {
        self.own_mac[OWN_MAC_OFFSET..OWN_MAC_OFFSET + 6].copy_from_slice(&addr.0);
    }

    /// Install the paired console's MAC into the 0xF5 response so future
    /// GET_REPORTs reflect the paired host.
    pub fn set_host_mac(&mut self, addr: BdAddr) {
        self.pairing[HOST_MAC_OFFSET..HOST_MAC_OFFSET + 6].copy_from_slice(&addr.0);
    }

    /// Store the console's 0xEF write so the next GET_REPORT echoes it.
    /// The echo region starts after the leading report-ID byte.
    pub fn store_config_echo(&mut self, payload: &[u8]) {
        let len = payload.len().min(FEATURE_REPORT_SIZE - 1);
        self.config = [0; 64];
        self.config[0] = REPORT_CONFIG;
        self.config[1..1 + len].copy_from_slice(&payload[..len]);
    }
}

impl Default for FeatureTable {
    fn default() -> Self {
        Self::new()
    }
}
