//! Wire layout of the DualShock 3 input report, as captured from genuine
//! hardware. Offsets and bit assignments are fixed by the console and must
//! not drift.
use packed_struct::prelude::*;

/// Report ID of the input report on both transports.
pub const INPUT_REPORT_ID: u8 = 0x01;
/// Total size of the input report in octets.
pub const INPUT_REPORT_SIZE: usize = 49;
/// HIDP DATA|input transaction header prepended on the wireless transport.
pub const BT_INPUT_HEADER: u8 = 0xA1;

/// Constant bytes at offsets 36–39, copied verbatim from real-hardware
/// captures. The console checks nothing here, but genuine pads always send
/// them.
pub const SIGNATURE: [u8; 4] = [0x33, 0x04, 0x77, 0x01];

/// Byte 29: cable state.
pub const PLUGGED: u8 = 0x02;
pub const UNPLUGGED: u8 = 0x03;

/// Byte 30: battery/charge values.
pub const BATTERY_CHARGING: u8 = 0xEE;
pub const BATTERY_FULL: u8 = 0xEF;

/// Byte 31: connection class.
pub const CONNECTION_USB: u8 = 0x12;
pub const CONNECTION_USB_RUMBLE: u8 = 0x10;
pub const CONNECTION_BT: u8 = 0x16;
pub const CONNECTION_BT_RUMBLE: u8 = 0x14;

/// Motion words are 10-bit unsigned, centered at these raw values.
pub const ACCEL_CENTER: i32 = 512;
pub const GYRO_CENTER: i32 = 498;

/// Divisors taking calibrated snapshot units (8192/g, 1024/deg-s) down to
/// the DS3's 10-bit ranges (~113 counts per g, ~1.6 counts per deg-s on
/// real hardware).
pub const ACCEL_DIVISOR: i32 = 73;
pub const GYRO_DIVISOR: i32 = 632;

#[derive(PackedStruct, Debug, Copy, Clone, PartialEq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "49")]
pub struct Ds3InputReport {
    // byte 0
    #[packed_field(bytes = "0")]
    pub report_id: u8, // Always 0x01
    #[packed_field(bytes = "1")]
    pub _reserved_1: u8,

    // byte 2
    #[packed_field(bits = "16")]
    pub dpad_left: bool,
    #[packed_field(bits = "17")]
    pub dpad_down: bool,
    #[packed_field(bits = "18")]
    pub dpad_right: bool,
    #[packed_field(bits = "19")]
    pub dpad_up: bool,
    #[packed_field(bits = "20")]
    pub start: bool,
    #[packed_field(bits = "21")]
    pub r3: bool,
    #[packed_field(bits = "22")]
    pub l3: bool,
    #[packed_field(bits = "23")]
    pub select: bool,

    // byte 3
    #[packed_field(bits = "24")]
    pub square: bool,
    #[packed_field(bits = "25")]
    pub cross: bool,
    #[packed_field(bits = "26")]
    pub circle: bool,
    #[packed_field(bits = "27")]
    pub triangle: bool,
    #[packed_field(bits = "28")]
    pub r1: bool,
    #[packed_field(bits = "29")]
    pub l1: bool,
    #[packed_field(bits = "30")]
    pub r2: bool,
    #[packed_field(bits = "31")]
    pub l2: bool,

    // byte 4: only bit 0 is used (PS button)
    #[packed_field(bits = "32..=38")]
    pub _home_pad: Integer<u8, packed_bits::Bits<7>>,
    #[packed_field(bits = "39")]
    pub ps: bool,

    #[packed_field(bytes = "5")]
    pub _reserved_5: u8,

    // bytes 6-9: stick axes, 0x80 centered
    #[packed_field(bytes = "6")]
    pub left_stick_x: u8,
    #[packed_field(bytes = "7")]
    pub left_stick_y: u8,
    #[packed_field(bytes = "8")]
    pub right_stick_x: u8,
    #[packed_field(bytes = "9")]
    pub right_stick_y: u8,

    // bytes 10-13: D-pad pressure, synthesised 0x00/0xFF
    #[packed_field(bytes = "10")]
    pub pressure_dpad_up: u8,
    #[packed_field(bytes = "11")]
    pub pressure_dpad_right: u8,
    #[packed_field(bytes = "12")]
    pub pressure_dpad_down: u8,
    #[packed_field(bytes = "13")]
    pub pressure_dpad_left: u8,

    #[packed_field(bytes = "14..=17")]
    pub _reserved_14: [u8; 4],

    // bytes 18-19: analog triggers
    #[packed_field(bytes = "18")]
    pub pressure_l2: u8,
    #[packed_field(bytes = "19")]
    pub pressure_r2: u8,

    // bytes 20-25: shoulder and face pressure, synthesised 0x00/0xFF
    #[packed_field(bytes = "20")]
    pub pressure_l1: u8,
    #[packed_field(bytes = "21")]
    pub pressure_r1: u8,
    #[packed_field(bytes = "22")]
    pub pressure_triangle: u8,
    #[packed_field(bytes = "23")]
    pub pressure_circle: u8,
    #[packed_field(bytes = "24")]
    pub pressure_cross: u8,
    #[packed_field(bytes = "25")]
    pub pressure_square: u8,

    #[packed_field(bytes = "26..=28")]
    pub _reserved_26: [u8; 3],

    // bytes 29-31: battery and connection block
    #[packed_field(bytes = "29")]
    pub plugged: u8,
    #[packed_field(bytes = "30")]
    pub battery: u8,
    #[packed_field(bytes = "31")]
    pub connection: u8,

    #[packed_field(bytes = "32..=35")]
    pub _reserved_32: [u8; 4],

    // bytes 36-39: hardware signature
    #[packed_field(bytes = "36..=39")]
    pub signature: [u8; 4],

    // bytes 40-47: motion, little-endian on the wire (wired transport)
    #[packed_field(bytes = "40..=41", endian = "lsb")]
    pub accel_x: Integer<u16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "42..=43", endian = "lsb")]
    pub accel_y: Integer<u16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "44..=45", endian = "lsb")]
    pub accel_z: Integer<u16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "46..=47", endian = "lsb")]
    pub gyro_z: Integer<u16, packed_bits::Bits<16>>,

    // byte 48
    #[packed_field(bytes = "48")]
    pub trailer: u8, // Always 0x02
}

impl Ds3InputReport {
    /// A neutral report: sticks centered, motion at rest, trailer set.
    pub fn new() -> Self {
        Self {
            report_id: INPUT_REPORT_ID,
            _reserved_1: 0,
            dpad_left: false,
            dpad_down: false,
            dpad_right: false,
            dpad_up: false,
            start: false,
            r3: false,
            l3: false,
            select: false,
            square: false,
            cross: false,
            circle: false,
            triangle: false,
            r1: false,
            l1: false,
            r2: false,
            l2: false,
            _home_pad: Integer::from_primitive(0),
            ps: false,
            _reserved_5: 0,
            left_stick_x: 0x80,
            left_stick_y: 0x80,
            right_stick_x: 0x80,
            right_stick_y: 0x80,
            pressure_dpad_up: 0,
            pressure_dpad_right: 0,
            pressure_dpad_down: 0,
            pressure_dpad_left: 0,
            _reserved_14: [0; 4],
            pressure_l2: 0,
            pressure_r2: 0,
            pressure_l1: 0,
            pressure_r1: 0,
            pressure_triangle: 0,
            pressure_circle: 0,
            pressure_cross: 0,
            pressure_square: 0,
            _reserved_26: [0; 3],
            plugged: PLUGGED,
            battery: BATTERY_FULL,
            connection: CONNECTION_USB,
            _reserved_32: [0; 4],
            signature: SIGNATURE,
            accel_x: Integer::from_primitive(ACCEL_CENTER as u16),
            accel_y: Integer::from_primitive(ACCEL_CENTER as u16),
            accel_z: Integer::from_primitive(ACCEL_CENTER as u16),
            gyro_z: Integer::from_primitive(GYRO_CENTER as u16),
            trailer: 0x02,
        }
    }
}

impl Default for Ds3InputReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Battery enum derivation for byte 30. Charging and full override the
/// percentage ladder.
pub fn battery_value(percent: u8, charging: bool, full: bool) -> u8 {
    if full {
        return BATTERY_FULL;
    }
    if charging {
        return BATTERY_CHARGING;
    }
    match percent {
        0..=4 => 0x00,
        5..=14 => 0x01,
        15..=34 => 0x02,
        35..=59 => 0x03,
        60..=84 => 0x04,
        _ => 0x05,
    }
}

/// Fit a calibrated accelerometer value into the 10-bit wire range.
pub fn scale_accel(value: i16) -> u16 {
    (ACCEL_CENTER + value as i32 / ACCEL_DIVISOR).clamp(0, 1023) as u16
}

/// Fit a calibrated gyroscope value into the 10-bit wire range.
pub fn scale_gyro(value: i16) -> u16 {
    (GYRO_CENTER + value as i32 / GYRO_DIVISOR).clamp(0, 1023) as u16
}
