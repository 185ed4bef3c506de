//! DualSense input report structures.
//!
//! Both transports carry the same 63-byte state block: behind the 0x01
//! report ID on USB, behind the 0x31 report ID plus one sequence byte on
//! Bluetooth (with a CRC-32 trailer). Until an output report switches a
//! Bluetooth pad into extended mode it sends the short 0x01 form instead.
use packed_struct::prelude::*;

pub const INPUT_REPORT_USB: u8 = 0x01;
pub const INPUT_REPORT_USB_SIZE: usize = 64;
pub const INPUT_REPORT_BT: u8 = 0x31;
pub const INPUT_REPORT_BT_SIZE: usize = 78;
pub const INPUT_REPORT_BT_SIMPLE_SIZE: usize = 10;
pub const OUTPUT_REPORT_USB: u8 = 0x02;
pub const OUTPUT_REPORT_USB_SIZE: usize = 48;
pub const OUTPUT_REPORT_BT: u8 = 0x31;
pub const OUTPUT_REPORT_BT_SIZE: usize = 78;

#[derive(PrimitiveEnum_u8, Clone, Copy, PartialEq, Debug)]
pub enum Direction {
    North = 0,
    NorthEast = 1,
    East = 2,
    SouthEast = 3,
    South = 4,
    SouthWest = 5,
    West = 6,
    NorthWest = 7,
    None = 8,
}

#[derive(PrimitiveEnum_u8, Clone, Copy, PartialEq, Debug)]
pub enum PowerState {
    Discharging = 0x00,
    Charging = 0x01,
    Complete = 0x02,
    AbnormalVoltage = 0x0A,
    AbnormalTemperature = 0x0B,
    ChargingError = 0x0F,
}

#[derive(PackedStruct, Debug, Copy, Clone, PartialEq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "4")]
pub struct TouchFingerData {
    // bit 7 set means no contact; low bits carry the finger id
    #[packed_field(bytes = "0")]
    pub context: u8,
    #[packed_field(bytes = "1")]
    pub x_lo: u8,
    #[packed_field(bits = "16..=19")]
    pub y_lo: Integer<u8, packed_bits::Bits<4>>,
    #[packed_field(bits = "20..=23")]
    pub x_hi: Integer<u8, packed_bits::Bits<4>>,
    #[packed_field(bytes = "3")]
    pub y_hi: u8,
}

impl TouchFingerData {
    pub fn active(&self) -> bool {
        self.context & 0x80 == 0
    }

    pub fn x(&self) -> u16 {
        self.x_lo as u16 | ((self.x_hi.to_primitive() as u16) << 8)
    }

    pub fn y(&self) -> u16 {
        self.y_lo.to_primitive() as u16 | ((self.y_hi as u16) << 4)
    }
}

/// The transport-independent state block (report headers stripped).
#[derive(PackedStruct, Debug, Copy, Clone, PartialEq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "63")]
pub struct InputState {
    // bytes 0-5
    #[packed_field(bytes = "0")]
    pub joystick_l_x: u8,
    #[packed_field(bytes = "1")]
    pub joystick_l_y: u8,
    #[packed_field(bytes = "2")]
    pub joystick_r_x: u8,
    #[packed_field(bytes = "3")]
    pub joystick_r_y: u8,
    #[packed_field(bytes = "4")]
    pub l2_trigger: u8,
    #[packed_field(bytes = "5")]
    pub r2_trigger: u8,

    #[packed_field(bytes = "6")]
    pub seq_number: u8,

    // byte 7
    #[packed_field(bits = "56")]
    pub triangle: bool,
    #[packed_field(bits = "57")]
    pub circle: bool,
    #[packed_field(bits = "58")]
    pub cross: bool,
    #[packed_field(bits = "59")]
    pub square: bool,
    #[packed_field(bits = "60..=63", ty = "enum")]
    pub dpad: Direction,

    // byte 8
    #[packed_field(bits = "64")]
    pub r3: bool,
    #[packed_field(bits = "65")]
    pub l3: bool,
    #[packed_field(bits = "66")]
    pub options: bool,
    #[packed_field(bits = "67")]
    pub create: bool,
    #[packed_field(bits = "68")]
    pub r2: bool,
    #[packed_field(bits = "69")]
    pub l2: bool,
    #[packed_field(bits = "70")]
    pub r1: bool,
    #[packed_field(bits = "71")]
    pub l1: bool,

    // byte 9
    #[packed_field(bits = "72..=76")]
    pub _unkn_btn: Integer<u8, packed_bits::Bits<5>>,
    #[packed_field(bits = "77")]
    pub mute: bool,
    #[packed_field(bits = "78")]
    pub touchpad: bool,
    #[packed_field(bits = "79")]
    pub ps: bool,

    #[packed_field(bytes = "10..=14")]
    pub _reserved_10: [u8; 5],

    // bytes 15-26: raw motion, device units
    #[packed_field(bytes = "15..=16", endian = "lsb")]
    pub gyro_x: Integer<i16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "17..=18", endian = "lsb")]
    pub gyro_y: Integer<i16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "19..=20", endian = "lsb")]
    pub gyro_z: Integer<i16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "21..=22", endian = "lsb")]
    pub accel_x: Integer<i16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "23..=24", endian = "lsb")]
    pub accel_y: Integer<i16, packed_bits::Bits<16>>,
    #[packed_field(bytes = "25..=26", endian = "lsb")]
    pub accel_z: Integer<i16, packed_bits::Bits<16>>,

    #[packed_field(bytes = "27..=30", endian = "lsb")]
    pub sensor_timestamp: Integer<u32, packed_bits::Bits<32>>,
    #[packed_field(bytes = "31")]
    pub temperature: u8,

    // bytes 32-40: two touch contacts plus their timestamp
    #[packed_field(bytes = "32..=39", element_size_bytes = "4")]
    pub touch: [TouchFingerData; 2],
    #[packed_field(bytes = "40")]
    pub touch_timestamp: u8,

    #[packed_field(bytes = "41..=51")]
    pub _reserved_41: [u8; 11],

    // byte 52
    #[packed_field(bits = "416..=419", ty = "enum")]
    pub power_state: PowerState,
    #[packed_field(bits = "420..=423")]
    pub power_percent: Integer<u8, packed_bits::Bits<4>>,

    // byte 53
    #[packed_field(bits = "424..=426")]
    pub _plugged_unkn: Integer<u8, packed_bits::Bits<3>>,
    #[packed_field(bits = "427")]
    pub plugged_usb_power: bool,
    #[packed_field(bits = "428")]
    pub plugged_usb_data: bool,
    #[packed_field(bits = "429")]
    pub mic_muted: bool,
    #[packed_field(bits = "430")]
    pub plugged_mic: bool,
    #[packed_field(bits = "431")]
    pub plugged_headphones: bool,

    #[packed_field(bytes = "54..=62")]
    pub _reserved_54: [u8; 9],
}

impl InputState {
    /// Battery charge as (percent, charging, full).
    pub fn battery(&self) -> (u8, bool, bool) {
        let percent = (self.power_percent.to_primitive().min(10) as u16 * 10) as u8;
        match self.power_state {
            PowerState::Charging => (percent, true, false),
            PowerState::Complete => (100, false, true),
            _ => (percent, false, false),
        }
    }
}

/// The short report a Bluetooth pad sends before extended mode is enabled:
/// sticks, digital buttons and triggers only.
#[derive(PackedStruct, Debug, Copy, Clone, PartialEq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "9")]
pub struct SimpleInputState {
    #[packed_field(bytes = "0")]
    pub joystick_l_x: u8,
    #[packed_field(bytes = "1")]
    pub joystick_l_y: u8,
    #[packed_field(bytes = "2")]
    pub joystick_r_x: u8,
    #[packed_field(bytes = "3")]
    pub joystick_r_y: u8,

    // byte 4
    #[packed_field(bits = "32")]
    pub triangle: bool,
    #[packed_field(bits = "33")]
    pub circle: bool,
    #[packed_field(bits = "34")]
    pub cross: bool,
    #[packed_field(bits = "35")]
    pub square: bool,
    #[packed_field(bits = "36..=39", ty = "enum")]
    pub dpad: Direction,

    // byte 5
    #[packed_field(bits = "40")]
    pub l1: bool,
    #[packed_field(bits = "41")]
    pub r1: bool,
    #[packed_field(bits = "42")]
    pub l2: bool,
    #[packed_field(bits = "43")]
    pub r2: bool,
    #[packed_field(bits = "44")]
    pub create: bool,
    #[packed_field(bits = "45")]
    pub options: bool,
    #[packed_field(bits = "46")]
    pub l3: bool,
    #[packed_field(bits = "47")]
    pub r3: bool,

    // byte 6
    #[packed_field(bits = "48")]
    pub ps: bool,
    #[packed_field(bits = "49")]
    pub touchpad: bool,
    #[packed_field(bits = "50..=55")]
    pub counter: Integer<u8, packed_bits::Bits<6>>,

    #[packed_field(bytes = "7")]
    pub l2_trigger: u8,
    #[packed_field(bytes = "8")]
    pub r2_trigger: u8,
}
