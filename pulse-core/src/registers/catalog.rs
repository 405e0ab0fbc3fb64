//! Register catalog for the T-series extended DIO features.
//!
//! Registers are addressed by name in plans and logs, and by Modbus address
//! and data type on the wire. Both views are derived from the same
//! [`Register`] value so they cannot drift apart.

use core::fmt::{self, Write as _};

use heapless::String;

/// Highest DIO line number present on the T7 (EIO/CIO/MIO included).
pub const MAX_DIO: u8 = 22;

/// DIO lines that can run the PWM and pulse-out features.
pub const PULSE_OUTPUT_CHANNELS: [u8; 5] = [0, 2, 3, 4, 5];

/// DIO lines wired to the hardware high-speed counters.
pub const HIGH_SPEED_COUNTER_CHANNELS: [u8; 4] = [16, 17, 18, 19];

/// Longest register name produced by [`Register::name`].
pub const MAX_REGISTER_NAME: usize = 32;

/// Owned register name, e.g. `DIO0_EF_CONFIG_A`.
pub type RegisterName = String<MAX_REGISTER_NAME>;

/// A single digital I/O line (`DIO#`).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DioChannel(u8);

impl DioChannel {
    #[must_use]
    pub const fn new(number: u8) -> Self {
        Self(number)
    }

    #[must_use]
    pub const fn number(self) -> u8 {
        self.0
    }

    /// Returns `true` when the line exists on the device.
    #[must_use]
    pub const fn exists(self) -> bool {
        self.0 <= MAX_DIO
    }

    /// Returns `true` when the line can emit PWM or pulse-out waveforms.
    #[must_use]
    pub fn supports_pulse_output(self) -> bool {
        PULSE_OUTPUT_CHANNELS.contains(&self.0)
    }

    /// Returns `true` when the line is routed to a high-speed counter.
    #[must_use]
    pub fn supports_high_speed_counter(self) -> bool {
        HIGH_SPEED_COUNTER_CHANNELS.contains(&self.0)
    }
}

impl fmt::Display for DioChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DIO{}", self.0)
    }
}

/// One of the shared DIO_EF clock sources (`DIO_EF_CLOCK#`).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct ClockSource(u8);

impl ClockSource {
    /// Number of clock sources the device exposes.
    pub const COUNT: u8 = 3;

    #[must_use]
    pub const fn new(index: u8) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn exists(self) -> bool {
        self.0 < Self::COUNT
    }
}

/// Feature selected through `DIO#_EF_INDEX`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FeatureIndex {
    /// Free-running PWM output.
    PwmOut,
    /// PWM output that stops after config C pulses.
    PulseOut,
    /// Hardware high-speed edge counter.
    HighSpeedCounter,
}

impl FeatureIndex {
    #[must_use]
    pub const fn value(self) -> u32 {
        match self {
            FeatureIndex::PwmOut => 0,
            FeatureIndex::PulseOut => 2,
            FeatureIndex::HighSpeedCounter => 7,
        }
    }
}

/// Wire representation of a register value.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DataType {
    Uint16,
    Uint32,
    Float32,
}

impl DataType {
    /// Number of 16-bit Modbus registers the value spans.
    #[must_use]
    pub const fn register_count(self) -> u16 {
        match self {
            DataType::Uint16 => 1,
            DataType::Uint32 | DataType::Float32 => 2,
        }
    }
}

/// Named device register touched by the pulse engine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Register {
    ClockEnable(ClockSource),
    ClockDivisor(ClockSource),
    ClockRollValue(ClockSource),
    FeatureEnable(DioChannel),
    FeatureSelect(DioChannel),
    ConfigA(DioChannel),
    ConfigB(DioChannel),
    ConfigC(DioChannel),
    ReadA(DioChannel),
    /// Plain digital output state of the line.
    DigitalState(DioChannel),
}

impl Register {
    /// Modbus start address of the register.
    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn address(self) -> u16 {
        match self {
            Register::ClockEnable(clock) => 44_900 + 10 * clock.0 as u16,
            Register::ClockDivisor(clock) => 44_901 + 10 * clock.0 as u16,
            Register::ClockRollValue(clock) => 44_904 + 10 * clock.0 as u16,
            Register::FeatureEnable(dio) => 44_000 + 2 * dio.0 as u16,
            Register::FeatureSelect(dio) => 44_100 + 2 * dio.0 as u16,
            Register::ConfigA(dio) => 44_300 + 2 * dio.0 as u16,
            Register::ConfigB(dio) => 44_400 + 2 * dio.0 as u16,
            Register::ConfigC(dio) => 44_500 + 2 * dio.0 as u16,
            Register::ReadA(dio) => 3_000 + 2 * dio.0 as u16,
            Register::DigitalState(dio) => 2_000 + dio.0 as u16,
        }
    }

    #[must_use]
    pub const fn data_type(self) -> DataType {
        match self {
            Register::ClockEnable(_) | Register::ClockDivisor(_) | Register::DigitalState(_) => {
                DataType::Uint16
            }
            _ => DataType::Uint32,
        }
    }

    /// LJM register name.
    #[must_use]
    pub fn name(self) -> RegisterName {
        let mut name = RegisterName::new();
        // Every name fits in MAX_REGISTER_NAME; a failed write only truncates.
        let _ = write!(name, "{self}");
        name
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::ClockEnable(clock) => write!(f, "DIO_EF_CLOCK{}_ENABLE", clock.0),
            Register::ClockDivisor(clock) => write!(f, "DIO_EF_CLOCK{}_DIVISOR", clock.0),
            Register::ClockRollValue(clock) => write!(f, "DIO_EF_CLOCK{}_ROLL_VALUE", clock.0),
            Register::FeatureEnable(dio) => write!(f, "{dio}_EF_ENABLE"),
            Register::FeatureSelect(dio) => write!(f, "{dio}_EF_INDEX"),
            Register::ConfigA(dio) => write!(f, "{dio}_EF_CONFIG_A"),
            Register::ConfigB(dio) => write!(f, "{dio}_EF_CONFIG_B"),
            Register::ConfigC(dio) => write!(f, "{dio}_EF_CONFIG_C"),
            Register::ReadA(dio) => write!(f, "{dio}_EF_READ_A"),
            Register::DigitalState(dio) => write!(f, "{dio}"),
        }
    }
}
