//! Device sessions the run controller talks to.

pub mod modbus;
pub mod simulated;

use pulse_core::controller::DeviceSession;
use pulse_core::registers::{DataType, Register, RegisterWrite};

use crate::error::CommError;

pub use modbus::ModbusSession;
pub use simulated::SimulatedSession;

/// Splits `value` into the big-endian 16-bit words the T7 expects.
///
/// `Float32` values are passed through as their IEEE-754 bit pattern.
///
/// # Errors
///
/// Returns [`CommError::Protocol`] when a `Uint16` value does not fit.
pub fn value_words(data_type: DataType, value: u32) -> Result<heapless::Vec<u16, 2>, CommError> {
    let mut words = heapless::Vec::new();
    match data_type {
        DataType::Uint16 => {
            let word =
                u16::try_from(value).map_err(|_| CommError::Protocol("value exceeds UINT16"))?;
            let _ = words.push(word);
        }
        DataType::Uint32 | DataType::Float32 => {
            let [a, b, c, d] = value.to_be_bytes();
            let _ = words.push(u16::from_be_bytes([a, b]));
            let _ = words.push(u16::from_be_bytes([c, d]));
        }
    }
    Ok(words)
}

/// Joins big-endian 16-bit words back into one value.
#[must_use]
pub fn words_value(words: &[u16]) -> u32 {
    words
        .iter()
        .fold(0_u32, |value, word| (value << 16) | u32::from(*word))
}

/// Session selected at startup.
pub enum Device {
    Modbus(ModbusSession),
    Simulated(SimulatedSession),
}

impl Device {
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Device::Modbus(session) => format!("modbus tcp {}", session.peer()),
            Device::Simulated(_) => "simulated device".into(),
        }
    }
}

impl DeviceSession for Device {
    type Error = CommError;

    fn write_registers(&mut self, writes: &[RegisterWrite]) -> Result<(), Self::Error> {
        match self {
            Device::Modbus(session) => session.write_registers(writes),
            Device::Simulated(session) => session.write_registers(writes),
        }
    }

    fn write_address(
        &mut self,
        address: u16,
        data_type: DataType,
        value: u32,
    ) -> Result<(), Self::Error> {
        match self {
            Device::Modbus(session) => session.write_address(address, data_type, value),
            Device::Simulated(session) => session.write_address(address, data_type, value),
        }
    }

    fn read_register(&mut self, register: Register) -> Result<u32, Self::Error> {
        match self {
            Device::Modbus(session) => session.read_register(register),
            Device::Simulated(session) => session.read_register(register),
        }
    }

    fn unwound_teardown_failed(&mut self, error: Self::Error) {
        match self {
            Device::Modbus(session) => session.unwound_teardown_failed(error),
            Device::Simulated(session) => session.unwound_teardown_failed(error),
        }
    }
}
