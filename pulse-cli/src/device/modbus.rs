//! Modbus TCP session to a T7.
//!
//! Every register write is its own `0x10` (write multiple registers) request,
//! issued in plan order and confirmed before the next one goes out. Reads use
//! `0x03` (read holding registers). The connection closes when the session is
//! dropped.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use pulse_core::controller::DeviceSession;
use pulse_core::registers::{DataType, Register, RegisterWrite};
use tracing::{debug, error, trace};

use super::{value_words, words_value};
use crate::error::CommError;

pub const MBAP_HEADER_LEN: usize = 7;
pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
pub const READ_HOLDING_REGISTERS: u8 = 0x03;

const EXCEPTION_FLAG: u8 = 0x80;
/// Largest PDU the protocol allows.
const MAX_PDU_LEN: usize = 253;

/// Modbus application header preceding every PDU.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MbapHeader {
    pub transaction: u16,
    pub protocol: u16,
    /// Byte count of the unit id plus the PDU.
    pub length: u16,
    pub unit: u8,
}

impl MbapHeader {
    #[must_use]
    pub fn decode(bytes: &[u8; MBAP_HEADER_LEN]) -> Self {
        Self {
            transaction: u16::from_be_bytes([bytes[0], bytes[1]]),
            protocol: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
            unit: bytes[6],
        }
    }
}

fn frame(transaction: u16, unit: u8, pdu: &[u8]) -> Vec<u8> {
    // PDUs built here are at most a handful of bytes.
    let length = u16::try_from(pdu.len() + 1).unwrap_or(u16::MAX);
    let mut bytes = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
    bytes.extend_from_slice(&transaction.to_be_bytes());
    bytes.extend_from_slice(&0_u16.to_be_bytes());
    bytes.extend_from_slice(&length.to_be_bytes());
    bytes.push(unit);
    bytes.extend_from_slice(pdu);
    bytes
}

/// Builds a `0x10` request writing `words` starting at `address`.
#[must_use]
pub fn encode_write_multiple(transaction: u16, unit: u8, address: u16, words: &[u16]) -> Vec<u8> {
    let quantity = u16::try_from(words.len()).unwrap_or(u16::MAX);
    let byte_count = u8::try_from(words.len() * 2).unwrap_or(u8::MAX);

    let mut pdu = Vec::with_capacity(6 + words.len() * 2);
    pdu.push(WRITE_MULTIPLE_REGISTERS);
    pdu.extend_from_slice(&address.to_be_bytes());
    pdu.extend_from_slice(&quantity.to_be_bytes());
    pdu.push(byte_count);
    for word in words {
        pdu.extend_from_slice(&word.to_be_bytes());
    }
    frame(transaction, unit, &pdu)
}

/// Builds a `0x03` request for `count` registers starting at `address`.
#[must_use]
pub fn encode_read_holding(transaction: u16, unit: u8, address: u16, count: u16) -> Vec<u8> {
    let mut pdu = [0_u8; 5];
    pdu[0] = READ_HOLDING_REGISTERS;
    pdu[1..3].copy_from_slice(&address.to_be_bytes());
    pdu[3..5].copy_from_slice(&count.to_be_bytes());
    frame(transaction, unit, &pdu)
}

fn check_function(pdu: &[u8], function: u8) -> Result<(), CommError> {
    match pdu {
        [code, rest @ ..] if *code == function | EXCEPTION_FLAG => Err(CommError::Exception {
            function,
            code: rest.first().copied().unwrap_or(0),
        }),
        [code, ..] if *code == function => Ok(()),
        [] => Err(CommError::Protocol("empty response")),
        _ => Err(CommError::Protocol("response for another function")),
    }
}

/// Validates the echo of a `0x10` request.
///
/// # Errors
///
/// Returns [`CommError::Exception`] for an exception response and
/// [`CommError::Protocol`] when the echo does not match the request.
pub fn check_write_response(pdu: &[u8], address: u16, quantity: u16) -> Result<(), CommError> {
    check_function(pdu, WRITE_MULTIPLE_REGISTERS)?;
    let [_, a0, a1, q0, q1] = pdu else {
        return Err(CommError::Protocol("write response has the wrong length"));
    };
    if u16::from_be_bytes([*a0, *a1]) != address || u16::from_be_bytes([*q0, *q1]) != quantity {
        return Err(CommError::Protocol("write response does not echo the request"));
    }
    Ok(())
}

/// Extracts the register values from a `0x03` response.
///
/// # Errors
///
/// Returns [`CommError::Exception`] for an exception response and
/// [`CommError::Protocol`] when the byte count is inconsistent.
pub fn decode_read_response(pdu: &[u8], count: u16) -> Result<Vec<u16>, CommError> {
    check_function(pdu, READ_HOLDING_REGISTERS)?;
    let Some((&byte_count, data)) = pdu[1..].split_first() else {
        return Err(CommError::Protocol("read response is missing its byte count"));
    };
    if usize::from(byte_count) != data.len() || data.len() != usize::from(count) * 2 {
        return Err(CommError::Protocol("read response has the wrong byte count"));
    }
    Ok(data
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

pub struct ModbusSession<S = TcpStream> {
    stream: S,
    unit_id: u8,
    transaction: u16,
    peer: String,
}

impl ModbusSession<TcpStream> {
    /// Opens a TCP connection to `address` (`host:port`).
    ///
    /// # Errors
    ///
    /// Returns [`CommError::Connect`] when no resolved address accepts the
    /// connection, or [`CommError::Io`] if socket options cannot be set.
    pub fn connect(address: &str, unit_id: u8, timeout: Duration) -> Result<Self, CommError> {
        let connect_error = |source| CommError::Connect {
            address: address.to_owned(),
            source,
        };

        let mut last_error = None;
        for candidate in address.to_socket_addrs().map_err(connect_error)? {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(timeout))?;
                    stream.set_write_timeout(Some(timeout))?;
                    stream.set_nodelay(true)?;
                    debug!(peer = %candidate, unit_id, "connected");
                    return Ok(Self::from_stream(stream, unit_id, candidate.to_string()));
                }
                Err(error) => last_error = Some(error),
            }
        }

        Err(connect_error(last_error.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "address resolved to nothing")
        })))
    }
}

impl<S> ModbusSession<S>
where
    S: Read + Write,
{
    pub fn from_stream(stream: S, unit_id: u8, peer: impl Into<String>) -> Self {
        Self {
            stream,
            unit_id,
            transaction: 0,
            peer: peer.into(),
        }
    }

    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    fn next_transaction(&mut self) -> u16 {
        self.transaction = self.transaction.wrapping_add(1);
        self.transaction
    }

    fn exchange(&mut self, transaction: u16, request: &[u8]) -> Result<Vec<u8>, CommError> {
        self.stream.write_all(request)?;
        self.stream.flush()?;

        let mut header = [0_u8; MBAP_HEADER_LEN];
        self.stream.read_exact(&mut header)?;
        let header = MbapHeader::decode(&header);
        if header.protocol != 0 {
            return Err(CommError::Protocol("not a Modbus response"));
        }
        if header.transaction != transaction {
            return Err(CommError::Protocol("response for another transaction"));
        }
        let pdu_len = usize::from(header.length).saturating_sub(1);
        if pdu_len == 0 || pdu_len > MAX_PDU_LEN {
            return Err(CommError::Protocol("response length out of range"));
        }

        let mut pdu = vec![0_u8; pdu_len];
        self.stream.read_exact(&mut pdu)?;
        Ok(pdu)
    }

    /// Writes raw words starting at `address` in one request.
    ///
    /// # Errors
    ///
    /// Returns the I/O, protocol or device exception error.
    pub fn write_words(&mut self, address: u16, words: &[u16]) -> Result<(), CommError> {
        let transaction = self.next_transaction();
        let request = encode_write_multiple(transaction, self.unit_id, address, words);
        let pdu = self.exchange(transaction, &request)?;
        check_write_response(&pdu, address, u16::try_from(words.len()).unwrap_or(u16::MAX))
    }

    /// Reads `count` raw words starting at `address`.
    ///
    /// # Errors
    ///
    /// Returns the I/O, protocol or device exception error.
    pub fn read_words(&mut self, address: u16, count: u16) -> Result<Vec<u16>, CommError> {
        let transaction = self.next_transaction();
        let request = encode_read_holding(transaction, self.unit_id, address, count);
        let pdu = self.exchange(transaction, &request)?;
        decode_read_response(&pdu, count)
    }
}

impl<S> DeviceSession for ModbusSession<S>
where
    S: Read + Write,
{
    type Error = CommError;

    fn write_registers(&mut self, writes: &[RegisterWrite]) -> Result<(), Self::Error> {
        for write in writes {
            let register = write.register;
            trace!(%register, value = write.value, "write");
            let words = value_words(register.data_type(), write.value)?;
            self.write_words(register.address(), &words)?;
        }
        Ok(())
    }

    fn write_address(
        &mut self,
        address: u16,
        data_type: DataType,
        value: u32,
    ) -> Result<(), Self::Error> {
        trace!(address, value, "write");
        let words = value_words(data_type, value)?;
        self.write_words(address, &words)
    }

    fn read_register(&mut self, register: Register) -> Result<u32, Self::Error> {
        let words = self.read_words(register.address(), register.data_type().register_count())?;
        let value = words_value(&words);
        trace!(%register, value, "read");
        Ok(value)
    }

    fn unwound_teardown_failed(&mut self, error: Self::Error) {
        error!(
            peer = %self.peer,
            %error,
            "teardown failed while unwinding, output may still be energized"
        );
    }
}
