//! Modbus RTU register protocol.
//!
//! Frames are `slave | function | data | crc16` with the CRC-16/MODBUS checksum sent
//! little-endian. Only the function codes the drivers need are implemented:
//!
//! | Code | Operation |
//! |------|-----------|
//! | 0x01 | read coils |
//! | 0x03 | read holding registers |
//! | 0x05 | write single coil |
//! | 0x0F | write multiple coils |
//! | 0x10 | write multiple registers |
//!
//! Decimal quantities travel as 16-bit integers scaled by a fixed number of decimal
//! places declared per register (see [`Register`]).

use super::transport::{Link, Transport};
use crate::error::{DriverResult, ProtocolError};
use crc::{Crc, CRC_16_MODBUS};

const MODBUS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

const READ_COILS: u8 = 0x01;
const READ_HOLDING_REGISTERS: u8 = 0x03;
const WRITE_SINGLE_COIL: u8 = 0x05;
const WRITE_MULTIPLE_COILS: u8 = 0x0F;
const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
const EXCEPTION_FLAG: u8 = 0x80;

const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;

/// A holding register carrying a fixed-point decimal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    /// Register address
    pub address: u16,
    /// Decimal places of the transmitted value
    pub decimals: u8,
    /// Whether the raw value is two's-complement signed
    pub signed: bool,
}

impl Register {
    /// Unsigned register with `decimals` decimal places.
    pub const fn unsigned(address: u16, decimals: u8) -> Self {
        Self {
            address,
            decimals,
            signed: false,
        }
    }

    /// Signed register with `decimals` decimal places.
    pub const fn signed(address: u16, decimals: u8) -> Self {
        Self {
            address,
            decimals,
            signed: true,
        }
    }
}

/// CRC-16/MODBUS of `bytes`.
pub fn crc16(bytes: &[u8]) -> u16 {
    MODBUS_CRC.checksum(bytes)
}

/// Builds an RTU frame for `slave` around a protocol data unit.
pub fn encode_frame(slave: u8, pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(pdu.len() + 3);
    frame.push(slave);
    frame.extend_from_slice(pdu);
    frame.extend_from_slice(&crc16(&frame).to_le_bytes());
    frame
}

/// Verifies the checksum of a complete frame.
pub fn check_crc(frame: &[u8]) -> Result<(), ProtocolError> {
    if frame.len() < 4 {
        return Err(ProtocolError::new(format!(
            "frame too short ({} bytes)",
            frame.len()
        )));
    }
    let (body, tail) = frame.split_at(frame.len() - 2);
    let received = u16::from_le_bytes([tail[0], tail[1]]);
    let expected = crc16(body);
    if received == expected {
        Ok(())
    } else {
        Err(ProtocolError::new(format!(
            "CRC mismatch: expected {expected:#06X}, got {received:#06X}"
        )))
    }
}

/// Scales a decimal value to its raw register representation.
pub fn encode_scaled(value: f64, decimals: u8, signed: bool) -> Result<u16, ProtocolError> {
    let scaled = (value * 10f64.powi(i32::from(decimals))).round();
    let (min, max) = if signed {
        (f64::from(i16::MIN), f64::from(i16::MAX))
    } else {
        (0.0, f64::from(u16::MAX))
    };
    if !scaled.is_finite() || scaled < min || scaled > max {
        return Err(ProtocolError::new(format!(
            "value {value} does not fit a register with {decimals} decimals"
        )));
    }
    // Range checked above; the cast keeps the two's-complement bit pattern.
    Ok(if signed {
        (scaled as i16) as u16
    } else {
        scaled as u16
    })
}

/// Inverse of [`encode_scaled`].
pub fn decode_scaled(raw: u16, decimals: u8, signed: bool) -> f64 {
    let value = if signed {
        f64::from(raw as i16)
    } else {
        f64::from(raw)
    };
    value / 10f64.powi(i32::from(decimals))
}

fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, _) in bits.iter().enumerate().filter(|(_, on)| **on) {
        bytes[i / 8] |= 1 << (i % 8);
    }
    bytes
}

fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count)
        .map(|i| bytes.get(i / 8).is_some_and(|b| b & (1 << (i % 8)) != 0))
        .collect()
}

fn exception_name(code: u8) -> &'static str {
    match code {
        0x01 => "illegal function",
        0x02 => "illegal data address",
        0x03 => "illegal data value",
        0x04 => "slave device failure",
        0x05 => "acknowledge",
        0x06 => "slave device busy",
        _ => "unknown exception",
    }
}

fn word(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

/// Modbus RTU master for one slave on a link.
#[derive(Clone)]
pub struct ModbusRtu {
    link: Link,
    slave: u8,
}

impl ModbusRtu {
    /// Talks to `slave` over `link`.
    pub fn new(link: Link, slave: u8) -> Self {
        Self { link, slave }
    }

    /// The underlying link.
    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Reads `count` coils starting at `start`.
    pub fn read_coils(&self, start: u16, count: u16) -> DriverResult<Vec<bool>> {
        let mut pdu = vec![READ_COILS];
        pdu.extend_from_slice(&start.to_be_bytes());
        pdu.extend_from_slice(&count.to_be_bytes());
        let response = self.exchange(&pdu)?;
        let data = byte_counted(&response, usize::from(count).div_ceil(8))?;
        Ok(unpack_bits(data, usize::from(count)))
    }

    /// Switches one coil.
    pub fn write_coil(&self, address: u16, on: bool) -> DriverResult<()> {
        let mut pdu = vec![WRITE_SINGLE_COIL];
        pdu.extend_from_slice(&address.to_be_bytes());
        pdu.extend_from_slice(&if on { COIL_ON } else { COIL_OFF }.to_be_bytes());
        let response = self.exchange(&pdu)?;
        if response != pdu {
            return Err(ProtocolError::new(format!(
                "coil write echo mismatch: sent {pdu:02X?}, got {response:02X?}"
            ))
            .into());
        }
        Ok(())
    }

    /// Writes consecutive coils starting at `start` in one exchange.
    pub fn write_coils(&self, start: u16, states: &[bool]) -> DriverResult<()> {
        let count = quantity(states.len())?;
        let packed = pack_bits(states);
        let mut pdu = vec![WRITE_MULTIPLE_COILS];
        pdu.extend_from_slice(&start.to_be_bytes());
        pdu.extend_from_slice(&count.to_be_bytes());
        pdu.push(byte_len(packed.len())?);
        pdu.extend_from_slice(&packed);
        let response = self.exchange(&pdu)?;
        check_write_echo(&response, start, count)
    }

    /// Reads `count` raw holding registers starting at `start`.
    pub fn read_holding_registers(&self, start: u16, count: u16) -> DriverResult<Vec<u16>> {
        let mut pdu = vec![READ_HOLDING_REGISTERS];
        pdu.extend_from_slice(&start.to_be_bytes());
        pdu.extend_from_slice(&count.to_be_bytes());
        let response = self.exchange(&pdu)?;
        let data = byte_counted(&response, usize::from(count) * 2)?;
        Ok((0..usize::from(count)).map(|i| word(data, i * 2)).collect())
    }

    /// Writes consecutive raw registers starting at `start`.
    pub fn write_registers(&self, start: u16, values: &[u16]) -> DriverResult<()> {
        let count = quantity(values.len())?;
        let mut pdu = vec![WRITE_MULTIPLE_REGISTERS];
        pdu.extend_from_slice(&start.to_be_bytes());
        pdu.extend_from_slice(&count.to_be_bytes());
        pdu.push(byte_len(values.len() * 2)?);
        for value in values {
            pdu.extend_from_slice(&value.to_be_bytes());
        }
        let response = self.exchange(&pdu)?;
        check_write_echo(&response, start, count)
    }

    /// Reads a decimal value from `register`.
    pub fn read_register(&self, register: Register) -> DriverResult<f64> {
        let raw = self.read_holding_registers(register.address, 1)?;
        Ok(decode_scaled(raw[0], register.decimals, register.signed))
    }

    /// Writes a decimal value to `register`.
    pub fn write_register(&self, register: Register, value: f64) -> DriverResult<()> {
        let raw = encode_scaled(value, register.decimals, register.signed)?;
        self.write_registers(register.address, &[raw])
    }

    /// Sends one request and returns the response PDU (function code onward).
    fn exchange(&self, pdu: &[u8]) -> DriverResult<Vec<u8>> {
        let request = encode_frame(self.slave, pdu);
        let function = pdu[0];
        self.link.transaction(|t| {
            t.discard_input()?;
            t.write_all(&request)?;
            let frame = read_response(t, function)?;
            check_crc(&frame)?;
            if frame[0] != self.slave {
                return Err(ProtocolError::new(format!(
                    "response from slave {} while talking to slave {}",
                    frame[0], self.slave
                ))
                .into());
            }
            let body = &frame[1..frame.len() - 2];
            if body[0] == function | EXCEPTION_FLAG {
                return Err(ProtocolError::new(format!(
                    "slave {} exception {:#04X} ({})",
                    self.slave,
                    body[1],
                    exception_name(body[1])
                ))
                .into());
            }
            Ok(body.to_vec())
        })
    }
}

/// Reads one complete response frame for a request with `function`.
fn read_response(t: &mut dyn Transport, function: u8) -> DriverResult<Vec<u8>> {
    let mut frame = t.read_exact(2)?;
    let returned = frame[1];
    let remaining = if returned == function | EXCEPTION_FLAG {
        3
    } else if returned != function {
        return Err(ProtocolError::new(format!(
            "expected function {function:#04X}, got {returned:#04X}"
        ))
        .into());
    } else {
        match function {
            READ_COILS | READ_HOLDING_REGISTERS => {
                let count = t.read_exact(1)?;
                frame.extend_from_slice(&count);
                usize::from(count[0]) + 2
            }
            _ => 6,
        }
    };
    frame.extend(t.read_exact(remaining)?);
    Ok(frame)
}

/// Extracts the payload of a byte-counted read response.
fn byte_counted(response: &[u8], expected: usize) -> Result<&[u8], ProtocolError> {
    let declared = response.get(1).copied().map(usize::from);
    if declared != Some(expected) || response.len() != expected + 2 {
        return Err(ProtocolError::new(format!(
            "expected {expected} data bytes, got {:?}",
            declared
        )));
    }
    Ok(&response[2..])
}

fn check_write_echo(response: &[u8], start: u16, count: u16) -> DriverResult<()> {
    if response.len() != 5 || word(response, 1) != start || word(response, 3) != count {
        return Err(ProtocolError::new(format!(
            "write acknowledgement mismatch: {response:02X?}"
        ))
        .into());
    }
    Ok(())
}

fn quantity(len: usize) -> Result<u16, ProtocolError> {
    u16::try_from(len).map_err(|_| ProtocolError::new(format!("too many values ({len})")))
}

fn byte_len(len: usize) -> Result<u8, ProtocolError> {
    u8::try_from(len).map_err(|_| ProtocolError::new(format!("payload too long ({len} bytes)")))
}

/// Answers Modbus requests the way a well-behaved slave would, for tests.
#[cfg(test)]
pub(crate) mod sim {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Coil and register image of a simulated slave.
    #[derive(Default)]
    pub struct SlaveImage {
        pub coils: [bool; 16],
        pub registers: [u16; 16],
    }

    /// Responder for [`crate::hardware::mock::MockTransport::with_responder`].
    pub fn responder(
        slave: u8,
        image: Arc<Mutex<SlaveImage>>,
    ) -> impl FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static {
        move |request| {
            let pdu = &request[1..request.len() - 2];
            let start = usize::from(word(pdu, 1));
            let count = usize::from(word(pdu, 3));
            let mut image = image.lock();
            let reply = match pdu[0] {
                READ_COILS => {
                    let bits = &image.coils[start..start + count];
                    let packed = pack_bits(bits);
                    let mut reply = vec![READ_COILS, packed.len() as u8];
                    reply.extend(packed);
                    reply
                }
                READ_HOLDING_REGISTERS => {
                    let mut reply = vec![READ_HOLDING_REGISTERS, (count * 2) as u8];
                    for value in &image.registers[start..start + count] {
                        reply.extend_from_slice(&value.to_be_bytes());
                    }
                    reply
                }
                WRITE_SINGLE_COIL => {
                    image.coils[start] = word(pdu, 3) == COIL_ON;
                    pdu.to_vec()
                }
                WRITE_MULTIPLE_COILS => {
                    let bits = unpack_bits(&pdu[6..], count);
                    image.coils[start..start + count].copy_from_slice(&bits);
                    pdu[..5].to_vec()
                }
                WRITE_MULTIPLE_REGISTERS => {
                    for i in 0..count {
                        image.registers[start + i] = word(pdu, 6 + i * 2);
                    }
                    pdu[..5].to_vec()
                }
                other => vec![other | EXCEPTION_FLAG, 0x01],
            };
            Some(encode_frame(slave, &reply))
        }
    }
}
