//! Serial port transport for RS-232 / USB-serial instruments.
//!
//! Wraps the blocking `serialport` crate. Modbus RTU devices use the same transport;
//! only the framing on top differs.

use super::transport::{Connector, LinkProfile, Transport};
use crate::error::TransportError;
use serialport::{ClearBuffer, SerialPort};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use tracing::debug;

/// Poll granularity of the underlying port; the overall deadline is enforced on top.
const PORT_POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Serial transport for one instrument.
pub struct SerialTransport {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,

    /// Per-exchange read timeout
    timeout: Duration,

    /// The open port; `None` once closed
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Opens `port_name` with the given profile and waits out its settle delay.
    pub fn open(port_name: &str, profile: LinkProfile) -> Result<Self, TransportError> {
        let port = serialport::new(port_name, profile.baud_rate)
            .timeout(PORT_POLL_TIMEOUT.min(profile.timeout))
            .open()
            .map_err(|source| TransportError::Open {
                port: port_name.to_string(),
                source,
            })?;

        debug!(
            "Serial port '{}' opened at {} baud",
            port_name, profile.baud_rate
        );

        if !profile.settle.is_zero() {
            std::thread::sleep(profile.settle);
        }

        Ok(Self {
            port_name: port_name.to_string(),
            timeout: profile.timeout,
            port: Some(port),
        })
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        let name = &self.port_name;
        self.port
            .as_mut()
            .ok_or_else(|| TransportError::Closed(name.clone()))
    }

    fn io_error(&self, source: std::io::Error) -> TransportError {
        TransportError::Io {
            port: self.port_name.clone(),
            source,
        }
    }

    /// Reads single bytes until `stop` says so or the deadline passes.
    fn read_until(
        &mut self,
        mut stop: impl FnMut(&[u8]) -> bool,
    ) -> Result<(Vec<u8>, bool), TransportError> {
        let timeout = self.timeout;
        let start = Instant::now();
        let mut response = Vec::new();
        let mut buffer = [0u8; 1];

        loop {
            if start.elapsed() > timeout {
                return Ok((response, false));
            }

            let result = self.port_mut()?.read(&mut buffer);
            match result {
                Ok(1) => {
                    response.push(buffer[0]);
                    if stop(&response) {
                        return Ok((response, true));
                    }
                }
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::TimedOut => continue,
                Err(e) => return Err(self.io_error(e)),
            }
        }
    }
}

impl Transport for SerialTransport {
    fn port(&self) -> &str {
        &self.port_name
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let port = self.port_mut()?;
        let result = port.write_all(bytes).and_then(|()| port.flush());
        result.map_err(|e| self.io_error(e))?;
        debug!("[{}] Sent {} bytes: {:02X?}", self.port_name, bytes.len(), bytes);
        Ok(())
    }

    fn read_line(&mut self, delimiter: u8) -> Result<Vec<u8>, TransportError> {
        let (line, _complete) = self.read_until(|buf| buf.last() == Some(&delimiter))?;
        debug!(
            "[{}] Received line: {:?}",
            self.port_name,
            String::from_utf8_lossy(&line)
        );
        Ok(line)
    }

    fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, TransportError> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let (bytes, complete) = self.read_until(|buf| buf.len() == len)?;
        if !complete {
            return Err(TransportError::Timeout {
                port: self.port_name.clone(),
                waited: self.timeout,
            });
        }
        debug!("[{}] Received {:02X?}", self.port_name, bytes);
        Ok(bytes)
    }

    fn discard_input(&mut self) -> Result<(), TransportError> {
        let result = self.port_mut()?.clear(ClearBuffer::Input);
        result.map_err(|e| self.io_error(e.into()))
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.port.take().is_some() {
            debug!("Serial port '{}' closed", self.port_name);
        }
        Ok(())
    }
}

/// Connector that opens real serial ports.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    fn connect(&self, address: &str, profile: LinkProfile) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(SerialTransport::open(address, profile)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_port_reports_port_name() {
        let profile = LinkProfile::new(9600, Duration::from_millis(100));
        let err = SerialConnector
            .connect("/dev/elchi-does-not-exist", profile)
            .err()
            .unwrap();
        assert!(err.to_string().contains("/dev/elchi-does-not-exist"));
        assert!(matches!(err, TransportError::Open { .. }));
    }
}
