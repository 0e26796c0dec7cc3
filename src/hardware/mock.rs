//! Mock transport for testing
//!
//! Simulates an instrument's serial link without hardware. It provides:
//! - Queued response bytes, or a responder closure that answers each write
//! - Controllable failure injection
//! - A log of every write for test verification
//!
//! The [`MockProbe`] returned by [`MockTransport::probe`] shares state with the
//! transport, so tests can inspect traffic after the transport was moved into a driver.

use super::transport::{Connector, LinkProfile, Transport};
use crate::error::TransportError;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

#[derive(Default)]
struct MockState {
    rx: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    responder: Option<Responder>,
    fail_next_write: bool,
    fail_close: bool,
    closed: bool,
    close_calls: usize,
}

/// Mock transport
///
/// # Example
///
/// ```
/// use elchi_commander::hardware::mock::MockTransport;
/// use elchi_commander::hardware::Transport;
///
/// let mut transport = MockTransport::new("COM3");
/// let probe = transport.probe();
/// probe.queue_response(b"rec\r\n");
/// transport.write_all(b"hello").unwrap();
/// assert_eq!(transport.read_line(b'\n').unwrap(), b"rec\r\n");
/// assert_eq!(probe.writes().len(), 1);
/// ```
pub struct MockTransport {
    port: String,
    state: Arc<Mutex<MockState>>,
}

/// Shared view into a [`MockTransport`].
#[derive(Clone)]
pub struct MockProbe {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Creates a mock bound to `port`.
    pub fn new(port: &str) -> Self {
        Self {
            port: port.to_string(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Answers every write with the bytes returned by `responder`.
    pub fn with_responder(
        self,
        responder: impl FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    ) -> Self {
        self.state.lock().responder = Some(Box::new(responder));
        self
    }

    /// Returns a probe sharing this transport's state.
    pub fn probe(&self) -> MockProbe {
        MockProbe {
            state: self.state.clone(),
        }
    }

    fn timeout(&self) -> TransportError {
        TransportError::Timeout {
            port: self.port.clone(),
            waited: Duration::ZERO,
        }
    }

    fn ensure_open(&self, state: &MockState) -> Result<(), TransportError> {
        if state.closed {
            Err(TransportError::Closed(self.port.clone()))
        } else {
            Ok(())
        }
    }
}

impl MockProbe {
    /// Appends bytes the next reads will return.
    pub fn queue_response(&self, bytes: &[u8]) {
        self.state.lock().rx.extend(bytes.iter().copied());
    }

    /// Makes the next write fail with an I/O error.
    pub fn inject_write_failure(&self) {
        self.state.lock().fail_next_write = true;
    }

    /// Makes every close fail with an I/O error.
    pub fn inject_close_failure(&self) {
        self.state.lock().fail_close = true;
    }

    /// Every write so far, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().writes.clone()
    }

    /// Whether the transport has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// How many times close was called.
    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }
}

impl Transport for MockTransport {
    fn port(&self) -> &str {
        &self.port
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        if std::mem::take(&mut state.fail_next_write) {
            return Err(TransportError::Io {
                port: self.port.clone(),
                source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "Injected failure"),
            });
        }
        state.writes.push(bytes.to_vec());
        let reply = state.responder.as_mut().and_then(|respond| respond(bytes));
        if let Some(reply) = reply {
            state.rx.extend(reply);
        }
        Ok(())
    }

    fn read_line(&mut self, delimiter: u8) -> Result<Vec<u8>, TransportError> {
        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        let mut line = Vec::new();
        while let Some(byte) = state.rx.pop_front() {
            line.push(byte);
            if byte == delimiter {
                break;
            }
        }
        Ok(line)
    }

    fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        if state.rx.len() < len {
            state.rx.clear();
            return Err(self.timeout());
        }
        Ok(state.rx.drain(..len).collect())
    }

    fn discard_input(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        state.rx.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.close_calls += 1;
        if state.fail_close {
            return Err(TransportError::Io {
                port: self.port.clone(),
                source: std::io::Error::other("Injected close failure"),
            });
        }
        state.closed = true;
        Ok(())
    }
}

/// Connector handing out prepared mock transports by address.
///
/// Addresses without a prepared transport fail to open, like a missing serial port.
#[derive(Default)]
pub struct MockConnector {
    transports: Mutex<HashMap<String, MockTransport>>,
    opened: Mutex<Vec<(String, LinkProfile)>>,
}

impl MockConnector {
    /// Creates a connector with no ports.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the transport returned for `transport.port()` and returns its probe.
    pub fn attach(&self, transport: MockTransport) -> MockProbe {
        let probe = transport.probe();
        self.transports
            .lock()
            .insert(transport.port.clone(), transport);
        probe
    }

    /// Addresses and profiles opened so far, in order.
    pub fn opened(&self) -> Vec<(String, LinkProfile)> {
        self.opened.lock().clone()
    }
}

impl Connector for MockConnector {
    fn connect(&self, address: &str, profile: LinkProfile) -> Result<Box<dyn Transport>, TransportError> {
        let transport = self.transports.lock().remove(address).ok_or_else(|| {
            TransportError::Io {
                port: address.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such mock port"),
            }
        })?;
        self.opened.lock().push((address.to_string(), profile));
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_responder_answers_writes() {
        let mut transport = MockTransport::new("COM1").with_responder(|req| Some(req.to_vec()));
        transport.write_all(b"echo\n").unwrap();
        assert_eq!(transport.read_line(b'\n').unwrap(), b"echo\n");
    }

    #[test]
    fn test_read_line_without_data_is_empty() {
        let mut transport = MockTransport::new("COM1");
        assert!(transport.read_line(b'\n').unwrap().is_empty());
    }

    #[test]
    fn test_read_exact_short_times_out() {
        let mut transport = MockTransport::new("COM1");
        transport.probe().queue_response(&[1, 2]);
        assert!(matches!(
            transport.read_exact(3),
            Err(TransportError::Timeout { .. })
        ));
    }

    #[test]
    fn test_failure_injection_is_consumed() {
        let mut transport = MockTransport::new("COM1");
        let probe = transport.probe();
        probe.inject_write_failure();
        assert!(transport.write_all(b"a").is_err());
        assert!(transport.write_all(b"b").is_ok());
        assert_eq!(probe.writes(), vec![b"b".to_vec()]);
    }

    #[test]
    fn test_closed_transport_rejects_io() {
        let mut transport = MockTransport::new("COM1");
        transport.close().unwrap();
        transport.close().unwrap();
        assert!(matches!(
            transport.write_all(b"x"),
            Err(TransportError::Closed(_))
        ));
        assert_eq!(transport.probe().close_calls(), 2);
    }

    #[test]
    fn test_connector_hands_out_each_port_once() {
        let connector = MockConnector::new();
        connector.attach(MockTransport::new("COM4"));
        let profile = LinkProfile::new(9600, Duration::from_millis(500));
        assert!(connector.connect("COM4", profile).is_ok());
        assert!(connector.connect("COM4", profile).is_err());
        assert!(connector.connect("COM5", profile).is_err());
        assert_eq!(connector.opened().len(), 1);
    }
}
