//! Byte transports and the locked link drivers talk through.

use crate::error::{DriverResult, TransportError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// A byte-oriented, addressable channel to one instrument.
///
/// Reads follow serial-port semantics: they give up once the configured timeout
/// elapses. [`Transport::read_line`] then returns whatever arrived (possibly nothing),
/// while [`Transport::read_exact`] fails with [`TransportError::Timeout`].
pub trait Transport: Send {
    /// Locator this transport was opened on (e.g. `COM3`, `/dev/ttyUSB0`).
    fn port(&self) -> &str;

    /// Writes all bytes and flushes.
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Reads up to and including `delimiter`, or until the read timeout elapses.
    fn read_line(&mut self, delimiter: u8) -> Result<Vec<u8>, TransportError>;

    /// Reads exactly `len` bytes within the read timeout.
    fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, TransportError>;

    /// Drops any stale bytes waiting in the input buffer.
    fn discard_input(&mut self) -> Result<(), TransportError>;

    /// Releases the underlying channel. Calling it again is a no-op.
    fn close(&mut self) -> Result<(), TransportError>;
}

/// Serial parameters a driver family needs from its transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkProfile {
    /// Baud rate (e.g. 9600, 115200)
    pub baud_rate: u32,
    /// Per-exchange read timeout
    pub timeout: Duration,
    /// Pause after opening before the first command (boards that reset on connect)
    pub settle: Duration,
}

impl LinkProfile {
    /// Profile with the given baud rate and timeout and no settle delay.
    pub const fn new(baud_rate: u32, timeout: Duration) -> Self {
        Self {
            baud_rate,
            timeout,
            settle: Duration::ZERO,
        }
    }

    /// Sets the settle delay after opening.
    pub const fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Replaces the read timeout.
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Opens transports for device addresses.
///
/// The engine receives a connector instead of opening ports itself, so tests can hand
/// out mock transports per address.
pub trait Connector {
    /// Opens the channel at `address` with the given serial profile.
    fn connect(&self, address: &str, profile: LinkProfile) -> Result<Box<dyn Transport>, TransportError>;
}

/// A transport shared behind an exclusive lock.
///
/// Every command/response exchange runs inside [`Link::transaction`], so two
/// operations on one physical link can never interleave.
#[derive(Clone)]
pub struct Link {
    port: String,
    inner: Arc<Mutex<Box<dyn Transport>>>,
}

impl Link {
    /// Wraps an opened transport.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            port: transport.port().to_string(),
            inner: Arc::new(Mutex::new(transport)),
        }
    }

    /// Port the link was opened on.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Runs one exchange while holding the link exclusively.
    pub fn transaction<T>(
        &self,
        exchange: impl FnOnce(&mut dyn Transport) -> DriverResult<T>,
    ) -> DriverResult<T> {
        let mut transport = self.inner.lock();
        exchange(transport.as_mut())
    }

    /// Closes the underlying transport. Idempotent.
    pub fn close(&self) -> Result<(), TransportError> {
        self.inner.lock().close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockTransport;

    #[test]
    fn test_transaction_runs_against_transport() {
        let mock = MockTransport::new("COM7");
        let probe = mock.probe();
        probe.queue_response(b"42\n");
        let link = Link::new(Box::new(mock));

        let line = link
            .transaction(|t| {
                t.write_all(b"ping")?;
                Ok(t.read_line(b'\n')?)
            })
            .unwrap();

        assert_eq!(line, b"42\n");
        assert_eq!(probe.writes(), vec![b"ping".to_vec()]);
        assert_eq!(link.port(), "COM7");
    }

    #[test]
    fn test_close_twice_is_harmless() {
        let mock = MockTransport::new("COM7");
        let probe = mock.probe();
        let link = Link::new(Box::new(mock));
        link.close().unwrap();
        link.close().unwrap();
        assert!(probe.is_closed());
    }

    #[test]
    fn test_profile_builders() {
        let profile = LinkProfile::new(9600, Duration::from_millis(500))
            .with_settle(Duration::from_secs(2))
            .with_timeout(Duration::from_secs(1));
        assert_eq!(profile.baud_rate, 9600);
        assert_eq!(profile.timeout, Duration::from_secs(1));
        assert_eq!(profile.settle, Duration::from_secs(2));
    }
}
