//! ASCII line protocol.
//!
//! ElchWorks boxes (Ventolino, Valvolino) and the Aera ROD-4 take commands framed as
//! `STX` + command + `CR`, where the command is a zero-padded two-digit channel, a
//! three-letter mnemonic and an optional value (e.g. `03SFD50.0`). Responses are single
//! lines terminated by `\n`.
//!
//! SCPI-style sensors use the same request/response shape without `STX` and with a
//! `\n` terminator, so [`Framing`] parameterises both.

use super::transport::Link;
use crate::error::{DriverResult, ProtocolError};
use std::str::FromStr;

/// Start-of-text byte opening every STX-framed command.
pub const STX: u8 = 0x02;

/// Carriage return closing every STX-framed command.
pub const CR: u8 = 0x0D;

/// Acknowledgement line sent by ElchWorks and Aera firmware after a set command.
pub const REC_ACK: &[u8] = b"rec\r\n";

/// How commands are wrapped on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framing {
    prefix: Option<u8>,
    terminator: &'static [u8],
}

impl Framing {
    /// `STX` + command + `CR`.
    pub const STX_CR: Framing = Framing {
        prefix: Some(STX),
        terminator: &[CR],
    };

    /// Command + `\n`, as spoken by SCPI instruments.
    pub const SCPI: Framing = Framing {
        prefix: None,
        terminator: b"\n",
    };

    /// Wraps `command` into the bytes sent on the wire.
    pub fn frame(&self, command: &str) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(command.len() + 1 + self.terminator.len());
        bytes.extend(self.prefix);
        bytes.extend_from_slice(command.as_bytes());
        bytes.extend_from_slice(self.terminator);
        bytes
    }
}

/// Builds a channel command such as `03SFD50.0`.
pub fn channel_command(channel: u8, mnemonic: &str, value: Option<&str>) -> String {
    format!("{channel:02}{mnemonic}{}", value.unwrap_or_default())
}

/// Accepts a set-command response.
///
/// The response must equal the acknowledgement exactly, or be empty because legacy
/// firmware never acknowledges. Anything else is rejected.
pub fn check_ack(response: &[u8], ack: &[u8]) -> Result<(), ProtocolError> {
    if response.is_empty() || response == ack {
        Ok(())
    } else {
        Err(ProtocolError::new(format!(
            "expected acknowledgement {:?}, got {:?}",
            String::from_utf8_lossy(ack),
            String::from_utf8_lossy(response)
        )))
    }
}

/// Decodes a numeric response line (`"42\r\n"`, `" 23.5\n"`).
pub fn parse_value<T: FromStr>(response: &[u8]) -> Result<T, ProtocolError> {
    if response.is_empty() {
        return Err(ProtocolError::new("no response before timeout"));
    }
    let text = std::str::from_utf8(response)
        .map_err(|_| ProtocolError::new(format!("non-ASCII response {response:02X?}")))?
        .trim();
    text.parse()
        .map_err(|_| ProtocolError::new(format!("cannot decode {text:?} as a number")))
}

/// Decodes a `0`/`1` state line.
pub fn parse_flag(response: &[u8]) -> Result<bool, ProtocolError> {
    match parse_value::<i64>(response)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(ProtocolError::new(format!("expected 0 or 1, got {other}"))),
    }
}

/// Line-protocol session over a link.
#[derive(Clone)]
pub struct AsciiLine {
    link: Link,
    framing: Framing,
}

impl AsciiLine {
    /// Speaks `framing` over `link`.
    pub fn new(link: Link, framing: Framing) -> Self {
        Self { link, framing }
    }

    /// The underlying link.
    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Sends a command without waiting for an answer.
    pub fn send(&self, command: &str) -> DriverResult<()> {
        let frame = self.framing.frame(command);
        self.link.transaction(|t| Ok(t.write_all(&frame)?))
    }

    /// Sends a command and returns the raw response line (possibly empty).
    pub fn query(&self, command: &str) -> DriverResult<Vec<u8>> {
        let frame = self.framing.frame(command);
        self.link.transaction(|t| {
            t.discard_input()?;
            t.write_all(&frame)?;
            Ok(t.read_line(b'\n')?)
        })
    }

    /// Sends a set command and checks the acknowledgement.
    pub fn command_ack(&self, command: &str, ack: &[u8]) -> DriverResult<()> {
        let response = self.query(command)?;
        Ok(check_ack(&response, ack)?)
    }

    /// Sends a query and decodes a number from the response.
    pub fn query_value<T: FromStr>(&self, command: &str) -> DriverResult<T> {
        let response = self.query(command)?;
        Ok(parse_value(&response)?)
    }

    /// Sends a query and decodes a `0`/`1` flag from the response.
    pub fn query_flag(&self, command: &str) -> DriverResult<bool> {
        let response = self.query(command)?;
        Ok(parse_flag(&response)?)
    }
}
