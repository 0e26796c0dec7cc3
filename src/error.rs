//! Error types for the action engine.
//!
//! Every failure in this crate is fatal to the action being executed: nothing is
//! retried locally. The errors therefore carry enough context (device id, channel,
//! violated bound) to be shown verbatim to the operator and appended to the event log.
//!
//! ## Error Hierarchy
//!
//! - **`ConfigError`**: unknown action or device, capability mismatch, malformed
//!   persisted state, or an unreadable config/settings file.
//! - **`ValidationError`**: an operand outside its declared bounds. Always raised
//!   before any device is opened.
//! - **`DriverError`**: a [`TransportError`] (port open, I/O, timeout) or a
//!   [`ProtocolError`] (unexpected or malformed device response).
//! - **`CommanderError`**: the top-level type returned by the engine. Driver errors are
//!   wrapped together with the device id and the operation that failed.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the engine error type.
pub type CommanderResult<T> = std::result::Result<T, CommanderError>;

/// Convenience alias for results of driver and transport operations.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Problems with the persisted configuration or the application settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The requested action id has no entry in the action section.
    #[error("Action with id {0} not found in config file")]
    ActionNotFound(u32),

    /// An action refers to a device id missing from the device section.
    #[error("Device '{0}' is not defined in the device section")]
    UnknownDevice(String),

    /// A device is used in a role its driver does not provide.
    #[error("Device '{id}' is a {actual} ({driver}), but the action requires a {expected}")]
    CapabilityMismatch {
        /// Device id from the config
        id: String,
        /// Capability the action needs
        expected: String,
        /// Capability the configured driver provides
        actual: String,
        /// Configured driver name
        driver: String,
    },

    /// Structurally valid YAML with contents the engine cannot use.
    #[error("Malformed config: {0}")]
    Malformed(String),

    /// The config file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        /// Config file path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid YAML for the action schema.
    #[error("Invalid YAML in config file {path}: {source}")]
    Parse {
        /// Config file path
        path: PathBuf,
        /// Underlying parser error
        #[source]
        source: serde_yaml::Error,
    },

    /// The layered application settings could not be extracted.
    #[error("Settings error: {0}")]
    Settings(#[from] Box<figment::Error>),
}

/// An operand outside its declared range, caught before any hardware write.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid value for {field}: {value}. Valid values are {min} to {max}")]
pub struct ValidationError {
    /// Config key of the operand, e.g. `flow_3`
    pub field: String,
    /// Offending value
    pub value: f64,
    /// Inclusive lower bound
    pub min: f64,
    /// Inclusive upper bound
    pub max: f64,
}

impl ValidationError {
    /// Checks `value` against the inclusive range `[min, max]`.
    pub fn check(field: impl Into<String>, value: f64, min: f64, max: f64) -> Result<(), Self> {
        if value.is_finite() && (min..=max).contains(&value) {
            Ok(())
        } else {
            Err(Self {
                field: field.into(),
                value,
                min,
                max,
            })
        }
    }
}

/// Failures of the byte channel underneath a driver.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The serial port could not be opened.
    #[error("Failed to open port '{port}': {source}")]
    Open {
        /// Port name
        port: String,
        /// Error reported by the serial backend
        #[source]
        source: serialport::Error,
    },

    /// Reading from or writing to an open port failed.
    #[error("I/O error on port '{port}': {source}")]
    Io {
        /// Port name
        port: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// No complete response arrived before the read deadline.
    #[error("Read timeout on port '{port}' after {waited:?}")]
    Timeout {
        /// Port name
        port: String,
        /// Time spent waiting
        waited: Duration,
    },

    /// The port was used after it had been closed.
    #[error("Port '{0}' is closed")]
    Closed(String),
}

/// A device answered with something the protocol does not allow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Protocol error: {reason}")]
pub struct ProtocolError {
    /// What was wrong with the response
    pub reason: String,
}

impl ProtocolError {
    /// Creates a protocol error from a human-readable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Error of a single driver operation.
#[derive(Error, Debug)]
pub enum DriverError {
    /// The byte channel failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The device answered outside its protocol.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Top-level error of one engine run.
#[derive(Error, Debug)]
pub enum CommanderError {
    /// Config or settings problem, exit code 2.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Operand out of bounds, exit code 3.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A driver operation failed, exit code 4 (transport) or 5 (protocol).
    #[error("Communication error with '{device}' when {operation}: {source}")]
    Driver {
        /// Device id from the config
        device: String,
        /// Operation that was interrupted, e.g. `setting flow on channel 2`
        operation: String,
        /// Driver failure
        #[source]
        source: DriverError,
    },

    /// The temperature did not settle before the configured timeout, exit code 7.
    #[error("Temperature of '{sensor}' did not stabilize within {waited:?}")]
    StabilizationTimeout {
        /// Sensor device id
        sensor: String,
        /// Time spent waiting
        waited: Duration,
    },

    /// Sequence progress could not be written back, exit code 6.
    #[error("Failed to persist config to {path}: {source}")]
    Persist {
        /// Config file path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl CommanderError {
    /// Wraps a driver failure with the device and the operation it interrupted.
    pub fn driver(device: impl Into<String>, operation: impl Into<String>, source: DriverError) -> Self {
        Self::Driver {
            device: device.into(),
            operation: operation.into(),
            source,
        }
    }

    /// Process exit code for this error category.
    pub fn exit_code(&self) -> i32 {
        match self {
            CommanderError::Config(_) => 2,
            CommanderError::Validation(_) => 3,
            CommanderError::Driver {
                source: DriverError::Transport(_),
                ..
            } => 4,
            CommanderError::Driver {
                source: DriverError::Protocol(_),
                ..
            } => 5,
            CommanderError::Persist { .. } => 6,
            CommanderError::StabilizationTimeout { .. } => 7,
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Settings(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_bounds() {
        assert!(ValidationError::check("flow_3", 100.0, 0.0, 100.0).is_ok());
        let err = ValidationError::check("flow_3", 150.0, 0.0, 100.0).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid value for flow_3: 150. Valid values are 0 to 100"
        );
        assert!(ValidationError::check("t_set", f64::NAN, -200.0, 1500.0).is_err());
    }

    #[test]
    fn test_driver_error_display_carries_context() {
        let err = CommanderError::driver(
            "mfc",
            "setting flow on channel 2",
            ProtocolError::new("unexpected response 'err'").into(),
        );
        assert_eq!(
            err.to_string(),
            "Communication error with 'mfc' when setting flow on channel 2: Protocol error: unexpected response 'err'"
        );
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn test_exit_codes_are_distinct_and_nonzero() {
        let codes = [
            CommanderError::from(ConfigError::ActionNotFound(3)).exit_code(),
            CommanderError::from(ValidationError::check("x", 2.0, 0.0, 1.0).unwrap_err())
                .exit_code(),
            CommanderError::driver(
                "heater",
                "opening",
                TransportError::Closed("COM1".into()).into(),
            )
            .exit_code(),
        ];
        assert_eq!(codes, [2, 3, 4]);
    }
}
