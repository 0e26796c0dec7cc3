//! Device entries of the config file.

use crate::error::ConfigError;
use crate::hardware::Capability;
use crate::instrument::DriverKind;
use serde::{Deserialize, Serialize};

/// One physical (or simulated) instrument.
///
/// Persisted as `{type, device, port}` under its id in the `devices` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// What the device is used for
    #[serde(rename = "type")]
    pub capability: Capability,
    /// Driver implementation
    #[serde(rename = "device")]
    pub driver: DriverKind,
    /// Transport locator, e.g. `COM3` or `/dev/ttyUSB0`
    #[serde(rename = "port")]
    pub address: String,
}

impl DeviceEntry {
    /// Checks that the driver provides the declared capability and the address is usable.
    pub fn validate(&self, id: &str) -> Result<(), ConfigError> {
        if id.trim().is_empty() {
            return Err(ConfigError::Malformed("Device ids must not be empty".into()));
        }
        if self.driver.capability() != self.capability {
            let valid: Vec<_> = DriverKind::for_capability(self.capability)
                .map(DriverKind::name)
                .collect();
            return Err(ConfigError::Malformed(format!(
                "Invalid {} device '{}' for '{id}'. Valid devices are: {}",
                self.capability,
                self.driver,
                valid.join(", ")
            )));
        }
        let address_valid = !self.address.is_empty()
            && !self.address.chars().any(|c| c.is_whitespace() || c.is_control());
        if !self.driver.is_simulated() && !address_valid {
            return Err(ConfigError::Malformed(format!(
                "Invalid port '{}' for device '{id}'",
                self.address
            )));
        }
        Ok(())
    }
}
