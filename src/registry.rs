//! Device registry: logical device id to opened driver.

use crate::config::Config;
use crate::error::{CommanderError, CommanderResult};
use crate::hardware::{Capability, Connector, DriverHandle, Link};
use crate::instrument::Connection;
use std::time::Duration;
use tracing::{debug, info};

/// Resolves device ids from the config into opened drivers.
pub struct DeviceRegistry<'a> {
    config: &'a Config,
    connector: &'a dyn Connector,
    timeout_override: Option<Duration>,
}

impl<'a> DeviceRegistry<'a> {
    /// Registry over the devices of `config`, opening transports through `connector`.
    pub fn new(config: &'a Config, connector: &'a dyn Connector) -> Self {
        Self {
            config,
            connector,
            timeout_override: None,
        }
    }

    /// Replaces every driver's default read timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout_override = timeout;
        self
    }

    /// Looks up `id`, checks its capability and opens its driver.
    ///
    /// Simulated drivers are built without opening a transport.
    pub fn resolve(&self, id: &str, expected: Capability) -> CommanderResult<DriverHandle> {
        let entry = self.config.device(id, expected)?;

        let mut profile = match entry.driver.connection() {
            Connection::Serial(profile) => profile,
            Connection::Simulated => {
                info!("Using simulated {} '{id}' ({})", entry.capability, entry.driver);
                return Ok(entry.driver.simulate());
            }
        };
        if let Some(timeout) = self.timeout_override {
            profile = profile.with_timeout(timeout);
        }

        debug!(
            "Opening {} '{id}' ({}) on {} at {} baud",
            entry.capability, entry.driver, entry.address, profile.baud_rate
        );
        let transport = self
            .connector
            .connect(&entry.address, profile)
            .map_err(|e| CommanderError::driver(id, "opening", e.into()))?;
        let handle = entry
            .driver
            .open(Link::new(transport))
            .map_err(|e| CommanderError::driver(id, "initializing", e))?;
        info!("Connected to {} '{id}' ({}) on {}", entry.capability, entry.driver, entry.address);
        Ok(handle)
    }
}
