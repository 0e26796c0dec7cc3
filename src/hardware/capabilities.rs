//! Capability traits implemented by instrument drivers.
//!
//! A driver implements exactly one capability trait. The registry hands drivers out
//! wrapped in a [`DriverHandle`], a closed enum over the capability set, so the engine
//! can match exhaustively instead of downcasting.

use super::{Channel, Relay, RelayStates};
use crate::error::DriverResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a configured device is used for.
///
/// Serialized with the names used in the `type` field of a device entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Temperature controller with a writable setpoint
    Heater,
    /// Read-only temperature sensor
    TempSensor,
    /// Four-channel mass-flow controller
    FlowController,
    /// Four-channel valve/trigger box
    Triggerbox,
    /// 4x4 relay multiplexer
    Multiplexer,
}

impl Capability {
    /// Name as written in the config file.
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Heater => "heater",
            Capability::TempSensor => "temp_sensor",
            Capability::FlowController => "flow_controller",
            Capability::Triggerbox => "triggerbox",
            Capability::Multiplexer => "multiplexer",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Behaviour shared by every driver.
pub trait Device: Send {
    /// Releases the transport. Calling it again is a no-op.
    fn close(&mut self) -> DriverResult<()>;
}

/// Temperature controller.
pub trait Heater: Device {
    /// Writes the target setpoint in °C.
    fn set_target_setpoint(&mut self, celsius: f64) -> DriverResult<()>;

    /// Reads back the target setpoint in °C.
    fn target_setpoint(&mut self) -> DriverResult<f64>;

    /// Reads the controller's own process variable in °C.
    fn process_variable(&mut self) -> DriverResult<f64>;
}

/// Temperature sensor.
pub trait TemperatureSensor: Device {
    /// Reads the current temperature in °C.
    fn read_temperature(&mut self) -> DriverResult<f64>;
}

/// Mass-flow controller with four channels; flows are percent of full scale.
pub trait MassFlowController: Device {
    /// Sets the flow of one channel.
    fn set_flow(&mut self, channel: Channel, percent: f64) -> DriverResult<()>;

    /// Reads the flow setpoint of one channel.
    fn read_set_flow(&mut self, channel: Channel) -> DriverResult<f64>;

    /// Reads the measured flow of one channel.
    fn read_flow(&mut self, channel: Channel) -> DriverResult<f64>;
}

/// Valve or trigger box with four switchable channels.
pub trait ValveController: Device {
    /// Opens (`true`) or closes one channel.
    fn switch_valve(&mut self, channel: Channel, open: bool) -> DriverResult<()>;

    /// Reads the state of one channel.
    fn valve_state(&mut self, channel: Channel) -> DriverResult<bool>;
}

/// 4x4 relay multiplexer.
pub trait RelayMultiplexer: Device {
    /// Switches one relay.
    fn set_relay(&mut self, relay: Relay, on: bool) -> DriverResult<()>;

    /// Reads one relay.
    fn relay(&mut self, relay: Relay) -> DriverResult<bool>;

    /// Writes all 16 relays in one exchange.
    fn set_all(&mut self, states: &RelayStates) -> DriverResult<()>;

    /// Reads all 16 relays in one exchange.
    fn read_all(&mut self) -> DriverResult<RelayStates>;
}

/// An opened driver, tagged with its capability.
pub enum DriverHandle {
    /// Heater driver
    Heater(Box<dyn Heater>),
    /// Sensor driver
    TempSensor(Box<dyn TemperatureSensor>),
    /// Flow controller driver
    FlowController(Box<dyn MassFlowController>),
    /// Trigger box driver
    Triggerbox(Box<dyn ValveController>),
    /// Multiplexer driver
    Multiplexer(Box<dyn RelayMultiplexer>),
}

impl DriverHandle {
    /// Capability this handle provides.
    pub fn capability(&self) -> Capability {
        match self {
            DriverHandle::Heater(_) => Capability::Heater,
            DriverHandle::TempSensor(_) => Capability::TempSensor,
            DriverHandle::FlowController(_) => Capability::FlowController,
            DriverHandle::Triggerbox(_) => Capability::Triggerbox,
            DriverHandle::Multiplexer(_) => Capability::Multiplexer,
        }
    }

    /// Closes the wrapped driver.
    pub fn close(&mut self) -> DriverResult<()> {
        match self {
            DriverHandle::Heater(d) => d.close(),
            DriverHandle::TempSensor(d) => d.close(),
            DriverHandle::FlowController(d) => d.close(),
            DriverHandle::Triggerbox(d) => d.close(),
            DriverHandle::Multiplexer(d) => d.close(),
        }
    }

    /// The heater, if this is one.
    pub fn as_heater(&mut self) -> Option<&mut dyn Heater> {
        match self {
            DriverHandle::Heater(d) => Some(d.as_mut()),
            _ => None,
        }
    }

    /// The sensor, if this is one.
    pub fn as_sensor(&mut self) -> Option<&mut dyn TemperatureSensor> {
        match self {
            DriverHandle::TempSensor(d) => Some(d.as_mut()),
            _ => None,
        }
    }

    /// The flow controller, if this is one.
    pub fn as_flow_controller(&mut self) -> Option<&mut dyn MassFlowController> {
        match self {
            DriverHandle::FlowController(d) => Some(d.as_mut()),
            _ => None,
        }
    }

    /// The trigger box, if this is one.
    pub fn as_triggerbox(&mut self) -> Option<&mut dyn ValveController> {
        match self {
            DriverHandle::Triggerbox(d) => Some(d.as_mut()),
            _ => None,
        }
    }

    /// The multiplexer, if this is one.
    pub fn as_multiplexer(&mut self) -> Option<&mut dyn RelayMultiplexer> {
        match self {
            DriverHandle::Multiplexer(d) => Some(d.as_mut()),
            _ => None,
        }
    }
}

impl fmt::Debug for DriverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DriverHandle({})", self.capability())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_names_match_config_format() {
        for capability in [
            Capability::Heater,
            Capability::TempSensor,
            Capability::FlowController,
            Capability::Triggerbox,
            Capability::Multiplexer,
        ] {
            let yaml = serde_yaml::to_string(&capability).unwrap();
            assert_eq!(yaml.trim(), capability.as_str());
            let back: Capability = serde_yaml::from_str(capability.as_str()).unwrap();
            assert_eq!(back, capability);
        }
    }
}
