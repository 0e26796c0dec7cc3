//! Simulated drivers for dry runs.
//!
//! They log what a real instrument would have been told and keep the written values in
//! memory. Readings are deterministic so a dry run of a temperature action converges.

use crate::error::DriverResult;
use crate::hardware::{
    Capability, Channel, Device, DriverHandle, Heater, MassFlowController, Relay,
    RelayMultiplexer, RelayStates, TemperatureSensor, ValveController, CHANNEL_COUNT,
};
use tracing::info;

/// Reading of the simulated sensor, in °C.
pub const ROOM_TEMPERATURE: f64 = 25.0;

/// Builds the simulated driver for `capability`.
///
/// `ramping` selects the heater that approaches its setpoint gradually.
pub fn build(capability: Capability, ramping: bool) -> DriverHandle {
    match capability {
        Capability::Heater if ramping => DriverHandle::Heater(Box::new(RampingHeater::new())),
        Capability::Heater => DriverHandle::Heater(Box::new(SimulatedHeater::new())),
        Capability::TempSensor => DriverHandle::TempSensor(Box::new(SimulatedSensor::new())),
        Capability::FlowController => DriverHandle::FlowController(Box::new(SimulatedMfc::new())),
        Capability::Triggerbox => DriverHandle::Triggerbox(Box::new(SimulatedTriggerBox::new())),
        Capability::Multiplexer => {
            DriverHandle::Multiplexer(Box::new(SimulatedMultiplexer::new()))
        }
    }
}

fn channel_index(channel: Channel) -> usize {
    usize::from(channel.number() - 1)
}

/// Heater whose process variable equals its setpoint.
#[derive(Debug, Default)]
pub struct SimulatedHeater {
    setpoint: f64,
}

impl SimulatedHeater {
    /// Creates a heater with a 0 °C setpoint.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Device for SimulatedHeater {
    fn close(&mut self) -> DriverResult<()> {
        info!("Test Controller closed");
        Ok(())
    }
}

impl Heater for SimulatedHeater {
    fn set_target_setpoint(&mut self, celsius: f64) -> DriverResult<()> {
        info!("Test Controller: set target setpoint {celsius:.1}");
        self.setpoint = celsius;
        Ok(())
    }

    fn target_setpoint(&mut self) -> DriverResult<f64> {
        Ok(self.setpoint)
    }

    fn process_variable(&mut self) -> DriverResult<f64> {
        Ok(self.setpoint)
    }
}

/// Heater that ramps its working setpoint at `rate` °C/min and lags behind it.
///
/// Every read of the process variable advances the simulation by one step.
#[derive(Debug)]
pub struct RampingHeater {
    target: f64,
    working: f64,
    process: f64,
    rate: f64,
}

impl RampingHeater {
    /// Creates a heater at 0 °C ramping at 5 °C/min.
    pub fn new() -> Self {
        Self {
            target: 0.0,
            working: 0.0,
            process: 0.0,
            rate: 5.0,
        }
    }

    /// The current working setpoint.
    pub fn working_setpoint(&self) -> f64 {
        self.working
    }

    fn step(&mut self) {
        let delta = self.rate / 60.0;
        self.working = if self.working < self.target {
            (self.working + delta).min(self.target)
        } else {
            (self.working - delta).max(self.target)
        };
        self.process = 0.9 * self.process + 0.1 * self.working;
    }
}

impl Default for RampingHeater {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for RampingHeater {
    fn close(&mut self) -> DriverResult<()> {
        info!("Nice Test Controller closed");
        Ok(())
    }
}

impl Heater for RampingHeater {
    fn set_target_setpoint(&mut self, celsius: f64) -> DriverResult<()> {
        info!("Nice Test Controller: set target setpoint {celsius:.1}");
        self.target = celsius;
        Ok(())
    }

    fn target_setpoint(&mut self) -> DriverResult<f64> {
        Ok(self.target)
    }

    fn process_variable(&mut self) -> DriverResult<f64> {
        self.step();
        Ok(self.process)
    }
}

/// Sensor reading a constant room temperature.
#[derive(Debug, Default)]
pub struct SimulatedSensor;

impl SimulatedSensor {
    /// Creates the sensor.
    pub fn new() -> Self {
        Self
    }
}

impl Device for SimulatedSensor {
    fn close(&mut self) -> DriverResult<()> {
        info!("Test Sensor closed");
        Ok(())
    }
}

impl TemperatureSensor for SimulatedSensor {
    fn read_temperature(&mut self) -> DriverResult<f64> {
        Ok(ROOM_TEMPERATURE)
    }
}

/// Flow controller remembering its setpoints; measured flow equals set flow.
#[derive(Debug, Default)]
pub struct SimulatedMfc {
    flows: [f64; CHANNEL_COUNT as usize],
}

impl SimulatedMfc {
    /// Creates a controller with every channel at 0 %.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Device for SimulatedMfc {
    fn close(&mut self) -> DriverResult<()> {
        info!("Test MFC closed");
        Ok(())
    }
}

impl MassFlowController for SimulatedMfc {
    fn set_flow(&mut self, channel: Channel, percent: f64) -> DriverResult<()> {
        info!("Test MFC: set channel {channel} to {percent:.1}");
        self.flows[channel_index(channel)] = percent;
        Ok(())
    }

    fn read_set_flow(&mut self, channel: Channel) -> DriverResult<f64> {
        Ok(self.flows[channel_index(channel)])
    }

    fn read_flow(&mut self, channel: Channel) -> DriverResult<f64> {
        Ok(self.flows[channel_index(channel)])
    }
}

/// Trigger box remembering its channel states.
#[derive(Debug, Default)]
pub struct SimulatedTriggerBox {
    states: [bool; CHANNEL_COUNT as usize],
}

impl SimulatedTriggerBox {
    /// Creates a box with every channel closed.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Device for SimulatedTriggerBox {
    fn close(&mut self) -> DriverResult<()> {
        info!("Test Trigger closed");
        Ok(())
    }
}

impl ValveController for SimulatedTriggerBox {
    fn switch_valve(&mut self, channel: Channel, open: bool) -> DriverResult<()> {
        info!("Test Trigger: set channel {channel} to {open}");
        self.states[channel_index(channel)] = open;
        Ok(())
    }

    fn valve_state(&mut self, channel: Channel) -> DriverResult<bool> {
        Ok(self.states[channel_index(channel)])
    }
}

/// Multiplexer remembering its relay states.
#[derive(Debug, Default)]
pub struct SimulatedMultiplexer {
    states: RelayStates,
}

impl SimulatedMultiplexer {
    /// Creates a multiplexer with every relay open.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Device for SimulatedMultiplexer {
    fn close(&mut self) -> DriverResult<()> {
        info!("Test Multiplexer closed");
        Ok(())
    }
}

impl RelayMultiplexer for SimulatedMultiplexer {
    fn set_relay(&mut self, relay: Relay, on: bool) -> DriverResult<()> {
        info!("Test Multiplexer: set relay {relay} to {on}");
        self.states.set(relay, on);
        Ok(())
    }

    fn relay(&mut self, relay: Relay) -> DriverResult<bool> {
        Ok(self.states.get(relay))
    }

    fn set_all(&mut self, states: &RelayStates) -> DriverResult<()> {
        self.states = *states;
        Ok(())
    }

    fn read_all(&mut self) -> DriverResult<RelayStates> {
        Ok(self.states)
    }
}
