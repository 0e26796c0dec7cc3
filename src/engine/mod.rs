//! Action execution engine.
//!
//! One [`Engine::execute`] call runs one persisted action:
//!
//! ```text
//! Idle -> Resolving -> Executing -> Closing -> Done
//!              \            \           \
//!               +------------+-----------+--> Failed
//! ```
//!
//! - **Resolving**: operands and device references are checked, then every device
//!   the action names is opened. Nothing is written to hardware before this succeeds.
//! - **Executing**: channel writes happen in ascending channel order and stop at the
//!   first failure; channels after it are left untouched.
//! - **Closing**: every opened device is closed, whether execution succeeded or not.
//!   A failing close is reported but does not change the outcome.
//!
//! An `iterate_list` action runs the next pending child action and records it as
//! processed; see [`sequencer`](self::sequencer).

pub mod sequencer;
pub mod stabilization;

pub use stabilization::{Clock, ManualClock, StabilizationParams, Stabilized, SystemClock};

use crate::config::actions::{SetFlow, SetMultiplexer, SetTemperature, SetTrigger};
use crate::config::{Action, Config, ConfigStore, Settings};
use crate::error::{CommanderError, CommanderResult, ConfigError, DriverError};
use crate::hardware::{Capability, Connector, DriverHandle};
use crate::journal::Journal;
use crate::registry::DeviceRegistry;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where the engine is within one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    /// Nothing started yet
    Idle,
    /// Checking operands and opening devices
    Resolving,
    /// Writing to devices
    Executing,
    /// Releasing devices
    Closing,
    /// Finished successfully
    Done,
    /// Finished with an error
    Failed,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionState::Idle => "idle",
            ExecutionState::Resolving => "resolving",
            ExecutionState::Executing => "executing",
            ExecutionState::Closing => "closing",
            ExecutionState::Done => "done",
            ExecutionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a successful action did.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// All writes were acknowledged
    Completed,
    /// Setpoint written and the sensor converged
    Stabilized(Stabilized),
    /// One child of a sequence ran and was recorded as processed
    SequenceStep {
        /// Id of the child action
        executed: u32,
        /// Children processed so far, including this one
        processed: usize,
        /// Children in the sequence
        total: usize,
        /// Outcome of the child
        step: Box<Outcome>,
    },
    /// Every child had already run; nothing was done
    SequenceComplete,
}

/// A device that did not close cleanly.
#[derive(Debug)]
pub struct CloseFailure {
    /// Device id
    pub device: String,
    /// The close error
    pub error: DriverError,
}

/// Result of one successful [`Engine::execute`] call.
#[derive(Debug)]
pub struct ExecutionReport {
    /// The requested action
    pub action_id: u32,
    /// What it did
    pub outcome: Outcome,
    /// Devices that failed to close afterwards
    pub close_failures: Vec<CloseFailure>,
}

/// Executes actions of one config.
pub struct Engine<'a> {
    config: Config,
    connector: &'a dyn Connector,
    store: &'a dyn ConfigStore,
    journal: Journal,
    clock: Box<dyn Clock + 'a>,
    serial_timeout: Option<Duration>,
    stabilization_timeout: Option<Duration>,
    state: ExecutionState,
}

impl<'a> Engine<'a> {
    /// Engine over `config`, opening ports through `connector` and recording sequence
    /// progress in `store`.
    pub fn new(
        config: Config,
        connector: &'a dyn Connector,
        store: &'a dyn ConfigStore,
        journal: Journal,
    ) -> Self {
        Self {
            config,
            connector,
            store,
            journal,
            clock: Box::new(SystemClock),
            serial_timeout: None,
            stabilization_timeout: None,
            state: ExecutionState::Idle,
        }
    }

    /// Applies the timeouts from `settings`.
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        self.serial_timeout = settings.serial_timeout();
        self.stabilization_timeout = settings.stabilization_timeout();
        self
    }

    /// Replaces the wall clock used while stabilizing.
    pub fn with_clock(mut self, clock: impl Clock + 'a) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Gives up stabilizing after `timeout`.
    pub fn with_stabilization_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stabilization_timeout = timeout;
        self
    }

    /// The config, including sequence progress recorded by this engine.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> ExecutionState {
        self.state
    }

    /// Executes action `action_id`.
    ///
    /// On error, every device that was opened has been closed again and no sequence
    /// progress was recorded.
    pub fn execute(&mut self, action_id: u32) -> CommanderResult<ExecutionReport> {
        self.state = ExecutionState::Idle;
        let result = self.dispatch(action_id);
        if result.is_err() {
            self.transition(ExecutionState::Failed);
        }
        result
    }

    fn dispatch(&mut self, action_id: u32) -> CommanderResult<ExecutionReport> {
        let action = self.config.action(action_id)?.clone();
        self.journal
            .event(&format!("Executing action {action_id}: {action}"));

        match action {
            Action::IterateList(list) => self.run_sequence(action_id, &list),
            other => self.run_action(action_id, &other),
        }
    }

    fn transition(&mut self, next: ExecutionState) {
        debug!("Engine state {} -> {}", self.state, next);
        self.state = next;
    }

    /// Resolves, performs and closes one non-sequence action.
    fn run_action(&mut self, action_id: u32, action: &Action) -> CommanderResult<ExecutionReport> {
        self.transition(ExecutionState::Resolving);
        self.config.check_action(action)?;
        let mut devices = self.open_devices(action)?;

        self.transition(ExecutionState::Executing);
        let result = self.perform(action, &mut devices);

        self.transition(ExecutionState::Closing);
        let close_failures = self.close_devices(devices);

        let outcome = result?;
        self.transition(ExecutionState::Done);
        Ok(ExecutionReport {
            action_id,
            outcome,
            close_failures,
        })
    }

    fn open_devices(&self, action: &Action) -> CommanderResult<Vec<(String, DriverHandle)>> {
        let registry = DeviceRegistry::new(&self.config, self.connector)
            .with_timeout(self.serial_timeout);

        let mut devices = Vec::new();
        for (id, capability) in action.device_refs() {
            match registry.resolve(id, capability) {
                Ok(handle) => devices.push((id.to_string(), handle)),
                Err(e) => {
                    for failure in self.close_devices(devices) {
                        warn!("Device '{}' failed to close: {}", failure.device, failure.error);
                    }
                    return Err(e);
                }
            }
        }
        Ok(devices)
    }

    fn close_devices(&self, devices: Vec<(String, DriverHandle)>) -> Vec<CloseFailure> {
        let mut failures = Vec::new();
        for (device, mut handle) in devices {
            match handle.close() {
                Ok(()) => debug!("Closed '{device}'"),
                Err(error) => {
                    warn!("Failed to close '{device}': {error}");
                    self.journal
                        .event(&format!("WARNING: failed to close {device}: {error}"));
                    failures.push(CloseFailure { device, error });
                }
            }
        }
        failures
    }

    fn perform(
        &self,
        action: &Action,
        devices: &mut [(String, DriverHandle)],
    ) -> CommanderResult<Outcome> {
        match (action, devices) {
            (Action::SetTemperature(a), [(heater_id, heater), (sensor_id, sensor)]) => {
                self.set_temperature(a, (heater_id.as_str(), heater), (sensor_id.as_str(), sensor))
            }
            (Action::SetTemperatureBlind(a), [(id, handle)]) => {
                let heater = handle
                    .as_heater()
                    .ok_or_else(|| not_a(id.as_str(), Capability::Heater))?;
                heater
                    .set_target_setpoint(a.target)
                    .map_err(|e| CommanderError::driver(id.as_str(), "setting target temperature", e))?;
                info!("'{id}' setpoint set to {} °C", a.target);
                Ok(Outcome::Completed)
            }
            (Action::SetFlow(a), [(id, handle)]) => set_flow(a, id.as_str(), handle),
            (Action::SetTrigger(a), [(id, handle)]) => set_trigger(a, id.as_str(), handle),
            (Action::SetMultiplexer(a), [(id, handle)]) => {
                set_multiplexer(a, id.as_str(), handle)
            }
            (action, devices) => Err(ConfigError::Malformed(format!(
                "Action type {} cannot run with {} device(s)",
                action.kind(),
                devices.len()
            ))
            .into()),
        }
    }

    fn set_temperature(
        &self,
        action: &SetTemperature,
        (heater_id, heater): (&str, &mut DriverHandle),
        (sensor_id, sensor): (&str, &mut DriverHandle),
    ) -> CommanderResult<Outcome> {
        let heater = heater
            .as_heater()
            .ok_or_else(|| not_a(heater_id, Capability::Heater))?;
        let sensor = sensor
            .as_sensor()
            .ok_or_else(|| not_a(sensor_id, Capability::TempSensor))?;
        let params = StabilizationParams::from_action(action, self.stabilization_timeout)?;

        heater
            .set_target_setpoint(action.target)
            .map_err(|e| CommanderError::driver(heater_id, "setting target temperature", e))?;
        info!("'{heater_id}' setpoint set to {} °C", action.target);

        let result = stabilization::stabilize(sensor_id, sensor, &params, self.clock.as_ref())?;
        self.journal
            .event(&format!("Temperature stable: {}", result.reading));
        self.journal.temperature(action.target, result.reading);
        Ok(Outcome::Stabilized(result))
    }
}

fn set_flow(action: &SetFlow, id: &str, handle: &mut DriverHandle) -> CommanderResult<Outcome> {
    let mfc = handle
        .as_flow_controller()
        .ok_or_else(|| not_a(id, Capability::FlowController))?;
    for (channel, &percent) in action.flows.iter() {
        mfc.set_flow(channel, percent).map_err(|e| {
            CommanderError::driver(id, format!("setting flow on channel {channel}"), e)
        })?;
        info!("'{id}' channel {channel} set to {percent} %");
    }
    Ok(Outcome::Completed)
}

fn set_trigger(action: &SetTrigger, id: &str, handle: &mut DriverHandle) -> CommanderResult<Outcome> {
    let triggerbox = handle
        .as_triggerbox()
        .ok_or_else(|| not_a(id, Capability::Triggerbox))?;
    for (channel, state) in action.states.iter() {
        triggerbox.switch_valve(channel, state.0).map_err(|e| {
            CommanderError::driver(id, format!("switching valve on channel {channel}"), e)
        })?;
        info!("'{id}' channel {channel} switched {}", on_off(state.0));
    }
    Ok(Outcome::Completed)
}

fn set_multiplexer(
    action: &SetMultiplexer,
    id: &str,
    handle: &mut DriverHandle,
) -> CommanderResult<Outcome> {
    let multiplexer = handle
        .as_multiplexer()
        .ok_or_else(|| not_a(id, Capability::Multiplexer))?;
    for (relay, state) in action.relays.iter() {
        multiplexer
            .set_relay(relay, state.0)
            .map_err(|e| CommanderError::driver(id, format!("switching relay {relay}"), e))?;
        info!("'{id}' relay {relay} switched {}", on_off(state.0));
    }
    Ok(Outcome::Completed)
}

fn on_off(state: bool) -> &'static str {
    if state {
        "on"
    } else {
        "off"
    }
}

/// An opened handle of the wrong kind; resolution checks capabilities first, so this
/// only shows up if a driver reports a capability it does not implement.
fn not_a(id: &str, expected: Capability) -> CommanderError {
    ConfigError::Malformed(format!("Device '{id}' was opened but does not act as a {expected}"))
        .into()
}
