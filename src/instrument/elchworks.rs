//! ElchWorks instrument drivers.
//!
//! - [`Ventolino`]: four-channel MFC box. Speaks the Aera ROD-4 command set, so it also
//!   drives ROD-4 supplies.
//! - [`Valvolino`]: four-channel valve box, also used for Omni trigger boxes.
//! - [`ElchLaser`]: Modbus heater controller.
//! - [`Omniplex`]: 4x4 relay multiplexer, Modbus coils.
//!
//! # Wire formats
//!
//! ASCII commands are `STX` + `{channel:02}{mnemonic}{value}` + `CR`:
//!
//! | Command | Meaning | Response |
//! |---------|---------|----------|
//! | `03SFD50.0` | set flow of channel 3 to 50.0 % | `rec\r\n` or nothing |
//! | `03RFD` | read flow setpoint | decimal line |
//! | `03RFX` | read measured flow | decimal line |
//! | `02SSP1` | open valve 2 | `rec\r\n` or nothing |
//! | `02RSP` | read valve 2 | `0` or `1` |

use crate::error::DriverResult;
use crate::hardware::ascii::{channel_command, AsciiLine, Framing, REC_ACK};
use crate::hardware::modbus::{ModbusRtu, Register};
use crate::hardware::{
    Channel, Device, Heater, Link, MassFlowController, Relay, RelayMultiplexer, RelayStates,
    ValveController, RELAY_COUNT,
};
use tracing::debug;

/// Modbus slave address of ElchWorks controllers.
pub const DEFAULT_SLAVE: u8 = 1;

/// Driver for Ventolino MFC boxes and Aera ROD-4 supplies.
pub struct Ventolino {
    line: AsciiLine,
}

impl Ventolino {
    /// Wraps an opened link.
    pub fn new(link: Link) -> Self {
        Self {
            line: AsciiLine::new(link, Framing::STX_CR),
        }
    }
}

impl Device for Ventolino {
    fn close(&mut self) -> DriverResult<()> {
        Ok(self.line.link().close()?)
    }
}

impl MassFlowController for Ventolino {
    fn set_flow(&mut self, channel: Channel, percent: f64) -> DriverResult<()> {
        let value = format!("{percent:3.1}");
        let command = channel_command(channel.number(), "SFD", Some(&value));
        debug!("Ventolino: {command}");
        self.line.command_ack(&command, REC_ACK)
    }

    fn read_set_flow(&mut self, channel: Channel) -> DriverResult<f64> {
        self.line
            .query_value(&channel_command(channel.number(), "RFD", None))
    }

    fn read_flow(&mut self, channel: Channel) -> DriverResult<f64> {
        self.line
            .query_value(&channel_command(channel.number(), "RFX", None))
    }
}

/// Driver for Valvolino valve boxes and Omni trigger boxes.
pub struct Valvolino {
    line: AsciiLine,
}

impl Valvolino {
    /// Wraps an opened link.
    pub fn new(link: Link) -> Self {
        Self {
            line: AsciiLine::new(link, Framing::STX_CR),
        }
    }
}

impl Device for Valvolino {
    fn close(&mut self) -> DriverResult<()> {
        Ok(self.line.link().close()?)
    }
}

impl ValveController for Valvolino {
    fn switch_valve(&mut self, channel: Channel, open: bool) -> DriverResult<()> {
        let state = if open { "1" } else { "0" };
        let command = channel_command(channel.number(), "SSP", Some(state));
        debug!("Valvolino: {command}");
        self.line.command_ack(&command, REC_ACK)
    }

    fn valve_state(&mut self, channel: Channel) -> DriverResult<bool> {
        self.line
            .query_flag(&channel_command(channel.number(), "RSP", None))
    }
}

/// Control mode of an [`ElchLaser`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    /// PID control towards the working setpoint
    Automatic,
    /// Fixed manual output power
    Manual,
}

/// Register map of the ElchWorks heater controller.
mod laser_registers {
    use super::Register;

    pub const PROCESS_VARIABLE: Register = Register::signed(0, 1);
    pub const TARGET_SETPOINT: Register = Register::signed(1, 1);
    pub const MANUAL_OUTPUT: Register = Register::unsigned(2, 2);
    pub const WORKING_OUTPUT: Register = Register::unsigned(3, 2);
    pub const WORKING_SETPOINT: Register = Register::signed(4, 1);
    pub const RATE: Register = Register::unsigned(5, 1);
    pub const MODE: Register = Register::unsigned(6, 0);
    pub const ENABLE: Register = Register::unsigned(10, 0);
}

/// Driver for the ElchWorks heater ("Elch Heater Controller", "Elchi Laser Control").
pub struct ElchLaser {
    modbus: ModbusRtu,
}

impl ElchLaser {
    /// Wraps an opened link, talking to slave 1.
    pub fn new(link: Link) -> Self {
        Self {
            modbus: ModbusRtu::new(link, DEFAULT_SLAVE),
        }
    }

    /// Sets the output power used in manual mode, in percent.
    pub fn set_manual_output_power(&mut self, percent: f64) -> DriverResult<()> {
        self.modbus
            .write_register(laser_registers::MANUAL_OUTPUT, percent)
    }

    /// Current output power, in percent.
    pub fn working_output(&mut self) -> DriverResult<f64> {
        self.modbus.read_register(laser_registers::WORKING_OUTPUT)
    }

    /// The ramped setpoint the controller currently regulates to.
    pub fn working_setpoint(&mut self) -> DriverResult<f64> {
        self.modbus.read_register(laser_registers::WORKING_SETPOINT)
    }

    /// Sets the heating/cooling rate of the working setpoint.
    pub fn set_rate(&mut self, rate: f64) -> DriverResult<()> {
        self.modbus.write_register(laser_registers::RATE, rate)
    }

    /// Heating/cooling rate of the working setpoint.
    pub fn rate(&mut self) -> DriverResult<f64> {
        self.modbus.read_register(laser_registers::RATE)
    }

    /// Switches between automatic and manual control.
    pub fn set_control_mode(&mut self, mode: ControlMode) -> DriverResult<()> {
        let raw = match mode {
            ControlMode::Automatic => 0.0,
            ControlMode::Manual => 1.0,
        };
        self.modbus.write_register(laser_registers::MODE, raw)
    }

    /// Active control mode. Any non-zero register value means manual.
    pub fn control_mode(&mut self) -> DriverResult<ControlMode> {
        let raw = self.modbus.read_register(laser_registers::MODE)?;
        Ok(if raw == 0.0 {
            ControlMode::Automatic
        } else {
            ControlMode::Manual
        })
    }

    /// Enables or disables the heater output.
    pub fn set_output_enabled(&mut self, enabled: bool) -> DriverResult<()> {
        let raw = if enabled { 1.0 } else { 0.0 };
        self.modbus.write_register(laser_registers::ENABLE, raw)
    }
}

impl Device for ElchLaser {
    fn close(&mut self) -> DriverResult<()> {
        Ok(self.modbus.link().close()?)
    }
}

impl Heater for ElchLaser {
    fn set_target_setpoint(&mut self, celsius: f64) -> DriverResult<()> {
        self.modbus
            .write_register(laser_registers::TARGET_SETPOINT, celsius)
    }

    fn target_setpoint(&mut self) -> DriverResult<f64> {
        self.modbus.read_register(laser_registers::TARGET_SETPOINT)
    }

    fn process_variable(&mut self) -> DriverResult<f64> {
        self.modbus.read_register(laser_registers::PROCESS_VARIABLE)
    }
}

/// Driver for the Omniplex relay multiplexer.
///
/// Relay `L<row>R<col>` is coil `(row - 1) * 4 + (col - 1)`.
pub struct Omniplex {
    modbus: ModbusRtu,
}

impl Omniplex {
    /// Wraps an opened link, talking to slave 1.
    pub fn new(link: Link) -> Self {
        Self {
            modbus: ModbusRtu::new(link, DEFAULT_SLAVE),
        }
    }
}

impl Device for Omniplex {
    fn close(&mut self) -> DriverResult<()> {
        Ok(self.modbus.link().close()?)
    }
}

impl RelayMultiplexer for Omniplex {
    fn set_relay(&mut self, relay: Relay, on: bool) -> DriverResult<()> {
        debug!("Omniplex: set {relay} (coil {}) to {on}", relay.to_address());
        self.modbus.write_coil(relay.to_address(), on)
    }

    fn relay(&mut self, relay: Relay) -> DriverResult<bool> {
        let coils = self.modbus.read_coils(relay.to_address(), 1)?;
        Ok(coils.first().copied().unwrap_or_default())
    }

    fn set_all(&mut self, states: &RelayStates) -> DriverResult<()> {
        self.modbus.write_coils(0, states.bits())
    }

    fn read_all(&mut self) -> DriverResult<RelayStates> {
        let coils = self.modbus.read_coils(0, RELAY_COUNT)?;
        let mut bits = [false; RELAY_COUNT as usize];
        for (bit, coil) in bits.iter_mut().zip(coils) {
            *bit = coil;
        }
        Ok(RelayStates::from_bits(bits))
    }
}
