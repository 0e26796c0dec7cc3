//! Eurotherm 3216 / 2408 temperature controllers.
//!
//! Both models expose the same Modbus parameter addresses for the values used here:
//!
//! | Register | Parameter |
//! |----------|-----------|
//! | 1 | process variable |
//! | 2 | target setpoint |
//! | 3 | output power (%) |
//! | 5 | working setpoint |
//!
//! All values are signed with one decimal.

use crate::error::DriverResult;
use crate::hardware::modbus::{ModbusRtu, Register};
use crate::hardware::{Device, Heater, Link};

const PROCESS_VARIABLE: Register = Register::signed(1, 1);
const TARGET_SETPOINT: Register = Register::signed(2, 1);
const OUTPUT_POWER: Register = Register::signed(3, 1);
const WORKING_SETPOINT: Register = Register::signed(5, 1);

/// Default Modbus address of a Eurotherm controller.
pub const DEFAULT_SLAVE: u8 = 1;

/// Driver for Eurotherm controllers.
pub struct Eurotherm {
    modbus: ModbusRtu,
}

impl Eurotherm {
    /// Wraps an opened link, talking to the default slave address.
    pub fn new(link: Link) -> Self {
        Self {
            modbus: ModbusRtu::new(link, DEFAULT_SLAVE),
        }
    }

    /// Current output power, in percent.
    pub fn output_power(&mut self) -> DriverResult<f64> {
        self.modbus.read_register(OUTPUT_POWER)
    }

    /// The ramped setpoint the controller currently regulates to.
    pub fn working_setpoint(&mut self) -> DriverResult<f64> {
        self.modbus.read_register(WORKING_SETPOINT)
    }
}

impl Device for Eurotherm {
    fn close(&mut self) -> DriverResult<()> {
        Ok(self.modbus.link().close()?)
    }
}

impl Heater for Eurotherm {
    fn set_target_setpoint(&mut self, celsius: f64) -> DriverResult<()> {
        self.modbus.write_register(TARGET_SETPOINT, celsius)
    }

    fn target_setpoint(&mut self) -> DriverResult<f64> {
        self.modbus.read_register(TARGET_SETPOINT)
    }

    fn process_variable(&mut self) -> DriverResult<f64> {
        self.modbus.read_register(PROCESS_VARIABLE)
    }
}
