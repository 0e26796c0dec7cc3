//! SCPI-style temperature readers (Thermolino, Thermoplatino, Keithley 2000).
//!
//! On connect the instrument is switched to temperature mode with `:FUNC 'TEMP'`;
//! every reading is a `:read?` query answered by one decimal line.

use crate::error::DriverResult;
use crate::hardware::ascii::{AsciiLine, Framing};
use crate::hardware::{Device, Link, TemperatureSensor};
use tracing::debug;

const SELECT_TEMPERATURE: &str = ":FUNC 'TEMP'";
const READ: &str = ":read?";

/// Driver for SCPI temperature readers.
pub struct ScpiSensor {
    line: AsciiLine,
}

impl ScpiSensor {
    /// Wraps an opened link and selects temperature mode.
    pub fn open(link: Link) -> DriverResult<Self> {
        let line = AsciiLine::new(link, Framing::SCPI);
        line.send(SELECT_TEMPERATURE)?;
        debug!("SCPI sensor on '{}' set to temperature mode", line.link().port());
        Ok(Self { line })
    }
}

impl Device for ScpiSensor {
    fn close(&mut self) -> DriverResult<()> {
        Ok(self.line.link().close()?)
    }
}

impl TemperatureSensor for ScpiSensor {
    fn read_temperature(&mut self) -> DriverResult<f64> {
        self.line.query_value(READ)
    }
}
