//! Instrument driver catalogue.
//!
//! [`DriverKind`] is the closed set of driver names accepted in the `device` field of a
//! device entry. Each kind knows its capability, the serial profile it needs, and how
//! to build its driver on an opened [`Link`].
//!
//! Kinds whose name starts with `Test` are simulated: they need no transport and are
//! meant for dry runs of a config.

pub mod elchworks;
pub mod eurotherm;
pub mod scpi_sensor;
pub mod simulated;

use crate::error::DriverResult;
use crate::hardware::{Capability, DriverHandle, Link, LinkProfile};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const HALF_SECOND: Duration = Duration::from_millis(500);
const SENSOR_TIMEOUT: Duration = Duration::from_millis(1500);

/// How a driver reaches its device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connection {
    /// No transport; the driver is simulated
    Simulated,
    /// Serial port with the given parameters
    Serial(LinkProfile),
}

/// Driver implementation selected by a device entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriverKind {
    /// Eurotherm 3216 controller (Modbus)
    Eurotherm3216,
    /// Eurotherm 2408 controller (Modbus)
    Eurotherm2408,
    /// ElchWorks heater controller (Modbus)
    #[serde(rename = "Elch Heater Controller")]
    ElchHeaterController,
    /// ElchWorks laser heater controller (Modbus)
    #[serde(rename = "Elchi Laser Control")]
    ElchiLaserControl,
    /// Simulated heater that reaches its setpoint instantly
    #[serde(rename = "Test Controller")]
    TestController,
    /// Simulated heater ramping towards its setpoint
    #[serde(rename = "Nice Test Controller")]
    NiceTestController,
    /// ElchWorks thermocouple reader (SCPI, 9600 Bd)
    Thermolino,
    /// ElchWorks Pt100 reader (SCPI, 115200 Bd)
    Thermoplatino,
    /// Keithley 2000 multimeter in temperature mode (SCPI)
    #[serde(rename = "Keithly2000", alias = "Keithley2000")]
    Keithly2000,
    /// Simulated sensor
    #[serde(rename = "Test Sensor")]
    TestSensor,
    /// ElchWorks four-channel MFC box (ASCII)
    Ventolino,
    /// Aera ROD-4 MFC power supply (ASCII)
    #[serde(rename = "Area ROD-4")]
    AreaRod4,
    /// Simulated MFC box
    #[serde(rename = "Test MFC")]
    TestMfc,
    /// ElchWorks four-channel valve box (ASCII)
    Valvolino,
    /// Omni trigger box, Valvolino protocol (ASCII)
    #[serde(rename = "Omni Trigger")]
    OmniTrigger,
    /// Simulated trigger box
    #[serde(rename = "Test Trigger")]
    TestTrigger,
    /// ElchWorks 4x4 relay multiplexer (Modbus coils)
    Omniplex,
    /// Simulated multiplexer
    #[serde(rename = "Test Multiplexer")]
    TestMultiplexer,
}

impl DriverKind {
    /// Every known kind.
    pub const ALL: [DriverKind; 18] = [
        DriverKind::Eurotherm3216,
        DriverKind::Eurotherm2408,
        DriverKind::ElchHeaterController,
        DriverKind::ElchiLaserControl,
        DriverKind::TestController,
        DriverKind::NiceTestController,
        DriverKind::Thermolino,
        DriverKind::Thermoplatino,
        DriverKind::Keithly2000,
        DriverKind::TestSensor,
        DriverKind::Ventolino,
        DriverKind::AreaRod4,
        DriverKind::TestMfc,
        DriverKind::Valvolino,
        DriverKind::OmniTrigger,
        DriverKind::TestTrigger,
        DriverKind::Omniplex,
        DriverKind::TestMultiplexer,
    ];

    /// Name as written in the config file.
    pub fn name(self) -> &'static str {
        match self {
            DriverKind::Eurotherm3216 => "Eurotherm3216",
            DriverKind::Eurotherm2408 => "Eurotherm2408",
            DriverKind::ElchHeaterController => "Elch Heater Controller",
            DriverKind::ElchiLaserControl => "Elchi Laser Control",
            DriverKind::TestController => "Test Controller",
            DriverKind::NiceTestController => "Nice Test Controller",
            DriverKind::Thermolino => "Thermolino",
            DriverKind::Thermoplatino => "Thermoplatino",
            DriverKind::Keithly2000 => "Keithly2000",
            DriverKind::TestSensor => "Test Sensor",
            DriverKind::Ventolino => "Ventolino",
            DriverKind::AreaRod4 => "Area ROD-4",
            DriverKind::TestMfc => "Test MFC",
            DriverKind::Valvolino => "Valvolino",
            DriverKind::OmniTrigger => "Omni Trigger",
            DriverKind::TestTrigger => "Test Trigger",
            DriverKind::Omniplex => "Omniplex",
            DriverKind::TestMultiplexer => "Test Multiplexer",
        }
    }

    /// The capability this driver provides.
    pub fn capability(self) -> Capability {
        match self {
            DriverKind::Eurotherm3216
            | DriverKind::Eurotherm2408
            | DriverKind::ElchHeaterController
            | DriverKind::ElchiLaserControl
            | DriverKind::TestController
            | DriverKind::NiceTestController => Capability::Heater,
            DriverKind::Thermolino
            | DriverKind::Thermoplatino
            | DriverKind::Keithly2000
            | DriverKind::TestSensor => Capability::TempSensor,
            DriverKind::Ventolino | DriverKind::AreaRod4 | DriverKind::TestMfc => {
                Capability::FlowController
            }
            DriverKind::Valvolino | DriverKind::OmniTrigger | DriverKind::TestTrigger => {
                Capability::Triggerbox
            }
            DriverKind::Omniplex | DriverKind::TestMultiplexer => Capability::Multiplexer,
        }
    }

    /// Kinds valid for `capability`.
    pub fn for_capability(capability: Capability) -> impl Iterator<Item = DriverKind> {
        Self::ALL
            .into_iter()
            .filter(move |kind| kind.capability() == capability)
    }

    /// How the driver reaches its device.
    pub fn connection(self) -> Connection {
        let profile = match self {
            DriverKind::Eurotherm3216 | DriverKind::Eurotherm2408 => {
                LinkProfile::new(9600, HALF_SECOND)
            }
            DriverKind::ElchHeaterController | DriverKind::ElchiLaserControl => {
                LinkProfile::new(9600, HALF_SECOND).with_settle(Duration::from_secs(1))
            }
            DriverKind::Thermolino | DriverKind::Keithly2000 => {
                LinkProfile::new(9600, SENSOR_TIMEOUT).with_settle(Duration::from_secs(1))
            }
            DriverKind::Thermoplatino => {
                LinkProfile::new(115_200, SENSOR_TIMEOUT).with_settle(Duration::from_secs(1))
            }
            DriverKind::Ventolino
            | DriverKind::AreaRod4
            | DriverKind::Valvolino
            | DriverKind::OmniTrigger => LinkProfile::new(9600, HALF_SECOND),
            DriverKind::Omniplex => {
                LinkProfile::new(9600, HALF_SECOND).with_settle(Duration::from_secs(2))
            }
            DriverKind::TestController
            | DriverKind::NiceTestController
            | DriverKind::TestSensor
            | DriverKind::TestMfc
            | DriverKind::TestTrigger
            | DriverKind::TestMultiplexer => return Connection::Simulated,
        };
        Connection::Serial(profile)
    }

    /// Serial parameters of the physical device; `None` for simulated kinds.
    pub fn link_profile(self) -> Option<LinkProfile> {
        match self.connection() {
            Connection::Serial(profile) => Some(profile),
            Connection::Simulated => None,
        }
    }

    /// Whether the driver runs without hardware.
    pub fn is_simulated(self) -> bool {
        self.connection() == Connection::Simulated
    }

    /// Builds the simulated driver standing in for this kind's capability.
    pub fn simulate(self) -> DriverHandle {
        simulated::build(self.capability(), self == DriverKind::NiceTestController)
    }

    /// Builds the driver on an opened link.
    ///
    /// Drivers that initialise the instrument on connect (SCPI sensors) do so here.
    /// Simulated kinds ignore the link.
    pub fn open(self, link: Link) -> DriverResult<DriverHandle> {
        let handle = match self {
            DriverKind::Eurotherm3216 | DriverKind::Eurotherm2408 => {
                DriverHandle::Heater(Box::new(eurotherm::Eurotherm::new(link)))
            }
            DriverKind::ElchHeaterController | DriverKind::ElchiLaserControl => {
                DriverHandle::Heater(Box::new(elchworks::ElchLaser::new(link)))
            }
            DriverKind::Thermolino | DriverKind::Thermoplatino | DriverKind::Keithly2000 => {
                DriverHandle::TempSensor(Box::new(scpi_sensor::ScpiSensor::open(link)?))
            }
            DriverKind::Ventolino | DriverKind::AreaRod4 => {
                DriverHandle::FlowController(Box::new(elchworks::Ventolino::new(link)))
            }
            DriverKind::Valvolino | DriverKind::OmniTrigger => {
                DriverHandle::Triggerbox(Box::new(elchworks::Valvolino::new(link)))
            }
            DriverKind::Omniplex => {
                DriverHandle::Multiplexer(Box::new(elchworks::Omniplex::new(link)))
            }
            DriverKind::TestController
            | DriverKind::NiceTestController
            | DriverKind::TestSensor
            | DriverKind::TestMfc
            | DriverKind::TestTrigger
            | DriverKind::TestMultiplexer => self.simulate(),
        };
        Ok(handle)
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockTransport;

    #[test]
    fn test_names_round_trip_through_yaml() {
        for kind in DriverKind::ALL {
            let parsed: DriverKind = serde_yaml::from_str(&format!("'{}'", kind.name())).unwrap();
            assert_eq!(parsed, kind);
            assert_eq!(serde_yaml::to_string(&kind).unwrap().trim_matches(['\n', '\'']), kind.name());
        }
    }

    #[test]
    fn test_keithley_spelling_alias() {
        let parsed: DriverKind = serde_yaml::from_str("Keithley2000").unwrap();
        assert_eq!(parsed, DriverKind::Keithly2000);
    }

    #[test]
    fn test_every_capability_has_a_simulated_kind() {
        for kind in DriverKind::ALL.into_iter().filter(|k| k.is_simulated()) {
            let handle = kind.simulate();
            assert_eq!(handle.capability(), kind.capability());
        }
        assert_eq!(DriverKind::for_capability(Capability::Multiplexer).count(), 2);
        assert_eq!(DriverKind::for_capability(Capability::Heater).count(), 6);
    }

    #[test]
    fn test_link_profiles() {
        let omniplex = DriverKind::Omniplex.link_profile().unwrap();
        assert_eq!(omniplex.settle, Duration::from_secs(2));
        assert_eq!(DriverKind::Thermoplatino.link_profile().unwrap().baud_rate, 115_200);
        assert!(DriverKind::TestSensor.link_profile().is_none());
    }

    #[test]
    fn test_open_builds_matching_capability() {
        for kind in [DriverKind::Ventolino, DriverKind::Valvolino, DriverKind::Omniplex, DriverKind::Eurotherm3216] {
            let link = Link::new(Box::new(MockTransport::new("COM1")));
            let handle = kind.open(link).unwrap();
            assert_eq!(handle.capability(), kind.capability());
        }
    }
}
