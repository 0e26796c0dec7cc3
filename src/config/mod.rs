//! Action config and application settings.
//!
//! The action config is a YAML file with two sections:
//!
//! ```yaml
//! devices:
//!   oven:
//!     type: heater
//!     device: Eurotherm3216
//!     port: COM3
//! actions:
//!   1:
//!     type: set_temp_blind
//!     heater: oven
//!     t_set: 400
//! ```
//!
//! Loading validates the structure (device entries, action ids, sequence progress).
//! Operand bounds and device references are checked per action by
//! [`Config::check_action`] right before it runs, so one broken action does not block
//! the others.
//!
//! Application settings (paths, log level, timeouts) live in [`settings`].

pub mod actions;
pub mod devices;
pub mod settings;
pub mod store;

pub use actions::{Action, IterateList};
pub use devices::DeviceEntry;
pub use settings::Settings;
pub use store::{ConfigStore, YamlConfigStore};

use crate::error::{CommanderError, ConfigError};
use crate::hardware::Capability;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// The whole action config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Device entries by id
    pub devices: BTreeMap<String, DeviceEntry>,
    /// Action records by id
    pub actions: BTreeMap<u32, Action>,
}

impl Config {
    /// Reads, parses and validates the config at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text, path)
    }

    /// Parses and validates config text; `path` is only used in error messages.
    pub fn from_yaml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Config read from {}:\n{}", path.display(), text);
        config.validate()?;
        Ok(config)
    }

    /// Serializes the config in its persisted form.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Validates structure and sequence invariants.
    ///
    /// Checks:
    /// - Every device entry is well-formed and its driver matches its capability
    /// - Action ids are positive
    /// - Each `iterate_list` only references existing, non-list actions other than
    ///   itself, and its `processed_actions` is a prefix of `action_ids`
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (id, device) in &self.devices {
            device.validate(id)?;
        }

        for (&id, action) in &self.actions {
            if id == 0 {
                return Err(ConfigError::Malformed(
                    "Invalid action id 0. Valid action ids are positive integers".into(),
                ));
            }
            if let Action::IterateList(list) = action {
                self.validate_list(id, list)?;
            }
        }
        Ok(())
    }

    fn validate_list(&self, id: u32, list: &IterateList) -> Result<(), ConfigError> {
        if !list.is_consistent() {
            return Err(ConfigError::Malformed(format!(
                "Action {id}: processed actions {:?} do not match the beginning of action_ids {:?}",
                list.processed_actions, list.action_ids
            )));
        }
        for &child in &list.action_ids {
            if child == id {
                return Err(ConfigError::Malformed(format!(
                    "Action {id}: an action list cannot contain itself"
                )));
            }
            match self.actions.get(&child) {
                None => return Err(ConfigError::ActionNotFound(child)),
                Some(Action::IterateList(_)) => {
                    return Err(ConfigError::Malformed(format!(
                        "Action {id}: nested action lists are not supported (action {child})"
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Looks up an action.
    pub fn action(&self, id: u32) -> Result<&Action, ConfigError> {
        self.actions.get(&id).ok_or(ConfigError::ActionNotFound(id))
    }

    /// Looks up a device and checks its capability.
    pub fn device(&self, id: &str, expected: Capability) -> Result<&DeviceEntry, ConfigError> {
        let entry = self
            .devices
            .get(id)
            .ok_or_else(|| ConfigError::UnknownDevice(id.to_string()))?;
        if entry.capability != expected {
            return Err(ConfigError::CapabilityMismatch {
                id: id.to_string(),
                expected: expected.to_string(),
                actual: entry.capability.to_string(),
                driver: entry.driver.to_string(),
            });
        }
        Ok(entry)
    }

    /// Checks an action's operands and device references without touching hardware.
    pub fn check_action(&self, action: &Action) -> Result<(), CommanderError> {
        action.validate()?;
        for (device, capability) in action.device_refs() {
            self.device(device, capability)?;
        }
        Ok(())
    }

    /// Runs [`Config::check_action`] on every action, collecting the failures.
    pub fn check_all(&self) -> Vec<(u32, CommanderError)> {
        self.actions
            .iter()
            .filter_map(|(&id, action)| self.check_action(action).err().map(|e| (id, e)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;

    const CONFIG: &str = "\
devices:
  oven:
    type: heater
    device: Eurotherm3216
    port: COM3
  tc:
    type: temp_sensor
    device: Thermolino
    port: COM4
  mfc:
    type: flow_controller
    device: Ventolino
    port: COM5
actions:
  1:
    type: set_temp
    heater: oven
    temp_sensor: tc
    t_set: 400
    delta_temp: 0.5
    delta_time: 60
    time_res: 5
  2:
    type: gas_ctrl
    flow_controller: mfc
    flow_1: 20
  3:
    type: iterate_list
    action_ids: [1, 2]
    processed_actions: [1]
";

    fn parse(text: &str) -> Result<Config, ConfigError> {
        Config::from_yaml(text, Path::new("config.yaml"))
    }

    #[test]
    fn test_load_valid_config() {
        let config = parse(CONFIG).unwrap();
        assert_eq!(config.devices.len(), 3);
        assert_eq!(config.action(2).unwrap().kind(), "gas_ctrl");
        assert!(config.check_all().is_empty());
    }

    #[test]
    fn test_missing_action() {
        let config = parse(CONFIG).unwrap();
        assert!(matches!(config.action(9), Err(ConfigError::ActionNotFound(9))));
    }

    #[test]
    fn test_device_lookup_errors() {
        let config = parse(CONFIG).unwrap();
        assert!(matches!(
            config.device("ghost", Capability::Heater),
            Err(ConfigError::UnknownDevice(_))
        ));
        let err = config.device("mfc", Capability::Heater).unwrap_err();
        assert!(matches!(err, ConfigError::CapabilityMismatch { .. }));
        assert!(err.to_string().contains("flow_controller (Ventolino)"));
    }

    #[test]
    fn test_inconsistent_progress_rejected() {
        let text = CONFIG.replace("processed_actions: [1]", "processed_actions: [2]");
        let err = parse(&text).unwrap_err();
        assert!(err.to_string().contains("do not match"));
    }

    #[test]
    fn test_list_references_checked() {
        let missing = CONFIG.replace("action_ids: [1, 2]", "action_ids: [1, 2, 4]");
        assert!(matches!(parse(&missing), Err(ConfigError::ActionNotFound(4))));

        let self_ref = CONFIG.replace("action_ids: [1, 2]", "action_ids: [1, 3]");
        assert!(parse(&self_ref).unwrap_err().to_string().contains("cannot contain itself"));

        let nested = format!(
            "{CONFIG}  4:\n    type: iterate_list\n    action_ids: [3]\n"
        );
        assert!(parse(&nested).unwrap_err().to_string().contains("nested"));
    }

    #[test]
    fn test_zero_action_id_rejected() {
        let text = CONFIG.replace("  2:\n    type: gas_ctrl", "  0:\n    type: gas_ctrl")
            .replace("action_ids: [1, 2]", "action_ids: [1]");
        assert!(parse(&text).unwrap_err().to_string().contains("positive"));
    }

    #[test]
    fn test_check_action_reports_bounds_and_references() {
        let text = CONFIG.replace("flow_1: 20", "flow_1: 120");
        let config = parse(&text).unwrap();
        let failures = config.check_all();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, 2);
        assert!(matches!(
            &failures[0].1,
            CommanderError::Validation(ValidationError { field, .. }) if field == "flow_1"
        ));

        let text = CONFIG.replace("flow_controller: mfc", "flow_controller: tc");
        let config = parse(&text).unwrap();
        assert!(matches!(
            config.check_action(config.action(2).unwrap()),
            Err(CommanderError::Config(ConfigError::CapabilityMismatch { .. }))
        ));
    }

    #[test]
    fn test_invalid_yaml_is_parse_error() {
        assert!(matches!(
            parse("devices: [unclosed"),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(parse("actions: {}\n"), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = parse(CONFIG).unwrap();
        let reparsed = parse(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(reparsed, config);
    }
}
