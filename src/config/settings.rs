//! Application settings using Figment
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. Built-in defaults
//! 2. `settings.toml` in the application directory (optional)
//! 3. Environment variables prefixed with `ELCHI_`
//! 4. Command-line flags (applied by the binary)
//!
//! # Environment Variable Overrides
//!
//! ```text
//! ELCHI_LOG_LEVEL=debug
//! ELCHI_CONFIG_FILE=/path/to/config.yaml
//! ELCHI_CONFIRM_EXIT=false
//! ELCHI_STABILIZATION_TIMEOUT_SECS=7200
//! ```

use crate::error::ConfigError;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the optional settings file inside the application directory.
pub const SETTINGS_FILE: &str = "settings.toml";

/// Name of the action config inside the application directory.
pub const CONFIG_FILE: &str = "config.yaml";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Runtime settings of the commander.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Action config file; defaults to `config.yaml` in the application directory
    #[serde(default)]
    pub config_file: Option<PathBuf>,
    /// Directory of the event and temperature logs; defaults to the application directory
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Console log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Wait for the operator before exiting
    pub confirm_exit: bool,
    /// Countdown shown after a successful action, in seconds
    pub success_delay_secs: u64,
    /// Overrides every driver's serial read timeout
    #[serde(default)]
    pub serial_timeout_ms: Option<u64>,
    /// Gives up stabilizing after this long; unset waits forever
    #[serde(default)]
    pub stabilization_timeout_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_file: None,
            log_dir: None,
            log_level: "info".to_string(),
            confirm_exit: true,
            success_delay_secs: 5,
            serial_timeout_ms: None,
            stabilization_timeout_secs: None,
        }
    }
}

/// Per-user application directory.
///
/// `<config dir>/ElchWorks/ElchiCommander` on Windows, `<config dir>/ElchiCommander`
/// elsewhere. Falls back to the working directory when the platform has none.
pub fn app_dir() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    if cfg!(windows) {
        base.join("ElchWorks").join("ElchiCommander")
    } else {
        base.join("ElchiCommander")
    }
}

impl Settings {
    /// Loads settings from the application directory and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(app_dir().join(SETTINGS_FILE))
    }

    /// Loads settings from a specific file (which may be absent) and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings: Self = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("ELCHI_"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validates settings after loading or after command-line overrides.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Malformed(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }
        if self.serial_timeout_ms == Some(0) {
            return Err(ConfigError::Malformed(
                "Invalid serial_timeout_ms 0. Must be positive".into(),
            ));
        }
        if self.stabilization_timeout_secs == Some(0) {
            return Err(ConfigError::Malformed(
                "Invalid stabilization_timeout_secs 0. Must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Path of the action config.
    pub fn config_path(&self) -> PathBuf {
        self.config_file
            .clone()
            .unwrap_or_else(|| app_dir().join(CONFIG_FILE))
    }

    /// Directory of the logs.
    pub fn log_path(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(app_dir)
    }

    /// Serial timeout override.
    pub fn serial_timeout(&self) -> Option<Duration> {
        self.serial_timeout_ms.map(Duration::from_millis)
    }

    /// Stabilization timeout, if any.
    pub fn stabilization_timeout(&self) -> Option<Duration> {
        self.stabilization_timeout_secs.map(Duration::from_secs)
    }

    /// Countdown after success.
    pub fn success_delay(&self) -> Duration {
        Duration::from_secs(self.success_delay_secs)
    }
}
