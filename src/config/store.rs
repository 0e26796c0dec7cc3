//! Persistence of the action config.

use super::Config;
use crate::error::{CommanderError, ConfigError};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Loads and saves the whole config.
pub trait ConfigStore {
    /// Reads and validates the config.
    fn load(&self) -> Result<Config, ConfigError>;

    /// Replaces the persisted config with `config`, all or nothing.
    fn save(&self, config: &Config) -> Result<(), CommanderError>;
}

/// Config stored as a YAML file.
///
/// Saving writes a sibling temporary file and renames it over the original, so a crash
/// leaves either the old or the new file, never a truncated one. Concurrent writers
/// are not coordinated.
#[derive(Debug, Clone)]
pub struct YamlConfigStore {
    path: PathBuf,
}

impl YamlConfigStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist_error(&self, source: std::io::Error) -> CommanderError {
        CommanderError::Persist {
            path: self.path.clone(),
            source,
        }
    }
}

impl ConfigStore for YamlConfigStore {
    fn load(&self) -> Result<Config, ConfigError> {
        Config::load(&self.path)
    }

    fn save(&self, config: &Config) -> Result<(), CommanderError> {
        let yaml = config.to_yaml().map_err(|e| self.persist_error(std::io::Error::other(e)))?;
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };

        let mut file = NamedTempFile::new_in(dir).map_err(|e| self.persist_error(e))?;
        file.write_all(yaml.as_bytes())
            .and_then(|()| file.as_file().sync_all())
            .map_err(|e| self.persist_error(e))?;
        file.persist(&self.path)
            .map_err(|e| self.persist_error(e.error))?;

        debug!("Config written to {}", self.path.display());
        Ok(())
    }
}
