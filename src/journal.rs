//! Append-only event and temperature logs.
//!
//! Two text files per day live in the log directory:
//!
//! - `log_YYYY-MM-DD.txt`: `<local ISO-8601 time>, <UTC epoch>: <message>`, errors
//!   prefixed with `ERROR: `
//! - `temperature_log_YYYY-MM-DD.txt`: `<local time>, <UTC epoch>, <setpoint>, <actual>`
//!
//! Failing to write a log line never aborts an action; it is reported as a warning.

use chrono::{DateTime, Local};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Writer of the per-day log files.
#[derive(Debug, Clone)]
pub struct Journal {
    dir: PathBuf,
}

impl Journal {
    /// Journal writing into `dir` (created on first write).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The log directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the event log for the day of `now`.
    pub fn event_log_path(&self, now: &DateTime<Local>) -> PathBuf {
        self.dir.join(format!("log_{}.txt", now.format("%Y-%m-%d")))
    }

    /// Path of the temperature log for the day of `now`.
    pub fn temperature_log_path(&self, now: &DateTime<Local>) -> PathBuf {
        self.dir
            .join(format!("temperature_log_{}.txt", now.format("%Y-%m-%d")))
    }

    /// Records an event.
    pub fn event(&self, message: &str) {
        info!("{message}");
        let now = Local::now();
        self.append(&self.event_log_path(&now), &event_line(&now, message));
    }

    /// Records a fatal error.
    pub fn error(&self, message: &str) {
        error!("{message}");
        let now = Local::now();
        let line = event_line(&now, &format!("ERROR: {message}"));
        self.append(&self.event_log_path(&now), &line);
    }

    /// Records the reading a temperature action converged on.
    pub fn temperature(&self, setpoint: f64, actual: f64) {
        let now = Local::now();
        self.append(
            &self.temperature_log_path(&now),
            &temperature_line(&now, setpoint, actual),
        );
    }

    fn append(&self, path: &Path, line: &str) {
        let result = std::fs::create_dir_all(&self.dir).and_then(|()| {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(file, "{line}")
        });
        if let Err(e) = result {
            warn!("Could not write to log {}: {e}", path.display());
        }
    }
}

fn stamp(now: &DateTime<Local>) -> String {
    format!(
        "{}, {}.{:06}",
        now.format(TIMESTAMP_FORMAT),
        now.timestamp(),
        now.timestamp_subsec_micros()
    )
}

/// Formats one event log line.
pub fn event_line(now: &DateTime<Local>, message: &str) -> String {
    format!("{}: {message}", stamp(now))
}

/// Formats one temperature log line.
pub fn temperature_line(now: &DateTime<Local>, setpoint: f64, actual: f64) -> String {
    format!("{}, {setpoint:.2}, {actual:.2}", stamp(now))
}
