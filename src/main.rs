//! ElchiCommander command-line entry point.
//!
//! ```bash
//! elchi_commander 3                      # execute action 3
//! elchi_commander --check                # validate every action, touch no hardware
//! RUST_LOG=elchi_commander=debug elchi_commander --no-confirm 12
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use elchi_commander::config::{Config, ConfigStore, Settings, YamlConfigStore};
use elchi_commander::engine::{Engine, ExecutionReport, Outcome};
use elchi_commander::error::CommanderResult;
use elchi_commander::hardware::serial::SerialConnector;
use elchi_commander::journal::Journal;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Executes one action of the ElchiCommander config.
#[derive(Debug, Parser)]
#[command(name = "elchi_commander")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Executes one persisted laboratory instrument action")]
struct Cli {
    /// Id of the action to execute
    #[arg(
        value_name = "ACTION_ID",
        required_unless_present = "check",
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    action_id: Option<u32>,

    /// Action config file (defaults to config.yaml in the application directory)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory of the event and temperature logs
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Exit without waiting for the operator
    #[arg(long)]
    no_confirm: bool,

    /// Load the config and check every action without touching hardware
    #[arg(long)]
    check: bool,

    /// Serial read timeout for every device, in milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(config) = &self.config {
            settings.config_file = Some(config.clone());
        }
        if let Some(dir) = &self.log_dir {
            settings.log_dir = Some(dir.clone());
        }
        if self.no_confirm {
            settings.confirm_exit = false;
        }
        if let Some(ms) = self.timeout_ms {
            settings.serial_timeout_ms = Some(ms);
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match bootstrap(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let journal = Journal::new(settings.log_path());
    journal.event("ElchiCommander started!");

    let result = if cli.check {
        check(&settings, &journal)
    } else {
        match cli.action_id {
            Some(id) => run(id, &settings, &journal),
            None => Ok(()),
        }
    };
    journal.event("ElchiCommander finished!");

    match result {
        Ok(()) => {
            if settings.confirm_exit {
                countdown(settings.success_delay());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            journal.error(&e.to_string());
            if settings.confirm_exit {
                wait_for_enter();
            }
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}

/// Loads settings, applies the command line and starts console logging.
fn bootstrap(cli: &Cli) -> Result<Settings> {
    let mut settings = Settings::load().context("Failed to load settings")?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_level))
        .context("Invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    Ok(settings)
}

fn load_config(settings: &Settings, journal: &Journal) -> CommanderResult<(YamlConfigStore, Config)> {
    let store = YamlConfigStore::new(settings.config_path());
    let config = store.load()?;
    journal.event("Config loaded and validated successfully!");
    Ok((store, config))
}

fn run(action_id: u32, settings: &Settings, journal: &Journal) -> CommanderResult<()> {
    journal.event(&format!("Action {action_id} requested!"));
    let (store, config) = load_config(settings, journal)?;

    let connector = SerialConnector;
    let mut engine =
        Engine::new(config, &connector, &store, journal.clone()).with_settings(settings);
    let report = engine.execute(action_id)?;
    report_success(&report, journal);
    Ok(())
}

fn report_success(report: &ExecutionReport, journal: &Journal) {
    for failure in &report.close_failures {
        println!("Warning: {} did not close cleanly: {}", failure.device, failure.error);
    }
    match &report.outcome {
        Outcome::SequenceComplete => journal.event(&format!(
            "Action list {} is complete, nothing left to execute",
            report.action_id
        )),
        Outcome::SequenceStep {
            executed,
            processed,
            total,
            ..
        } => journal.event(&format!(
            "Action {executed} executed successfully! ({processed} of {total} in action list {})",
            report.action_id
        )),
        Outcome::Completed | Outcome::Stabilized(_) => {
            journal.event("Action executed successfully!")
        }
    }
}

/// Checks every action; the first failure decides the exit code.
fn check(settings: &Settings, journal: &Journal) -> CommanderResult<()> {
    let (_, config) = load_config(settings, journal)?;
    let mut failures = config.check_all();
    for (id, error) in &failures {
        println!("Action {id}: {error}");
    }
    if failures.is_empty() {
        journal.event(&format!("All {} actions are valid", config.actions.len()));
        return Ok(());
    }
    let (id, first) = failures.remove(0);
    journal.event(&format!("{} invalid actions, first is {id}", failures.len() + 1));
    Err(first)
}

fn countdown(delay: Duration) {
    let secs = delay.as_secs();
    if secs == 0 {
        return;
    }
    println!("Done, exiting in {secs} seconds!");
    for remaining in (1..=secs).rev() {
        print!("{remaining}... ");
        let _ = io::stdout().flush();
        std::thread::sleep(Duration::from_secs(1));
    }
    println!();
}

fn wait_for_enter() {
    println!("Press enter to exit!");
    let mut line = String::new();
    let _ = io::stdin().lock().read_line(&mut line);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_action_id_must_be_positive() {
        assert!(Cli::try_parse_from(["elchi_commander", "0"]).is_err());
        assert!(Cli::try_parse_from(["elchi_commander"]).is_err());
        let cli = Cli::try_parse_from(["elchi_commander", "--no-confirm", "7"]).unwrap();
        assert_eq!(cli.action_id, Some(7));
    }

    #[test]
    fn test_check_needs_no_action() {
        let cli = Cli::try_parse_from(["elchi_commander", "--check"]).unwrap();
        assert!(cli.check);
        assert_eq!(cli.action_id, None);
    }

    #[test]
    fn test_flags_override_settings() {
        let cli = Cli::try_parse_from([
            "elchi_commander",
            "--config",
            "/tmp/c.yaml",
            "--no-confirm",
            "--timeout-ms",
            "250",
            "3",
        ])
        .unwrap();
        let mut settings = Settings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.config_path(), PathBuf::from("/tmp/c.yaml"));
        assert!(!settings.confirm_exit);
        assert_eq!(settings.serial_timeout(), Some(Duration::from_millis(250)));
    }
}
