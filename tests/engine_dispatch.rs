//! Engine dispatch against mock serial ports and simulated drivers.

use elchi_commander::config::{Config, YamlConfigStore};
use elchi_commander::engine::{Engine, ExecutionState, ManualClock, Outcome};
use elchi_commander::error::{CommanderError, ConfigError, DriverError, ValidationError};
use elchi_commander::hardware::mock::{MockConnector, MockTransport};
use elchi_commander::journal::Journal;
use chrono::Local;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const DEVICES: &str = "\
devices:
  mfc:
    type: flow_controller
    device: Ventolino
    port: COM5
  valves:
    type: triggerbox
    device: Valvolino
    port: COM7
  tb:
    type: triggerbox
    device: Test Trigger
    port: SIM
  mux:
    type: multiplexer
    device: Test Multiplexer
    port: SIM
  oven:
    type: heater
    device: Test Controller
    port: SIM
  tc:
    type: temp_sensor
    device: Thermolino
    port: COM6
";

struct Fixture {
    dir: TempDir,
    store: YamlConfigStore,
    config: Config,
}

impl Fixture {
    fn new(actions: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let text = format!("{DEVICES}actions:\n{actions}");
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, &text).unwrap();
        let config = Config::from_yaml(&text, &path).unwrap();
        Self {
            store: YamlConfigStore::new(path),
            config,
            dir,
        }
    }

    fn journal(&self) -> Journal {
        Journal::new(self.dir.path().join("logs"))
    }

    fn engine<'a>(&'a self, connector: &'a MockConnector) -> Engine<'a> {
        Engine::new(self.config.clone(), connector, &self.store, self.journal())
            .with_clock(ManualClock::new())
    }

    fn event_log(&self) -> String {
        read_or_empty(&self.journal().event_log_path(&Local::now()))
    }

    fn temperature_log(&self) -> String {
        read_or_empty(&self.journal().temperature_log_path(&Local::now()))
    }
}

fn read_or_empty(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}

fn acking(port: &str) -> MockTransport {
    MockTransport::new(port).with_responder(|_| Some(b"rec\r\n".to_vec()))
}

/// SCPI sensor replaying `readings`, repeating the last one.
fn scripted_sensor(port: &str, readings: Vec<f64>) -> MockTransport {
    let last = readings.last().copied().unwrap_or_default();
    let mut readings = readings.into_iter();
    MockTransport::new(port).with_responder(move |request| {
        (request == b":read?\n")
            .then(|| format!("{}\n", readings.next().unwrap_or(last)).into_bytes())
    })
}

#[test]
fn test_flow_out_of_bounds_never_touches_hardware() {
    let fixture = Fixture::new(
        "  1:\n    type: gas_ctrl\n    flow_controller: mfc\n    flow_1: 20\n    flow_3: 150\n",
    );
    let connector = MockConnector::new();
    let probe = connector.attach(acking("COM5"));
    let mut engine = fixture.engine(&connector);

    let err = engine.execute(1).unwrap_err();
    assert!(matches!(
        &err,
        CommanderError::Validation(ValidationError { field, value, .. })
            if field == "flow_3" && *value == 150.0
    ));
    assert_eq!(err.exit_code(), 3);
    assert!(connector.opened().is_empty());
    assert!(probe.writes().is_empty());
    assert_eq!(engine.state(), ExecutionState::Failed);
}

#[test]
fn test_flow_channels_written_in_ascending_order() {
    let fixture = Fixture::new(
        "  1:\n    type: gas_ctrl\n    flow_controller: mfc\n    flow_4: 0\n    flow_2: 10\n",
    );
    let connector = MockConnector::new();
    let probe = connector.attach(acking("COM5"));
    let mut engine = fixture.engine(&connector);

    let report = engine.execute(1).unwrap();
    assert_eq!(report.outcome, Outcome::Completed);
    assert!(report.close_failures.is_empty());
    assert_eq!(
        probe.writes(),
        vec![b"\x0202SFD10.0\r".to_vec(), b"\x0204SFD0.0\r".to_vec()]
    );
    assert!(probe.is_closed());
    assert_eq!(engine.state(), ExecutionState::Done);
    assert!(fixture
        .event_log()
        .contains("Executing action 1: Setting flow controller mfc to: flow_2: 10, flow_4: 0"));
}

#[test]
fn test_first_failing_channel_aborts_remaining_channels() {
    let fixture = Fixture::new(
        "  1:\n    type: gas_ctrl\n    flow_controller: mfc\n    flow_1: 5\n    flow_2: 10\n    flow_3: 15\n",
    );
    let connector = MockConnector::new();
    let probe = connector.attach(MockTransport::new("COM5").with_responder(|request| {
        if request.starts_with(b"\x0202") {
            Some(b"err\r\n".to_vec())
        } else {
            Some(b"rec\r\n".to_vec())
        }
    }));
    let mut engine = fixture.engine(&connector);

    match engine.execute(1).unwrap_err() {
        CommanderError::Driver {
            device,
            operation,
            source: DriverError::Protocol(_),
        } => {
            assert_eq!(device, "mfc");
            assert_eq!(operation, "setting flow on channel 2");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(probe.writes().len(), 2);
    assert!(probe.is_closed());
}

#[test]
fn test_trigger_states_accept_bool_and_integer() {
    let fixture = Fixture::new(
        "  1:\n    type: trigger\n    triggerbox: valves\n    state_3: false\n    state_1: 1\n",
    );
    let connector = MockConnector::new();
    let probe = connector.attach(acking("COM7"));
    let mut engine = fixture.engine(&connector);

    engine.execute(1).unwrap();
    assert_eq!(
        probe.writes(),
        vec![b"\x0201SSP1\r".to_vec(), b"\x0203SSP0\r".to_vec()]
    );
}

#[test]
fn test_simulated_devices_need_no_port() {
    let fixture = Fixture::new(
        "  1:\n    type: multiplexer\n    multiplexer: mux\n    state_L1R2: 1\n    state_L4R4: 0\n  2:\n    type: trigger\n    triggerbox: tb\n    state_2: true\n  3:\n    type: set_temp_blind\n    heater: oven\n    t_set: 300\n",
    );
    let connector = MockConnector::new();
    let mut engine = fixture.engine(&connector);

    for id in 1..=3 {
        assert_eq!(engine.execute(id).unwrap().outcome, Outcome::Completed);
    }
    assert!(connector.opened().is_empty());
}

#[test]
fn test_unknown_action_and_device_references() {
    let fixture = Fixture::new(
        "  1:\n    type: gas_ctrl\n    flow_controller: ghost\n    flow_1: 5\n  2:\n    type: gas_ctrl\n    flow_controller: tb\n    flow_1: 5\n",
    );
    let connector = MockConnector::new();
    let mut engine = fixture.engine(&connector);

    let err = engine.execute(42).unwrap_err();
    assert!(matches!(err, CommanderError::Config(ConfigError::ActionNotFound(42))));
    assert_eq!(err.exit_code(), 2);

    assert!(matches!(
        engine.execute(1),
        Err(CommanderError::Config(ConfigError::UnknownDevice(id))) if id == "ghost"
    ));
    assert!(matches!(
        engine.execute(2),
        Err(CommanderError::Config(ConfigError::CapabilityMismatch { .. }))
    ));
    assert!(connector.opened().is_empty());
}

#[test]
fn test_missing_port_is_transport_error() {
    let fixture = Fixture::new(
        "  1:\n    type: gas_ctrl\n    flow_controller: mfc\n    flow_1: 5\n",
    );
    let connector = MockConnector::new();
    let mut engine = fixture.engine(&connector);

    let err = engine.execute(1).unwrap_err();
    assert_eq!(err.exit_code(), 4);
    assert!(err.to_string().contains("when opening"));
}

#[test]
fn test_close_failure_does_not_revert_success() {
    let fixture = Fixture::new(
        "  1:\n    type: gas_ctrl\n    flow_controller: mfc\n    flow_1: 5\n",
    );
    let connector = MockConnector::new();
    let probe = connector.attach(acking("COM5"));
    probe.inject_close_failure();
    let mut engine = fixture.engine(&connector);

    let report = engine.execute(1).unwrap();
    assert_eq!(report.outcome, Outcome::Completed);
    assert_eq!(report.close_failures.len(), 1);
    assert_eq!(report.close_failures[0].device, "mfc");
    assert_eq!(probe.close_calls(), 1);
    assert_eq!(engine.state(), ExecutionState::Done);
}

#[test]
fn test_set_temp_waits_for_stable_reading() {
    let fixture = Fixture::new(
        "  1:\n    type: set_temp\n    heater: oven\n    temp_sensor: tc\n    t_set: 400\n    delta_temp: 0.5\n    delta_time: 3\n    time_res: 1\n",
    );
    let connector = MockConnector::new();
    let probe = connector.attach(scripted_sensor(
        "COM6",
        vec![380.0, 398.0, 399.8, 400.1, 400.0, 400.2, 400.1],
    ));
    let mut engine = fixture.engine(&connector);

    let report = engine.execute(1).unwrap();
    let Outcome::Stabilized(result) = &report.outcome else {
        panic!("unexpected outcome: {:?}", report.outcome);
    };
    // 380 -> 398 and 398 -> 399.8 reset the countdown, then three polls within 0.5.
    assert_eq!(result.resets, 2);
    assert_eq!(result.polls, 5);
    assert_eq!(result.reading, 400.2);

    assert_eq!(probe.writes()[0], b":FUNC 'TEMP'\n".to_vec());
    assert_eq!(probe.writes().len(), 1 + 6);
    assert!(probe.is_closed());
    assert!(fixture.event_log().contains("Temperature stable: 400.2"));
    assert!(fixture.temperature_log().trim_end().ends_with(", 400.00, 400.20"));
}

#[test]
fn test_set_temp_gives_up_after_timeout() {
    let fixture = Fixture::new(
        "  1:\n    type: set_temp\n    heater: oven\n    temp_sensor: tc\n    t_set: 400\n    delta_temp: 0.5\n    delta_time: 30\n    time_res: 1\n",
    );
    let connector = MockConnector::new();
    let mut toggle = false;
    let probe = connector.attach(MockTransport::new("COM6").with_responder(move |request| {
        (request == b":read?\n").then(|| {
            toggle = !toggle;
            if toggle { b"100\n".to_vec() } else { b"110\n".to_vec() }
        })
    }));
    let mut engine = fixture
        .engine(&connector)
        .with_stabilization_timeout(Some(Duration::from_secs(20)));

    let err = engine.execute(1).unwrap_err();
    assert!(matches!(err, CommanderError::StabilizationTimeout { .. }));
    assert_eq!(err.exit_code(), 7);
    assert!(probe.is_closed());
    assert!(fixture.temperature_log().is_empty());
}
