//! Temperature stabilization loop.
//!
//! After a setpoint is written, the sensor is polled until its reading has stayed
//! within `max_drift` for at least `stable_window`:
//!
//! 1. Read a baseline and start a countdown of `stable_window`.
//! 2. Once `poll_interval` has passed since the last poll, read again.
//! 3. If the reading moved more than `max_drift` away from the reference, restart the
//!    countdown and take the new reading as reference. Otherwise subtract one
//!    `poll_interval` from the countdown.
//! 4. Converge when the countdown reaches zero.
//!
//! The loop blocks the calling thread. Time is read through a [`Clock`] so tests can
//! run it without sleeping.

use crate::config::actions::SetTemperature;
use crate::error::{CommanderError, CommanderResult, ValidationError};
use crate::hardware::TemperatureSensor;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Source of time for the loop.
pub trait Clock {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Blocks for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock that only advances when slept on.
///
/// Clones share the same time, so a test can keep one to inspect elapsed time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl ManualClock {
    /// Clock frozen at the current instant.
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Moves time forward.
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    /// Total time slept so far.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Parameters of one stabilization run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilizationParams {
    /// Largest change still counted as stable, °C
    pub max_drift: f64,
    /// How long the reading must stay stable
    pub stable_window: Duration,
    /// Minimum time between two polls
    pub poll_interval: Duration,
    /// Give up after this long; `None` waits forever
    pub timeout: Option<Duration>,
}

fn seconds(field: &str, value: f64) -> Result<Duration, ValidationError> {
    Duration::try_from_secs_f64(value).map_err(|_| ValidationError {
        field: field.to_string(),
        value,
        min: 0.0,
        max: f64::MAX,
    })
}

impl StabilizationParams {
    /// Parameters of a temperature action.
    pub fn from_action(
        action: &SetTemperature,
        timeout: Option<Duration>,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            max_drift: action.max_drift,
            stable_window: seconds("delta_time", action.stable_window)?,
            poll_interval: seconds("time_res", action.poll_interval)?,
            timeout,
        })
    }
}

/// Result of a converged run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stabilized {
    /// Last reading, taken when the countdown ran out
    pub reading: f64,
    /// Polls after the baseline reading
    pub polls: u32,
    /// Countdown restarts caused by drift
    pub resets: u32,
    /// Time from the baseline reading to convergence
    pub elapsed: Duration,
}

/// Blocks until `sensor` is stable.
///
/// Fails on the first sensor error, or with
/// [`CommanderError::StabilizationTimeout`] once `params.timeout` has passed.
pub fn stabilize(
    sensor_id: &str,
    sensor: &mut dyn TemperatureSensor,
    params: &StabilizationParams,
    clock: &dyn Clock,
) -> CommanderResult<Stabilized> {
    let mut read = || {
        sensor
            .read_temperature()
            .map_err(|e| CommanderError::driver(sensor_id, "reading temperature", e))
    };

    info!(
        "Waiting until '{sensor_id}' changes by less than {} °C over {:?}, checking every {:?}",
        params.max_drift, params.stable_window, params.poll_interval
    );

    let start = clock.now();
    let mut reference = read()?;
    let mut last_poll = clock.now();
    let mut remaining = params.stable_window;
    let mut polls = 0;
    let mut resets = 0;

    loop {
        let now = clock.now();
        let waited = now.duration_since(start);
        if let Some(timeout) = params.timeout {
            if waited >= timeout {
                return Err(CommanderError::StabilizationTimeout {
                    sensor: sensor_id.to_string(),
                    waited,
                });
            }
        }

        let since_poll = now.duration_since(last_poll);
        if since_poll < params.poll_interval {
            let mut pause = params.poll_interval - since_poll;
            if let Some(timeout) = params.timeout {
                pause = pause.min(timeout - waited);
            }
            clock.sleep(pause);
            continue;
        }

        let reading = read()?;
        last_poll = clock.now();
        polls += 1;

        if (reading - reference).abs() > params.max_drift {
            resets += 1;
            remaining = params.stable_window;
            debug!(
                "'{sensor_id}' read {reading}, deviation from {reference} larger than {}, resetting countdown",
                params.max_drift
            );
            reference = reading;
        } else {
            remaining = remaining.saturating_sub(params.poll_interval);
            debug!("'{sensor_id}' read {reading}, {remaining:?} remaining");
        }

        if remaining.is_zero() {
            let elapsed = clock.now().duration_since(start);
            info!("'{sensor_id}' stable at {reading} after {polls} polls ({resets} resets)");
            return Ok(Stabilized {
                reading,
                polls,
                resets,
                elapsed,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DriverResult, ProtocolError};
    use crate::hardware::Device;
    use std::collections::VecDeque;

    /// Replays readings; repeats the last one when the script runs out.
    struct ScriptedSensor {
        readings: VecDeque<f64>,
        last: f64,
        reads: usize,
        fail_at: Option<usize>,
    }

    impl ScriptedSensor {
        fn new(readings: &[f64]) -> Self {
            Self {
                readings: readings.iter().copied().collect(),
                last: 0.0,
                reads: 0,
                fail_at: None,
            }
        }
    }

    impl Device for ScriptedSensor {
        fn close(&mut self) -> DriverResult<()> {
            Ok(())
        }
    }

    impl TemperatureSensor for ScriptedSensor {
        fn read_temperature(&mut self) -> DriverResult<f64> {
            self.reads += 1;
            if self.fail_at == Some(self.reads) {
                return Err(ProtocolError::new("garbled").into());
            }
            if let Some(next) = self.readings.pop_front() {
                self.last = next;
            }
            Ok(self.last)
        }
    }

    fn params(timeout: Option<Duration>) -> StabilizationParams {
        StabilizationParams {
            max_drift: 0.5,
            stable_window: Duration::from_secs(3),
            poll_interval: Duration::from_secs(1),
            timeout,
        }
    }

    #[test]
    fn test_constant_reading_converges_after_window() {
        let mut sensor = ScriptedSensor::new(&[100.0, 100.0, 100.0, 100.0]);
        let clock = ManualClock::new();
        let result = stabilize("tc", &mut sensor, &params(None), &clock).unwrap();

        assert_eq!(result.polls, 3);
        assert_eq!(result.resets, 0);
        assert_eq!(result.reading, 100.0);
        assert_eq!(sensor.reads, 4);
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn test_drift_restarts_countdown() {
        let mut sensor = ScriptedSensor::new(&[100.0, 100.0, 102.0, 102.0, 102.0, 102.0]);
        let clock = ManualClock::new();
        let result = stabilize("tc", &mut sensor, &params(None), &clock).unwrap();

        // One poll spent before the jump, then a full window after it.
        assert_eq!(result.resets, 1);
        assert_eq!(result.polls, 5);
        assert_eq!(result.reading, 102.0);
        assert_eq!(clock.elapsed(), Duration::from_secs(5));
    }

    #[test]
    fn test_excursion_and_return_resets_twice() {
        let mut sensor =
            ScriptedSensor::new(&[100.0, 100.0, 102.0, 100.0, 100.0, 100.0, 100.0]);
        let clock = ManualClock::new();
        let result = stabilize("tc", &mut sensor, &params(None), &clock).unwrap();

        assert_eq!(result.resets, 2);
        assert_eq!(result.polls, 6);
    }

    #[test]
    fn test_single_excursion_reanchors_on_jump_and_return() {
        let mut sensor = ScriptedSensor::new(&[100.0, 100.0, 102.0, 100.0, 100.0, 100.0]);
        let clock = ManualClock::new();
        let result = stabilize("tc", &mut sensor, &params(None), &clock).unwrap();

        // 102 becomes the reference, so the return to 100 is a second drift.
        // Comparing against the first reading only would give 1 reset and 5 polls.
        assert_eq!(result.resets, 2);
        assert_eq!(result.polls, 6);
        assert_eq!(result.reading, 100.0);
        assert_eq!(sensor.reads, 7);
        assert_eq!(clock.elapsed(), Duration::from_secs(6));
    }

    #[test]
    fn test_drift_within_tolerance_counts_as_stable() {
        let mut sensor = ScriptedSensor::new(&[100.0, 100.4, 99.6, 100.5]);
        let clock = ManualClock::new();
        let result = stabilize("tc", &mut sensor, &params(None), &clock).unwrap();
        assert_eq!(result.resets, 0);
        assert_eq!(result.polls, 3);
    }

    #[test]
    fn test_window_not_multiple_of_poll_interval() {
        let mut sensor = ScriptedSensor::new(&[20.0]);
        let clock = ManualClock::new();
        let p = StabilizationParams {
            stable_window: Duration::from_millis(2500),
            ..params(None)
        };
        let result = stabilize("tc", &mut sensor, &p, &clock).unwrap();
        assert_eq!(result.polls, 3);
    }

    #[test]
    fn test_timeout_gives_up() {
        let oscillating: Vec<f64> = (0..100).map(|i| if i % 2 == 0 { 100.0 } else { 105.0 }).collect();
        let mut sensor = ScriptedSensor::new(&oscillating);
        let clock = ManualClock::new();
        let err = stabilize("tc", &mut sensor, &params(Some(Duration::from_secs(10))), &clock)
            .unwrap_err();

        match err {
            CommanderError::StabilizationTimeout { sensor, waited } => {
                assert_eq!(sensor, "tc");
                assert_eq!(waited, Duration::from_secs(10));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(clock.elapsed(), Duration::from_secs(10));
    }

    #[test]
    fn test_sensor_failure_aborts() {
        let mut sensor = ScriptedSensor::new(&[100.0]);
        sensor.fail_at = Some(2);
        let clock = ManualClock::new();
        let err = stabilize("tc", &mut sensor, &params(None), &clock).unwrap_err();
        assert!(err.to_string().contains("when reading temperature"));
        assert_eq!(err.exit_code(), 5);
    }

    #[test]
    fn test_params_from_action() {
        let action = SetTemperature {
            heater: "oven".into(),
            temp_sensor: "tc".into(),
            target: 400.0,
            max_drift: 0.5,
            stable_window: 60.0,
            poll_interval: 2.5,
        };
        let p = StabilizationParams::from_action(&action, None).unwrap();
        assert_eq!(p.stable_window, Duration::from_secs(60));
        assert_eq!(p.poll_interval, Duration::from_millis(2500));
    }
}
