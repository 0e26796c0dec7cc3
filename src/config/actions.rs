//! Action records.
//!
//! Actions are persisted as maps tagged by a `type` field. Channel operands are stored
//! as flat keys (`flow_3`, `state_2`, `state_L1R4`) next to the device reference, so the
//! channel maps below parse and write those keys themselves.

use crate::error::ValidationError;
use crate::hardware::{Capability, Channel, Relay, CHANNEL_COUNT, RELAY_COUNT};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

/// Bounds of the target temperature, °C.
pub const T_SET_RANGE: (f64, f64) = (-200.0, 1500.0);
/// Bounds of the allowed drift, °C.
pub const DELTA_TEMP_RANGE: (f64, f64) = (0.01, 100.0);
/// Bounds of the stability window, s.
pub const DELTA_TIME_RANGE: (f64, f64) = (1.0, 1e6);
/// Bounds of the polling interval, s.
pub const TIME_RES_RANGE: (f64, f64) = (1.0, 100.0);
/// Bounds of a flow setpoint, percent.
pub const FLOW_RANGE: (f64, f64) = (0.0, 100.0);

static FLOW_KEY: Lazy<Regex> = Lazy::new(|| key_pattern(r"^flow_([1-4])$"));
static STATE_KEY: Lazy<Regex> = Lazy::new(|| key_pattern(r"^state_([1-4])$"));
static RELAY_KEY: Lazy<Regex> = Lazy::new(|| key_pattern(r"^state_L([1-4])R([1-4])$"));

#[allow(clippy::expect_used)]
fn key_pattern(pattern: &str) -> Regex {
    Regex::new(pattern).expect("channel key patterns are literals")
}

fn capture_u8(captures: &regex::Captures<'_>, group: usize) -> Option<u8> {
    captures.get(group)?.as_str().parse().ok()
}

/// How the channels of one action kind are named in the config file.
pub trait KeyScheme {
    /// Parsed channel identifier.
    type Key: Ord + Copy + fmt::Debug + fmt::Display;

    /// Human-readable list of valid keys, for error messages.
    const EXPECTED: &'static str;

    /// Upper bound on the number of channels.
    const CAPACITY: usize;

    /// Parses a key such as `flow_3`.
    fn parse(key: &str) -> Option<Self::Key>;

    /// Formats a key back into its persisted form.
    fn format(key: Self::Key) -> String;
}

/// `flow_1` .. `flow_4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlowKeys;

impl KeyScheme for FlowKeys {
    type Key = Channel;
    const EXPECTED: &'static str = "flow_1, flow_2, flow_3 and flow_4";
    const CAPACITY: usize = CHANNEL_COUNT as usize;

    fn parse(key: &str) -> Option<Channel> {
        let captures = FLOW_KEY.captures(key)?;
        Channel::new(capture_u8(&captures, 1)?)
    }

    fn format(key: Channel) -> String {
        format!("flow_{key}")
    }
}

/// `state_1` .. `state_4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateKeys;

impl KeyScheme for StateKeys {
    type Key = Channel;
    const EXPECTED: &'static str = "state_1, state_2, state_3 and state_4";
    const CAPACITY: usize = CHANNEL_COUNT as usize;

    fn parse(key: &str) -> Option<Channel> {
        let captures = STATE_KEY.captures(key)?;
        Channel::new(capture_u8(&captures, 1)?)
    }

    fn format(key: Channel) -> String {
        format!("state_{key}")
    }
}

/// `state_L<row>R<col>` with row and column in 1..4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayKeys;

impl KeyScheme for RelayKeys {
    type Key = Relay;
    const EXPECTED: &'static str = "state_LnRm, where n and m are 1 to 4";
    const CAPACITY: usize = RELAY_COUNT as usize;

    fn parse(key: &str) -> Option<Relay> {
        let captures = RELAY_KEY.captures(key)?;
        Relay::new(capture_u8(&captures, 1)?, capture_u8(&captures, 2)?)
    }

    fn format(key: Relay) -> String {
        format!("state_{key}")
    }
}

/// A switch operand, written as `true`/`false` or `1`/`0`.
///
/// Persisted as `1`/`0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch(pub bool);

impl Serialize for Switch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(self.0))
    }
}

impl<'de> Deserialize<'de> for Switch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SwitchVisitor;

        impl Visitor<'_> for SwitchVisitor {
            type Value = Switch;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("0, 1, true or false")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Switch, E> {
                Ok(Switch(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Switch, E> {
                match v {
                    0 => Ok(Switch(false)),
                    1 => Ok(Switch(true)),
                    _ => Err(E::invalid_value(de::Unexpected::Unsigned(v), &self)),
                }
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Switch, E> {
                match u64::try_from(v) {
                    Ok(v) => self.visit_u64(v),
                    Err(_) => Err(E::invalid_value(de::Unexpected::Signed(v), &self)),
                }
            }
        }

        deserializer.deserialize_any(SwitchVisitor)
    }
}

/// Channel operands of one action, keyed by the scheme's channel type.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMap<S: KeyScheme, V> {
    entries: BTreeMap<S::Key, V>,
    scheme: PhantomData<S>,
}

impl<S: KeyScheme, V> ChannelMap<S, V> {
    /// Builds a map from parsed entries.
    pub fn from_entries(entries: impl IntoIterator<Item = (S::Key, V)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
            scheme: PhantomData,
        }
    }

    /// Entries in ascending channel order.
    pub fn iter(&self) -> impl Iterator<Item = (S::Key, &V)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    /// Number of declared channels.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no channel is declared.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rejects an action without any channel.
    fn require_any(&self, field: &str) -> Result<(), ValidationError> {
        // Capacity is at most 16, so the conversion is exact.
        ValidationError::check(field, self.len() as f64, 1.0, S::CAPACITY as f64)
    }
}

impl<S: KeyScheme, V> Default for ChannelMap<S, V> {
    fn default() -> Self {
        Self::from_entries([])
    }
}

impl<S: KeyScheme, V: Serialize> Serialize for ChannelMap<S, V> {
    fn serialize<Ser: Serializer>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(&S::format(*key), value)?;
        }
        map.end()
    }
}

impl<'de, S: KeyScheme, V: Deserialize<'de>> Deserialize<'de> for ChannelMap<S, V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MapVisitor<S, V>(PhantomData<(S, V)>);

        impl<'de, S: KeyScheme, V: Deserialize<'de>> Visitor<'de> for MapVisitor<S, V> {
            type Value = ChannelMap<S, V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "channel entries ({})", S::EXPECTED)
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = BTreeMap::new();
                while let Some(name) = access.next_key::<String>()? {
                    let key = S::parse(&name).ok_or_else(|| {
                        de::Error::custom(format!(
                            "Invalid channel encountered: {name}! Valid channels are: {}",
                            S::EXPECTED
                        ))
                    })?;
                    let value = access.next_value()?;
                    if entries.insert(key, value).is_some() {
                        return Err(de::Error::custom(format!("Duplicate channel {name}")));
                    }
                }
                Ok(ChannelMap::from_entries(entries))
            }
        }

        deserializer.deserialize_map(MapVisitor(PhantomData))
    }
}

/// Flow setpoints in percent, keyed `flow_<n>`.
pub type FlowChannels = ChannelMap<FlowKeys, f64>;

/// Valve states, keyed `state_<n>`.
pub type TriggerChannels = ChannelMap<StateKeys, Switch>;

/// Relay states, keyed `state_L<row>R<col>`.
pub type RelayChannels = ChannelMap<RelayKeys, Switch>;

/// Write a setpoint, then wait for the sensor to stabilize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetTemperature {
    /// Heater device id
    pub heater: String,
    /// Sensor device id
    pub temp_sensor: String,
    /// Target setpoint, °C
    #[serde(rename = "t_set")]
    pub target: f64,
    /// Largest change between polls still counted as stable, °C
    #[serde(rename = "delta_temp")]
    pub max_drift: f64,
    /// How long the reading must stay stable, s
    #[serde(rename = "delta_time")]
    pub stable_window: f64,
    /// Polling interval, s
    #[serde(rename = "time_res")]
    pub poll_interval: f64,
}

/// Write a setpoint without waiting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetTemperatureBlind {
    /// Heater device id
    pub heater: String,
    /// Target setpoint, °C
    #[serde(rename = "t_set")]
    pub target: f64,
}

/// Write flow setpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetFlow {
    /// Flow controller device id
    pub flow_controller: String,
    /// Setpoint per channel
    #[serde(flatten)]
    pub flows: FlowChannels,
}

/// Switch trigger box channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetTrigger {
    /// Trigger box device id
    pub triggerbox: String,
    /// State per channel
    #[serde(flatten)]
    pub states: TriggerChannels,
}

/// Switch multiplexer relays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetMultiplexer {
    /// Multiplexer device id
    pub multiplexer: String,
    /// State per relay
    #[serde(flatten)]
    pub relays: RelayChannels,
}

/// Resumable sequence of other actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterateList {
    /// Actions in execution order
    pub action_ids: Vec<u32>,
    /// Prefix of `action_ids` already executed
    #[serde(default)]
    pub processed_actions: Vec<u32>,
}

impl IterateList {
    /// The next action to execute, or `None` once every action ran.
    pub fn next_action(&self) -> Option<u32> {
        self.action_ids.get(self.processed_actions.len()).copied()
    }

    /// Whether `processed_actions` is a prefix of `action_ids`.
    pub fn is_consistent(&self) -> bool {
        self.action_ids.starts_with(&self.processed_actions)
    }
}

/// One persisted action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Action {
    /// Setpoint plus stabilization wait
    #[serde(rename = "set_temp")]
    SetTemperature(SetTemperature),
    /// Setpoint only
    #[serde(rename = "set_temp_blind")]
    SetTemperatureBlind(SetTemperatureBlind),
    /// Flow setpoints
    #[serde(rename = "gas_ctrl")]
    SetFlow(SetFlow),
    /// Valve states
    #[serde(rename = "trigger")]
    SetTrigger(SetTrigger),
    /// Relay states
    #[serde(rename = "multiplexer")]
    SetMultiplexer(SetMultiplexer),
    /// Sequence of other actions
    #[serde(rename = "iterate_list")]
    IterateList(IterateList),
}

impl Action {
    /// The persisted `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::SetTemperature(_) => "set_temp",
            Action::SetTemperatureBlind(_) => "set_temp_blind",
            Action::SetFlow(_) => "gas_ctrl",
            Action::SetTrigger(_) => "trigger",
            Action::SetMultiplexer(_) => "multiplexer",
            Action::IterateList(_) => "iterate_list",
        }
    }

    /// Devices the action uses, with the capability each must have.
    pub fn device_refs(&self) -> Vec<(&str, Capability)> {
        match self {
            Action::SetTemperature(a) => vec![
                (a.heater.as_str(), Capability::Heater),
                (a.temp_sensor.as_str(), Capability::TempSensor),
            ],
            Action::SetTemperatureBlind(a) => vec![(a.heater.as_str(), Capability::Heater)],
            Action::SetFlow(a) => vec![(a.flow_controller.as_str(), Capability::FlowController)],
            Action::SetTrigger(a) => vec![(a.triggerbox.as_str(), Capability::Triggerbox)],
            Action::SetMultiplexer(a) => vec![(a.multiplexer.as_str(), Capability::Multiplexer)],
            Action::IterateList(_) => Vec::new(),
        }
    }

    /// Checks every operand against its bounds.
    ///
    /// Runs before any device is opened, so a rejected action never touches hardware.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let check = |field: &str, value: f64, (min, max): (f64, f64)| {
            ValidationError::check(field, value, min, max)
        };
        match self {
            Action::SetTemperature(a) => {
                check("t_set", a.target, T_SET_RANGE)?;
                check("delta_temp", a.max_drift, DELTA_TEMP_RANGE)?;
                check("delta_time", a.stable_window, DELTA_TIME_RANGE)?;
                check("time_res", a.poll_interval, TIME_RES_RANGE)
            }
            Action::SetTemperatureBlind(a) => check("t_set", a.target, T_SET_RANGE),
            Action::SetFlow(a) => {
                a.flows.require_any("flow channels")?;
                for (channel, percent) in a.flows.iter() {
                    check(&FlowKeys::format(channel), *percent, FLOW_RANGE)?;
                }
                Ok(())
            }
            Action::SetTrigger(a) => a.states.require_any("trigger channels"),
            Action::SetMultiplexer(a) => a.relays.require_any("multiplexer relays"),
            Action::IterateList(_) => Ok(()),
        }
    }
}

fn join_channels<S: KeyScheme, V>(map: &ChannelMap<S, V>, show: impl Fn(&V) -> String) -> String {
    map.iter()
        .map(|(key, value)| format!("{}: {}", S::format(key), show(value)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn show_switch(switch: &Switch) -> String {
    u8::from(switch.0).to_string()
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::SetTemperature(a) => write!(
                f,
                "Setting temperature of {} to {} and wait until the temperature of {} changes by less than {} for {} seconds",
                a.heater, a.target, a.temp_sensor, a.max_drift, a.stable_window
            ),
            Action::SetTemperatureBlind(a) => {
                write!(f, "Setting temperature of {} to {}", a.heater, a.target)
            }
            Action::SetFlow(a) => write!(
                f,
                "Setting flow controller {} to: {}",
                a.flow_controller,
                join_channels(&a.flows, |v| v.to_string())
            ),
            Action::SetTrigger(a) => write!(
                f,
                "Setting triggerbox {} to: {}",
                a.triggerbox,
                join_channels(&a.states, show_switch)
            ),
            Action::SetMultiplexer(a) => write!(
                f,
                "Setting multiplexer {} to: {}",
                a.multiplexer,
                join_channels(&a.relays, show_switch)
            ),
            Action::IterateList(a) => write!(
                f,
                "Iterating action list {:?} ({} of {} processed)",
                a.action_ids,
                a.processed_actions.len(),
                a.action_ids.len()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Result<Action, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    #[test]
    fn test_parse_set_temp() {
        let action = parse(
            "type: set_temp\nheater: oven\ntemp_sensor: tc\nt_set: 400\ndelta_temp: 0.5\ndelta_time: 60\ntime_res: 5\n",
        )
        .unwrap();
        let Action::SetTemperature(a) = &action else {
            panic!("wrong kind: {action:?}");
        };
        assert_eq!(a.target, 400.0);
        assert_eq!(a.poll_interval, 5.0);
        assert!(action.validate().is_ok());
        assert_eq!(
            action.device_refs(),
            vec![("oven", Capability::Heater), ("tc", Capability::TempSensor)]
        );
    }

    #[test]
    fn test_parse_gas_ctrl_channels() {
        let action = parse("type: gas_ctrl\nflow_controller: mfc\nflow_3: 12.5\nflow_1: 40\n").unwrap();
        let Action::SetFlow(a) = &action else {
            panic!("wrong kind: {action:?}");
        };
        let flows: Vec<_> = a.flows.iter().map(|(c, v)| (c.number(), *v)).collect();
        assert_eq!(flows, vec![(1, 40.0), (3, 12.5)]);
    }

    #[test]
    fn test_invalid_channel_key_rejected() {
        let err = parse("type: gas_ctrl\nflow_controller: mfc\nflow_5: 10\n").unwrap_err();
        assert!(err.to_string().contains("Invalid channel encountered: flow_5"));
        let err = parse("type: multiplexer\nmultiplexer: mux\nstate_L0R2: 1\n").unwrap_err();
        assert!(err.to_string().contains("state_LnRm"));
    }

    #[test]
    fn test_switch_accepts_bool_and_integer() {
        let action = parse("type: trigger\ntriggerbox: tb\nstate_1: true\nstate_2: 0\nstate_4: 1\n").unwrap();
        let Action::SetTrigger(a) = &action else {
            panic!("wrong kind: {action:?}");
        };
        let states: Vec<_> = a.states.iter().map(|(c, s)| (c.number(), s.0)).collect();
        assert_eq!(states, vec![(1, true), (2, false), (4, true)]);
        assert!(parse("type: trigger\ntriggerbox: tb\nstate_1: 2\n").is_err());
    }

    #[test]
    fn test_multiplexer_relays() {
        let action = parse("type: multiplexer\nmultiplexer: mux\nstate_L2R3: 1\nstate_L4R1: false\n").unwrap();
        let Action::SetMultiplexer(a) = &action else {
            panic!("wrong kind: {action:?}");
        };
        let relays: Vec<_> = a.relays.iter().map(|(r, s)| (r.to_string(), s.0)).collect();
        assert_eq!(relays, vec![("L2R3".to_string(), true), ("L4R1".to_string(), false)]);
    }

    #[test]
    fn test_channels_written_back_as_flat_keys() {
        let action = parse("type: multiplexer\nmultiplexer: mux\nstate_L1R4: true\n").unwrap();
        let yaml = serde_yaml::to_string(&action).unwrap();
        assert!(yaml.contains("type: multiplexer"));
        assert!(yaml.contains("state_L1R4: 1"));
        assert_eq!(parse(&yaml).unwrap(), action);
    }

    #[test]
    fn test_bounds() {
        let action = parse("type: gas_ctrl\nflow_controller: mfc\nflow_1: 20\nflow_3: 150\n").unwrap();
        let err = action.validate().unwrap_err();
        assert_eq!(err.field, "flow_3");
        assert_eq!(err.max, 100.0);

        let blind = parse("type: set_temp_blind\nheater: oven\nt_set: -250\n").unwrap();
        assert_eq!(blind.validate().unwrap_err().field, "t_set");

        let temp = parse(
            "type: set_temp\nheater: o\ntemp_sensor: s\nt_set: 20\ndelta_temp: 0.001\ndelta_time: 60\ntime_res: 5\n",
        )
        .unwrap();
        assert_eq!(temp.validate().unwrap_err().field, "delta_temp");
    }

    #[test]
    fn test_action_without_channels_rejected() {
        let action = parse("type: trigger\ntriggerbox: tb\n").unwrap();
        assert!(action.validate().is_err());
    }

    #[test]
    fn test_iterate_list_progress() {
        let action = parse("type: iterate_list\naction_ids: [5, 7, 2]\nprocessed_actions: [5]\n").unwrap();
        let Action::IterateList(list) = action else {
            panic!("wrong kind");
        };
        assert!(list.is_consistent());
        assert_eq!(list.next_action(), Some(7));

        let fresh = parse("type: iterate_list\naction_ids: [1]\n").unwrap();
        let Action::IterateList(fresh) = fresh else {
            panic!("wrong kind");
        };
        assert!(fresh.processed_actions.is_empty());
    }

    #[test]
    fn test_description() {
        let action = parse("type: gas_ctrl\nflow_controller: mfc\nflow_2: 10\nflow_4: 0\n").unwrap();
        assert_eq!(
            action.to_string(),
            "Setting flow controller mfc to: flow_2: 10, flow_4: 0"
        );
    }
}
