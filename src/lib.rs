//! Core library of ElchiCommander.
//!
//! ElchiCommander executes one laboratory action per invocation: setting a furnace
//! temperature (optionally waiting until it is stable), setting gas flows, switching
//! trigger box valves or multiplexer relays, or advancing a resumable sequence of such
//! actions. Actions and the devices they use are read from a YAML config; sequence
//! progress is written back to the same file.
//!
//! - [`config`]: the action config, its validation and persistence, plus settings
//! - [`hardware`]: capability traits, transports and the serial wire protocols
//! - [`instrument`]: concrete drivers and their simulated stand-ins
//! - [`registry`]: opening the drivers an action refers to
//! - [`engine`]: executing actions, temperature stabilization, sequences
//! - [`journal`]: the per-day event and temperature logs

pub mod config;
pub mod engine;
pub mod error;
pub mod hardware;
pub mod instrument;
pub mod journal;
pub mod registry;
