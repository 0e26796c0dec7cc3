//! Hardware abstraction layer.
//!
//! Splits instrument control into two independent concerns:
//!
//! - **Capabilities** ([`capabilities`]): what a device can do (`Heater`,
//!   `TemperatureSensor`, `MassFlowController`, `ValveController`, `RelayMultiplexer`).
//! - **Transports** ([`transport`]): how bytes move (a serial port, or a mock in tests),
//!   shared through a locked [`Link`](transport::Link).
//!
//! Drivers in [`crate::instrument`] compose one of each: they implement a capability
//! trait and own a link, speaking either the ASCII line protocol ([`ascii`]) or Modbus
//! RTU ([`modbus`]) on top of it.

pub mod ascii;
pub mod capabilities;
pub mod mock;
pub mod modbus;
pub mod serial;
pub mod transport;

pub use capabilities::{
    Capability, Device, DriverHandle, Heater, MassFlowController, RelayMultiplexer,
    TemperatureSensor, ValveController,
};
pub use transport::{Connector, Link, LinkProfile, Transport};

use std::fmt;

/// Number of channels on flow controllers and trigger boxes.
pub const CHANNEL_COUNT: u8 = 4;

/// Side length of the multiplexer relay grid.
pub const RELAY_GRID: u8 = 4;

/// Total number of relays on a multiplexer.
pub const RELAY_COUNT: u16 = (RELAY_GRID as u16) * (RELAY_GRID as u16);

/// A 1-based channel number on a four-channel instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Channel(u8);

impl Channel {
    /// Returns the channel if `number` is within `1..=4`.
    pub fn new(number: u8) -> Option<Self> {
        (1..=CHANNEL_COUNT).contains(&number).then_some(Self(number))
    }

    /// The 1-based channel number.
    pub fn number(self) -> u8 {
        self.0
    }

    /// All channels in ascending order.
    pub fn all() -> impl Iterator<Item = Channel> {
        (1..=CHANNEL_COUNT).map(Channel)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A relay in the 4x4 multiplexer grid, addressed as (row, column), both 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Relay {
    row: u8,
    col: u8,
}

impl Relay {
    /// Returns the relay if both `row` and `col` are within `1..=4`.
    pub fn new(row: u8, col: u8) -> Option<Self> {
        let range = 1..=RELAY_GRID;
        (range.contains(&row) && range.contains(&col)).then_some(Self { row, col })
    }

    /// 1-based row (the `L` index in `state_L<row>R<col>`).
    pub fn row(self) -> u8 {
        self.row
    }

    /// 1-based column (the `R` index in `state_L<row>R<col>`).
    pub fn col(self) -> u8 {
        self.col
    }

    /// Flat register address: `(row - 1) * 4 + (col - 1)`.
    pub fn to_address(self) -> u16 {
        u16::from(self.row - 1) * u16::from(RELAY_GRID) + u16::from(self.col - 1)
    }

    /// Inverse of [`Relay::to_address`]; `None` outside `0..16`.
    pub fn from_address(address: u16) -> Option<Self> {
        if address >= RELAY_COUNT {
            return None;
        }
        let grid = u16::from(RELAY_GRID);
        // Both quotients are below 4, so the narrowing is lossless.
        Some(Self {
            row: (address / grid) as u8 + 1,
            col: (address % grid) as u8 + 1,
        })
    }

    /// All 16 relays in address order.
    pub fn all() -> impl Iterator<Item = Relay> {
        (0..RELAY_COUNT).filter_map(Relay::from_address)
    }
}

impl fmt::Display for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}R{}", self.row, self.col)
    }
}

/// Snapshot of all 16 multiplexer relays, indexed by flat address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayStates([bool; RELAY_COUNT as usize]);

impl RelayStates {
    /// Builds a snapshot from states in flat address order.
    pub fn from_bits(bits: [bool; RELAY_COUNT as usize]) -> Self {
        Self(bits)
    }

    /// States in flat address order, as sent in a bulk write.
    pub fn bits(&self) -> &[bool; RELAY_COUNT as usize] {
        &self.0
    }

    /// State of one relay.
    pub fn get(&self, relay: Relay) -> bool {
        self.0[usize::from(relay.to_address())]
    }

    /// Sets the state of one relay.
    pub fn set(&mut self, relay: Relay, on: bool) {
        self.0[usize::from(relay.to_address())] = on;
    }
}
