//! Multi-drop bus arbitration.
//!
//! One [`BusMaster`] owns the shared line. It broadcasts the export stream
//! and hands out transmit windows with poll tokens, one secondary at a
//! time, in table order. A [`BusSecondary`] speaks only inside its own
//! window, so two nodes never drive the line at once.
//!
//! ```text
//! master:    [export] [token 1]          [export] [token 2]      [token 3] ...
//! secondary 1:                 [reply]
//! secondary 2:                                            [done]
//! ```
//!
//! Lost bytes are survived by silence: after a window that expired or
//! produced garbage, the master keeps the line quiet for
//! [`BusConfig::idle_reset`], which is also how long a secondary waits
//! before it drops a half-decoded packet and expects a fresh one.

use embassy_time::Duration;

mod master;
mod secondary;

#[cfg(test)]
mod arbitration;

pub use master::{BusMaster, MasterState};
pub use secondary::{BusSecondary, SecondaryState, SecondaryStats};

/// Timing of the bus protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusConfig {
    /// How long a granted window stays open.
    pub window: Duration,
    /// Line silence after which receivers return to a packet boundary.
    pub idle_reset: Duration,
}

impl BusConfig {
    pub const DEFAULT: Self = Self {
        window: Duration::from_millis(5),
        idle_reset: Duration::from_millis(3),
    };

    #[must_use]
    pub const fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    #[must_use]
    pub const fn with_idle_reset(mut self, idle_reset: Duration) -> Self {
        self.idle_reset = idle_reset;
        self
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Error type for bus set-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Address outside `1..=126`.
    InvalidSecondaryAddress,
    /// The same address appears twice in the table.
    DuplicateSecondary,
    /// More secondaries than the table can hold.
    TooManySecondaries,
    /// A master needs at least one secondary.
    EmptyTable,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidSecondaryAddress => write!(f, "invalid secondary address"),
            Self::DuplicateSecondary => write!(f, "duplicate secondary address"),
            Self::TooManySecondaries => write!(f, "too many secondaries"),
            Self::EmptyTable => write!(f, "empty secondary table"),
        }
    }
}

/// One entry of the master's polling table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusSlot {
    /// Bus address of the secondary.
    pub address: u8,
    /// Position in the polling order.
    pub sequence: usize,
}

/// Master-side counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusStats {
    /// Tokens written.
    pub polls: u32,
    /// Windows closed by a done byte.
    pub done: u32,
    /// Windows closed by a valid reply.
    pub replies: u32,
    /// Windows that ran out of time.
    pub timeouts: u32,
    /// Windows closed by a bad CRC or an overlong reply.
    pub garbled: u32,
    /// Export broadcast packets written.
    pub export_packets: u32,
    /// Bytes heard outside any window and discarded.
    pub stray_bytes: u32,
}
