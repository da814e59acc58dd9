//! Platform-agnostic protocol engine for cockpit panel controllers.
//!
//! A controller listens to the simulator's export stream, drives panel
//! outputs from it, and sends operator input back. This crate holds
//! everything that does not depend on a particular chip:
//!
//! - [`StateDispatcher`]: routes decoded writes to [`ExportListener`]s by
//!   address range
//! - [`InputScheduler`]: polls [`PollingInput`]s round-robin, one message
//!   per cycle, one outstanding at a time
//! - [`transport`]: the [`Transport`] capability and its media (serial,
//!   datagram, in-memory)
//! - [`bus`]: master/secondary arbitration of a shared multi-drop line
//! - [`node`]: cycle drivers wiring it all together
//!
//! # Control Cycle
//!
//! ```text
//! transport.poll(now)
//!   -> receive_byte()* -> FrameParser -> StateDispatcher -> listeners
//!   -> queued message retry
//!   -> InputScheduler::poll_cycle -> transport.try_send
//!   -> StateDispatcher::commit_cycle
//! ```
//!
//! Nothing here blocks or reads a clock; the caller passes the cycle's
//! [`Instant`](embassy_time::Instant).
//!
//! # Features
//!
//! - **`std`**: `std` support, UDP multicast socket, in-memory media
//! - **`defmt`**: defmt formatting and logging (embedded)
//! - **`log`**: logging through the `log` crate (host)
//! - **`embedded-io`**: serial links over `embedded-io` traits

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[cfg(feature = "std")]
extern crate std;

// Must come first so the logging macros are visible to the other modules.
mod fmt;

pub mod bus;
pub mod dispatch;
pub mod node;
pub mod scheduler;
pub mod transport;

pub use bus::{
    BusConfig, BusMaster, BusSecondary, BusSlot, BusStats, ConfigError, MasterState,
    SecondaryState, SecondaryStats,
};
pub use dispatch::{AddressRange, ExportListener, ListenerId, RegistrationError, StateDispatcher};
pub use node::{Controller, CycleReport, MasterController, SendError};
pub use scheduler::{InputScheduler, PollOutcome, PollingInput, SourceId};
pub use transport::{DatagramConfig, DatagramLink, DatagramSocket, LineTransport, Link, Transport};

// Re-export the wire formats so that firmware only needs this crate.
pub use cockpit_proto::{
    FrameParser, MessageValue, OutgoingMessage, ParserStats, SerializeError, StateWrite,
    MAX_EXPORT_PAYLOAD, PACKET_HEADER_SIZE, SERIAL_BAUDRATE,
};
