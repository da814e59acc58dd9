//! Cockpit panel controller firmware for RP2040.
//!
//! Wires one node role from [`cockpit_core`] to the chip's UARTs and to a
//! small demonstration panel.
//!
//! # Overview
//!
//! The firmware runs on a Raspberry Pi Pico (RP2040) and, once per
//! millisecond:
//! 1. Drains the bytes received since the last cycle (export stream or bus
//!    packets)
//! 2. Decodes them and drives the panel lamps
//! 3. Sends at most one changed switch position back
//!
//! # Hardware Configuration
//!
//! | Function     | GPIO | Description |
//! |--------------|------|-------------|
//! | UART1 TX     | 8    | To the simulator (direct, bus master) |
//! | UART1 RX     | 9    | From the simulator (direct, bus master) |
//! | UART0 TX     | 0    | RS-485 bus transmit (bus roles) |
//! | UART0 RX     | 1    | RS-485 bus receive (bus roles) |
//! | RS-485 DE    | 2    | Driver enable, high while transmitting |
//! | Button       | 14   | Momentary action, to ground |
//! | Toggle       | 15   | Two-position switch, to ground |
//! | LED          | 25   | On-board LED (lamp output) |
//!
//! # Architecture
//!
//! Byte reception runs in its own task per UART, on an interrupt executor
//! at a higher priority than the control task, and hands bytes over through
//! a single-producer single-consumer queue. The control task owns the node
//! and runs one cycle per tick; nothing else touches it. Its UART writes
//! block, which the RX tasks simply preempt.
//!
//! # Features
//!
//! - **`dev-panic`** (default): Use `panic-probe` for development (prints panic info via RTT)
//! - **`prod-panic`**: Use `panic-reset` for production (silent watchdog reset)
//! - **`role-direct`** (default): talk to the simulator over UART1
//! - **`role-bus-master`**: relay between the simulator and the bus
//! - **`role-bus-secondary`**: answer polls on the bus at [`SECONDARY_ADDRESS`]

#![no_std]

#[cfg(any(
    all(feature = "role-direct", feature = "role-bus-master"),
    all(feature = "role-direct", feature = "role-bus-secondary"),
    all(feature = "role-bus-master", feature = "role-bus-secondary"),
))]
compile_error!("Enable exactly one of `role-direct`, `role-bus-master` and `role-bus-secondary`");

#[cfg(not(any(
    feature = "role-direct",
    feature = "role-bus-master",
    feature = "role-bus-secondary"
)))]
compile_error!("No node role selected: enable `role-direct`, `role-bus-master` or `role-bus-secondary`");

// Re-export core types for convenience
pub use cockpit_core::{
    BusConfig, BusMaster, BusSecondary, ConfigError, Controller, CycleReport, ExportListener,
    LineTransport, MasterController, OutgoingMessage, PollingInput, RegistrationError,
    SERIAL_BAUDRATE,
};

pub mod panel;
pub mod serial;

pub use panel::{ActionButton, Lamp, Panel, ToggleSwitch};
pub use serial::{
    uart_config, BusLink, Rs485Writer, SerialError, UartWriter, UpstreamLink, BYTES_PER_CYCLE,
    RX_QUEUE_SIZE,
};

/// Bus address of this board in the `role-bus-secondary` build.
pub const SECONDARY_ADDRESS: u8 = 1;

/// Secondaries polled by the `role-bus-master` build, in poll order.
pub const SECONDARY_ADDRESSES: [u8; 3] = [1, 2, 3];

/// Capacity of the master's poll table.
pub const MAX_SECONDARIES: usize = 8;

/// Listener registry capacity.
pub const MAX_LISTENERS: usize = 8;

/// Input ring capacity.
pub const MAX_INPUTS: usize = 8;
