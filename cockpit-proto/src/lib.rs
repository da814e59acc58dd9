//! Wire formats shared by every cockpit panel controller.
//!
//! - **Export stream** ([`frame`]): the simulator's incremental state feed
//!   - [`FrameParser`] - byte-at-a-time decoder with sentinel resync
//!   - [`StateWrite`] - one decoded byte write
//!   - [`WriteEvent`] - encoder-side write unit
//!
//! - **Outgoing messages** ([`message`]): panel input to the simulator
//!   - [`OutgoingMessage`] / [`MessageValue`] - `<key> <value>\n` lines
//!
//! - **Multi-drop bus** ([`bus`]): packets exchanged between a bus master
//!   and its secondaries
//!   - [`encode_poll_token`], [`encode_export`], [`encode_reply`]
//!   - [`PacketDecoder`] - secondary side
//!   - [`ReplyDecoder`] - master side
//!
//! # Export Stream Format
//!
//! ```text
//! 55 55 55 55                        sync sentinel
//! <addr_lo> <addr_hi> <len_lo> <len_hi> <data...>   write unit
//! ```
//!
//! # Features
//!
//! - **`std`**: Enable standard library support (for host testing)
//! - **`defmt`**: Enable defmt formatting (for embedded logging)
//! - **`embedded-io`**: Enable `serialize_io()` for I/O peripherals
//!
//! # No-std Support
//!
//! This crate is `#![no_std]` by default and uses no heap allocations.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate std;

pub mod bus;
pub mod crc;
mod fmt;
pub mod frame;
pub mod message;

pub use bus::{
    encode_export, encode_poll_token, encode_reply, is_secondary_address, BusError, BusEvent,
    PacketDecoder, ReplyDecoder, ReplyStatus, BROADCAST_ADDRESS, MAX_EXPORT_PAYLOAD,
    MAX_REPLY_PAYLOAD, MAX_REPLY_SIZE, MAX_SECONDARY_ADDRESS, MSG_EXPORT, MSG_POLL,
    PACKET_HEADER_SIZE, REPLY_DONE,
};
pub use crc::reply_crc;
pub use frame::{
    encode_sync, EncodeError, FrameParser, ParserState, ParserStats, StateWrite, WriteEvent,
    MAX_WRITE_LEN, SYNC_ADDRESS, SYNC_BYTE, SYNC_SEQUENCE,
};
pub use message::{MessageValue, OutgoingMessage, SerializeError, MAX_MESSAGE_SIZE};

/// Baud rate of the simulator's serial export stream.
pub const SERIAL_BAUDRATE: u32 = 250_000;
