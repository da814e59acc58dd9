//! Packet format for a multi-drop bus shared by one master and several
//! secondaries.
//!
//! Everything the master puts on the bus is a packet:
//!
//! ```text
//! <address> <msg_type> <length> <payload[length]>
//! ```
//!
//! | address | msg_type | length | meaning |
//! |---------|----------|--------|---------|
//! | `0x00` | [`MSG_EXPORT`] | 1..=255 | broadcast chunk of the export stream |
//! | `1..=126` | [`MSG_POLL`] | 0 | poll token: that secondary may transmit now |
//!
//! A secondary answers a token addressed to it, and only then, with either
//! the single byte [`REPLY_DONE`] (nothing to send) or
//!
//! ```text
//! <length> <payload[length]> <crc8>
//! ```
//!
//! where the payload is one outgoing message line and the CRC covers the
//! length byte and the payload (see [`crate::crc`]).
//!
//! Tokens are only recognised at packet boundaries, so export bytes and the
//! export-stream sync sentinel (which only ever travel inside broadcast
//! payloads) cannot be mistaken for them.

use heapless::Vec;

use crate::crc::{reply_crc, ReplyDigest};
use crate::message::MAX_MESSAGE_SIZE;

/// Destination address of export broadcasts.
pub const BROADCAST_ADDRESS: u8 = 0x00;

/// Highest address a secondary may use.
pub const MAX_SECONDARY_ADDRESS: u8 = 126;

/// Message type of export stream broadcasts.
pub const MSG_EXPORT: u8 = 0x00;

/// Message type of poll tokens.
pub const MSG_POLL: u8 = 0x01;

/// Packet header size (address, type, length).
pub const PACKET_HEADER_SIZE: usize = 3;

/// Largest export chunk carried by one broadcast packet.
pub const MAX_EXPORT_PAYLOAD: usize = 255;

/// Largest reply payload a secondary may send.
pub const MAX_REPLY_PAYLOAD: usize = MAX_MESSAGE_SIZE;

/// Largest encoded reply (length, payload, crc).
pub const MAX_REPLY_SIZE: usize = MAX_REPLY_PAYLOAD + 2;

/// Reply meaning "nothing to send, bus released".
pub const REPLY_DONE: u8 = 0x00;

/// Error type for bus packet encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// Address outside `1..=MAX_SECONDARY_ADDRESS`.
    InvalidAddress,
    /// Payload empty where data is required, or longer than allowed.
    PayloadLength,
    /// The output buffer is too small.
    BufferTooSmall,
}

impl core::fmt::Display for BusError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidAddress => write!(f, "invalid secondary address"),
            Self::PayloadLength => write!(f, "payload length out of range"),
            Self::BufferTooSmall => write!(f, "buffer too small"),
        }
    }
}

/// Whether `address` can identify a secondary.
#[inline]
#[must_use]
pub const fn is_secondary_address(address: u8) -> bool {
    address != BROADCAST_ADDRESS && address <= MAX_SECONDARY_ADDRESS
}

/// Encode the poll token granting `address` a transmit window.
pub fn encode_poll_token(address: u8, buf: &mut [u8]) -> Result<usize, BusError> {
    if !is_secondary_address(address) {
        return Err(BusError::InvalidAddress);
    }
    let dst = buf
        .get_mut(..PACKET_HEADER_SIZE)
        .ok_or(BusError::BufferTooSmall)?;
    dst.copy_from_slice(&[address, MSG_POLL, 0]);
    Ok(PACKET_HEADER_SIZE)
}

/// Encode a broadcast packet carrying a chunk of the export stream.
pub fn encode_export(payload: &[u8], buf: &mut [u8]) -> Result<usize, BusError> {
    if payload.is_empty() || payload.len() > MAX_EXPORT_PAYLOAD {
        return Err(BusError::PayloadLength);
    }
    let len = PACKET_HEADER_SIZE + payload.len();
    let dst = buf.get_mut(..len).ok_or(BusError::BufferTooSmall)?;
    dst[..PACKET_HEADER_SIZE].copy_from_slice(&[
        BROADCAST_ADDRESS,
        MSG_EXPORT,
        payload.len() as u8,
    ]);
    dst[PACKET_HEADER_SIZE..].copy_from_slice(payload);
    Ok(len)
}

/// Encode a secondary's reply; an empty payload becomes [`REPLY_DONE`].
pub fn encode_reply(payload: &[u8], buf: &mut [u8]) -> Result<usize, BusError> {
    if payload.is_empty() {
        let dst = buf.first_mut().ok_or(BusError::BufferTooSmall)?;
        *dst = REPLY_DONE;
        return Ok(1);
    }
    if payload.len() > MAX_REPLY_PAYLOAD {
        return Err(BusError::PayloadLength);
    }
    let len = payload.len() + 2;
    let dst = buf.get_mut(..len).ok_or(BusError::BufferTooSmall)?;
    dst[0] = payload.len() as u8;
    dst[1..len - 1].copy_from_slice(payload);
    dst[len - 1] = reply_crc(payload);
    Ok(len)
}

/// What a secondary makes of the bytes it hears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusEvent {
    /// One byte of the export stream.
    Export(u8),
    /// A poll token.
    Poll { address: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum PacketState {
    AwaitAddress,
    AwaitType { address: u8 },
    AwaitLength { address: u8, msg_type: u8 },
    Payload { forward: bool, remaining: u8 },
    /// Another secondary was polled; its reply is on the line.
    PeerReplyLength,
    PeerReplyBody { remaining: u8 },
}

/// Secondary-side packet decoder.
///
/// Also steps over the replies of other secondaries so that they are not
/// mistaken for master packets. A decoder that lost its place is brought
/// back to a packet boundary with [`reset`](Self::reset) after a period of
/// line silence.
#[derive(Debug, Clone)]
pub struct PacketDecoder {
    state: PacketState,
}

impl PacketDecoder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: PacketState::AwaitAddress,
        }
    }

    /// Return to a packet boundary.
    pub fn reset(&mut self) {
        self.state = PacketState::AwaitAddress;
    }

    /// True when the decoder sits between packets.
    #[inline]
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state == PacketState::AwaitAddress
    }

    /// Feed one byte heard on the bus.
    pub fn push(&mut self, byte: u8) -> Option<BusEvent> {
        match self.state {
            PacketState::AwaitAddress => {
                self.state = PacketState::AwaitType { address: byte };
                None
            }
            PacketState::AwaitType { address } => {
                self.state = PacketState::AwaitLength {
                    address,
                    msg_type: byte,
                };
                None
            }
            PacketState::AwaitLength { address, msg_type } => {
                if msg_type == MSG_POLL && byte == 0 && is_secondary_address(address) {
                    self.state = PacketState::PeerReplyLength;
                    return Some(BusEvent::Poll { address });
                }
                self.state = if byte == 0 {
                    PacketState::AwaitAddress
                } else {
                    PacketState::Payload {
                        forward: address == BROADCAST_ADDRESS && msg_type == MSG_EXPORT,
                        remaining: byte,
                    }
                };
                None
            }
            PacketState::Payload { forward, remaining } => {
                self.state = if remaining > 1 {
                    PacketState::Payload {
                        forward,
                        remaining: remaining - 1,
                    }
                } else {
                    PacketState::AwaitAddress
                };
                forward.then_some(BusEvent::Export(byte))
            }
            PacketState::PeerReplyLength => {
                self.state = if byte == REPLY_DONE {
                    PacketState::AwaitAddress
                } else {
                    // payload plus crc
                    PacketState::PeerReplyBody {
                        remaining: byte.saturating_add(1),
                    }
                };
                None
            }
            PacketState::PeerReplyBody { remaining } => {
                self.state = if remaining > 1 {
                    PacketState::PeerReplyBody {
                        remaining: remaining - 1,
                    }
                } else {
                    PacketState::AwaitAddress
                };
                None
            }
        }
    }

    /// Tell the decoder that the token it just reported was answered by this
    /// node itself, so no peer reply follows.
    pub fn own_reply_sent(&mut self) {
        if self.state == PacketState::PeerReplyLength {
            self.state = PacketState::AwaitAddress;
        }
    }
}

impl Default for PacketDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress of a reply being received by the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReplyStatus {
    /// More bytes expected.
    Pending,
    /// The secondary had nothing to send.
    Done,
    /// A full reply arrived and its CRC matched; see [`ReplyDecoder::payload`].
    Complete,
    /// Overlong announcement or CRC mismatch.
    Garbled,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ReplyState {
    AwaitLength,
    Payload { remaining: u8 },
    AwaitCrc,
    Finished,
}

/// Master-side decoder for the reply inside one transmit window.
pub struct ReplyDecoder {
    state: ReplyState,
    payload: Vec<u8, MAX_REPLY_PAYLOAD>,
    digest: Option<ReplyDigest>,
}

impl ReplyDecoder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: ReplyState::AwaitLength,
            payload: Vec::new(),
            digest: None,
        }
    }

    /// Prepare for a new window.
    pub fn reset(&mut self) {
        self.state = ReplyState::AwaitLength;
        self.payload.clear();
        self.digest = None;
    }

    /// Payload of the last [`ReplyStatus::Complete`] reply.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Feed one byte received during the window.
    ///
    /// Bytes after a finished reply are reported as [`ReplyStatus::Garbled`].
    pub fn push(&mut self, byte: u8) -> ReplyStatus {
        match self.state {
            ReplyState::AwaitLength => {
                if byte == REPLY_DONE {
                    self.state = ReplyState::Finished;
                    return ReplyStatus::Done;
                }
                if byte as usize > MAX_REPLY_PAYLOAD {
                    self.state = ReplyState::Finished;
                    return ReplyStatus::Garbled;
                }
                self.digest = Some(ReplyDigest::new(byte));
                self.state = ReplyState::Payload { remaining: byte };
                ReplyStatus::Pending
            }
            ReplyState::Payload { remaining } => {
                // Capacity was checked against the announced length.
                let _ = self.payload.push(byte);
                if let Some(digest) = self.digest.as_mut() {
                    digest.update(byte);
                }
                self.state = if remaining > 1 {
                    ReplyState::Payload {
                        remaining: remaining - 1,
                    }
                } else {
                    ReplyState::AwaitCrc
                };
                ReplyStatus::Pending
            }
            ReplyState::AwaitCrc => {
                self.state = ReplyState::Finished;
                match self.digest.take().map(ReplyDigest::finalize) {
                    Some(crc) if crc == byte => ReplyStatus::Complete,
                    _ => ReplyStatus::Garbled,
                }
            }
            ReplyState::Finished => ReplyStatus::Garbled,
        }
    }
}

impl Default for ReplyDecoder {
    fn default() -> Self {
        Self::new()
    }
}
