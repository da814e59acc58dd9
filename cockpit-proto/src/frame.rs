//! Export stream framing.
//!
//! The simulator publishes cockpit state as a continuous sequence of write
//! units:
//!
//! ```text
//! <addr_lo> <addr_hi> <len_lo> <len_hi> <data[0]> ... <data[len-1]>
//! ```
//!
//! Data byte `i` is written to `address + i`. There is no checksum; instead
//! the stream is periodically interleaved with the sync sentinel
//! `55 55 55 55` (the reserved [`SYNC_ADDRESS`] followed by the same pattern
//! in the length field). Four consecutive `0x55` bytes, seen in any parser
//! state, discard whatever partial frame was being assembled and restart
//! header acquisition.

use heapless::Vec;

/// Byte value making up the sync sentinel.
pub const SYNC_BYTE: u8 = 0x55;

/// Reserved address that never carries data.
pub const SYNC_ADDRESS: u16 = 0x5555;

/// The sync sentinel as it appears on the wire.
pub const SYNC_SEQUENCE: [u8; 4] = [SYNC_BYTE; 4];

/// Size of the address + length header.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Largest data span a single [`WriteEvent`] may carry.
pub const MAX_WRITE_LEN: usize = 128;

/// Size of the address space covered by the export stream.
const ADDRESS_SPACE: u32 = 0x1_0000;

/// A single byte written into the cockpit state.
///
/// This is what the parser hands to the dispatcher, one per data byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StateWrite {
    pub address: u16,
    pub value: u8,
}

impl StateWrite {
    #[must_use]
    pub const fn new(address: u16, value: u8) -> Self {
        Self { address, value }
    }
}

/// Parser state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParserState {
    AwaitAddressLow,
    AwaitAddressHigh,
    AwaitLengthLow,
    AwaitLengthHigh,
    /// Collecting data bytes; `remaining` is never zero.
    AwaitData { remaining: u16 },
}

/// Counters for diagnosing a noisy line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ParserStats {
    /// Complete headers accepted.
    pub frames: u32,
    /// Data bytes emitted as [`StateWrite`]s.
    pub writes: u32,
    /// Sync sentinels seen.
    pub resyncs: u32,
    /// Frames whose length ran past the end of the address space.
    pub clamped_frames: u32,
}

/// Streaming export-stream parser.
///
/// Fed one byte at a time; holds only the current partial frame. It never
/// allocates and never blocks, so it can run from a receive interrupt as well
/// as from the control cycle.
///
/// # Example
///
/// ```
/// use cockpit_proto::{FrameParser, StateWrite};
///
/// let mut parser = FrameParser::new();
/// let stream = [0x55, 0x55, 0x55, 0x55, 0x34, 0x12, 0x01, 0x00, 0x05];
/// let writes: Vec<StateWrite> = stream.iter().filter_map(|&b| parser.feed(b)).collect();
/// assert_eq!(writes, [StateWrite::new(0x1234, 0x05)]);
/// ```
#[derive(Debug, Clone)]
pub struct FrameParser {
    state: ParserState,
    /// Header address while acquiring, then the next address to write.
    address: u16,
    length: u16,
    sync_run: u8,
    stats: ParserStats,
}

impl FrameParser {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: ParserState::AwaitAddressLow,
            address: 0,
            length: 0,
            sync_run: 0,
            stats: ParserStats {
                frames: 0,
                writes: 0,
                resyncs: 0,
                clamped_frames: 0,
            },
        }
    }

    /// Current state machine position.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ParserState {
        self.state
    }

    #[inline]
    #[must_use]
    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    /// Drop any partial frame and wait for a fresh header.
    ///
    /// Statistics are kept.
    pub fn reset(&mut self) {
        self.state = ParserState::AwaitAddressLow;
        self.address = 0;
        self.length = 0;
        self.sync_run = 0;
    }

    /// Feed one byte from the export stream.
    ///
    /// Returns the state write carried by this byte, if it was a data byte.
    pub fn feed(&mut self, byte: u8) -> Option<StateWrite> {
        if byte == SYNC_BYTE {
            self.sync_run += 1;
            if self.sync_run as usize == SYNC_SEQUENCE.len() {
                self.resync();
                return None;
            }
        } else {
            self.sync_run = 0;
        }

        match self.state {
            ParserState::AwaitAddressLow => {
                self.address = byte as u16;
                self.state = ParserState::AwaitAddressHigh;
                None
            }
            ParserState::AwaitAddressHigh => {
                self.address |= (byte as u16) << 8;
                self.state = ParserState::AwaitLengthLow;
                None
            }
            ParserState::AwaitLengthLow => {
                self.length = byte as u16;
                self.state = ParserState::AwaitLengthHigh;
                None
            }
            ParserState::AwaitLengthHigh => {
                self.length |= (byte as u16) << 8;
                self.begin_data();
                None
            }
            ParserState::AwaitData { remaining } => {
                let write = StateWrite::new(self.address, byte);
                self.stats.writes = self.stats.writes.wrapping_add(1);
                self.address = self.address.wrapping_add(1);
                self.state = if remaining > 1 {
                    ParserState::AwaitData {
                        remaining: remaining - 1,
                    }
                } else {
                    ParserState::AwaitAddressLow
                };
                Some(write)
            }
        }
    }

    /// Header complete: decide whether data follows.
    fn begin_data(&mut self) {
        // A sentinel whose tail got corrupted; never a write.
        if self.address == SYNC_ADDRESS || self.length == 0 {
            self.state = ParserState::AwaitAddressLow;
            return;
        }

        self.stats.frames = self.stats.frames.wrapping_add(1);

        let room = ADDRESS_SPACE - self.address as u32;
        let remaining = if self.length as u32 > room {
            self.stats.clamped_frames = self.stats.clamped_frames.wrapping_add(1);
            room as u16
        } else {
            self.length
        };
        self.state = ParserState::AwaitData { remaining };
    }

    fn resync(&mut self) {
        // The next sync byte starts a header again.
        self.sync_run = 0;
        self.stats.resyncs = self.stats.resyncs.wrapping_add(1);
        self.state = ParserState::AwaitAddressLow;
        self.address = 0;
        self.length = 0;
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Error type for frame encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EncodeError {
    /// The output buffer is too small to hold the frame.
    BufferTooSmall,
    /// The sync address cannot carry data.
    ReservedAddress,
    /// Data exceeds [`MAX_WRITE_LEN`] or runs past the end of the address space.
    TooLong,
}

impl core::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::BufferTooSmall => write!(f, "buffer too small"),
            Self::ReservedAddress => write!(f, "address is reserved for sync"),
            Self::TooLong => write!(f, "write too long"),
        }
    }
}

/// One write unit of the export stream: data starting at `address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteEvent {
    pub address: u16,
    pub data: Vec<u8, MAX_WRITE_LEN>,
}

impl WriteEvent {
    /// Build a write unit, rejecting ones the parser could not reproduce.
    pub fn new(address: u16, data: &[u8]) -> Result<Self, EncodeError> {
        if address == SYNC_ADDRESS {
            return Err(EncodeError::ReservedAddress);
        }
        if data.len() as u32 > ADDRESS_SPACE - address as u32 {
            return Err(EncodeError::TooLong);
        }
        let data = Vec::from_slice(data).map_err(|_| EncodeError::TooLong)?;
        Ok(Self { address, data })
    }

    /// Number of bytes [`encode`](Self::encode) will produce.
    #[inline]
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.data.len()
    }

    /// Iterate over the per-byte writes this unit turns into.
    pub fn writes(&self) -> impl Iterator<Item = StateWrite> + '_ {
        self.data
            .iter()
            .enumerate()
            .map(|(i, &value)| StateWrite::new(self.address.wrapping_add(i as u16), value))
    }

    /// Encode into `buf`, returning the number of bytes written.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, EncodeError> {
        let len = self.encoded_len();
        if buf.len() < len {
            return Err(EncodeError::BufferTooSmall);
        }
        buf[0..2].copy_from_slice(&self.address.to_le_bytes());
        buf[2..4].copy_from_slice(&(self.data.len() as u16).to_le_bytes());
        buf[FRAME_HEADER_SIZE..len].copy_from_slice(&self.data);
        Ok(len)
    }
}

/// Write the sync sentinel into `buf`.
pub fn encode_sync(buf: &mut [u8]) -> Result<usize, EncodeError> {
    let dst = buf
        .get_mut(..SYNC_SEQUENCE.len())
        .ok_or(EncodeError::BufferTooSmall)?;
    dst.copy_from_slice(&SYNC_SEQUENCE);
    Ok(SYNC_SEQUENCE.len())
}
