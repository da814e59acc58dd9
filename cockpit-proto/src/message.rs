//! Outgoing messages from panel inputs to the simulator.
//!
//! Every message is a single line of two whitespace-free tokens:
//!
//! ```text
//! <key> <value>\n
//! ```
//!
//! e.g. `MASTER_ARM_SW 1\n`, `UFC_COMM1_CHANNEL_SELECT INC\n` or
//! `HSI_HDG_KNOB +3200\n`. The format is the same whatever the transport.
//!
//! # Example
//!
//! ```
//! use cockpit_proto::{MessageValue, OutgoingMessage};
//!
//! let msg = OutgoingMessage::new("MASTER_ARM_SW", MessageValue::Number(1));
//! let mut buf = [0u8; 64];
//! let len = msg.serialize(&mut buf).unwrap();
//! assert_eq!(&buf[..len], b"MASTER_ARM_SW 1\n");
//! ```

use crate::fmt::{write_i32, MAX_I32_DIGITS};

/// Maximum size of a serialized message, newline included.
pub const MAX_MESSAGE_SIZE: usize = 64;

/// Value half of an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageValue {
    /// Verbatim token such as `INC`, `TOGGLE` or `+3200`.
    Text(&'static str),
    /// Decimal number, e.g. a switch position or potentiometer reading.
    Number(i32),
}

/// One command line destined for the simulator.
///
/// `Copy` so that a transport can hold one in a single-slot queue without
/// borrowing from the input that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OutgoingMessage {
    pub key: &'static str,
    pub value: MessageValue,
}

/// Error type for message serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SerializeError {
    /// The output buffer is too small to hold the serialized message.
    BufferTooSmall,
    /// Key or text value is empty or contains whitespace.
    InvalidToken,
    /// A write operation failed (for I/O adapters).
    WriteError,
}

impl core::fmt::Display for SerializeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::BufferTooSmall => write!(f, "buffer too small"),
            Self::InvalidToken => write!(f, "empty token or token contains whitespace"),
            Self::WriteError => write!(f, "write error"),
        }
    }
}

/// Bounded cursor over the output buffer.
struct LineBuf<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> LineBuf<'a> {
    #[inline]
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    fn write_slice(&mut self, bytes: &[u8]) -> Result<(), SerializeError> {
        let end = self.pos + bytes.len();
        let dst = self
            .buf
            .get_mut(self.pos..end)
            .ok_or(SerializeError::BufferTooSmall)?;
        dst.copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    #[inline]
    fn write(&mut self, byte: u8) -> Result<(), SerializeError> {
        self.write_slice(&[byte])
    }

    #[inline]
    fn write_token(&mut self, token: &str) -> Result<(), SerializeError> {
        if !is_valid_token(token) {
            return Err(SerializeError::InvalidToken);
        }
        self.write_slice(token.as_bytes())
    }

    #[inline]
    fn write_i32(&mut self, value: i32) -> Result<(), SerializeError> {
        let mut tmp = [0u8; MAX_I32_DIGITS];
        let len = write_i32(&mut tmp, value);
        self.write_slice(&tmp[..len])
    }
}

#[inline]
fn is_valid_token(token: &str) -> bool {
    !token.is_empty() && !token.bytes().any(|b| b.is_ascii_whitespace())
}

impl OutgoingMessage {
    #[must_use]
    pub const fn new(key: &'static str, value: MessageValue) -> Self {
        Self { key, value }
    }

    /// Shorthand for a text-valued message.
    #[must_use]
    pub const fn text(key: &'static str, value: &'static str) -> Self {
        Self::new(key, MessageValue::Text(value))
    }

    /// Shorthand for a number-valued message.
    #[must_use]
    pub const fn number(key: &'static str, value: i32) -> Self {
        Self::new(key, MessageValue::Number(value))
    }

    /// Serialize into `buf`, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// [`SerializeError::InvalidToken`] for an empty or whitespace-bearing
    /// key or text value, [`SerializeError::BufferTooSmall`] if the line does
    /// not fit.
    pub fn serialize(&self, buf: &mut [u8]) -> Result<usize, SerializeError> {
        let mut line = LineBuf::new(buf);
        line.write_token(self.key)?;
        line.write(b' ')?;
        match self.value {
            MessageValue::Text(text) => line.write_token(text)?,
            MessageValue::Number(n) => line.write_i32(n)?,
        }
        line.write(b'\n')?;
        Ok(line.pos)
    }

    /// Serialize to a `heapless::Vec` of [`MAX_MESSAGE_SIZE`] bytes.
    pub fn to_line(&self) -> Result<heapless::Vec<u8, MAX_MESSAGE_SIZE>, SerializeError> {
        let mut buf = [0u8; MAX_MESSAGE_SIZE];
        let len = self.serialize(&mut buf)?;
        heapless::Vec::from_slice(&buf[..len]).map_err(|_| SerializeError::BufferTooSmall)
    }

    /// Serialize to an `embedded_io::Write` implementation.
    ///
    /// # Errors
    ///
    /// Returns [`SerializeError::WriteError`] if the write fails.
    #[cfg(feature = "embedded-io")]
    pub fn serialize_io<W: embedded_io::Write>(&self, writer: &mut W) -> Result<(), SerializeError> {
        let mut buf = [0u8; MAX_MESSAGE_SIZE];
        let len = self.serialize(&mut buf)?;
        writer
            .write_all(&buf[..len])
            .map_err(|_| SerializeError::WriteError)
    }
}
