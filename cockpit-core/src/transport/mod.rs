//! Byte transports between a controller and the simulator.
//!
//! Two layers:
//!
//! - [`Link`]: a raw medium that moves bytes (serial line, UDP socket,
//!   a test double)
//! - [`Transport`]: what the control cycle uses. It yields export bytes and
//!   accepts whole [`OutgoingMessage`]s. [`LineTransport`] adapts any link;
//!   the bus secondary implements it directly because it may only speak
//!   when granted a window.
//!
//! Neither layer blocks: a link that cannot take a write right now says so
//! and the caller tries again on a later cycle.

use cockpit_proto::{OutgoingMessage, MAX_MESSAGE_SIZE};
use embassy_time::Instant;

pub mod datagram;
#[cfg(any(test, feature = "std"))]
pub mod memory;
#[cfg(feature = "embedded-io")]
pub mod serial;

pub use datagram::{DatagramConfig, DatagramLink, DatagramSocket};
#[cfg(any(test, feature = "std"))]
pub use memory::{MemoryBus, MemoryBusPort, MemoryLink};
#[cfg(feature = "embedded-io")]
pub use serial::{QueuedSerialLink, SerialLink};

/// A raw byte medium.
pub trait Link {
    /// Next received byte, if one is available right now.
    fn receive_byte(&mut self) -> Option<u8>;

    /// Write `bytes` as one unit.
    ///
    /// Returns `false`, having written nothing, when the medium cannot take
    /// the whole unit at the moment.
    fn try_write(&mut self, bytes: &[u8]) -> bool;

    /// Called once at the start of every control cycle.
    fn poll(&mut self, _now: Instant) {}

    /// Drop buffered state and return to a freshly opened medium.
    fn reset(&mut self) {}
}

/// The capability the control cycle needs from its medium.
pub trait Transport {
    /// Next byte of the export stream, if any.
    fn receive_byte(&mut self) -> Option<u8>;

    /// Offer one message for transmission.
    ///
    /// `false` means "not now": the message was not taken and must be
    /// offered again later.
    fn try_send(&mut self, message: &OutgoingMessage) -> bool;

    /// Called once at the start of every control cycle.
    fn poll(&mut self, _now: Instant) {}

    /// Whether an accepted message is still waiting to go out on the wire.
    ///
    /// Media that write synchronously never have one pending.
    fn message_pending(&self) -> bool {
        false
    }

    /// Drop buffered state.
    fn reset(&mut self) {}
}

/// [`Transport`] over any [`Link`], one `<key> <value>\n` line per message.
pub struct LineTransport<L> {
    link: L,
}

impl<L: Link> LineTransport<L> {
    pub fn new(link: L) -> Self {
        Self { link }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn into_inner(self) -> L {
        self.link
    }
}

impl<L: Link> Transport for LineTransport<L> {
    fn receive_byte(&mut self) -> Option<u8> {
        self.link.receive_byte()
    }

    fn try_send(&mut self, message: &OutgoingMessage) -> bool {
        let mut buf = [0u8; MAX_MESSAGE_SIZE];
        match message.serialize(&mut buf) {
            Ok(len) => self.link.try_write(&buf[..len]),
            Err(_e) => {
                warn!("dropping unserializable message {}: {:?}", message.key, _e);
                // Never sendable, so report it as taken; retrying cannot help.
                true
            }
        }
    }

    fn poll(&mut self, now: Instant) {
        self.link.poll(now);
    }

    fn reset(&mut self) {
        self.link.reset();
    }
}
