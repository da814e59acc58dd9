use cockpit_proto::{
    encode_reply, is_secondary_address, BusEvent, OutgoingMessage, PacketDecoder,
    MAX_MESSAGE_SIZE, MAX_REPLY_SIZE,
};
use embassy_time::Instant;
use heapless::Vec;

use super::{BusConfig, ConfigError};
use crate::transport::{Link, Transport};

/// Whether the secondary currently holds the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecondaryState {
    WaitForToken,
    /// Own token heard; the reply has not been written yet.
    Transmitting { deadline: Instant },
}

/// Secondary-side counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SecondaryStats {
    /// Tokens addressed to this node.
    pub tokens: u32,
    /// Windows answered with a message.
    pub replies: u32,
    /// Windows answered with the done byte.
    pub done: u32,
    /// Windows that closed before the reply could be written.
    pub abandoned: u32,
    /// Receiver resets after line silence.
    pub resyncs: u32,
}

/// Bus secondary: a [`Transport`] that may only speak in its own window.
///
/// Export bytes broadcast by the master come out of `receive_byte`. An
/// accepted message waits in a one-slot outbox until the next token for
/// this node's address; meanwhile [`message_pending`](Transport::message_pending)
/// holds the scheduler back.
///
/// The reply is written while the token is being drained, so the control
/// cycle period must stay below [`BusConfig::idle_reset`].
pub struct BusSecondary<L> {
    link: L,
    address: u8,
    config: BusConfig,
    decoder: PacketDecoder,
    state: SecondaryState,
    outbox: Option<Vec<u8, MAX_MESSAGE_SIZE>>,
    now: Instant,
    last_rx: Instant,
    stats: SecondaryStats,
}

impl<L: Link> BusSecondary<L> {
    pub fn new(link: L, address: u8, config: BusConfig) -> Result<Self, ConfigError> {
        if !is_secondary_address(address) {
            return Err(ConfigError::InvalidSecondaryAddress);
        }
        Ok(Self {
            link,
            address,
            config,
            decoder: PacketDecoder::new(),
            state: SecondaryState::WaitForToken,
            outbox: None,
            now: Instant::from_ticks(0),
            last_rx: Instant::from_ticks(0),
            stats: SecondaryStats::default(),
        })
    }

    #[inline]
    pub fn address(&self) -> u8 {
        self.address
    }

    #[inline]
    pub fn state(&self) -> SecondaryState {
        self.state
    }

    #[inline]
    pub fn stats(&self) -> SecondaryStats {
        self.stats
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Write the reply for the current window; `false` if the line was busy.
    fn try_transmit(&mut self) -> bool {
        let payload = self.outbox.as_ref().map_or(&[][..], |line| line.as_slice());
        let mut buf = [0u8; MAX_REPLY_SIZE];
        let Ok(len) = encode_reply(payload, &mut buf) else {
            // Lines are bounded by MAX_MESSAGE_SIZE, so this cannot happen.
            self.outbox = None;
            return false;
        };
        if !self.link.try_write(&buf[..len]) {
            return false;
        }

        if self.outbox.take().is_some() {
            self.stats.replies += 1;
        } else {
            self.stats.done += 1;
        }
        self.decoder.own_reply_sent();
        self.state = SecondaryState::WaitForToken;
        true
    }

    fn abandon_window(&mut self) {
        warn!("window closed before reply from {} was written", self.address);
        self.stats.abandoned += 1;
        self.state = SecondaryState::WaitForToken;
        self.decoder.reset();
    }
}

impl<L: Link> Transport for BusSecondary<L> {
    fn receive_byte(&mut self) -> Option<u8> {
        if let SecondaryState::Transmitting { .. } = self.state {
            return None;
        }
        while let Some(byte) = self.link.receive_byte() {
            self.last_rx = self.now;
            match self.decoder.push(byte) {
                Some(BusEvent::Export(value)) => return Some(value),
                Some(BusEvent::Poll { address }) if address == self.address => {
                    self.stats.tokens += 1;
                    self.state = SecondaryState::Transmitting {
                        deadline: self.now + self.config.window,
                    };
                    if !self.try_transmit() {
                        return None;
                    }
                }
                _ => {}
            }
        }
        None
    }

    fn try_send(&mut self, message: &OutgoingMessage) -> bool {
        if self.outbox.is_some() {
            return false;
        }
        match message.to_line() {
            Ok(line) => self.outbox = Some(line),
            Err(_e) => warn!("dropping unserializable message {}: {:?}", message.key, _e),
        }
        true
    }

    fn poll(&mut self, now: Instant) {
        self.now = now;
        self.link.poll(now);

        if let SecondaryState::Transmitting { deadline } = self.state {
            if now >= deadline {
                self.abandon_window();
            } else {
                self.try_transmit();
            }
        }

        if !self.decoder.is_idle()
            && now.saturating_duration_since(self.last_rx) >= self.config.idle_reset
        {
            trace!("bus receiver reset after silence");
            self.stats.resyncs += 1;
            self.decoder.reset();
        }
    }

    fn message_pending(&self) -> bool {
        self.outbox.is_some()
    }

    fn reset(&mut self) {
        self.link.reset();
        self.decoder.reset();
        self.state = SecondaryState::WaitForToken;
        self.outbox = None;
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::transport::MemoryLink;
    use cockpit_proto::{reply_crc, MSG_EXPORT, MSG_POLL, REPLY_DONE};
    use std::vec::Vec as StdVec;

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    fn secondary(address: u8) -> BusSecondary<MemoryLink> {
        BusSecondary::new(MemoryLink::new(), address, BusConfig::DEFAULT).unwrap()
    }

    fn drain(node: &mut BusSecondary<MemoryLink>) -> StdVec<u8> {
        core::iter::from_fn(|| node.receive_byte()).collect()
    }

    #[test]
    fn test_rejects_invalid_address() {
        assert!(matches!(
            BusSecondary::new(MemoryLink::new(), 0, BusConfig::DEFAULT),
            Err(ConfigError::InvalidSecondaryAddress)
        ));
    }

    #[test]
    fn test_yields_export_bytes() {
        let mut node = secondary(3);
        node.link_mut().push_rx(&[0, MSG_EXPORT, 3, 0x55, 0x01, 0x02]);
        node.poll(at(0));
        assert_eq!(drain(&mut node), [0x55, 0x01, 0x02]);
        assert!(node.link().writes().is_empty());
    }

    #[test]
    fn test_answers_own_token_with_done() {
        let mut node = secondary(3);
        node.link_mut().push_rx(&[3, MSG_POLL, 0]);
        node.poll(at(0));
        drain(&mut node);
        assert_eq!(node.link().writes(), [[REPLY_DONE]]);
        assert_eq!(node.stats().done, 1);
    }

    #[test]
    fn test_ignores_foreign_tokens() {
        let mut node = secondary(3);
        node.link_mut().push_rx(&[4, MSG_POLL, 0, REPLY_DONE, 0, MSG_EXPORT, 1, 9]);
        node.poll(at(0));
        assert_eq!(drain(&mut node), [9]);
        assert!(node.link().writes().is_empty());
    }

    #[test]
    fn test_outbox_sent_in_own_window() {
        let mut node = secondary(3);
        node.poll(at(0));
        assert!(node.try_send(&OutgoingMessage::number("MASTER_ARM_SW", 1)));
        assert!(node.message_pending());
        assert!(!node.try_send(&OutgoingMessage::number("OTHER", 1)));

        node.link_mut().push_rx(&[3, MSG_POLL, 0]);
        node.poll(at(1));
        drain(&mut node);

        let line = b"MASTER_ARM_SW 1\n";
        let mut expected = StdVec::new();
        expected.push(line.len() as u8);
        expected.extend_from_slice(line);
        expected.push(reply_crc(line));
        assert_eq!(node.link().writes(), [expected]);
        assert!(!node.message_pending());
        assert_eq!(node.stats().replies, 1);
    }

    #[test]
    fn test_busy_line_retried_then_abandoned() {
        let mut node = secondary(3);
        node.poll(at(0));
        node.try_send(&OutgoingMessage::number("A", 1));
        node.link_mut().set_writable(false);
        node.link_mut().push_rx(&[3, MSG_POLL, 0]);
        drain(&mut node);
        assert!(matches!(node.state(), SecondaryState::Transmitting { .. }));

        node.poll(at(4));
        assert!(matches!(node.state(), SecondaryState::Transmitting { .. }));

        node.poll(at(5));
        assert_eq!(node.state(), SecondaryState::WaitForToken);
        assert_eq!(node.stats().abandoned, 1);
        // Message survives for the next window.
        assert!(node.message_pending());

        node.link_mut().set_writable(true);
        node.link_mut().push_rx(&[3, MSG_POLL, 0]);
        node.poll(at(6));
        drain(&mut node);
        assert!(!node.message_pending());
        assert_eq!(node.link().writes().len(), 1);
    }

    #[test]
    fn test_busy_line_retried_within_window() {
        let mut node = secondary(3);
        node.poll(at(0));
        node.link_mut().set_writable(false);
        node.link_mut().push_rx(&[3, MSG_POLL, 0]);
        drain(&mut node);

        node.link_mut().set_writable(true);
        node.poll(at(2));
        assert_eq!(node.state(), SecondaryState::WaitForToken);
        assert_eq!(node.link().writes(), [[REPLY_DONE]]);
    }

    #[test]
    fn test_receiver_resyncs_after_silence() {
        let mut node = secondary(3);
        node.poll(at(0));
        // Truncated export packet: the decoder expects 10 more bytes.
        node.link_mut().push_rx(&[0, MSG_EXPORT, 10, 1]);
        assert_eq!(drain(&mut node), [1]);

        node.poll(at(2));
        assert_eq!(node.stats().resyncs, 0);
        node.poll(at(3));
        assert_eq!(node.stats().resyncs, 1);

        node.link_mut().push_rx(&[3, MSG_POLL, 0]);
        node.poll(at(4));
        drain(&mut node);
        assert_eq!(node.link().writes(), [[REPLY_DONE]]);
    }

    #[test]
    fn test_reset_clears_outbox() {
        let mut node = secondary(3);
        node.try_send(&OutgoingMessage::number("A", 1));
        node.reset();
        assert!(!node.message_pending());
        assert_eq!(node.link().resets(), 1);
    }
}
