use cockpit_proto::{
    encode_export, encode_poll_token, is_secondary_address, ReplyDecoder, ReplyStatus,
    MAX_EXPORT_PAYLOAD, PACKET_HEADER_SIZE,
};
use embassy_time::Instant;
use heapless::Vec;

use super::{BusConfig, BusSlot, BusStats, ConfigError};
use crate::transport::Link;

/// Where the master is in its polling round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MasterState {
    /// Between windows: flush export bytes, then poll the next slot.
    Idle,
    /// About to write the token for `slot`.
    Polling { slot: usize },
    /// `slot` holds the line until it answers or `deadline` passes.
    Window { slot: usize, deadline: Instant },
}

/// Bus master: arbitrates a shared line between up to `N` secondaries.
///
/// Driven by [`poll`](Self::poll) once per control cycle. Each call moves
/// the state machine as far as it can without waiting; a window that is
/// still open when the bytes run out is resumed on the next call.
pub struct BusMaster<L, const N: usize> {
    link: L,
    config: BusConfig,
    slots: Vec<BusSlot, N>,
    state: MasterState,
    next: usize,
    quiet_until: Option<Instant>,
    reply: ReplyDecoder,
    export: Vec<u8, MAX_EXPORT_PAYLOAD>,
    stats: BusStats,
}

impl<L: Link, const N: usize> BusMaster<L, N> {
    /// Build a master polling `addresses` in the given order.
    ///
    /// # Errors
    ///
    /// The table must be non-empty, hold at most `N` entries, and contain
    /// only distinct secondary addresses.
    pub fn new(link: L, addresses: &[u8], config: BusConfig) -> Result<Self, ConfigError> {
        if addresses.is_empty() {
            return Err(ConfigError::EmptyTable);
        }
        let mut slots = Vec::new();
        for (sequence, &address) in addresses.iter().enumerate() {
            if !is_secondary_address(address) {
                return Err(ConfigError::InvalidSecondaryAddress);
            }
            if slots.iter().any(|slot: &BusSlot| slot.address == address) {
                return Err(ConfigError::DuplicateSecondary);
            }
            slots
                .push(BusSlot { address, sequence })
                .map_err(|_| ConfigError::TooManySecondaries)?;
        }

        Ok(Self {
            link,
            config,
            slots,
            state: MasterState::Idle,
            next: 0,
            quiet_until: None,
            reply: ReplyDecoder::new(),
            export: Vec::new(),
            stats: BusStats::default(),
        })
    }

    /// Free space in the export broadcast buffer.
    #[inline]
    pub fn export_room(&self) -> usize {
        MAX_EXPORT_PAYLOAD - self.export.len()
    }

    /// Buffer one export stream byte for the next broadcast.
    ///
    /// Returns `false` when the buffer is full; the byte was not taken.
    pub fn queue_export(&mut self, byte: u8) -> bool {
        self.export.push(byte).is_ok()
    }

    /// Advance the polling round.
    ///
    /// Every valid reply payload (one message line) is handed to `relay`.
    pub fn poll<F: FnMut(&[u8])>(&mut self, now: Instant, mut relay: F) {
        loop {
            match self.state {
                MasterState::Idle => {
                    if let Some(until) = self.quiet_until {
                        if now < until {
                            return;
                        }
                        self.quiet_until = None;
                    }
                    if !self.flush_export() {
                        return;
                    }
                    self.state = MasterState::Polling { slot: self.next };
                }
                MasterState::Polling { slot } => {
                    self.drain_stray();
                    let address = self.slots[slot].address;
                    let mut token = [0u8; PACKET_HEADER_SIZE];
                    match encode_poll_token(address, &mut token) {
                        Ok(len) => {
                            if !self.link.try_write(&token[..len]) {
                                return;
                            }
                        }
                        Err(_) => {
                            self.close_window(slot);
                            continue;
                        }
                    }
                    trace!("window granted to {}", address);
                    self.stats.polls += 1;
                    self.reply.reset();
                    self.state = MasterState::Window {
                        slot,
                        deadline: now + self.config.window,
                    };
                }
                MasterState::Window { slot, deadline } => {
                    if !self.read_window(slot, now, &mut relay) {
                        if now < deadline {
                            return;
                        }
                        debug!("window of {} expired", self.slots[slot].address);
                        self.stats.timeouts += 1;
                        self.go_quiet(now);
                        self.close_window(slot);
                    }
                }
            }
        }
    }

    /// Drain the window's bytes; `true` once the window has closed.
    fn read_window<F: FnMut(&[u8])>(&mut self, slot: usize, now: Instant, relay: &mut F) -> bool {
        while let Some(byte) = self.link.receive_byte() {
            match self.reply.push(byte) {
                ReplyStatus::Pending => {}
                ReplyStatus::Done => {
                    self.stats.done += 1;
                    self.close_window(slot);
                    return true;
                }
                ReplyStatus::Complete => {
                    self.stats.replies += 1;
                    relay(self.reply.payload());
                    self.close_window(slot);
                    return true;
                }
                ReplyStatus::Garbled => {
                    warn!("garbled reply from {}", self.slots[slot].address);
                    self.stats.garbled += 1;
                    self.go_quiet(now);
                    self.close_window(slot);
                    return true;
                }
            }
        }
        false
    }

    /// Write buffered export bytes as one broadcast; `false` if the link
    /// was busy.
    fn flush_export(&mut self) -> bool {
        if self.export.is_empty() {
            return true;
        }
        let mut packet = [0u8; PACKET_HEADER_SIZE + MAX_EXPORT_PAYLOAD];
        let Ok(len) = encode_export(&self.export, &mut packet) else {
            self.export.clear();
            return true;
        };
        if !self.link.try_write(&packet[..len]) {
            return false;
        }
        self.stats.export_packets += 1;
        self.export.clear();
        true
    }

    fn drain_stray(&mut self) {
        while self.link.receive_byte().is_some() {
            self.stats.stray_bytes += 1;
        }
    }

    fn go_quiet(&mut self, now: Instant) {
        self.quiet_until = Some(now + self.config.idle_reset);
    }

    fn close_window(&mut self, slot: usize) {
        self.state = MasterState::Idle;
        self.next = (slot + 1) % self.slots.len();
    }

    /// Back to the first slot with nothing buffered.
    pub fn reset(&mut self) {
        self.link.reset();
        self.state = MasterState::Idle;
        self.next = 0;
        self.quiet_until = None;
        self.reply.reset();
        self.export.clear();
    }

    #[inline]
    pub fn state(&self) -> MasterState {
        self.state
    }

    #[inline]
    pub fn stats(&self) -> BusStats {
        self.stats
    }

    #[inline]
    pub fn slots(&self) -> &[BusSlot] {
        &self.slots
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::transport::MemoryLink;
    use cockpit_proto::{encode_reply, MAX_REPLY_SIZE, MSG_EXPORT, MSG_POLL, REPLY_DONE};
    use std::vec::Vec as StdVec;

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    fn master(addresses: &[u8]) -> BusMaster<MemoryLink, 4> {
        BusMaster::new(MemoryLink::new(), addresses, BusConfig::DEFAULT).unwrap()
    }

    fn reply(payload: &[u8]) -> StdVec<u8> {
        let mut buf = [0u8; MAX_REPLY_SIZE];
        let len = encode_reply(payload, &mut buf).unwrap();
        buf[..len].to_vec()
    }

    #[test]
    fn test_table_validation() {
        let new = |addresses: &[u8]| {
            BusMaster::<_, 2>::new(MemoryLink::new(), addresses, BusConfig::DEFAULT).map(|_| ())
        };
        assert_eq!(new(&[]), Err(ConfigError::EmptyTable));
        assert_eq!(new(&[0]), Err(ConfigError::InvalidSecondaryAddress));
        assert_eq!(new(&[127]), Err(ConfigError::InvalidSecondaryAddress));
        assert_eq!(new(&[3, 3]), Err(ConfigError::DuplicateSecondary));
        assert_eq!(new(&[1, 2, 3]), Err(ConfigError::TooManySecondaries));
        assert_eq!(new(&[1, 126]), Ok(()));
    }

    #[test]
    fn test_slots_keep_table_order() {
        let master = master(&[9, 4, 7]);
        let addresses: StdVec<(u8, usize)> =
            master.slots().iter().map(|s| (s.address, s.sequence)).collect();
        assert_eq!(addresses, [(9, 0), (4, 1), (7, 2)]);
    }

    #[test]
    fn test_polls_in_table_order() {
        let mut master = master(&[1, 2]);
        let mut relayed = StdVec::new();

        master.poll(at(0), |p| relayed.push(p.to_vec()));
        assert_eq!(master.state(), MasterState::Window { slot: 0, deadline: at(5) });

        master.link_mut().push_rx(&[REPLY_DONE]);
        master.poll(at(1), |p| relayed.push(p.to_vec()));
        assert_eq!(master.state(), MasterState::Window { slot: 1, deadline: at(6) });

        master.link_mut().push_rx(&[REPLY_DONE]);
        master.poll(at(2), |p| relayed.push(p.to_vec()));

        assert_eq!(
            master.link().writes(),
            [[1, MSG_POLL, 0], [2, MSG_POLL, 0], [1, MSG_POLL, 0]]
        );
        assert!(relayed.is_empty());
        assert_eq!(master.stats().done, 2);
    }

    #[test]
    fn test_valid_reply_is_relayed() {
        let mut master = master(&[5]);
        let mut relayed = StdVec::new();
        master.poll(at(0), |p| relayed.push(p.to_vec()));

        master.link_mut().push_rx(&reply(b"MASTER_ARM_SW 1\n"));
        master.poll(at(1), |p| relayed.push(p.to_vec()));

        assert_eq!(relayed, [b"MASTER_ARM_SW 1\n".to_vec()]);
        assert_eq!(master.stats().replies, 1);
    }

    #[test]
    fn test_partial_reply_keeps_window_open() {
        let mut master = master(&[5, 6]);
        let mut relayed = StdVec::new();
        master.poll(at(0), |p| relayed.push(p.to_vec()));

        let bytes = reply(b"A 1\n");
        master.link_mut().push_rx(&bytes[..3]);
        master.poll(at(1), |p| relayed.push(p.to_vec()));
        assert!(matches!(master.state(), MasterState::Window { slot: 0, .. }));

        master.link_mut().push_rx(&bytes[3..]);
        master.poll(at(2), |p| relayed.push(p.to_vec()));
        assert_eq!(relayed, [b"A 1\n".to_vec()]);
        assert!(matches!(master.state(), MasterState::Window { slot: 1, .. }));
    }

    #[test]
    fn test_expired_window_advances_after_quiet_period() {
        let mut master = master(&[1, 2]);
        master.poll(at(0), |_| {});
        master.poll(at(4), |_| {});
        assert!(matches!(master.state(), MasterState::Window { slot: 0, .. }));

        master.poll(at(5), |_| {});
        assert_eq!(master.state(), MasterState::Idle);
        assert_eq!(master.stats().timeouts, 1);

        // Line stays quiet until idle_reset has passed.
        master.poll(at(7), |_| {});
        assert_eq!(master.link().writes().len(), 1);
        master.poll(at(8), |_| {});
        assert_eq!(master.link().writes()[1], [2, MSG_POLL, 0]);
    }

    #[test]
    fn test_garbled_reply_closes_window() {
        let mut master = master(&[1, 2]);
        let mut relayed = StdVec::new();
        master.poll(at(0), |p| relayed.push(p.to_vec()));

        let mut bytes = reply(b"A 1\n");
        let last = bytes.len() - 1;
        bytes[last] ^= 0x5A;
        master.link_mut().push_rx(&bytes);
        master.poll(at(1), |p| relayed.push(p.to_vec()));

        assert!(relayed.is_empty());
        assert_eq!(master.stats().garbled, 1);
        assert_eq!(master.state(), MasterState::Idle);
    }

    #[test]
    fn test_export_flushed_before_token() {
        let mut master = master(&[1]);
        for &b in &[0x55, 0x55, 0x55, 0x55, 0x10] {
            assert!(master.queue_export(b));
        }
        master.poll(at(0), |_| {});

        assert_eq!(
            master.link().writes(),
            [
                std::vec![0, MSG_EXPORT, 5, 0x55, 0x55, 0x55, 0x55, 0x10],
                std::vec![1, MSG_POLL, 0],
            ]
        );
        assert_eq!(master.export_room(), MAX_EXPORT_PAYLOAD);
    }

    #[test]
    fn test_export_buffer_bounded() {
        let mut master = master(&[1]);
        for _ in 0..MAX_EXPORT_PAYLOAD {
            assert!(master.queue_export(0));
        }
        assert!(!master.queue_export(0));
        assert_eq!(master.export_room(), 0);
    }

    #[test]
    fn test_never_writes_while_window_open() {
        let mut master = master(&[1]);
        master.poll(at(0), |_| {});
        master.queue_export(0x42);
        master.poll(at(1), |_| {});
        master.poll(at(2), |_| {});
        assert_eq!(master.link().writes().len(), 1);
    }

    #[test]
    fn test_stray_bytes_drained_before_token() {
        let mut master = master(&[1]);
        master.link_mut().push_rx(&[0xEE, 0xEE]);
        master.poll(at(0), |_| {});
        assert_eq!(master.stats().stray_bytes, 2);
    }

    #[test]
    fn test_busy_link_delays_token() {
        let mut master = master(&[1]);
        master.link_mut().set_writable(false);
        master.poll(at(0), |_| {});
        assert_eq!(master.state(), MasterState::Polling { slot: 0 });

        master.link_mut().set_writable(true);
        master.poll(at(1), |_| {});
        assert_eq!(master.state(), MasterState::Window { slot: 0, deadline: at(6) });
    }

    #[test]
    fn test_reset_restarts_round() {
        let mut master = master(&[1, 2]);
        master.poll(at(0), |_| {});
        master.link_mut().push_rx(&[REPLY_DONE]);
        master.poll(at(1), |_| {});
        master.reset();
        assert_eq!(master.state(), MasterState::Idle);

        master.poll(at(2), |_| {});
        assert_eq!(master.link().writes().last().unwrap(), &[1, MSG_POLL, 0]);
    }
}
