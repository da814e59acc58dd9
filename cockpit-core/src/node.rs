//! Control cycle drivers.
//!
//! A node ties the pieces together. Once per cycle it pulls every available
//! byte through the frame parser into the dispatcher, gives the inputs one
//! chance to send, and lets listeners commit.
//!
//! - [`Controller`]: a node with a single medium (serial line, datagram
//!   socket or bus secondary)
//! - [`MasterController`]: the bus master node, between the simulator and
//!   the bus

use cockpit_proto::{
    FrameParser, OutgoingMessage, ParserStats, SerializeError, MAX_REPLY_PAYLOAD,
};
use embassy_time::Instant;
use heapless::Vec;

use crate::bus::{BusMaster, BusStats};
use crate::dispatch::{ExportListener, ListenerId, RegistrationError, StateDispatcher};
use crate::scheduler::{InputScheduler, PollOutcome, PollingInput, SourceId};
use crate::transport::{Link, LineTransport, Transport};

/// Error type for [`Controller::queue_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendError {
    /// A queued message is still waiting to be sent.
    OutboxFull,
    /// The message can never be put on the wire.
    Serialize(SerializeError),
}

impl From<SerializeError> for SendError {
    fn from(err: SerializeError) -> Self {
        SendError::Serialize(err)
    }
}

impl core::fmt::Display for SendError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OutboxFull => write!(f, "outbox full"),
            Self::Serialize(e) => write!(f, "serialize error: {}", e),
        }
    }
}

/// What one control cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CycleReport {
    /// State writes dispatched.
    pub writes: usize,
    /// The queued message went out this cycle.
    pub queued_sent: bool,
    /// Scheduler result; `None` when the cycle's send went to the queued
    /// message instead.
    pub poll: Option<PollOutcome>,
    /// Secondary replies relayed upstream (bus master only).
    pub relayed: usize,
}

/// Single-medium controller node.
///
/// `L` bounds the listener registry, `S` the input ring.
pub struct Controller<'a, T, const L: usize, const S: usize> {
    transport: T,
    parser: FrameParser,
    dispatcher: StateDispatcher<'a, L>,
    scheduler: InputScheduler<'a, S>,
    outbox: Option<OutgoingMessage>,
}

impl<'a, T: Transport, const L: usize, const S: usize> Controller<'a, T, L, S> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            parser: FrameParser::new(),
            dispatcher: StateDispatcher::new(),
            scheduler: InputScheduler::new(),
            outbox: None,
        }
    }

    pub fn register_listener(
        &mut self,
        start: u16,
        end: u16,
        listener: &'a dyn ExportListener,
    ) -> Result<ListenerId, RegistrationError> {
        self.dispatcher.register(start, end, listener)
    }

    pub fn register_input(
        &mut self,
        source: &'a dyn PollingInput,
    ) -> Result<SourceId, RegistrationError> {
        self.scheduler.register(source)
    }

    /// Run one control cycle.
    pub fn run_cycle(&mut self, now: Instant) -> CycleReport {
        self.transport.poll(now);

        let mut writes = 0;
        while let Some(byte) = self.transport.receive_byte() {
            if let Some(write) = self.parser.feed(byte) {
                self.dispatcher.dispatch(write);
                writes += 1;
            }
        }

        let queued_sent = self.flush_outbox();
        let poll = if queued_sent {
            None
        } else {
            Some(self.scheduler.poll_cycle(&mut self.transport))
        };
        self.dispatcher.commit_cycle();

        CycleReport {
            writes,
            queued_sent,
            poll,
            relayed: 0,
        }
    }

    fn flush_outbox(&mut self) -> bool {
        match self.outbox {
            Some(message) if self.transport.try_send(&message) => {
                self.outbox = None;
                true
            }
            _ => false,
        }
    }

    /// Queue a message outside the input ring, e.g. from a listener's
    /// reaction. It is offered to the transport once per cycle until taken.
    ///
    /// # Errors
    ///
    /// [`SendError::OutboxFull`] while an earlier message waits,
    /// [`SendError::Serialize`] for a message that can never be sent.
    pub fn queue_message(&mut self, message: OutgoingMessage) -> Result<(), SendError> {
        message.to_line()?;
        if self.outbox.is_some() {
            return Err(SendError::OutboxFull);
        }
        self.outbox = Some(message);
        Ok(())
    }

    /// Single send attempt, bypassing the outbox.
    pub fn try_send_now(&mut self, message: &OutgoingMessage) -> bool {
        self.transport.try_send(message)
    }

    /// Make every input re-report its current value on upcoming cycles.
    ///
    /// A message still waiting in the outbox or inside the transport is
    /// dropped, and so is any partial frame.
    pub fn reset_all_states(&mut self) {
        self.outbox = None;
        self.transport.reset();
        self.parser.reset();
        self.scheduler.reset_all_states();
    }

    #[inline]
    pub fn has_queued_message(&self) -> bool {
        self.outbox.is_some()
    }

    #[inline]
    pub fn parser_stats(&self) -> ParserStats {
        self.parser.stats()
    }

    pub fn scheduler(&self) -> &InputScheduler<'a, S> {
        &self.scheduler
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

/// Bus master node.
///
/// Reads the export stream from the simulator on the upstream link, acts on
/// it locally and rebroadcasts it on the bus. Local inputs are sent
/// upstream directly; secondary replies are relayed upstream verbatim.
///
/// A reply the upstream link refuses is held and retried on the next
/// cycle. No further window is granted while it waits.
pub struct MasterController<'a, U, B, const L: usize, const S: usize, const N: usize> {
    upstream: LineTransport<U>,
    bus: BusMaster<B, N>,
    parser: FrameParser,
    dispatcher: StateDispatcher<'a, L>,
    scheduler: InputScheduler<'a, S>,
    relay: Option<Vec<u8, MAX_REPLY_PAYLOAD>>,
    dropped_relays: u32,
}

impl<'a, U, B, const L: usize, const S: usize, const N: usize> MasterController<'a, U, B, L, S, N>
where
    U: Link,
    B: Link,
{
    pub fn new(upstream: U, bus: BusMaster<B, N>) -> Self {
        Self {
            upstream: LineTransport::new(upstream),
            bus,
            parser: FrameParser::new(),
            dispatcher: StateDispatcher::new(),
            scheduler: InputScheduler::new(),
            relay: None,
            dropped_relays: 0,
        }
    }

    pub fn register_listener(
        &mut self,
        start: u16,
        end: u16,
        listener: &'a dyn ExportListener,
    ) -> Result<ListenerId, RegistrationError> {
        self.dispatcher.register(start, end, listener)
    }

    pub fn register_input(
        &mut self,
        source: &'a dyn PollingInput,
    ) -> Result<SourceId, RegistrationError> {
        self.scheduler.register(source)
    }

    /// Run one control cycle.
    ///
    /// Upstream bytes are only taken while the broadcast buffer has room,
    /// so the rest waits on the upstream link rather than being lost.
    pub fn run_cycle(&mut self, now: Instant) -> CycleReport {
        self.upstream.poll(now);

        let mut writes = 0;
        while self.bus.export_room() > 0 {
            let Some(byte) = self.upstream.receive_byte() else {
                break;
            };
            if let Some(write) = self.parser.feed(byte) {
                self.dispatcher.dispatch(write);
                writes += 1;
            }
            self.bus.queue_export(byte);
        }

        let mut relayed = 0;
        if let Some(line) = self.relay.as_ref() {
            if self.upstream.link_mut().try_write(line) {
                self.relay = None;
                relayed += 1;
            }
        }

        if self.relay.is_none() {
            let upstream = &mut self.upstream;
            let held = &mut self.relay;
            let dropped = &mut self.dropped_relays;
            self.bus.poll(now, |line| {
                if upstream.link_mut().try_write(line) {
                    relayed += 1;
                    return;
                }
                if held.is_some() {
                    warn!("upstream busy, dropped relayed message");
                    *dropped += 1;
                    return;
                }
                match Vec::from_slice(line) {
                    Ok(line) => *held = Some(line),
                    Err(()) => *dropped += 1,
                }
            });
        }

        let poll = self.scheduler.poll_cycle(&mut self.upstream);
        self.dispatcher.commit_cycle();

        CycleReport {
            writes,
            queued_sent: false,
            poll: Some(poll),
            relayed,
        }
    }

    /// Make every local input re-report and restart the polling round.
    ///
    /// Buffered export bytes and a held relay are dropped.
    pub fn reset_all_states(&mut self) {
        self.relay = None;
        self.upstream.reset();
        self.parser.reset();
        self.bus.reset();
        self.scheduler.reset_all_states();
    }

    /// A secondary reply is waiting for the upstream link.
    #[inline]
    pub fn has_held_relay(&self) -> bool {
        self.relay.is_some()
    }

    #[inline]
    pub fn bus_stats(&self) -> BusStats {
        self.bus.stats()
    }

    #[inline]
    pub fn dropped_relays(&self) -> u32 {
        self.dropped_relays
    }

    #[inline]
    pub fn parser_stats(&self) -> ParserStats {
        self.parser.stats()
    }

    pub fn upstream(&self) -> &U {
        self.upstream.link()
    }

    pub fn upstream_mut(&mut self) -> &mut U {
        self.upstream.link_mut()
    }

    pub fn bus(&self) -> &BusMaster<B, N> {
        &self.bus
    }
}
