//! Fair round-robin polling of panel inputs.
//!
//! At most one message is handed to the transport per cycle and at most one
//! may be outstanding. A cursor rotates over the registered sources so that
//! a switch that chatters cannot starve the others.

use cockpit_proto::OutgoingMessage;
use heapless::Vec;

use crate::dispatch::RegistrationError;
use crate::transport::Transport;

/// A panel input the scheduler polls for changes.
///
/// Inputs are shared (`&self`), so keep the last-reported value in a `Cell`.
pub trait PollingInput {
    /// Report the input's current value if it differs from the last one
    /// sent.
    ///
    /// Must be idempotent until [`message_sent`](Self::message_sent): asking
    /// twice without a send in between returns the same message.
    fn poll_once(&self) -> Option<OutgoingMessage>;

    /// The message last returned by `poll_once` was accepted for sending;
    /// remember its value as reported.
    fn message_sent(&self);

    /// Forget the last-reported value so that the next poll reports the
    /// current one.
    fn reset_state(&self);
}

/// Handle returned by [`InputScheduler::register`], in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SourceId(pub usize);

/// What one scheduling pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PollOutcome {
    /// The previous message is still pending on the transport; nothing was
    /// polled.
    Backpressure,
    /// A message from this source was accepted by the transport.
    Sent(SourceId),
    /// This source had a message but the transport refused it; the cursor
    /// stays on it for the next pass.
    SendDeferred(SourceId),
    /// No source had anything to report.
    Idle,
}

/// Round-robin scheduler over up to `N` input sources.
pub struct InputScheduler<'a, const N: usize> {
    sources: Vec<&'a dyn PollingInput, N>,
    cursor: usize,
    in_flight: bool,
}

impl<'a, const N: usize> InputScheduler<'a, N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sources: Vec::new(),
            cursor: 0,
            in_flight: false,
        }
    }

    /// Add a source to the end of the ring.
    pub fn register(&mut self, source: &'a dyn PollingInput) -> Result<SourceId, RegistrationError> {
        let id = SourceId(self.sources.len());
        self.sources
            .push(source)
            .map_err(|_| RegistrationError::RegistryFull)?;
        Ok(id)
    }

    /// Run one scheduling pass against `transport`.
    ///
    /// Sources are polled starting at the cursor and wrapping around once.
    /// The first one with a message gets one send attempt; on success the
    /// cursor moves past it, otherwise it stays so the same source is first
    /// in line next time.
    pub fn poll_cycle<T: Transport + ?Sized>(&mut self, transport: &mut T) -> PollOutcome {
        if self.in_flight {
            if transport.message_pending() {
                return PollOutcome::Backpressure;
            }
            self.in_flight = false;
        }

        let count = self.sources.len();
        for offset in 0..count {
            let index = (self.cursor + offset) % count;
            let source = self.sources[index];
            let Some(message) = source.poll_once() else {
                continue;
            };

            if !transport.try_send(&message) {
                trace!("send deferred for source {}", index);
                self.cursor = index;
                return PollOutcome::SendDeferred(SourceId(index));
            }

            source.message_sent();
            self.in_flight = true;
            self.cursor = (index + 1) % count;
            return PollOutcome::Sent(SourceId(index));
        }

        PollOutcome::Idle
    }

    /// Make every source re-report its current value and drop any
    /// outstanding-send bookkeeping.
    pub fn reset_all_states(&mut self) {
        for source in &self.sources {
            source.reset_state();
        }
        self.in_flight = false;
        self.cursor = 0;
    }

    #[inline]
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Index of the source polled first in the next pass.
    #[inline]
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl<const N: usize> Default for InputScheduler<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}
