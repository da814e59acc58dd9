//! Demonstration panel: one lamp, one toggle switch, one push button.
//!
//! The drivers only see `&self` (the registries hold shared references),
//! so all mutable state sits in `Cell`/`RefCell`.

use core::cell::{Cell, RefCell};

use cockpit_core::{ExportListener, OutgoingMessage, PollingInput};
use embassy_rp::gpio::{Input, Output};
use embassy_time::{Duration, Instant};

/// How long a contact must read the same level before it counts.
pub const DEBOUNCE: Duration = Duration::from_millis(10);

/// Export-stream lamp bit.
///
/// Lit when `value & mask != 0` for the byte at `address`. The pin is
/// updated once per cycle, after every write of the cycle has been seen.
pub struct Lamp<'d> {
    output: RefCell<Output<'d>>,
    address: u16,
    mask: u8,
    lit: Cell<bool>,
    shown: Cell<Option<bool>>,
}

impl<'d> Lamp<'d> {
    #[must_use]
    pub fn new(output: Output<'d>, address: u16, mask: u8) -> Self {
        Self {
            output: RefCell::new(output),
            address,
            mask,
            lit: Cell::new(false),
            shown: Cell::new(None),
        }
    }

    #[inline]
    #[must_use]
    pub fn address(&self) -> u16 {
        self.address
    }
}

impl ExportListener for Lamp<'_> {
    fn on_state_byte(&self, address: u16, value: u8) {
        if address == self.address {
            self.lit.set(value & self.mask != 0);
        }
    }

    fn on_cycle_commit(&self) {
        let lit = self.lit.get();
        if self.shown.get() == Some(lit) {
            return;
        }
        let mut output = self.output.borrow_mut();
        if lit {
            output.set_high();
        } else {
            output.set_low();
        }
        self.shown.set(Some(lit));
    }
}

/// Contact debouncer; `true` means closed (pin pulled low).
struct Contact<'d> {
    pin: Input<'d>,
    level: Cell<bool>,
    since: Cell<Instant>,
}

impl<'d> Contact<'d> {
    fn new(pin: Input<'d>) -> Self {
        let level = pin.is_low();
        Self {
            pin,
            level: Cell::new(level),
            since: Cell::new(Instant::now()),
        }
    }

    /// Debounced level, or `None` while the contact is still bouncing.
    fn stable(&self) -> Option<bool> {
        let level = self.pin.is_low();
        let now = Instant::now();
        if level != self.level.get() {
            self.level.set(level);
            self.since.set(now);
            return None;
        }
        (now - self.since.get() >= DEBOUNCE).then_some(level)
    }
}

/// Two-position switch reported as `<key> 0` / `<key> 1`.
pub struct ToggleSwitch<'d> {
    contact: Contact<'d>,
    key: &'static str,
    polled: Cell<Option<bool>>,
    reported: Cell<Option<bool>>,
}

impl<'d> ToggleSwitch<'d> {
    #[must_use]
    pub fn new(pin: Input<'d>, key: &'static str) -> Self {
        Self {
            contact: Contact::new(pin),
            key,
            polled: Cell::new(None),
            reported: Cell::new(None),
        }
    }
}

impl PollingInput for ToggleSwitch<'_> {
    fn poll_once(&self) -> Option<OutgoingMessage> {
        let closed = self.contact.stable()?;
        if self.reported.get() == Some(closed) {
            return None;
        }
        self.polled.set(Some(closed));
        Some(OutgoingMessage::number(self.key, i32::from(closed)))
    }

    fn message_sent(&self) {
        if let Some(closed) = self.polled.take() {
            self.reported.set(Some(closed));
        }
    }

    fn reset_state(&self) {
        self.polled.set(None);
        self.reported.set(None);
    }
}

/// Momentary button that sends one fixed action per press.
///
/// Releases are not reported.
pub struct ActionButton<'d> {
    contact: Contact<'d>,
    key: &'static str,
    action: &'static str,
    /// Whether the current press has been reported.
    latched: Cell<bool>,
}

impl<'d> ActionButton<'d> {
    #[must_use]
    pub fn new(pin: Input<'d>, key: &'static str, action: &'static str) -> Self {
        Self {
            contact: Contact::new(pin),
            key,
            action,
            latched: Cell::new(false),
        }
    }
}

impl PollingInput for ActionButton<'_> {
    fn poll_once(&self) -> Option<OutgoingMessage> {
        match self.contact.stable()? {
            true if !self.latched.get() => Some(OutgoingMessage::text(self.key, self.action)),
            true => None,
            false => {
                self.latched.set(false);
                None
            }
        }
    }

    fn message_sent(&self) {
        self.latched.set(true);
    }

    // A press is an event, not a state: nothing to re-report.
    fn reset_state(&self) {}
}

/// Everything on the board, allocated once and shared with the node.
pub struct Panel<'d> {
    pub master_caution: Lamp<'d>,
    pub master_arm: ToggleSwitch<'d>,
    pub caution_reset: ActionButton<'d>,
}
