//! Routing of decoded state writes to the listeners that care about them.

use cockpit_proto::StateWrite;
use heapless::Vec;

/// A peripheral driver interested in part of the cockpit state.
///
/// Listeners are shared (`&self`) because the registry only borrows them and
/// the same driver is often registered as an input source too; keep mutable
/// state in `Cell`s.
pub trait ExportListener {
    /// Called once for every byte written inside the listener's range, in
    /// the order the bytes arrive.
    fn on_state_byte(&self, address: u16, value: u8);

    /// Called once per control cycle, after the cycle's writes.
    ///
    /// Listeners that assemble one value from several bytes use this to act
    /// once on the finished value instead of once per byte.
    fn on_cycle_commit(&self) {}
}

/// Error type for listener and input source registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistrationError {
    /// Range start lies after its end.
    InvalidRange,
    /// The registry has no room left.
    RegistryFull,
}

impl core::fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidRange => write!(f, "address range start after end"),
            Self::RegistryFull => write!(f, "registry full"),
        }
    }
}

/// Inclusive address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AddressRange {
    start: u16,
    end: u16,
}

impl AddressRange {
    pub const fn new(start: u16, end: u16) -> Result<Self, RegistrationError> {
        if start > end {
            return Err(RegistrationError::InvalidRange);
        }
        Ok(Self { start, end })
    }

    #[must_use]
    pub const fn single(address: u16) -> Self {
        Self {
            start: address,
            end: address,
        }
    }

    #[inline]
    #[must_use]
    pub const fn start(&self) -> u16 {
        self.start
    }

    #[inline]
    #[must_use]
    pub const fn end(&self) -> u16 {
        self.end
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, address: u16) -> bool {
        self.start <= address && address <= self.end
    }
}

/// Handle returned by [`StateDispatcher::register`], in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ListenerId(pub usize);

struct Registration<'a> {
    range: AddressRange,
    listener: &'a dyn ExportListener,
}

/// Registry of address-range listeners.
///
/// Built once at start-up; registrations are never removed. Overlapping
/// ranges are allowed and every listener whose range contains an address
/// sees each write to it, in registration order.
///
/// # Example
///
/// ```
/// use core::cell::Cell;
/// use cockpit_core::{ExportListener, StateDispatcher, StateWrite};
///
/// struct Lamp(Cell<bool>);
///
/// impl ExportListener for Lamp {
///     fn on_state_byte(&self, _address: u16, value: u8) {
///         self.0.set(value & 0x01 != 0);
///     }
/// }
///
/// let lamp = Lamp(Cell::new(false));
/// let mut dispatcher: StateDispatcher<'_, 8> = StateDispatcher::new();
/// dispatcher.register(0x1012, 0x1012, &lamp).unwrap();
/// dispatcher.dispatch(StateWrite::new(0x1012, 0x01));
/// assert!(lamp.0.get());
/// ```
pub struct StateDispatcher<'a, const N: usize> {
    registrations: Vec<Registration<'a>, N>,
}

impl<'a, const N: usize> StateDispatcher<'a, N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            registrations: Vec::new(),
        }
    }

    /// Register `listener` for the inclusive range `start..=end`.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::InvalidRange`] if `start > end`,
    /// [`RegistrationError::RegistryFull`] if `N` listeners are registered
    /// already. In both cases the registry is left untouched.
    pub fn register(
        &mut self,
        start: u16,
        end: u16,
        listener: &'a dyn ExportListener,
    ) -> Result<ListenerId, RegistrationError> {
        let range = match AddressRange::new(start, end) {
            Ok(range) => range,
            Err(e) => {
                warn!("rejected listener range {:#x}..={:#x}", start, end);
                return Err(e);
            }
        };
        self.register_range(range, listener)
    }

    /// Register `listener` for a single address.
    pub fn register_address(
        &mut self,
        address: u16,
        listener: &'a dyn ExportListener,
    ) -> Result<ListenerId, RegistrationError> {
        self.register_range(AddressRange::single(address), listener)
    }

    /// Register `listener` for an already validated range.
    pub fn register_range(
        &mut self,
        range: AddressRange,
        listener: &'a dyn ExportListener,
    ) -> Result<ListenerId, RegistrationError> {
        let id = ListenerId(self.registrations.len());
        self.registrations
            .push(Registration { range, listener })
            .map_err(|_| RegistrationError::RegistryFull)?;
        Ok(id)
    }

    /// Hand one state write to every listener whose range contains it.
    ///
    /// Writes outside every range are dropped; most of the address space is
    /// irrelevant to any one controller.
    pub fn dispatch(&self, write: StateWrite) {
        for registration in &self.registrations {
            if registration.range.contains(write.address) {
                registration
                    .listener
                    .on_state_byte(write.address, write.value);
            }
        }
    }

    /// End-of-cycle pass: let every listener act on what changed.
    pub fn commit_cycle(&self) {
        for registration in &self.registrations {
            registration.listener.on_cycle_commit();
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

impl<const N: usize> Default for StateDispatcher<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use core::cell::{Cell, RefCell};
    use std::vec::Vec;

    /// Records every write it sees, tagged with its own name.
    struct Recorder<'l> {
        name: &'static str,
        log: &'l RefCell<Vec<(&'static str, u16, u8)>>,
        commits: Cell<u32>,
    }

    impl<'l> Recorder<'l> {
        fn new(name: &'static str, log: &'l RefCell<Vec<(&'static str, u16, u8)>>) -> Self {
            Self {
                name,
                log,
                commits: Cell::new(0),
            }
        }
    }

    impl ExportListener for Recorder<'_> {
        fn on_state_byte(&self, address: u16, value: u8) {
            self.log.borrow_mut().push((self.name, address, value));
        }

        fn on_cycle_commit(&self) {
            self.commits.set(self.commits.get() + 1);
        }
    }

    /// Two-byte value that only reports once per cycle.
    struct WordDisplay {
        pending: Cell<u16>,
        shown: Cell<u16>,
        updates: Cell<u32>,
    }

    impl ExportListener for WordDisplay {
        fn on_state_byte(&self, address: u16, value: u8) {
            let word = self.pending.get();
            self.pending.set(if address & 1 == 0 {
                (word & 0xFF00) | value as u16
            } else {
                (word & 0x00FF) | ((value as u16) << 8)
            });
        }

        fn on_cycle_commit(&self) {
            if self.pending.get() != self.shown.get() {
                self.shown.set(self.pending.get());
                self.updates.set(self.updates.get() + 1);
            }
        }
    }

    #[test]
    fn test_routes_to_matching_range_only() {
        let log = RefCell::new(Vec::new());
        let a = Recorder::new("a", &log);
        let b = Recorder::new("b", &log);

        let mut dispatcher: StateDispatcher<'_, 4> = StateDispatcher::new();
        dispatcher.register(0x1000, 0x100F, &a).unwrap();
        dispatcher.register(0x2000, 0x2000, &b).unwrap();

        dispatcher.dispatch(StateWrite::new(0x1005, 1));
        dispatcher.dispatch(StateWrite::new(0x2000, 2));
        dispatcher.dispatch(StateWrite::new(0x3000, 3));

        assert_eq!(*log.borrow(), [("a", 0x1005, 1), ("b", 0x2000, 2)]);
    }

    #[test]
    fn test_overlapping_ranges_in_registration_order() {
        let log = RefCell::new(Vec::new());
        let second = Recorder::new("second", &log);
        let first = Recorder::new("first", &log);

        let mut dispatcher: StateDispatcher<'_, 4> = StateDispatcher::new();
        dispatcher.register(0x1000, 0x1010, &first).unwrap();
        dispatcher.register(0x1008, 0x1020, &second).unwrap();

        dispatcher.dispatch(StateWrite::new(0x100A, 7));
        dispatcher.dispatch(StateWrite::new(0x1002, 8));

        assert_eq!(
            *log.borrow(),
            [("first", 0x100A, 7), ("second", 0x100A, 7), ("first", 0x1002, 8)]
        );
    }

    #[test]
    fn test_inclusive_bounds() {
        let log = RefCell::new(Vec::new());
        let a = Recorder::new("a", &log);

        let mut dispatcher: StateDispatcher<'_, 1> = StateDispatcher::new();
        dispatcher.register(0x10, 0x12, &a).unwrap();
        for address in 0x0F..=0x13 {
            dispatcher.dispatch(StateWrite::new(address, 0));
        }
        let seen: Vec<u16> = log.borrow().iter().map(|&(_, a, _)| a).collect();
        assert_eq!(seen, [0x10, 0x11, 0x12]);
    }

    #[test]
    fn test_invalid_range_rejected_without_side_effects() {
        let log = RefCell::new(Vec::new());
        let a = Recorder::new("a", &log);

        let mut dispatcher: StateDispatcher<'_, 2> = StateDispatcher::new();
        assert_eq!(
            dispatcher.register(0x2000, 0x1000, &a),
            Err(RegistrationError::InvalidRange)
        );
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn test_registry_full() {
        let log = RefCell::new(Vec::new());
        let a = Recorder::new("a", &log);

        let mut dispatcher: StateDispatcher<'_, 1> = StateDispatcher::new();
        assert_eq!(dispatcher.register_address(0x10, &a), Ok(ListenerId(0)));
        assert_eq!(
            dispatcher.register_address(0x11, &a),
            Err(RegistrationError::RegistryFull)
        );
        assert_eq!(dispatcher.len(), 1);
    }

    #[test]
    fn test_commit_reaches_every_listener() {
        let log = RefCell::new(Vec::new());
        let a = Recorder::new("a", &log);
        let b = Recorder::new("b", &log);

        let mut dispatcher: StateDispatcher<'_, 2> = StateDispatcher::new();
        dispatcher.register_address(0x10, &a).unwrap();
        dispatcher.register_address(0x20, &b).unwrap();
        dispatcher.commit_cycle();
        dispatcher.commit_cycle();

        assert_eq!(a.commits.get(), 2);
        assert_eq!(b.commits.get(), 2);
    }

    #[test]
    fn test_commit_coalesces_multi_byte_value() {
        let display = WordDisplay {
            pending: Cell::new(0),
            shown: Cell::new(0),
            updates: Cell::new(0),
        };

        let mut dispatcher: StateDispatcher<'_, 1> = StateDispatcher::new();
        dispatcher.register(0x1000, 0x1001, &display).unwrap();

        dispatcher.dispatch(StateWrite::new(0x1000, 0x34));
        dispatcher.dispatch(StateWrite::new(0x1001, 0x12));
        dispatcher.commit_cycle();
        assert_eq!(display.shown.get(), 0x1234);
        assert_eq!(display.updates.get(), 1);

        // Same value rewritten: no new update
        dispatcher.dispatch(StateWrite::new(0x1000, 0x34));
        dispatcher.dispatch(StateWrite::new(0x1001, 0x12));
        dispatcher.commit_cycle();
        assert_eq!(display.updates.get(), 1);
    }
}
