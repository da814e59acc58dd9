//! In-memory media for host tests and simulations.

extern crate std;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

use embassy_time::Instant;

use super::Link;

/// Scripted point-to-point link.
///
/// Bytes pushed with [`push_rx`](Self::push_rx) are returned by
/// `receive_byte`; every successful write is recorded as one unit.
#[derive(Debug, Default)]
pub struct MemoryLink {
    rx: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    blocked: bool,
    polls: usize,
    resets: usize,
}

impl MemoryLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes to be received.
    pub fn push_rx(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied());
    }

    /// Bytes queued but not yet received.
    pub fn rx_len(&self) -> usize {
        self.rx.len()
    }

    /// While not writable every `try_write` fails.
    pub fn set_writable(&mut self, writable: bool) {
        self.blocked = !writable;
    }

    /// Units written so far, oldest first.
    pub fn writes(&self) -> &[Vec<u8>] {
        &self.writes
    }

    /// All written bytes concatenated.
    pub fn written_bytes(&self) -> Vec<u8> {
        self.writes.concat()
    }

    pub fn take_writes(&mut self) -> Vec<Vec<u8>> {
        core::mem::take(&mut self.writes)
    }

    pub fn polls(&self) -> usize {
        self.polls
    }

    pub fn resets(&self) -> usize {
        self.resets
    }
}

impl Link for MemoryLink {
    fn receive_byte(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn try_write(&mut self, bytes: &[u8]) -> bool {
        if self.blocked {
            return false;
        }
        self.writes.push(bytes.to_vec());
        true
    }

    fn poll(&mut self, _now: Instant) {
        self.polls += 1;
    }

    fn reset(&mut self) {
        self.rx.clear();
        self.resets += 1;
    }
}

#[derive(Debug, Default)]
struct BusWire {
    rx: Vec<VecDeque<u8>>,
    log: Vec<(usize, Vec<u8>)>,
}

/// Shared multi-drop medium: whatever one port writes, every other port
/// hears, in write order.
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    wire: Rc<RefCell<BusWire>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new node to the medium.
    pub fn port(&self) -> MemoryBusPort {
        let mut wire = self.wire.borrow_mut();
        wire.rx.push(VecDeque::new());
        MemoryBusPort {
            wire: Rc::clone(&self.wire),
            index: wire.rx.len() - 1,
        }
    }

    /// Every unit written so far as `(port index, bytes)`, in wire order.
    pub fn log(&self) -> Vec<(usize, Vec<u8>)> {
        self.wire.borrow().log.clone()
    }

    pub fn clear_log(&self) {
        self.wire.borrow_mut().log.clear();
    }

    /// Put raw bytes on the wire as if from an outside node.
    pub fn inject(&self, bytes: &[u8]) {
        let mut wire = self.wire.borrow_mut();
        for rx in wire.rx.iter_mut() {
            rx.extend(bytes.iter().copied());
        }
    }
}

/// One node's connection to a [`MemoryBus`].
#[derive(Debug)]
pub struct MemoryBusPort {
    wire: Rc<RefCell<BusWire>>,
    index: usize,
}

impl MemoryBusPort {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Link for MemoryBusPort {
    fn receive_byte(&mut self) -> Option<u8> {
        self.wire.borrow_mut().rx[self.index].pop_front()
    }

    fn try_write(&mut self, bytes: &[u8]) -> bool {
        let mut wire = self.wire.borrow_mut();
        for (i, rx) in wire.rx.iter_mut().enumerate() {
            if i != self.index {
                rx.extend(bytes.iter().copied());
            }
        }
        wire.log.push((self.index, bytes.to_vec()));
        true
    }

    fn reset(&mut self) {
        self.wire.borrow_mut().rx[self.index].clear();
    }
}
