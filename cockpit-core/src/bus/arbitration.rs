//! Bus arbitration over a simulated multi-drop line with three secondaries.

extern crate std;

use core::cell::Cell;
use std::string::{String, ToString};
use std::vec::Vec;

use cockpit_proto::{encode_sync, OutgoingMessage, WriteEvent, MSG_POLL};
use embassy_time::Instant;
use proptest::collection::vec;
use proptest::prelude::*;

use super::{BusConfig, BusMaster, BusSecondary};
use crate::dispatch::ExportListener;
use crate::node::{Controller, MasterController};
use crate::scheduler::PollingInput;
use crate::transport::{MemoryBus, MemoryBusPort, MemoryLink};

const ADDRESSES: [u8; 3] = [1, 2, 3];
const KEYS: [&str; 3] = ["PANEL_1", "PANEL_2", "PANEL_3"];

struct Knob {
    key: &'static str,
    value: Cell<i32>,
    reported: Cell<Option<i32>>,
}

impl Knob {
    fn new(key: &'static str) -> Self {
        Self {
            key,
            value: Cell::new(0),
            reported: Cell::new(Some(0)),
        }
    }
}

impl PollingInput for Knob {
    fn poll_once(&self) -> Option<OutgoingMessage> {
        let value = self.value.get();
        (self.reported.get() != Some(value)).then(|| OutgoingMessage::number(self.key, value))
    }

    fn message_sent(&self) {
        self.reported.set(Some(self.value.get()));
    }

    fn reset_state(&self) {
        self.reported.set(None);
    }
}

struct Gauge {
    value: Cell<u8>,
}

impl ExportListener for Gauge {
    fn on_state_byte(&self, _address: u16, value: u8) {
        self.value.set(value);
    }
}

type Master<'a> = MasterController<'a, MemoryLink, MemoryBusPort, 2, 2, 4>;
type Panel<'a> = Controller<'a, BusSecondary<MemoryBusPort>, 2, 2>;

fn at(ms: u64) -> Instant {
    Instant::from_millis(ms)
}

fn master<'a>(bus: &MemoryBus) -> Master<'a> {
    let bus_master = BusMaster::new(bus.port(), &ADDRESSES, BusConfig::DEFAULT).unwrap();
    MasterController::new(MemoryLink::new(), bus_master)
}

fn panel<'a>(bus: &MemoryBus, address: u8, knob: &'a Knob, gauge: &'a Gauge) -> Panel<'a> {
    let secondary = BusSecondary::new(bus.port(), address, BusConfig::DEFAULT).unwrap();
    let mut panel = Controller::new(secondary);
    panel.register_input(knob).unwrap();
    panel.register_listener(0x3000, 0x3000, gauge).unwrap();
    panel
}

fn is_token(unit: &[u8]) -> Option<u8> {
    match unit {
        [address, MSG_POLL, 0] => Some(*address),
        _ => None,
    }
}

/// Parse `<key> <value>\n` lines relayed upstream.
fn relayed(master: &Master<'_>) -> Vec<(String, i32)> {
    master
        .upstream()
        .writes()
        .iter()
        .map(|line| {
            let text = std::str::from_utf8(line).unwrap();
            let (key, value) = text.trim_end().split_once(' ').unwrap();
            (key.to_string(), value.parse().unwrap())
        })
        .collect()
}

#[test]
fn tokens_rotate_and_replies_stay_in_their_window() {
    let bus = MemoryBus::new();
    let knobs = KEYS.map(Knob::new);
    let gauges = [(); 3].map(|_| Gauge { value: Cell::new(0) });

    let mut master = master(&bus);
    let mut panels: Vec<Panel<'_>> = (0..3)
        .map(|i| panel(&bus, ADDRESSES[i], &knobs[i], &gauges[i]))
        .collect();

    for (i, knob) in knobs.iter().enumerate() {
        knob.value.set(i as i32 + 1);
    }
    for ms in 0..30 {
        master.run_cycle(at(ms));
        for panel in &mut panels {
            panel.run_cycle(at(ms));
        }
    }

    let log = bus.log();
    let tokens: Vec<u8> = log
        .iter()
        .filter(|(port, _)| *port == 0)
        .filter_map(|(_, unit)| is_token(unit))
        .collect();
    assert!(tokens.len() >= 9);
    for (i, &address) in tokens.iter().enumerate() {
        assert_eq!(address, ADDRESSES[i % 3]);
    }

    // Every secondary write directly answers a token addressed to it.
    let mut granted: Option<u8> = None;
    for (port, unit) in &log {
        if *port == 0 {
            granted = is_token(unit);
        } else {
            let address = ADDRESSES[*port - 1];
            assert_eq!(granted, Some(address), "unsolicited write from {}", address);
            granted = None;
        }
    }

    let mut lines = relayed(&master);
    lines.sort();
    assert_eq!(
        lines,
        [
            ("PANEL_1".to_string(), 1),
            ("PANEL_2".to_string(), 2),
            ("PANEL_3".to_string(), 3)
        ]
    );
    assert_eq!(master.bus_stats().timeouts, 0);
}

#[test]
fn export_broadcast_reaches_every_secondary() {
    let bus = MemoryBus::new();
    let knobs = KEYS.map(Knob::new);
    let gauges = [(); 3].map(|_| Gauge { value: Cell::new(0) });

    let mut master = master(&bus);
    let mut panels: Vec<Panel<'_>> = (0..3)
        .map(|i| panel(&bus, ADDRESSES[i], &knobs[i], &gauges[i]))
        .collect();

    let mut buf = [0u8; 16];
    let len = encode_sync(&mut buf).unwrap();
    master.upstream_mut().push_rx(&buf[..len]);
    let len = WriteEvent::new(0x3000, &[0xA7]).unwrap().encode(&mut buf).unwrap();
    master.upstream_mut().push_rx(&buf[..len]);

    for ms in 0..3 {
        master.run_cycle(at(ms));
        for panel in &mut panels {
            panel.run_cycle(at(ms));
        }
    }

    for gauge in &gauges {
        assert_eq!(gauge.value.get(), 0xA7);
    }
}

#[test]
fn missing_secondary_does_not_stall_the_round() {
    let bus = MemoryBus::new();
    let knob = Knob::new("PANEL_3");
    let gauge = Gauge { value: Cell::new(0) };

    let mut master = master(&bus);
    // Only address 3 is present.
    let mut present = panel(&bus, 3, &knob, &gauge);
    knob.value.set(42);

    for ms in 0..60 {
        master.run_cycle(at(ms));
        present.run_cycle(at(ms));
    }

    assert_eq!(relayed(&master), [("PANEL_3".to_string(), 42)]);
    let stats = master.bus_stats();
    assert!(stats.timeouts >= 2);
    assert!(stats.replies == 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Whatever the input activity, each secondary's last value is the last
    /// one relayed for it, and replies never overlap.
    #[test]
    fn last_value_wins_upstream(
        changes in vec((0usize..3, 1i32..1000, 0u64..40), 0..24)
    ) {
        let bus = MemoryBus::new();
        let knobs = KEYS.map(Knob::new);
        let gauges = [(); 3].map(|_| Gauge { value: Cell::new(0) });

        let mut master = master(&bus);
        let mut panels: Vec<Panel<'_>> = (0..3)
            .map(|i| panel(&bus, ADDRESSES[i], &knobs[i], &gauges[i]))
            .collect();

        for ms in 0..80u64 {
            for &(i, value, when) in &changes {
                if when == ms {
                    knobs[i].value.set(value);
                }
            }
            master.run_cycle(at(ms));
            for panel in &mut panels {
                panel.run_cycle(at(ms));
            }
        }

        let lines = relayed(&master);
        for (i, knob) in knobs.iter().enumerate() {
            let last = lines.iter().rev().find(|(key, _)| key == KEYS[i]).map(|(_, v)| *v);
            let expected = (knob.value.get() != 0).then(|| knob.value.get());
            prop_assert_eq!(last, expected);
        }

        let mut granted: Option<u8> = None;
        for (port, unit) in bus.log() {
            if port == 0 {
                granted = is_token(&unit);
            } else {
                prop_assert_eq!(granted, Some(ADDRESSES[port - 1]));
                granted = None;
            }
        }
        prop_assert_eq!(master.dropped_relays(), 0);
    }
}
