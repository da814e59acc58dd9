#![no_std]
#![no_main]

use cockpit_core::transport::QueuedSerialLink;
use cockpit_firmware::{
    uart_config, ActionButton, Lamp, Panel, RegistrationError, ToggleSwitch, MAX_INPUTS,
    MAX_LISTENERS, RX_QUEUE_SIZE,
};
use defmt::{error, info, trace, warn};
use defmt_rtt as _;
use embassy_executor::{InterruptExecutor, Spawner};
use embassy_rp::gpio::{Input, Level, Output, Pull};
use embassy_rp::interrupt::{InterruptExt, Priority};
use embassy_rp::{bind_interrupts, interrupt};
use embassy_rp::peripherals::{UART0, UART1};
use embassy_rp::uart::{Async, InterruptHandler, Uart, UartRx};
use embassy_time::{Duration, Instant, Ticker};
use heapless::spsc::{Producer, Queue};
use static_cell::StaticCell;

#[cfg(feature = "role-direct")]
use cockpit_firmware::{Controller, LineTransport, UartWriter, UpstreamLink};
#[cfg(feature = "role-bus-master")]
use cockpit_firmware::{
    BusConfig, BusLink, BusMaster, MasterController, Rs485Writer, UartWriter, UpstreamLink,
    MAX_SECONDARIES, SECONDARY_ADDRESSES,
};
#[cfg(feature = "role-bus-secondary")]
use cockpit_firmware::{
    BusConfig, BusLink, BusSecondary, Controller, Rs485Writer, SECONDARY_ADDRESS,
};

#[cfg(feature = "dev-panic")]
use panic_probe as _;
#[cfg(feature = "prod-panic")]
use panic_reset as _;

bind_interrupts!(struct Irqs {
    UART0_IRQ => InterruptHandler<UART0>;
    UART1_IRQ => InterruptHandler<UART1>;
});

/// Runs the RX tasks above the control task, which blocks while writing.
static RX_EXECUTOR: InterruptExecutor = InterruptExecutor::new();

#[interrupt]
unsafe fn SWI_IRQ_1() {
    RX_EXECUTOR.on_interrupt()
}

/// Control cycle period.
const CYCLE_PERIOD: Duration = Duration::from_millis(1);

/// Master caution lamp: bit 3 of export byte 0x1012.
const MASTER_CAUTION_ADDRESS: u16 = 0x1012;
const MASTER_CAUTION_MASK: u8 = 0x08;

#[cfg(feature = "role-direct")]
type Node = Controller<'static, LineTransport<UpstreamLink<'static>>, MAX_LISTENERS, MAX_INPUTS>;

#[cfg(feature = "role-bus-master")]
type Node = MasterController<
    'static,
    UpstreamLink<'static>,
    BusLink<'static>,
    MAX_LISTENERS,
    MAX_INPUTS,
    MAX_SECONDARIES,
>;

#[cfg(feature = "role-bus-secondary")]
type Node = Controller<'static, BusSecondary<BusLink<'static>>, MAX_LISTENERS, MAX_INPUTS>;

type RxQueue = Queue<u8, RX_QUEUE_SIZE>;

/// Bytes from the simulator, filled by the RX task.
#[cfg(any(feature = "role-direct", feature = "role-bus-master"))]
static UPSTREAM_RX: StaticCell<RxQueue> = StaticCell::new();

/// Bytes from the bus, filled by the RX task.
#[cfg(any(feature = "role-bus-master", feature = "role-bus-secondary"))]
static BUS_RX: StaticCell<RxQueue> = StaticCell::new();

/// Panel drivers; the node's registries borrow them for `'static`.
static PANEL: StaticCell<Panel<'static>> = StaticCell::new();

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Cockpit panel starting...");

    let p = embassy_rp::init(embassy_rp::config::Config::default());

    interrupt::SWI_IRQ_1.set_priority(Priority::P2);
    let rx_spawner = RX_EXECUTOR.start(interrupt::SWI_IRQ_1);

    // --- Panel ---
    let panel: &'static Panel<'static> = PANEL.init(Panel {
        master_caution: Lamp::new(
            Output::new(p.PIN_25, Level::Low),
            MASTER_CAUTION_ADDRESS,
            MASTER_CAUTION_MASK,
        ),
        master_arm: ToggleSwitch::new(Input::new(p.PIN_15, Pull::Up), "MASTER_ARM_SW"),
        caution_reset: ActionButton::new(
            Input::new(p.PIN_14, Pull::Up),
            "UFC_MASTER_CAUTION",
            "TOGGLE",
        ),
    });

    // --- Simulator UART ---
    #[cfg(any(feature = "role-direct", feature = "role-bus-master"))]
    let upstream: UpstreamLink<'static> = {
        let uart = Uart::new(
            p.UART1,
            p.PIN_8, // TX
            p.PIN_9, // RX
            Irqs,
            p.DMA_CH0,
            p.DMA_CH1,
            uart_config(),
        );
        let (tx, rx) = uart.split();
        let (producer, consumer) = UPSTREAM_RX.init(Queue::new()).split();
        rx_spawner.spawn(rx_task(rx, producer).unwrap());
        QueuedSerialLink::new(consumer, UartWriter::new(tx))
    };

    // --- RS-485 bus UART ---
    #[cfg(any(feature = "role-bus-master", feature = "role-bus-secondary"))]
    let bus: BusLink<'static> = {
        let uart = Uart::new(
            p.UART0,
            p.PIN_0, // TX
            p.PIN_1, // RX
            Irqs,
            p.DMA_CH2,
            p.DMA_CH3,
            uart_config(),
        );
        let (tx, rx) = uart.split();
        let driver_enable = Output::new(p.PIN_2, Level::Low);
        let (producer, consumer) = BUS_RX.init(Queue::new()).split();
        rx_spawner.spawn(rx_task(rx, producer).unwrap());
        QueuedSerialLink::new(consumer, Rs485Writer::new(tx, driver_enable))
    };

    // --- Node ---
    #[cfg(feature = "role-direct")]
    let mut node: Node = Controller::new(LineTransport::new(upstream));

    #[cfg(feature = "role-bus-master")]
    let mut node: Node = match BusMaster::new(bus, &SECONDARY_ADDRESSES, BusConfig::DEFAULT) {
        Ok(bus) => MasterController::new(upstream, bus),
        Err(e) => {
            error!("Invalid bus configuration: {:?}", e);
            return;
        }
    };

    #[cfg(feature = "role-bus-secondary")]
    let mut node: Node = match BusSecondary::new(bus, SECONDARY_ADDRESS, BusConfig::DEFAULT) {
        Ok(secondary) => Controller::new(secondary),
        Err(e) => {
            error!("Invalid bus address {}: {:?}", SECONDARY_ADDRESS, e);
            return;
        }
    };

    if let Err(e) = register_panel(&mut node, panel) {
        error!("Panel registration failed: {:?}", e);
    }

    spawner.spawn(control_task(node).unwrap());

    info!("Cockpit panel initialized, waiting for data...");
}

fn register_panel(node: &mut Node, panel: &'static Panel<'static>) -> Result<(), RegistrationError> {
    let lamp = &panel.master_caution;
    node.register_listener(lamp.address(), lamp.address(), lamp)?;
    node.register_input(&panel.master_arm)?;
    node.register_input(&panel.caution_reset)?;
    Ok(())
}

/// RX task - moves received bytes into the control cycle's queue.
///
/// One instance per UART, on the interrupt executor so that blocking writes
/// in the control task cannot starve it. Overruns and a full queue lose
/// bytes; the export parser resynchronizes at the next sentinel and the bus
/// decoders at the next idle gap.
#[embassy_executor::task(pool_size = 2)]
async fn rx_task(mut rx: UartRx<'static, Async>, mut queue: Producer<'static, u8, RX_QUEUE_SIZE>) {
    let mut byte = [0u8; 1];
    loop {
        match rx.read(&mut byte).await {
            Ok(()) => {
                if queue.enqueue(byte[0]).is_err() {
                    warn!("RX queue full, byte dropped");
                }
            }
            Err(e) => warn!("UART error: {:?}", e),
        }
    }
}

/// Control task - owns the node and runs one cycle per tick.
#[embassy_executor::task]
async fn control_task(mut node: Node) {
    let mut ticker = Ticker::every(CYCLE_PERIOD);
    loop {
        let report = node.run_cycle(Instant::now());
        if report.writes > 0 || report.relayed > 0 {
            trace!("Cycle: {:?}", report);
        }
        ticker.next().await;
    }
}
