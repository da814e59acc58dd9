//! UART plumbing between the RP2040 peripherals and the core links.
//!
//! Reception runs in RX tasks on an interrupt executor (see the binary),
//! so it preempts the control cycle; the bytes cross into the cycle through
//! a `heapless` SPSC queue. Writers below are blocking and used from the
//! control cycle only.

use cockpit_core::transport::QueuedSerialLink;
use cockpit_core::{MAX_EXPORT_PAYLOAD, PACKET_HEADER_SIZE, SERIAL_BAUDRATE};
use embassy_rp::gpio::Output;
use embassy_rp::uart::{Async, Config as UartConfig, Error as UartError, UartTx};
use embedded_io::{ErrorKind, ErrorType, Write};

/// Receive queue length per UART. Holds one less byte than this.
///
/// The longest blocking write is a full export broadcast on the bus. Both
/// lines run at the same baud rate, so the simulator sends at most that many
/// bytes meanwhile, on top of one cycle's worth.
pub const RX_QUEUE_SIZE: usize = 1024;

/// Bytes arriving during one 1 ms cycle at [`SERIAL_BAUDRATE`] (8N1).
pub const BYTES_PER_CYCLE: usize = SERIAL_BAUDRATE as usize / 10 / 1000 + 1;

const _: () = assert!(
    RX_QUEUE_SIZE - 1 >= PACKET_HEADER_SIZE + MAX_EXPORT_PAYLOAD + 2 * BYTES_PER_CYCLE,
    "RX queue cannot hold the bytes received during a bus broadcast"
);

/// Link to the simulator.
pub type UpstreamLink<'d> = QueuedSerialLink<'d, UartWriter<'d>, RX_QUEUE_SIZE>;

/// Link to the RS-485 bus.
pub type BusLink<'d> = QueuedSerialLink<'d, Rs485Writer<'d>, RX_QUEUE_SIZE>;

/// UART settings shared by the export stream and the bus: 8N1 at
/// [`SERIAL_BAUDRATE`].
#[must_use]
pub fn uart_config() -> UartConfig {
    let mut config = UartConfig::default();
    config.baudrate = SERIAL_BAUDRATE;
    config
}

/// UART error wrapped for `embedded-io`.
///
/// A newtype instead of a trait impl on [`UartError`] directly, which the
/// orphan rule forbids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub struct SerialError(pub UartError);

impl embedded_io::Error for SerialError {
    fn kind(&self) -> ErrorKind {
        match self.0 {
            UartError::Framing | UartError::Parity => ErrorKind::InvalidData,
            _ => ErrorKind::Other,
        }
    }
}

/// Transmit half of a point-to-point UART.
pub struct UartWriter<'d> {
    tx: UartTx<'d, Async>,
}

impl<'d> UartWriter<'d> {
    #[must_use]
    pub fn new(tx: UartTx<'d, Async>) -> Self {
        Self { tx }
    }
}

impl ErrorType for UartWriter<'_> {
    type Error = SerialError;
}

impl Write for UartWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.tx.blocking_write(buf).map_err(SerialError)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.tx.blocking_flush().map_err(SerialError)
    }
}

/// Transmit half of a half-duplex RS-485 transceiver.
///
/// Every `write` is one unit on the wire: the driver is enabled, the
/// bytes are sent, and the driver is released once the last stop bit has
/// left the shift register, so the line is free for the next speaker.
pub struct Rs485Writer<'d> {
    tx: UartTx<'d, Async>,
    driver_enable: Output<'d>,
}

impl<'d> Rs485Writer<'d> {
    /// `driver_enable` must start low so the board powers up listening.
    #[must_use]
    pub fn new(tx: UartTx<'d, Async>, driver_enable: Output<'d>) -> Self {
        Self { tx, driver_enable }
    }

    fn send(&mut self, buf: &[u8]) -> Result<(), UartError> {
        self.tx.blocking_write(buf)?;
        self.tx.blocking_flush()?;
        while self.tx.busy() {}
        Ok(())
    }
}

impl ErrorType for Rs485Writer<'_> {
    type Error = SerialError;
}

impl Write for Rs485Writer<'_> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.driver_enable.set_high();
        let result = self.send(buf);
        // Release the line even if the write failed.
        self.driver_enable.set_low();
        result.map_err(SerialError)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
