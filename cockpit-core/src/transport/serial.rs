//! Serial line links over `embedded-io`.

use embedded_io::{Read, ReadReady, Write, WriteReady};
use heapless::spsc::Consumer;

use super::Link;

/// Serial port polled directly from the control cycle.
///
/// Suits peripherals with a hardware FIFO deep enough to hold the bytes
/// that arrive between two cycles.
pub struct SerialLink<S> {
    port: S,
}

impl<S> SerialLink<S>
where
    S: Read + ReadReady + Write + WriteReady,
{
    pub fn new(port: S) -> Self {
        Self { port }
    }

    pub fn port_mut(&mut self) -> &mut S {
        &mut self.port
    }

    pub fn into_inner(self) -> S {
        self.port
    }
}

impl<S> Link for SerialLink<S>
where
    S: Read + ReadReady + Write + WriteReady,
{
    fn receive_byte(&mut self) -> Option<u8> {
        if !self.port.read_ready().ok()? {
            return None;
        }
        let mut byte = [0u8; 1];
        match self.port.read(&mut byte) {
            Ok(1) => Some(byte[0]),
            _ => None,
        }
    }

    /// Writes only once the port reports room; a line is short enough that
    /// the rest drains from the FIFO without stalling the cycle for long.
    fn try_write(&mut self, bytes: &[u8]) -> bool {
        match self.port.write_ready() {
            Ok(true) => self.port.write_all(bytes).is_ok(),
            _ => false,
        }
    }
}

/// Serial link whose receive side is filled from an interrupt or a
/// dedicated RX task.
///
/// The producer half of the queue lives with the receiver; this link owns
/// the consumer half and drains it from the control cycle. Transmission
/// goes straight to the writer.
pub struct QueuedSerialLink<'q, W, const N: usize> {
    rx: Consumer<'q, u8, N>,
    tx: W,
}

impl<'q, W: Write, const N: usize> QueuedSerialLink<'q, W, N> {
    pub fn new(rx: Consumer<'q, u8, N>, tx: W) -> Self {
        Self { rx, tx }
    }

    /// Bytes waiting in the receive queue.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.tx
    }
}

impl<W: Write, const N: usize> Link for QueuedSerialLink<'_, W, N> {
    fn receive_byte(&mut self) -> Option<u8> {
        self.rx.dequeue()
    }

    fn try_write(&mut self, bytes: &[u8]) -> bool {
        self.tx.write_all(bytes).is_ok()
    }

    fn reset(&mut self) {
        while self.rx.dequeue().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use core::convert::Infallible;
    use heapless::spsc::Queue;
    use std::collections::VecDeque;
    use std::vec::Vec;

    /// Loopback-free fake UART.
    #[derive(Default)]
    struct FakeUart {
        rx: VecDeque<u8>,
        tx: Vec<u8>,
        tx_full: bool,
    }

    impl embedded_io::ErrorType for FakeUart {
        type Error = Infallible;
    }

    impl Read for FakeUart {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            let mut n = 0;
            while n < buf.len() {
                match self.rx.pop_front() {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }
    }

    impl ReadReady for FakeUart {
        fn read_ready(&mut self) -> Result<bool, Self::Error> {
            Ok(!self.rx.is_empty())
        }
    }

    impl Write for FakeUart {
        fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            self.tx.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    impl WriteReady for FakeUart {
        fn write_ready(&mut self) -> Result<bool, Self::Error> {
            Ok(!self.tx_full)
        }
    }

    #[test]
    fn test_serial_link_reads_when_ready() {
        let mut uart = FakeUart::default();
        uart.rx.extend([0x55, 0x01]);
        let mut link = SerialLink::new(uart);

        assert_eq!(link.receive_byte(), Some(0x55));
        assert_eq!(link.receive_byte(), Some(0x01));
        assert_eq!(link.receive_byte(), None);
    }

    #[test]
    fn test_serial_link_write_waits_for_room() {
        let mut link = SerialLink::new(FakeUart {
            tx_full: true,
            ..FakeUart::default()
        });
        assert!(!link.try_write(b"A 1\n"));
        assert!(link.port_mut().tx.is_empty());

        link.port_mut().tx_full = false;
        assert!(link.try_write(b"A 1\n"));
        assert_eq!(link.into_inner().tx, b"A 1\n");
    }

    #[test]
    fn test_queued_link_drains_consumer() {
        let mut queue: Queue<u8, 8> = Queue::new();
        let (mut producer, consumer) = queue.split();
        let mut link = QueuedSerialLink::new(consumer, FakeUart::default());

        producer.enqueue(1).unwrap();
        producer.enqueue(2).unwrap();
        assert_eq!(link.pending(), 2);
        assert_eq!(link.receive_byte(), Some(1));

        producer.enqueue(3).unwrap();
        link.reset();
        assert_eq!(link.receive_byte(), None);

        assert!(link.try_write(b"B 2\n"));
        assert_eq!(link.writer_mut().tx, b"B 2\n");
    }
}
