//! Datagram link for networked controllers.
//!
//! The simulator multicasts the export stream; the controller learns the
//! simulator's host from whatever it receives and answers it on a fixed
//! port. Without traffic for [`DatagramConfig::peer_timeout`] the peer is
//! forgotten and sends fail until the stream comes back.

use core::net::Ipv4Addr;

use embassy_time::{Duration, Instant};

use super::Link;

/// Multicast group the simulator exports to.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 50, 10);

/// Port of the multicast export stream.
pub const MULTICAST_PORT: u16 = 5010;

/// Port the simulator listens on for input messages.
pub const REPLY_PORT: u16 = 7778;

/// Largest datagram the link buffers.
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// A non-blocking datagram endpoint.
pub trait DatagramSocket {
    /// Identifies the peer host a datagram came from.
    type Addr: Copy + PartialEq;

    /// Receive one datagram into `buf` if one is waiting.
    fn try_recv(&mut self, buf: &mut [u8]) -> Option<(usize, Self::Addr)>;

    /// Send one datagram to `peer`; `false` if it could not be sent.
    fn try_send_to(&mut self, peer: Self::Addr, data: &[u8]) -> bool;
}

/// Configuration for [`DatagramLink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DatagramConfig {
    /// Silence after which the peer is forgotten.
    pub peer_timeout: Duration,
}

impl DatagramConfig {
    pub const DEFAULT: Self = Self {
        peer_timeout: Duration::from_millis(1000),
    };

    #[must_use]
    pub const fn with_peer_timeout(peer_timeout: Duration) -> Self {
        Self { peer_timeout }
    }
}

impl Default for DatagramConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// [`Link`] over a [`DatagramSocket`].
pub struct DatagramLink<S: DatagramSocket> {
    socket: S,
    config: DatagramConfig,
    peer: Option<S::Addr>,
    last_heard: Option<Instant>,
    now: Instant,
    buf: [u8; MAX_DATAGRAM_SIZE],
    pos: usize,
    len: usize,
}

impl<S: DatagramSocket> DatagramLink<S> {
    pub fn new(socket: S, config: DatagramConfig) -> Self {
        Self {
            socket,
            config,
            peer: None,
            last_heard: None,
            now: Instant::from_ticks(0),
            buf: [0; MAX_DATAGRAM_SIZE],
            pos: 0,
            len: 0,
        }
    }

    /// The simulator host, once one has been heard from.
    pub fn peer(&self) -> Option<S::Addr> {
        self.peer
    }

    pub fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }
}

impl<S: DatagramSocket> Link for DatagramLink<S> {
    fn receive_byte(&mut self) -> Option<u8> {
        while self.pos >= self.len {
            let (len, from) = self.socket.try_recv(&mut self.buf)?;
            if self.peer != Some(from) {
                info!("receiving export stream from new peer");
                self.peer = Some(from);
            }
            self.last_heard = Some(self.now);
            self.pos = 0;
            self.len = len.min(MAX_DATAGRAM_SIZE);
        }
        let byte = self.buf[self.pos];
        self.pos += 1;
        Some(byte)
    }

    fn try_write(&mut self, bytes: &[u8]) -> bool {
        match self.peer {
            Some(peer) => self.socket.try_send_to(peer, bytes),
            None => false,
        }
    }

    fn poll(&mut self, now: Instant) {
        self.now = now;
        if let Some(last) = self.last_heard {
            if now.saturating_duration_since(last) >= self.config.peer_timeout {
                info!("waiting for export stream packets");
                self.peer = None;
                self.last_heard = None;
            }
        }
    }

    fn reset(&mut self) {
        self.pos = 0;
        self.len = 0;
    }
}

#[cfg(feature = "std")]
pub use self::udp::MulticastSocket;

#[cfg(feature = "std")]
mod udp {
    use std::io;
    use std::net::{IpAddr, Ipv4Addr, UdpSocket};

    use super::{DatagramSocket, MULTICAST_GROUP, MULTICAST_PORT, REPLY_PORT};

    /// `std` UDP socket joined to the export multicast group.
    #[derive(Debug)]
    pub struct MulticastSocket {
        socket: UdpSocket,
        reply_port: u16,
    }

    impl MulticastSocket {
        /// Join the default group and answer on [`REPLY_PORT`].
        pub fn join_default() -> io::Result<Self> {
            Self::join(MULTICAST_GROUP, MULTICAST_PORT, REPLY_PORT)
        }

        pub fn join(group: Ipv4Addr, port: u16, reply_port: u16) -> io::Result<Self> {
            let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
            socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
            Self::from_socket(socket, reply_port)
        }

        /// Wrap an already bound socket; it is switched to non-blocking.
        pub fn from_socket(socket: UdpSocket, reply_port: u16) -> io::Result<Self> {
            socket.set_nonblocking(true)?;
            Ok(Self { socket, reply_port })
        }
    }

    impl DatagramSocket for MulticastSocket {
        type Addr = IpAddr;

        fn try_recv(&mut self, buf: &mut [u8]) -> Option<(usize, IpAddr)> {
            self.socket
                .recv_from(buf)
                .ok()
                .map(|(len, from)| (len, from.ip()))
        }

        fn try_send_to(&mut self, peer: IpAddr, data: &[u8]) -> bool {
            matches!(
                self.socket.send_to(data, (peer, self.reply_port)),
                Ok(n) if n == data.len()
            )
        }
    }
}
