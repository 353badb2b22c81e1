//! Socket endpoints driven by the event loop.
//!
//! A [`Peer`] owns its descriptor: dropping it closes the socket. Peers enter
//! the loop either through the initial peer list handed to the builder or by
//! being accepted from a listening peer, and they are identified by a
//! [`PeerId`] that stays stable for the peer's whole life in the loop.

use crate::net::utils::format_addr;
use crate::reactor::socket;

use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

/// What a peer's socket is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerKind {
    /// Listening TCP socket, readiness means pending connections
    Listener,
    /// Connected TCP stream
    Tcp,
    /// Datagram socket, bound and optionally connected
    Udp,
}

/// Stable, generation-tagged identifier of a peer inside one event loop.
///
/// The table index of a peer moves when other peers are removed; its id does
/// not. Once the peer is removed the id never resolves again, even after the
/// underlying slot is handed to a newer peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId {
    slot: u32,
    generation: u32,
}

impl PeerId {
    pub(crate) const UNASSIGNED: PeerId = PeerId {
        slot: u32::MAX,
        generation: u32::MAX,
    };

    pub(crate) fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    pub(crate) fn slot(&self) -> u32 {
        self.slot
    }

    pub(crate) fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.slot, self.generation)
    }
}

/// One socket endpoint: a listening socket, a TCP connection or a UDP socket.
#[derive(Debug)]
pub struct Peer {
    id: PeerId,
    socket: OwnedFd,
    kind: PeerKind,
    address: Option<SocketAddr>,
    source: Option<SocketAddr>,
}

impl Peer {
    /// Wraps an existing socket.
    ///
    /// The address is resolved right away: the remote address for
    /// [`PeerKind::Tcp`], the local one for listeners and UDP sockets.
    pub fn new(socket: OwnedFd, kind: PeerKind) -> Self {
        let address = match kind {
            PeerKind::Tcp => socket::peer_addr(socket.as_raw_fd()),
            PeerKind::Listener | PeerKind::Udp => socket::local_addr(socket.as_raw_fd()),
        };

        Self {
            id: PeerId::UNASSIGNED,
            socket,
            kind,
            address,
            source: None,
        }
    }

    pub(crate) fn accepted(socket: OwnedFd, address: Option<SocketAddr>) -> Self {
        Self {
            id: PeerId::UNASSIGNED,
            socket,
            kind: PeerKind::Tcp,
            address,
            source: None,
        }
    }

    /// Identifier assigned when the peer entered the loop.
    pub fn id(&self) -> PeerId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: PeerId) {
        self.id = id;
    }

    pub fn kind(&self) -> PeerKind {
        self.kind
    }

    /// Raw descriptor, valid while the peer is alive.
    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// Resolved address: remote for TCP peers, local for listeners and UDP.
    pub fn addr(&self) -> Option<SocketAddr> {
        self.address
    }

    /// The address as `host:port`, or `unknown:unknown` when unresolved.
    pub fn addr_string(&self) -> String {
        format_addr(self.address.as_ref())
    }

    /// Sender of the datagram currently being dispatched (UDP only).
    pub fn source(&self) -> Option<SocketAddr> {
        self.source
    }

    pub(crate) fn set_source(&mut self, source: Option<SocketAddr>) {
        self.source = source;
    }

    /// Writes to the socket without blocking.
    ///
    /// Returns the number of bytes the kernel accepted, which may be less
    /// than `data.len()`. A full send buffer surfaces as
    /// [`io::ErrorKind::WouldBlock`].
    pub fn send(&self, data: &[u8]) -> io::Result<usize> {
        socket::send(self.fd(), data)
    }

    /// Sends one datagram to `target`.
    pub fn send_to(&self, data: &[u8], target: SocketAddr) -> io::Result<usize> {
        socket::send_to(self.fd(), data, target)
    }

    /// Answers the current message: back to [`Self::source`] for UDP peers,
    /// down the connection otherwise.
    pub fn reply(&self, data: &[u8]) -> io::Result<usize> {
        match (self.kind, self.source) {
            (PeerKind::Udp, Some(source)) => self.send_to(data, source),
            _ => self.send(data),
        }
    }
}

impl AsFd for Peer {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }
}

impl AsRawFd for Peer {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

impl From<Peer> for OwnedFd {
    fn from(peer: Peer) -> Self {
        peer.socket
    }
}

impl From<TcpListener> for Peer {
    fn from(listener: TcpListener) -> Self {
        Peer::new(OwnedFd::from(listener), PeerKind::Listener)
    }
}

impl From<TcpStream> for Peer {
    fn from(stream: TcpStream) -> Self {
        Peer::new(OwnedFd::from(stream), PeerKind::Tcp)
    }
}

impl From<UdpSocket> for Peer {
    fn from(socket: UdpSocket) -> Self {
        Peer::new(OwnedFd::from(socket), PeerKind::Udp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_resolves_local_address() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let local = listener.local_addr().unwrap();
        let peer = Peer::from(listener);

        assert_eq!(peer.kind(), PeerKind::Listener);
        assert_eq!(peer.addr(), Some(local));
        assert_eq!(peer.addr_string(), local.to_string());
        assert_eq!(peer.id(), PeerId::UNASSIGNED);
    }

    #[test]
    fn tcp_peer_resolves_remote_address() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let peer = Peer::from(stream);

        assert_eq!(peer.addr(), Some(listener.local_addr().unwrap()));
    }

    #[test]
    fn unresolved_address_formats_as_unknown() {
        let (left, _right) = std::os::unix::net::UnixStream::pair().unwrap();
        let peer = Peer::new(OwnedFd::from(left), PeerKind::Tcp);

        assert_eq!(peer.addr(), None);
        assert_eq!(peer.addr_string(), "unknown:unknown");
    }

    #[test]
    fn udp_reply_targets_source() {
        let peer = Peer::from(UdpSocket::bind("127.0.0.1:0").unwrap());
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();

        let mut peer = peer;
        peer.set_source(client.local_addr().ok());
        assert_eq!(peer.reply(b"pong").unwrap(), 4);

        let mut buffer = [0u8; 8];
        let (n, from) = client.recv_from(&mut buffer).unwrap();
        assert_eq!(&buffer[..n], b"pong");
        assert_eq!(Some(from), peer.addr());
    }

    #[test]
    fn peer_id_display() {
        assert_eq!(PeerId::new(3, 7).to_string(), "3v7");
    }
}
