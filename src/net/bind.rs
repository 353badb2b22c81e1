//! Socket construction for the peers handed to an event loop.
//!
//! Every socket comes back non-blocking, wrapped in a [`Peer`] of the
//! matching kind. Bound sockets also get `SO_REUSEADDR`.

use crate::peer::{Peer, PeerKind};

use socket2::{Domain, Protocol, SockAddr, SockRef, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::os::unix::io::OwnedFd;
use std::time::Duration;
use tracing::debug;

/// Binds a listening TCP socket.
///
/// Tries each resolved address in turn and returns the first that binds.
/// A `backlog` of 0 or below falls back to `SOMAXCONN`.
///
/// # Example
/// ```no_run
/// let listener = sockloop::net::bind_tcp("127.0.0.1:8080", 128)?;
/// println!("listening on {}", listener.addr_string());
/// # Ok::<(), std::io::Error>(())
/// ```
pub fn bind_tcp(address: impl ToSocketAddrs, backlog: i32) -> io::Result<Peer> {
    let backlog = if backlog <= 0 { libc::SOMAXCONN } else { backlog };

    each_addr(address, |address| {
        let socket = new_socket(address, Type::STREAM, Protocol::TCP)?;
        socket.listen(backlog)?;
        debug!(%address, backlog, "tcp listener bound");

        Ok(Peer::new(OwnedFd::from(socket), PeerKind::Listener))
    })
}

/// Binds a UDP socket. Every datagram it receives reaches the handler as one
/// message.
pub fn bind_udp(address: impl ToSocketAddrs) -> io::Result<Peer> {
    each_addr(address, |address| {
        let socket = new_socket(address, Type::DGRAM, Protocol::UDP)?;
        debug!(%address, "udp socket bound");

        Ok(Peer::new(OwnedFd::from(socket), PeerKind::Udp))
    })
}

/// Connects a TCP client socket, for loops that talk to a server.
///
/// The connect itself blocks, bounded by `timeout` when given; the returned
/// peer is non-blocking.
///
/// # Example
/// ```no_run
/// use std::time::Duration;
///
/// let server = sockloop::net::connect_tcp("127.0.0.1:8080", Some(Duration::from_secs(3)))?;
/// assert_eq!(server.kind(), sockloop::PeerKind::Tcp);
/// # Ok::<(), std::io::Error>(())
/// ```
pub fn connect_tcp(address: impl ToSocketAddrs, timeout: Option<Duration>) -> io::Result<Peer> {
    each_addr(address, |address| {
        let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))?;
        let target = SockAddr::from(address);
        match timeout {
            Some(timeout) => socket.connect_timeout(&target, timeout)?,
            None => socket.connect(&target)?,
        }
        socket.set_nonblocking(true)?;
        debug!(%address, "tcp connection established");

        Ok(Peer::new(OwnedFd::from(socket), PeerKind::Tcp))
    })
}

/// Joins the multicast `group` on a UDP peer, typically one from
/// [`bind_udp`] bound to the group's port.
///
/// For IPv4 groups `interface` picks the local interface address (any
/// interface when `None`). IPv6 groups always join on the default
/// interface, so an IPv4 `interface` is rejected for them.
pub fn join_multicast(peer: &Peer, group: IpAddr, interface: Option<Ipv4Addr>) -> io::Result<()> {
    if peer.kind() != PeerKind::Udp {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "multicast groups can only be joined by UDP peers",
        ));
    }
    if !group.is_multicast() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{group} is not a multicast address"),
        ));
    }

    let socket = SockRef::from(peer);
    match group {
        IpAddr::V4(group) => {
            socket.join_multicast_v4(&group, &interface.unwrap_or(Ipv4Addr::UNSPECIFIED))?
        }
        IpAddr::V6(_) if interface.is_some() => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "IPv6 groups take no IPv4 interface address",
            ));
        }
        IpAddr::V6(group) => socket.join_multicast_v6(&group, 0)?,
    }
    debug!(peer = %peer.addr_string(), %group, "joined multicast group");

    Ok(())
}

fn new_socket(address: SocketAddr, ty: Type, protocol: Protocol) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(address), ty, Some(protocol))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SockAddr::from(address))?;

    Ok(socket)
}

fn each_addr<F>(address: impl ToSocketAddrs, mut bind: F) -> io::Result<Peer>
where
    F: FnMut(SocketAddr) -> io::Result<Peer>,
{
    let mut last_err = None;
    for address in address.to_socket_addrs()? {
        match bind(address) {
            Ok(peer) => return Ok(peer),
            Err(err) => last_err = Some(err),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "could not resolve to any addresses")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpStream, UdpSocket};

    #[test]
    fn tcp_listener_reports_bound_port() {
        let listener = bind_tcp("127.0.0.1:0", 16).unwrap();
        assert_eq!(listener.kind(), PeerKind::Listener);

        let address = listener.addr().unwrap();
        assert_ne!(address.port(), 0);
        TcpStream::connect(address).unwrap();
    }

    #[test]
    fn udp_socket_receives_datagrams() {
        let socket = bind_udp("127.0.0.1:0").unwrap();
        assert_eq!(socket.kind(), PeerKind::Udp);

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        assert_eq!(client.send_to(b"ping", socket.addr().unwrap()).unwrap(), 4);
    }

    #[test]
    fn unresolvable_address_is_an_error() {
        let empty: &[SocketAddr] = &[];
        let err = bind_tcp(empty, 1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn tcp_client_connects_over_loopback() {
        let server = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = server.local_addr().unwrap();

        let client = connect_tcp(address, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(client.kind(), PeerKind::Tcp);
        assert_eq!(client.addr(), Some(address));

        let (_accepted, from) = server.accept().unwrap();
        assert_eq!(Some(from), crate::reactor::socket::local_addr(client.fd()));
    }

    #[test]
    fn refused_connect_is_an_error() {
        let address = {
            let server = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            server.local_addr().unwrap()
        };

        let err = connect_tcp(address, None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[test]
    fn udp_peer_joins_group_on_loopback() {
        let socket = bind_udp("0.0.0.0:0").unwrap();
        let group: IpAddr = "239.255.42.99".parse().unwrap();

        join_multicast(&socket, group, Some(Ipv4Addr::LOCALHOST)).unwrap();
    }

    #[test]
    fn multicast_join_rejects_bad_arguments() {
        let udp = bind_udp("127.0.0.1:0").unwrap();
        let unicast: IpAddr = "127.0.0.1".parse().unwrap();
        let err = join_multicast(&udp, unicast, None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let listener = bind_tcp("127.0.0.1:0", 1).unwrap();
        let group: IpAddr = "239.255.42.99".parse().unwrap();
        let err = join_multicast(&listener, group, None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let v6_group: IpAddr = "ff02::1:3".parse().unwrap();
        let err = join_multicast(&udp, v6_group, Some(Ipv4Addr::LOCALHOST)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
