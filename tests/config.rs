use sockloop::{
    Backend, ConnectDecision, DEFAULT_MAX_PEERS, Error, EventLoopBuilder, EventLoopConfig, Handler,
    LoopContext, LoopState, LoopType, MessageDecision, Peer,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::os::unix::io::OwnedFd;
use std::time::Duration;

#[derive(Default)]
struct Quiet {
    detached: Vec<Peer>,
    messages: usize,
}

impl Handler for Quiet {
    fn on_connect(&mut self, _ctx: &LoopContext<'_>, _listener: &Peer, _peer: &Peer) -> ConnectDecision {
        ConnectDecision::from(1)
    }

    fn on_message(&mut self, _ctx: &LoopContext<'_>, _peer: &Peer, _data: &[u8]) -> MessageDecision {
        self.messages += 1;
        MessageDecision::Continue
    }

    fn on_detach(&mut self, ctx: &LoopContext<'_>, peer: Peer) {
        let _ = peer.send(b"detached");
        self.detached.push(peer);
        ctx.stop();
    }
}

#[test]
fn zero_read_buffer_is_a_config_error() {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let err = EventLoopBuilder::new()
        .peer(socket)
        .read_buffer_size(0)
        .build(Quiet::default())
        .err()
        .unwrap();

    assert!(matches!(err, Error::Config(_)));
    assert!(!err.is_capacity());
}

#[test]
fn capacity_counts_initial_peers_on_top() {
    let event_loop = EventLoopBuilder::new()
        .loop_type(LoopType::Poll)
        .max_peers(4)
        .peer(UdpSocket::bind("127.0.0.1:0").unwrap())
        .peer(TcpListener::bind("127.0.0.1:0").unwrap())
        .build(Quiet::default())
        .unwrap();

    assert_eq!(event_loop.capacity(), 6);
    assert_eq!(event_loop.peer_count(), 2);
    assert_eq!(event_loop.state(), LoopState::Initialized);
}

#[test]
fn default_capacities_follow_the_backend() {
    let poll = EventLoopBuilder::new()
        .loop_type(LoopType::Poll)
        .build(Quiet::default())
        .unwrap();
    assert_eq!(poll.capacity(), DEFAULT_MAX_PEERS);

    let select = EventLoopBuilder::new()
        .loop_type(LoopType::Select)
        .max_peers(usize::MAX)
        .build(Quiet::default())
        .unwrap();
    assert_eq!(select.capacity(), libc::FD_SETSIZE as usize);
}

#[test]
fn unsupported_backends_are_demoted() {
    for loop_type in [LoopType::Iocp, LoopType::Kqueue, LoopType::Auto] {
        let event_loop = EventLoopBuilder::new()
            .loop_type(loop_type)
            .build(Quiet::default())
            .unwrap();
        assert_eq!(event_loop.backend(), Backend::platform_default(), "{loop_type:?}");
    }
}

#[test]
fn negative_timeouts_block() {
    let event_loop = EventLoopBuilder::new()
        .timeout_ms(-25)
        .build(Quiet::default())
        .unwrap();
    assert_eq!(event_loop.timeout_ms(), -1);
}

#[test]
fn a_stopped_loop_cannot_run_again() {
    let mut event_loop = EventLoopBuilder::from_config(EventLoopConfig {
        timeout_ms: 0,
        ..EventLoopConfig::default()
    })
    .build(Quiet::default())
    .unwrap();

    event_loop.stop_handle().stop();
    event_loop.run().unwrap();
    assert_eq!(event_loop.state(), LoopState::Stopped);
    assert!(matches!(event_loop.run(), Err(Error::Stopped)));
}

#[test]
fn detached_peer_stays_open_but_unwatched() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();
    let mut client = TcpStream::connect(address).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let mut event_loop = EventLoopBuilder::new()
        .timeout_ms(1000)
        .peer(listener)
        .build(Quiet::default())
        .unwrap();
    event_loop.run().unwrap();

    let mut quiet = event_loop.into_handler();
    assert_eq!(quiet.detached.len(), 1);
    assert_eq!(quiet.messages, 0);

    let mut greeting = [0u8; 8];
    client.read_exact(&mut greeting).unwrap();
    assert_eq!(&greeting, b"detached");

    // The handler owns the socket now; the connection is still up.
    let stream = TcpStream::from(OwnedFd::from(quiet.detached.remove(0)));
    stream.set_nonblocking(false).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    client.write_all(b"hi").unwrap();
    let mut buffer = [0u8; 2];
    (&stream).read_exact(&mut buffer).unwrap();
    assert_eq!(&buffer, b"hi");
}
