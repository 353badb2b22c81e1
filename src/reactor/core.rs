use crate::builder::{EventLoopConfig, normalize_timeout, resolve_max_peers};
use crate::error::{Error, Result};
use crate::net::utils::format_addr;
use crate::peer::{Peer, PeerId, PeerKind};
use crate::reactor::context::{LoopContext, LoopStats, StopHandle};
use crate::reactor::handler::{ConnectDecision, ErrorDecision, Handler, MessageDecision};
use crate::reactor::poller::{Backend, Interest, Poller, Readiness, Wait, new_poller};
use crate::reactor::socket;
use crate::reactor::table::PeerTable;

use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use tracing::{Dispatch, debug, error, info, trace, warn};

/// Lifecycle of an [`EventLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Initialized,
    Running,
    /// Terminal: reached by a stop request or a fatal backend error
    Stopped,
}

/// Single-threaded socket event loop.
///
/// Owns one readiness backend and the table of live peers. [`Self::run`]
/// blocks the calling thread, accepting connections on listening peers,
/// reading from connected and datagram peers, and dispatching everything to
/// the [`Handler`].
pub struct EventLoop<H: Handler> {
    handler: H,
    table: PeerTable,
    poller: Box<dyn Poller>,
    backend: Backend,
    timeout_ms: i32,
    buffer: Vec<u8>,
    ready: Vec<Readiness>,
    stop: StopHandle,
    stats: LoopStats,
    state: LoopState,
    dispatch: Option<Dispatch>,
}

impl<H: Handler> EventLoop<H> {
    /// Creates a loop from `config`.
    ///
    /// Picks the backend, sizes the peer table and registers the initial
    /// peers. On error every initial peer is dropped, which closes it.
    pub fn new(config: EventLoopConfig, handler: H) -> Result<Self> {
        let dispatch = config.dispatch.clone();
        match &dispatch {
            Some(dispatch) => {
                tracing::dispatcher::with_default(dispatch, || Self::setup(config, handler))
            }
            None => Self::setup(config, handler),
        }
    }

    fn setup(config: EventLoopConfig, handler: H) -> Result<Self> {
        let EventLoopConfig {
            loop_type,
            max_peers,
            peers,
            timeout_ms,
            read_buffer_size,
            dispatch,
        } = config;

        if read_buffer_size == 0 {
            return Err(Error::config("read buffer size must be greater than zero"));
        }

        let backend = loop_type.resolve();
        debug!(requested = ?loop_type, backend = %backend, "selected event loop backend");

        let mut capacity = resolve_max_peers(backend, max_peers) + peers.len();
        if let Some(limit) = backend.descriptor_limit() {
            if peers.len() > limit {
                return Err(Error::config(format!(
                    "{} initial peers exceed the {backend} limit of {limit}",
                    peers.len()
                )));
            }
            capacity = capacity.min(limit);
        }

        let mut table = PeerTable::new(capacity)?;
        let mut poller = new_poller(backend, capacity)?;

        for peer in peers {
            let file_descriptor = peer.fd();
            if table.find_by_fd(file_descriptor).is_some() {
                return Err(Error::config(format!(
                    "descriptor {file_descriptor} listed twice in the initial peers"
                )));
            }

            socket::set_nonblocking(file_descriptor)?;
            poller.register(file_descriptor, interest_for(peer.kind()))?;
            debug!(
                fd = file_descriptor,
                kind = ?peer.kind(),
                peer = %peer.addr_string(),
                "registered initial peer"
            );
            table.insert(peer)?;
        }

        Ok(Self {
            handler,
            table,
            poller,
            backend,
            timeout_ms: normalize_timeout(timeout_ms),
            buffer: vec![0; read_buffer_size],
            ready: Vec::new(),
            stop: StopHandle::default(),
            stats: LoopStats::default(),
            state: LoopState::Initialized,
            dispatch,
        })
    }

    /// Runs until a stop is requested or the backend fails.
    ///
    /// Every remaining peer is closed (and reported to
    /// [`Handler::on_close`]) before this returns. A loop runs once:
    /// calling `run` again yields [`Error::Stopped`].
    pub fn run(&mut self) -> Result<()> {
        match self.dispatch.clone() {
            Some(dispatch) => tracing::dispatcher::with_default(&dispatch, || self.run_inner()),
            None => self.run_inner(),
        }
    }

    fn run_inner(&mut self) -> Result<()> {
        if self.state == LoopState::Stopped {
            return Err(Error::Stopped);
        }

        self.state = LoopState::Running;
        info!(
            backend = %self.backend,
            peers = self.table.len(),
            capacity = self.table.capacity(),
            timeout_ms = self.timeout_ms,
            "event loop running"
        );

        let mut result = Ok(());
        while !self.stop.is_stopped() {
            if let Err(err) = self.turn() {
                error!(error = %err, "event loop backend failed, closing all peers");
                result = Err(err);
                break;
            }
        }

        self.shutdown();
        self.state = LoopState::Stopped;
        info!(stats = ?self.stats, "event loop stopped");

        result
    }

    /// One wait plus the dispatch of everything it reported.
    fn turn(&mut self) -> Result<()> {
        let mut ready = mem::take(&mut self.ready);
        let outcome = self.poller.wait(self.timeout_ms, &mut ready);
        self.stats.ticks += 1;

        match outcome? {
            Wait::Timeout => {
                let ctx = LoopContext::new(&self.table, &self.stop, self.backend, self.stats);
                self.handler.on_timer(&ctx);
            }
            Wait::Ready(_) => self.dispatch_batch(&mut ready),
        }

        self.ready = ready;
        Ok(())
    }

    fn dispatch_batch(&mut self, ready: &mut [Readiness]) {
        for index in 0..ready.len() {
            let event = ready[index];
            if event.fd < 0 {
                continue;
            }

            let Some(id) = self.table.find_by_fd(event.fd) else {
                trace!(fd = event.fd, "readiness for a descriptor no longer in the table");
                continue;
            };
            let Some(kind) = self.table.get(id).map(Peer::kind) else {
                continue;
            };
            trace!(fd = event.fd, ?kind, readable = event.readable, error = event.error, "peer ready");

            let closed = match kind {
                PeerKind::Listener if event.readable => self.accept_pending(id, event.fd),
                PeerKind::Tcp | PeerKind::Udp if event.readable => self.read_peer(id, kind, event.fd),
                _ => self.peer_failed(id),
            };

            // A descriptor closed here may be handed out again by a later
            // accept in this batch; its stale entries must not reach it.
            if closed {
                for later in &mut ready[index + 1..] {
                    if later.fd == event.fd {
                        later.fd = -1;
                    }
                }
            }
        }
    }

    /// Accepts until the listener's backlog is empty. Returns `true` when the
    /// listener itself was closed.
    fn accept_pending(&mut self, listener: PeerId, listener_fd: RawFd) -> bool {
        loop {
            match socket::accept(listener_fd) {
                Ok(Some((client, address))) => self.admit(listener, client, address),
                Ok(None) => return false,
                Err(err) if socket::is_aborted_connection(&err) => {
                    debug!(fd = listener_fd, error = %err, "pending connection aborted before accept");
                }
                Err(err) if socket::is_resource_exhaustion(&err) => {
                    warn!(fd = listener_fd, error = %err, "accept failed, retrying on next readiness");
                    // The backlog is not empty, so an edge-triggered listener
                    // would never be reported again.
                    if let Err(err) = self.poller.rearm(listener_fd) {
                        warn!(fd = listener_fd, error = %err, "failed to re-arm listener");
                        return self.peer_failed(listener);
                    }
                    return false;
                }
                Err(err) => {
                    warn!(fd = listener_fd, error = %err, "failed accept");
                    return self.peer_failed(listener);
                }
            }
        }
    }

    fn admit(&mut self, listener: PeerId, client: OwnedFd, address: Option<SocketAddr>) {
        let client_fd = client.as_raw_fd();

        if self.table.is_full() || !self.poller.has_room(client_fd) {
            self.stats.refused += 1;
            warn!(
                peer = %format_addr(address.as_ref()),
                capacity = self.table.capacity(),
                "refuse connection - number of connection reached the upper limit"
            );
            return;
        }

        if let Err(err) = socket::set_nonblocking(client_fd) {
            warn!(peer = %format_addr(address.as_ref()), error = %err, "failed to set accepted socket non-blocking");
            return;
        }

        let id = match self.table.insert(Peer::accepted(client, address)) {
            Ok(id) => id,
            Err(err) => {
                warn!(peer = %format_addr(address.as_ref()), error = %err, "refuse connection");
                self.stats.refused += 1;
                return;
            }
        };
        self.stats.accepted += 1;

        let decision = {
            let (Some(listener), Some(peer)) = (self.table.get(listener), self.table.get(id)) else {
                return;
            };
            let ctx = LoopContext::new(&self.table, &self.stop, self.backend, self.stats);
            self.handler.on_connect(&ctx, listener, peer)
        };

        match decision {
            ConnectDecision::Register => {
                if let Err(err) = self.poller.register(client_fd, Interest::READABLE) {
                    warn!(peer = %format_addr(address.as_ref()), error = %err, "failed to register peer");
                    self.close_peer(id);
                    return;
                }
                debug!(
                    peer = %format_addr(address.as_ref()),
                    fd = client_fd,
                    peers = self.table.len(),
                    "new connection"
                );
            }
            ConnectDecision::Close => {
                if let Some(peer) = self.table.remove(id) {
                    debug!(peer = %peer.addr_string(), "connection rejected by handler");
                }
            }
            ConnectDecision::Detach => {
                if let Some(peer) = self.table.remove(id) {
                    debug!(peer = %peer.addr_string(), "connection detached by handler");
                    let ctx = LoopContext::new(&self.table, &self.stop, self.backend, self.stats);
                    self.handler.on_detach(&ctx, peer);
                }
            }
        }
    }

    /// One read for a TCP peer, one datagram for a UDP peer. Returns `true`
    /// when the peer was closed.
    fn read_peer(&mut self, id: PeerId, kind: PeerKind, file_descriptor: RawFd) -> bool {
        match kind {
            PeerKind::Udp => match socket::recv_from(file_descriptor, &mut self.buffer) {
                Ok(None) => false,
                Ok(Some((n, source))) => {
                    if let Some(peer) = self.table.get_mut(id) {
                        peer.set_source(source);
                    }
                    self.deliver(id, n)
                }
                Err(err) => {
                    debug!(fd = file_descriptor, error = %err, "datagram receive failed");
                    self.peer_failed(id)
                }
            },
            _ => match socket::recv(file_descriptor, &mut self.buffer) {
                Ok(None) => false,
                Ok(Some(0)) => {
                    debug!(fd = file_descriptor, "connection closed by remote");
                    self.peer_failed(id)
                }
                Ok(Some(n)) => self.deliver(id, n),
                Err(err) => {
                    debug!(fd = file_descriptor, error = %err, "receive failed");
                    self.peer_failed(id)
                }
            },
        }
    }

    fn deliver(&mut self, id: PeerId, len: usize) -> bool {
        let decision = {
            let Some(peer) = self.table.get(id) else {
                return false;
            };
            let ctx = LoopContext::new(&self.table, &self.stop, self.backend, self.stats);
            self.handler.on_message(&ctx, peer, &self.buffer[..len])
        };

        match decision {
            MessageDecision::Continue => false,
            MessageDecision::Close => self.close_peer(id),
        }
    }

    /// Offers the failure to the handler. Returns `true` when the peer was
    /// closed as a result.
    fn peer_failed(&mut self, id: PeerId) -> bool {
        let decision = {
            let Some(peer) = self.table.get(id) else {
                return false;
            };
            let ctx = LoopContext::new(&self.table, &self.stop, self.backend, self.stats);
            self.handler.on_error(&ctx, peer)
        };

        match decision {
            ErrorDecision::Close => self.close_peer(id),
            ErrorDecision::Keep => {
                trace!(peer = %id, "handler kept failed peer registered");
                false
            }
        }
    }

    fn close_peer(&mut self, id: PeerId) -> bool {
        let Some(peer) = self.table.remove(id) else {
            return false;
        };

        self.poller.deregister(peer.fd());
        self.stats.closed += 1;
        debug!(
            peer = %peer.addr_string(),
            fd = peer.fd(),
            peers = self.table.len(),
            "disconnection"
        );

        let ctx = LoopContext::new(&self.table, &self.stop, self.backend, self.stats);
        self.handler.on_close(&ctx, &peer);

        true
    }

    fn shutdown(&mut self) {
        for peer in self.table.drain() {
            self.poller.deregister(peer.fd());
            self.stats.closed += 1;

            let ctx = LoopContext::new(&self.table, &self.stop, self.backend, self.stats);
            self.handler.on_close(&ctx, &peer);
        }
    }

    /// Handle that stops this loop from a callback or another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Table slots: accepted-peer cap plus the initial peers.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    pub fn peer_count(&self) -> usize {
        self.table.len()
    }

    pub fn timeout_ms(&self) -> i32 {
        self.timeout_ms
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }
}

fn interest_for(kind: PeerKind) -> Interest {
    match kind {
        // The accept loop drains the backlog, so edges are enough.
        PeerKind::Listener => Interest::READABLE_EDGE,
        PeerKind::Tcp | PeerKind::Udp => Interest::READABLE,
    }
}
