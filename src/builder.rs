//! Fluent builder for EventLoop construction.
//!
//! Collects an [`EventLoopConfig`] and hands it, together with the
//! application [`Handler`], to [`EventLoop::new`].

use crate::error::Result;
use crate::peer::Peer;
use crate::reactor::core::EventLoop;
use crate::reactor::handler::Handler;
use crate::reactor::poller::{Backend, LoopType};

use std::time::Duration;
use tracing::Dispatch;

/// Connected peers allowed when no hint is given.
pub const DEFAULT_MAX_PEERS: usize = 1024;

/// Size of the buffer every TCP read and UDP datagram lands in.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Construction input of an [`EventLoop`].
#[derive(Debug)]
pub struct EventLoopConfig {
    /// Requested backend, demoted to the platform default when unsupported
    pub loop_type: LoopType,
    /// Cap on accepted peers. 0 means [`DEFAULT_MAX_PEERS`]; for select,
    /// 0 or anything above `FD_SETSIZE` means `FD_SETSIZE`.
    pub max_peers: usize,
    /// Sockets watched from the start, in order
    pub peers: Vec<Peer>,
    /// Milliseconds between timer ticks; negative blocks until readiness
    pub timeout_ms: i32,
    pub read_buffer_size: usize,
    /// Logger for this loop; the global subscriber when `None`
    pub dispatch: Option<Dispatch>,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            loop_type: LoopType::Auto,
            max_peers: 0,
            peers: Vec::new(),
            timeout_ms: -1,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            dispatch: None,
        }
    }
}

/// Builder for constructing EventLoop instances with fluent API.
///
/// # Example
/// ```no_run
/// use sockloop::{EventLoopBuilder, Handler, LoopContext, MessageDecision, Peer};
///
/// struct Echo;
///
/// impl Handler for Echo {
///     fn on_message(&mut self, _ctx: &LoopContext<'_>, peer: &Peer, data: &[u8]) -> MessageDecision {
///         let _ = peer.reply(data);
///         MessageDecision::Continue
///     }
/// }
///
/// # fn main() -> sockloop::Result<()> {
/// let listener = sockloop::net::bind_tcp("127.0.0.1:9000", 128)?;
/// let mut event_loop = EventLoopBuilder::new()
///     .peer(listener)
///     .timeout_ms(1000)
///     .build(Echo)?;
/// event_loop.run()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct EventLoopBuilder {
    config: EventLoopConfig,
}

impl EventLoopBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing configuration record.
    pub fn from_config(config: EventLoopConfig) -> Self {
        Self { config }
    }

    pub fn loop_type(mut self, loop_type: LoopType) -> Self {
        self.config.loop_type = loop_type;
        self
    }

    pub fn max_peers(mut self, max_peers: usize) -> Self {
        self.config.max_peers = max_peers;
        self
    }

    /// Adds one initial peer.
    pub fn peer(mut self, peer: impl Into<Peer>) -> Self {
        self.config.peers.push(peer.into());
        self
    }

    pub fn peers<I>(mut self, peers: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Peer>,
    {
        self.config.peers.extend(peers.into_iter().map(Into::into));
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: i32) -> Self {
        self.config.timeout_ms = timeout_ms;
        self
    }

    /// `None` blocks until readiness. Durations beyond `i32::MAX`
    /// milliseconds are clamped.
    pub fn timeout(self, timeout: Option<Duration>) -> Self {
        let timeout_ms = match timeout {
            Some(timeout) => timeout.as_millis().min(i32::MAX as u128) as i32,
            None => -1,
        };
        self.timeout_ms(timeout_ms)
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Routes this loop's log events to `dispatch` instead of the global
    /// subscriber.
    pub fn dispatch(mut self, dispatch: Dispatch) -> Self {
        self.config.dispatch = Some(dispatch);
        self
    }

    pub fn config(&self) -> &EventLoopConfig {
        &self.config
    }

    pub fn into_config(self) -> EventLoopConfig {
        self.config
    }

    /// Builds the loop. Validation failures close every initial peer.
    pub fn build<H: Handler>(self, handler: H) -> Result<EventLoop<H>> {
        EventLoop::new(self.config, handler)
    }
}

pub(crate) fn resolve_max_peers(backend: Backend, hint: usize) -> usize {
    match backend.descriptor_limit() {
        Some(limit) if hint == 0 || hint > limit => limit,
        _ if hint == 0 => DEFAULT_MAX_PEERS,
        _ => hint,
    }
}

pub(crate) fn normalize_timeout(timeout_ms: i32) -> i32 {
    if timeout_ms < 0 { -1 } else { timeout_ms }
}
