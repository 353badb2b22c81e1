//! Portable single-threaded socket event loop.
//!
//! One thread waits on a set of sockets through `select(2)`, `poll(2)` or
//! `epoll(7)` and turns readiness into callbacks: new connections on
//! listeners, bytes on TCP peers, datagrams on UDP sockets, errors, and a
//! periodic timer when nothing happens.
//!
//! # Architecture
//!
//! - **EventLoop**: the driver; owns the backend, the peer table and the handler
//! - **Poller**: one readiness backend, picked once at construction
//! - **PeerTable**: bounded storage of live peers with stable [`PeerId`]s
//! - **Handler**: application callbacks returning typed decisions
//! - **EventLoopBuilder**: fluent construction of an [`EventLoopConfig`]
//!
//! # Example
//!
//! ```no_run
//! use sockloop::{EventLoopBuilder, Handler, LoopContext, MessageDecision, Peer};
//!
//! struct Echo;
//!
//! impl Handler for Echo {
//!     fn on_message(&mut self, _ctx: &LoopContext<'_>, peer: &Peer, data: &[u8]) -> MessageDecision {
//!         match peer.reply(data) {
//!             Ok(_) => MessageDecision::Continue,
//!             Err(_) => MessageDecision::Close,
//!         }
//!     }
//! }
//!
//! # fn main() -> sockloop::Result<()> {
//! let mut event_loop = EventLoopBuilder::new()
//!     .peer(sockloop::net::bind_tcp("0.0.0.0:7000", 128)?)
//!     .peer(sockloop::net::bind_udp("0.0.0.0:7000")?)
//!     .max_peers(256)
//!     .build(Echo)?;
//!
//! event_loop.run()
//! # }
//! ```

mod builder;
mod error;
pub mod net;
mod peer;
pub mod reactor;

pub use builder::{DEFAULT_MAX_PEERS, DEFAULT_READ_BUFFER_SIZE, EventLoopBuilder, EventLoopConfig};
pub use error::{Error, Result};
pub use net::UNKNOWN_ADDR;
pub use peer::{Peer, PeerId, PeerKind};
pub use reactor::context::{LoopContext, LoopStats, StopHandle};
pub use reactor::core::{EventLoop, LoopState};
pub use reactor::handler::{ConnectDecision, ErrorDecision, Handler, MessageDecision};
pub use reactor::poller::{Backend, LoopType};
