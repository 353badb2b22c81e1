//! Socket helpers around the event loop.
//!
//! - [`bind_tcp`] / [`bind_udp`]: ready-to-register listener and datagram peers
//! - [`connect_tcp`]: client-side TCP peer
//! - [`join_multicast`]: multicast membership for UDP peers
//! - [`format_addr`]: `"ip:port"` rendering used in log lines

mod bind;
pub mod utils;

pub use bind::{bind_tcp, bind_udp, connect_tcp, join_multicast};
pub use utils::{UNKNOWN_ADDR, format_addr};
