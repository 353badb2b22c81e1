//! The event loop proper.
//!
//! - [`core`]: [`EventLoop`](core::EventLoop), the driver
//! - [`poller`]: readiness backends (select, poll, epoll)
//! - [`table`]: bounded storage of live peers
//! - [`handler`]: callbacks and their decisions
//! - [`context`]: what callbacks can see, plus the stop handle
//! - [`socket`]: thin non-blocking wrappers over the libc socket calls

pub mod context;
pub mod core;
pub mod handler;
pub mod poller;
pub(crate) mod socket;
pub(crate) mod table;
