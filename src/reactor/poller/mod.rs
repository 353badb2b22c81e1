//! Readiness backends.
//!
//! Every backend implements [`Poller`]: register descriptors for read
//! readiness, wait for readiness or a timeout, report which descriptors are
//! ready. The backend is picked once, when the loop is built, from a
//! requested [`LoopType`]; requests the platform cannot serve are demoted to
//! the platform default instead of failing, so the same configuration code
//! runs everywhere.
//!
//! | requested                  | Linux   | other unix |
//! |----------------------------|---------|------------|
//! | `Select`                   | select  | select     |
//! | `Poll`                     | poll    | poll       |
//! | `Epoll`                    | epoll   | poll       |
//! | `Iocp`, `Kqueue`, `Auto`   | epoll   | poll       |

#[cfg(target_os = "linux")]
pub mod epoll;
pub mod poll;
pub mod select;

use crate::error::{Error, Result};

use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};
use tracing::trace;

/// Event loop type as requested by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoopType {
    Select,
    Poll,
    Epoll,
    Iocp,
    Kqueue,
    /// Platform default
    #[default]
    Auto,
}

impl LoopType {
    /// Maps the request onto a backend compiled for this platform.
    pub fn resolve(self) -> Backend {
        match self {
            LoopType::Select => Backend::Select,
            LoopType::Poll => Backend::Poll,
            #[cfg(target_os = "linux")]
            LoopType::Epoll => Backend::Epoll,
            _ => Backend::platform_default(),
        }
    }
}

/// A backend that actually exists on this platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Select,
    Poll,
    #[cfg(target_os = "linux")]
    Epoll,
}

impl Backend {
    #[cfg(target_os = "linux")]
    pub fn platform_default() -> Backend {
        Backend::Epoll
    }

    #[cfg(not(target_os = "linux"))]
    pub fn platform_default() -> Backend {
        Backend::Poll
    }

    /// Every backend compiled for this platform.
    pub fn available() -> &'static [Backend] {
        #[cfg(target_os = "linux")]
        {
            &[Backend::Select, Backend::Poll, Backend::Epoll]
        }
        #[cfg(not(target_os = "linux"))]
        {
            &[Backend::Select, Backend::Poll]
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Select => "select",
            Backend::Poll => "poll",
            #[cfg(target_os = "linux")]
            Backend::Epoll => "epoll",
        }
    }

    /// Whether this backend caps how many descriptors it can watch.
    pub fn descriptor_limit(&self) -> Option<usize> {
        match self {
            Backend::Select => Some(libc::FD_SETSIZE as usize),
            _ => None,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Readiness a descriptor is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    /// Report only transitions to readable. Honored by epoll; select and
    /// poll are always level-triggered.
    pub edge: bool,
}

impl Interest {
    pub const READABLE: Interest = Interest {
        readable: true,
        edge: false,
    };

    pub const READABLE_EDGE: Interest = Interest {
        readable: true,
        edge: true,
    };
}

/// One ready descriptor reported by [`Poller::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub fd: RawFd,
    pub readable: bool,
    /// Error or hang-up reported by the kernel
    pub error: bool,
}

impl Readiness {
    pub(crate) fn readable(fd: RawFd) -> Self {
        Self {
            fd,
            readable: true,
            error: false,
        }
    }
}

/// Outcome of a successful [`Poller::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// This many entries were pushed to the readiness buffer
    Ready(usize),
    /// Nothing became ready before the timeout
    Timeout,
}

/// A readiness-polling strategy.
pub trait Poller {
    fn backend(&self) -> Backend;

    /// Starts watching `fd`. Registering a watched descriptor again is a
    /// no-op.
    fn register(&mut self, fd: RawFd, interest: Interest) -> Result<()>;

    /// Stops watching `fd`. Unknown descriptors are ignored.
    fn deregister(&mut self, fd: RawFd);

    /// Makes the next wait report `fd` again if it is still ready. Only
    /// edge-triggered registrations need this; level-triggered backends
    /// report a ready descriptor on every wait anyway.
    fn rearm(&mut self, fd: RawFd) -> Result<()> {
        let _ = fd;
        Ok(())
    }

    /// Whether `register(fd, ..)` would be accepted.
    fn has_room(&self, fd: RawFd) -> bool {
        let _ = fd;
        true
    }

    /// Blocks until a watched descriptor is ready or `timeout_ms` elapses.
    ///
    /// `timeout_ms < 0` waits forever and `0` returns at once. `ready` is
    /// cleared first; an empty result is always reported as
    /// [`Wait::Timeout`]. Signal interruptions are retried internally.
    fn wait(&mut self, timeout_ms: i32, ready: &mut Vec<Readiness>) -> Result<Wait>;

    /// Number of watched descriptors.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, fd: RawFd) -> bool;
}

/// Creates the poller for `backend`, sized for `capacity` descriptors.
pub fn new_poller(backend: Backend, capacity: usize) -> Result<Box<dyn Poller>> {
    let poller: Box<dyn Poller> = match backend {
        Backend::Select => Box::new(select::SelectPoller::new(capacity)),
        Backend::Poll => Box::new(poll::PollPoller::new(capacity)),
        #[cfg(target_os = "linux")]
        Backend::Epoll => Box::new(epoll::EpollPoller::new(capacity)?),
    };

    Ok(poller)
}

/// Runs a wait syscall, retrying on `EINTR` with whatever time is left.
pub(crate) fn retry_interrupted<F>(timeout_ms: i32, mut wait: F) -> Result<usize>
where
    F: FnMut(i32) -> libc::c_int,
{
    let deadline = (timeout_ms > 0)
        .then(|| Instant::now() + Duration::from_millis(timeout_ms as u64));
    let mut timeout = timeout_ms;

    loop {
        let res = wait(timeout);
        if res >= 0 {
            return Ok(res as usize);
        }

        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(Error::Backend(err));
        }

        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            timeout = remaining.as_millis().min(i32::MAX as u128) as i32;
        }
        trace!(timeout_ms = timeout, "readiness wait interrupted, retrying");
    }
}
