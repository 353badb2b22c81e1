//! `epoll(7)` backend, Linux only.
//!
//! Interest lives in the kernel, so a wait hands back only the ready
//! descriptors and dispatch costs O(ready) instead of O(registered).

use super::{Backend, Interest, Poller, Readiness, Wait, retry_interrupted};
use crate::error::Result;

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLET, EPOLLHUP,
    EPOLLIN, c_int, epoll_create1, epoll_ctl, epoll_event, epoll_wait,
};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use tracing::trace;

/// Upper bound on events collected by one wait. Anything beyond it stays
/// queued in the kernel for the next wait.
const MAX_EVENTS: usize = 1024;

pub struct EpollPoller {
    epoll: OwnedFd,
    events: Vec<epoll_event>,
    /// Descriptor to the event flags it was registered with
    registered: HashMap<RawFd, u32>,
}

impl EpollPoller {
    pub fn new(capacity: usize) -> Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error().into());
        }

        Ok(Self {
            epoll: unsafe { OwnedFd::from_raw_fd(epoll) },
            events: Vec::with_capacity(capacity.clamp(1, MAX_EVENTS)),
            registered: HashMap::with_capacity(capacity),
        })
    }

    fn control(&self, op: c_int, fd: RawFd, flags: u32) -> Result<()> {
        let mut event = epoll_event {
            events: flags,
            u64: fd as u64,
        };

        let ret = unsafe { epoll_ctl(self.epoll.as_raw_fd(), op, fd, &mut event) };
        if ret < 0 {
            return Err(io::Error::last_os_error().into());
        }

        Ok(())
    }
}

impl Poller for EpollPoller {
    fn backend(&self) -> Backend {
        Backend::Epoll
    }

    fn register(&mut self, fd: RawFd, interest: Interest) -> Result<()> {
        if self.registered.contains_key(&fd) {
            return Ok(());
        }

        let mut flags = 0;
        if interest.readable {
            flags |= EPOLLIN;
        }
        if interest.edge {
            flags |= EPOLLET;
        }

        self.control(EPOLL_CTL_ADD, fd, flags as u32)?;
        self.registered.insert(fd, flags as u32);
        Ok(())
    }

    fn rearm(&mut self, fd: RawFd) -> Result<()> {
        match self.registered.get(&fd) {
            // Modifying an edge-triggered entry re-checks readiness and
            // queues a fresh event if the descriptor is still ready.
            Some(&flags) if flags & EPOLLET as u32 != 0 => self.control(EPOLL_CTL_MOD, fd, flags),
            _ => Ok(()),
        }
    }

    fn deregister(&mut self, fd: RawFd) {
        if self.registered.remove(&fd).is_none() {
            return;
        }

        let ret = unsafe { epoll_ctl(self.epoll.as_raw_fd(), EPOLL_CTL_DEL, fd, ptr::null_mut()) };
        if ret < 0 {
            // The kernel already dropped it if the descriptor was closed.
            trace!(fd, error = %io::Error::last_os_error(), "epoll_ctl(DEL) failed");
        }
    }

    fn wait(&mut self, timeout_ms: i32, ready: &mut Vec<Readiness>) -> Result<Wait> {
        ready.clear();
        self.events.clear();

        let epoll = self.epoll.as_raw_fd();
        let events = &mut self.events;
        let max_events = events.capacity() as c_int;

        let n = retry_interrupted(timeout_ms, |timeout| unsafe {
            epoll_wait(epoll, events.as_mut_ptr(), max_events, timeout)
        })?;

        if n == 0 {
            return Ok(Wait::Timeout);
        }

        // SAFETY: epoll_wait initialised the first `n` entries.
        unsafe { self.events.set_len(n) };

        for event in &self.events {
            let flags = event.events as c_int;
            ready.push(Readiness {
                fd: event.u64 as RawFd,
                readable: flags & EPOLLIN != 0,
                error: flags & (EPOLLERR | EPOLLHUP) != 0,
            });
        }

        Ok(Wait::Ready(ready.len()))
    }

    fn len(&self) -> usize {
        self.registered.len()
    }

    fn contains(&self, fd: RawFd) -> bool {
        self.registered.contains_key(&fd)
    }
}
