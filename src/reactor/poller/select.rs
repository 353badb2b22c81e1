//! `select(2)` backend.
//!
//! The descriptor set is rebuilt from the registered list on every wait, so
//! each call costs O(registered). Both the number of descriptors and their
//! values are bounded by `FD_SETSIZE`.

use super::{Backend, Interest, Poller, Readiness, Wait, retry_interrupted};
use crate::error::{Error, Result};

use libc::{FD_ISSET, FD_SET, FD_SETSIZE, FD_ZERO, fd_set, timeval};
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;

pub struct SelectPoller {
    fds: Vec<RawFd>,
    limit: usize,
}

impl SelectPoller {
    /// `capacity` is clamped to `FD_SETSIZE`.
    pub fn new(capacity: usize) -> Self {
        let limit = capacity.min(FD_SETSIZE as usize);

        Self {
            fds: Vec::with_capacity(limit),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Poller for SelectPoller {
    fn backend(&self) -> Backend {
        Backend::Select
    }

    fn register(&mut self, fd: RawFd, _interest: Interest) -> Result<()> {
        if self.contains(fd) {
            return Ok(());
        }

        if !self.has_room(fd) {
            return Err(Error::CapacityExceeded {
                fd,
                limit: self.limit,
            });
        }

        self.fds.push(fd);
        Ok(())
    }

    fn deregister(&mut self, fd: RawFd) {
        if let Some(position) = self.fds.iter().position(|&registered| registered == fd) {
            self.fds.swap_remove(position);
        }
    }

    fn has_room(&self, fd: RawFd) -> bool {
        self.fds.len() < self.limit && fd >= 0 && (fd as usize) < FD_SETSIZE as usize
    }

    fn wait(&mut self, timeout_ms: i32, ready: &mut Vec<Readiness>) -> Result<Wait> {
        ready.clear();

        let fds = &self.fds;
        let nfds = fds.iter().copied().max().map_or(0, |max| max + 1);
        let mut read_set: fd_set = unsafe { mem::zeroed() };

        let n = retry_interrupted(timeout_ms, |timeout| {
            // select() overwrites both the set and the timeout.
            let mut tv = to_timeval(timeout);
            let tv_ptr = tv
                .as_mut()
                .map_or(ptr::null_mut(), |tv| tv as *mut timeval);

            unsafe {
                FD_ZERO(&mut read_set);
                for &fd in fds {
                    FD_SET(fd, &mut read_set);
                }

                libc::select(
                    nfds,
                    &mut read_set,
                    ptr::null_mut(),
                    ptr::null_mut(),
                    tv_ptr,
                )
            }
        })?;

        if n == 0 {
            return Ok(Wait::Timeout);
        }

        for &fd in self.fds.iter().rev() {
            if unsafe { FD_ISSET(fd, &read_set) } {
                ready.push(Readiness::readable(fd));
            }
        }

        if ready.is_empty() {
            return Ok(Wait::Timeout);
        }

        Ok(Wait::Ready(ready.len()))
    }

    fn len(&self) -> usize {
        self.fds.len()
    }

    fn contains(&self, fd: RawFd) -> bool {
        self.fds.contains(&fd)
    }
}

fn to_timeval(timeout_ms: i32) -> Option<timeval> {
    if timeout_ms < 0 {
        return None;
    }

    Some(timeval {
        tv_sec: (timeout_ms / 1000) as libc::time_t,
        tv_usec: ((timeout_ms % 1000) * 1000) as libc::suseconds_t,
    })
}
