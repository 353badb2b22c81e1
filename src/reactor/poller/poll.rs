//! `poll(2)` backend.
//!
//! Keeps a flat `pollfd` array that mirrors the registered descriptors. Each
//! wait still scans the whole array, but descriptor values are unbounded and
//! removal is a swap with the last entry.

use super::{Backend, Interest, Poller, Readiness, Wait, retry_interrupted};
use crate::error::Result;

use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, nfds_t, pollfd};
use std::collections::HashMap;
use std::os::unix::io::RawFd;

pub struct PollPoller {
    fds: Vec<pollfd>,
    positions: HashMap<RawFd, usize>,
}

impl PollPoller {
    pub fn new(capacity: usize) -> Self {
        Self {
            fds: Vec::with_capacity(capacity),
            positions: HashMap::with_capacity(capacity),
        }
    }
}

impl Poller for PollPoller {
    fn backend(&self) -> Backend {
        Backend::Poll
    }

    fn register(&mut self, fd: RawFd, _interest: Interest) -> Result<()> {
        if self.positions.contains_key(&fd) {
            return Ok(());
        }

        self.positions.insert(fd, self.fds.len());
        self.fds.push(pollfd {
            fd,
            events: POLLIN,
            revents: 0,
        });

        Ok(())
    }

    fn deregister(&mut self, fd: RawFd) {
        let Some(position) = self.positions.remove(&fd) else {
            return;
        };

        self.fds.swap_remove(position);
        if let Some(moved) = self.fds.get(position) {
            self.positions.insert(moved.fd, position);
        }
    }

    fn wait(&mut self, timeout_ms: i32, ready: &mut Vec<Readiness>) -> Result<Wait> {
        ready.clear();

        let fds = &mut self.fds;
        let n = retry_interrupted(timeout_ms, |timeout| unsafe {
            libc::poll(fds.as_mut_ptr(), fds.len() as nfds_t, timeout)
        })?;

        if n == 0 {
            return Ok(Wait::Timeout);
        }

        // Highest position first, matching the order peers are compacted in.
        for entry in self.fds.iter().rev() {
            if entry.revents == 0 {
                continue;
            }

            ready.push(Readiness {
                fd: entry.fd,
                readable: entry.revents & POLLIN != 0,
                error: entry.revents & (POLLERR | POLLHUP | POLLNVAL) != 0,
            });

            if ready.len() == n {
                break;
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
        self.positions.contains_key(&fd)
    }
}
