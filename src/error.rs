//! Error types for the event loop.

use std::io;
use std::os::unix::io::RawFd;
use thiserror::Error;

/// Main error type for event loop operations
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid construction arguments, the loop never starts
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Backing storage for the peer table could not be allocated
    #[error("out of memory allocating a peer table of {capacity} slots")]
    OutOfMemory { capacity: usize },

    /// Every peer table slot is taken
    #[error("peer table is full ({capacity} slots)")]
    TableFull { capacity: usize },

    /// The backend readiness set cannot take this descriptor
    #[error("readiness set cannot hold descriptor {fd} (limit {limit})")]
    CapacityExceeded { fd: RawFd, limit: usize },

    /// The wait primitive itself failed
    #[error("backend wait failed: {0}")]
    Backend(#[source] io::Error),

    /// IO error during socket or poller setup
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// `run` was called on a loop that already finished
    #[error("event loop already stopped")]
    Stopped,
}

/// Result type alias for event loop operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error with a message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns `true` for the capacity errors the loop survives.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::TableFull { .. } | Self::CapacityExceeded { .. })
    }
}
