//! Crate-wide error type
//!
//! Recovery is local by design: nothing in here ever crosses the
//! consumer thread boundary. Ring overflow is deliberately not an
//! error (boolean return plus a drop counter on the processor).

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum Error {
    /// A constructor was handed parameters outside its documented range.
    InvalidConfig(&'static str),
    /// Attempted to merge HyperLogLog sketches of different precision.
    MergeMismatch { left: u8, right: u8 },
    /// Snapshot file could not be opened, read, or written.
    Io(io::Error),
    /// Task submitted to a worker pool that has already shut down.
    PoolStopped,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(what) => write!(f, "invalid configuration: {}", what),
            Self::MergeMismatch { left, right } => {
                write!(
                    f,
                    "cannot merge sketches of precision {} and {}",
                    left, right
                )
            }
            Self::Io(e) => write!(f, "snapshot I/O failed: {}", e),
            Self::PoolStopped => write!(f, "worker pool is stopped"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
