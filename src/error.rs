//! Crate-wide error type.
//!
//! One enum covers every failure the store can surface. Most variants are
//! fatal for the operation that produced them; [`Error::is_recoverable`]
//! singles out decode failures, which leave the owning component usable.

use std::io;
use thiserror::Error;

/// The result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The backing device is out of space. The component has been closed.
    #[error("no space left on the backing device")]
    NoSpace,

    /// A write hit a filesystem or backend limit. The component has been closed.
    #[error("backing store limit reached")]
    BackendLimit,

    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed on-disk data: bad magic, bad length, out-of-range offset.
    #[error("format error: {0}")]
    Format(String),

    /// A stored payload could not be decoded. The component stays open.
    #[error("block not decodable: {0}")]
    NotDecodable(String),

    /// A superblock referenced a child that the store does not hold.
    #[error("missing block {0}")]
    MissingBlock(String),

    /// Misuse of the API: write on a closed or read-only component,
    /// oversize block. Never caught internally.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

impl Error {
    pub fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }

    /// True when the component that produced this error remains usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::NotDecodable(_))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            Error::NotFound(_) | Error::MissingBlock(_) => {
                io::Error::new(io::ErrorKind::NotFound, err.to_string())
            }
            Error::Format(_) | Error::NotDecodable(_) => {
                io::Error::new(io::ErrorKind::InvalidData, err.to_string())
            }
            other => io::Error::new(io::ErrorKind::Other, other.to_string()),
        }
    }
}
