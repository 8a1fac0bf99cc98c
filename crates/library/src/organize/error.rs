//! Error types for the [`organize`](super) module.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// An organize error with automatic location tracking via [`exn::Exn`].
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for organize operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the origin of an organize failure.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Creating, linking, copying or removing a file failed.
    #[display("filesystem error at {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
    /// Every disambiguated name was taken. Should be unreachable in practice;
    /// treated as an invariant violation.
    #[display("no free name for {} after exhausting suffixes", _0.display())]
    CollisionUnresolved(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
