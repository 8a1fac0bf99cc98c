//! Library Error Types
//!
//! Organizing reports through this top-level kind, with the detailed
//! [`ErrorKind`](crate::organize::error::ErrorKind) underneath. Dedup keeps
//! its own kind so callers can read the partial report.

use crate::organize::error::ErrorKind as OrganizeErrorKind;
use derive_more::{Display, Error};

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("organizing recovered files failed: {_0}")]
    Organize(#[error(not(source))] OrganizeErrorKind),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Organize(kind) => kind.is_retryable(),
        }
    }
}
