//! Process Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A process error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for process operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
/// A child that was started and then exited (for any reason) is *not* an error
/// at this layer: it is reported through [`PassOutcome`](crate::PassOutcome).
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// One or more required external tools are not installed.
    #[display("required tools not found: {}", _0.join(", "))]
    ToolsMissing(#[error(not(source))] Vec<String>),
    /// The executable could not be started at all.
    #[display("failed to start {}", _0.display())]
    Spawn(#[error(not(source))] PathBuf),
    /// Waiting on, or signalling, a running child failed.
    #[display("lost track of child process {}", _0.display())]
    Supervise(#[error(not(source))] PathBuf),
    /// A cancelled or timed-out child survived SIGKILL, typically because it
    /// runs as root and the elevation helper could not signal it either.
    #[display("could not stop {}; it may still be running", _0.display())]
    Unstoppable(#[error(not(source))] PathBuf),
    /// The stream ended without a terminal [`PassResult`](crate::PassResult).
    #[display("process stream ended without a result")]
    Truncated,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Supervise(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(
            ErrorKind::ToolsMissing(vec!["ddrescue".to_string(), "rdfind".to_string()]).to_string(),
            "required tools not found: ddrescue, rdfind"
        );
        assert_eq!(ErrorKind::Spawn(PathBuf::from("/usr/bin/photorec")).to_string(), "failed to start /usr/bin/photorec");
    }

    #[test]
    fn error_kind_retryable() {
        assert!(!ErrorKind::Spawn(PathBuf::from("x")).is_retryable());
        assert!(!ErrorKind::ToolsMissing(vec![]).is_retryable());
        assert!(ErrorKind::Supervise(PathBuf::from("x")).is_retryable());
        assert!(!ErrorKind::Unstoppable(PathBuf::from("x")).is_retryable());
    }
}
