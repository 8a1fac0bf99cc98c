//! Extraction Error Types
//!
//! An extraction failure belongs to one image; the orchestrator keeps going
//! with the others.

use datarecovery_process::PassOutcome;
use derive_more::{Display, Error};
use std::path::PathBuf;

/// An extraction error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for extraction operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The image to carve from does not exist.
    #[display("no image at {}", _0.display())]
    MissingImage(#[error(not(source))] PathBuf),
    /// PhotoRec exited unsuccessfully.
    #[display("photorec ended with {outcome:?}")]
    Failed { outcome: PassOutcome, transient: bool },
    #[display("extraction cancelled")]
    Cancelled,
    #[display("extraction timed out")]
    TimedOut,
    /// PhotoRec could not be started or supervised.
    #[display("could not run photorec")]
    Launch,
    /// Preparing the output directory or reading the results failed.
    #[display("filesystem error at {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed { transient: true, .. })
    }
}
