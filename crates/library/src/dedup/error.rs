//! Error types for the [`dedup`](super) module.
//!
//! Every failure after rdfind started carries a `partial` report: how many
//! files were already gone when it stopped.

use crate::dedup::DedupReport;
use datarecovery_process::PassOutcome;
use derive_more::{Display, Error};
use std::path::PathBuf;

/// A dedup error with automatic location tracking via [`exn::Exn`].
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for dedup operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("rdfind ended with {outcome:?} after removing {} files", partial.duplicates_removed)]
    Failed { outcome: PassOutcome, transient: bool, partial: DedupReport },
    #[display("duplicate removal cancelled after removing {} files", _0.duplicates_removed)]
    Cancelled(#[error(not(source))] DedupReport),
    #[display("rdfind timed out after removing {} files", _0.duplicates_removed)]
    TimedOut(#[error(not(source))] DedupReport),
    #[display("could not run rdfind")]
    Launch,
    /// Counting files before or after rdfind failed.
    #[display("filesystem error at {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed. rdfind is safe to rerun on a
    /// partially deduplicated tree.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed { transient: true, .. })
    }

    /// Files already removed when the failure happened, if rdfind ran at all.
    pub fn partial(&self) -> Option<&DedupReport> {
        match self {
            Self::Failed { partial, .. } | Self::Cancelled(partial) | Self::TimedOut(partial) => Some(partial),
            _ => None,
        }
    }
}
