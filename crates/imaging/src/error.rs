//! Imaging Error Types

use crate::PassKind;
use datarecovery_process::PassOutcome;
use derive_more::{Display, Error};
use std::path::PathBuf;

/// An imaging error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for imaging operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// Any of these ends the strategy early; passes that already finished keep
/// their artifacts.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// ddrescue exited unsuccessfully (typically: the source could not be opened).
    #[display("{pass} ended with {outcome:?}")]
    PassFailed {
        pass: PassKind,
        outcome: PassOutcome,
        /// The diagnostics suggest a busy device; resuming from this pass may work.
        transient: bool,
    },
    #[display("{_0} cancelled")]
    Cancelled(#[error(not(source))] PassKind),
    #[display("{_0} timed out")]
    TimedOut(#[error(not(source))] PassKind),
    /// ddrescue could not be started or supervised.
    #[display("could not run ddrescue for {_0}")]
    Launch(#[error(not(source))] PassKind),
    /// ddrescue was told to stop and did not; it may still be writing the image.
    #[display("ddrescue could not be stopped during {_0}")]
    Unstoppable(#[error(not(source))] PassKind),
    /// Preparing the image directory or snapshotting a mapfile failed.
    #[display("filesystem error at {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
    /// The mapfile is missing or not in ddrescue's format.
    #[display("unreadable mapfile {}", _0.display())]
    MapUnreadable(#[error(not(source))] PathBuf),
    /// The image would overwrite its own source.
    #[display("image path {} is the source itself", _0.display())]
    SourceIsImage(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PassFailed { transient: true, .. })
    }

    /// The pass to resume from when retrying.
    pub fn pass(&self) -> Option<PassKind> {
        match self {
            Self::PassFailed { pass, .. } | Self::Cancelled(pass) | Self::TimedOut(pass) | Self::Launch(pass) => {
                Some(*pass)
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        let kind = ErrorKind::PassFailed { pass: PassKind::DirectRetry, outcome: PassOutcome::Failed(1), transient: false };
        assert_eq!(kind.to_string(), "pass 2 (direct retry) ended with Failed(1)");
        assert_eq!(ErrorKind::Cancelled(PassKind::Scraping).to_string(), "pass 4 (scraping) cancelled");
    }

    #[test]
    fn error_kind_retryable() {
        let transient = ErrorKind::PassFailed { pass: PassKind::FastCopy, outcome: PassOutcome::Failed(1), transient: true };
        assert!(transient.is_retryable());
        assert_eq!(transient.pass(), Some(PassKind::FastCopy));
        assert!(!ErrorKind::Cancelled(PassKind::FastCopy).is_retryable());
        assert!(!ErrorKind::MapUnreadable("x.map".into()).is_retryable());
    }
}
