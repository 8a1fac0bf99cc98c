//! Pipeline Error Types
//!
//! Component errors are carried by value so that a job report can say exactly
//! what went wrong (for example which mount points refused a guard check).

use crate::job::Phase;
use datarecovery_device::error::ErrorKind as DeviceErrorKind;
use datarecovery_extract::error::ErrorKind as ExtractErrorKind;
use datarecovery_imaging::error::ErrorKind as ImagingErrorKind;
use datarecovery_library::dedup::error::ErrorKind as DedupErrorKind;
use datarecovery_library::organize::error::ErrorKind as OrganizeErrorKind;
use derive_more::{Display, Error};
use std::path::PathBuf;

/// A pipeline error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("insufficient scratch space: {required} bytes required, {available} available")]
    InsufficientSpace { required: u64, available: u64 },
    /// Another job holds the working directory.
    #[display("working directory {} is in use by another job", _0.display())]
    WorkspaceLocked(#[error(not(source))] PathBuf),
    #[display("required tools not found: {}", _0.join(", "))]
    ToolsMissing(#[error(not(source))] Vec<String>),
    #[display("{_0}")]
    Guard(#[error(not(source))] DeviceErrorKind),
    #[display("{_0}")]
    Imaging(#[error(not(source))] ImagingErrorKind),
    /// Imaging finished but nothing at all was rescued.
    #[display("nothing could be read from {}", _0.display())]
    NothingRescued(#[error(not(source))] PathBuf),
    #[display("{_0}")]
    Extraction(#[error(not(source))] ExtractErrorKind),
    /// Placing a recovered file failed. `CollisionUnresolved` here means the
    /// never-overwrite invariant could not be upheld.
    #[display("organizing recovered files failed: {_0}")]
    Organize(#[error(not(source))] OrganizeErrorKind),
    #[display("{_0}")]
    Dedup(#[error(not(source))] DedupErrorKind),
    /// Every lane failed before producing output.
    #[display("no target produced usable output")]
    NoUsableTarget,
    #[display("job cannot move from {from:?} to {to:?}")]
    InvalidTransition { from: Phase, to: Phase },
    #[display("filesystem error at {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
    /// The job's worker task panicked or was aborted.
    #[display("job worker stopped unexpectedly")]
    Worker,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed. This drives the job's
    /// single automatic retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Guard(kind) => kind.is_retryable(),
            Self::Imaging(kind) => kind.is_retryable(),
            Self::Extraction(kind) => kind.is_retryable(),
            Self::Organize(kind) => kind.is_retryable(),
            Self::Dedup(kind) => kind.is_retryable(),
            _ => false,
        }
    }

    /// A child was asked to stop and is still running, so the job must not
    /// pretend it was cancelled cleanly.
    pub fn is_unstoppable(&self) -> bool {
        matches!(self, Self::Imaging(ImagingErrorKind::Unstoppable(_)))
    }

    /// Errors caused by the job's cancellation rather than a real failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Self::Imaging(ImagingErrorKind::Cancelled(_))
                | Self::Extraction(ExtractErrorKind::Cancelled)
                | Self::Dedup(DedupErrorKind::Cancelled(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datarecovery_imaging::PassKind;
    use datarecovery_process::PassOutcome;

    #[test]
    fn error_kind_display() {
        let kind = ErrorKind::Guard(DeviceErrorKind::MountedRefused { mount_points: vec!["/media/usb".into()] });
        assert_eq!(kind.to_string(), "target is mounted at /media/usb; unmount it or enable auto-unmount");
        assert_eq!(
            ErrorKind::InsufficientSpace { required: 10, available: 5 }.to_string(),
            "insufficient scratch space: 10 bytes required, 5 available"
        );
    }

    #[test]
    fn error_kind_retryable() {
        let transient = ImagingErrorKind::PassFailed { pass: PassKind::DirectRetry, outcome: PassOutcome::Failed(1), transient: true };
        assert!(ErrorKind::Imaging(transient).is_retryable());
        assert!(!ErrorKind::Imaging(ImagingErrorKind::Cancelled(PassKind::FastCopy)).is_retryable());
        assert!(ErrorKind::Imaging(ImagingErrorKind::Cancelled(PassKind::FastCopy)).is_cancellation());
        assert!(!ErrorKind::NoUsableTarget.is_retryable());
        let stuck = ErrorKind::Imaging(ImagingErrorKind::Unstoppable(PassKind::Scraping));
        assert!(stuck.is_unstoppable());
        assert!(!stuck.is_cancellation());
    }
}
