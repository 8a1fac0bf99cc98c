//! Device Error Types
//!
//! Guard failures are per-lane: the orchestrator drops the affected target
//! and carries on with any others.

use derive_more::{Display, Error};
use std::path::{Path, PathBuf};

/// A device error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for device operations.
pub type Result<T> = std::result::Result<T, Error>;

fn join(paths: &[PathBuf]) -> String {
    paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
}

/// Actionable error categories.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Part of the target is mounted and unmounting was not allowed.
    #[display("target is mounted at {}; unmount it or enable auto-unmount", join(mount_points))]
    MountedRefused { mount_points: Vec<PathBuf> },
    /// Unmounting was attempted (or is forbidden for a system mount) and the
    /// constituent is still mounted.
    #[display("could not unmount {}", _0.display())]
    UnmountFailed(#[error(not(source))] PathBuf),
    /// The working directory lives on the device being recovered.
    #[display("working directory is on {}, which is part of the target", _0.display())]
    WorkspaceOnTarget(#[error(not(source))] PathBuf),
    /// Not a block device or a regular file.
    #[display("{} is neither a block device nor an image file", _0.display())]
    InvalidTarget(#[error(not(source))] PathBuf),
    /// Reading device or filesystem information failed.
    #[display("could not read {}", _0.display())]
    Probe(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    pub(crate) fn probe(path: &Path) -> Self {
        Self::Probe(path.to_path_buf())
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Probe(_))
    }
}
