use crate::error::{ErrorKind, Result};
use crate::job::lock_path;
use exn::ResultExt;
use rustix::fs::{FlockOperation, flock};
use rustix::io::Errno;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Exclusive hold on a working directory for the lifetime of one job.
///
/// Backed by `flock(2)` on `.datarecovery.lock`; the kernel releases it when
/// this value (and its file descriptor) is dropped, even on a crash.
#[derive(Debug)]
pub struct WorkdirLock {
    path: PathBuf,
    _file: File,
}

impl WorkdirLock {
    /// Creates the directory if needed and takes the lock without waiting.
    pub fn acquire(working_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(working_dir).or_raise(|| ErrorKind::Io(working_dir.to_path_buf()))?;
        let path = lock_path(working_dir);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .or_raise(|| ErrorKind::Io(path.clone()))?;
        match flock(&file, FlockOperation::NonBlockingLockExclusive) {
            Ok(()) => {},
            Err(Errno::WOULDBLOCK) => exn::bail!(ErrorKind::WorkspaceLocked(working_dir.to_path_buf())),
            Err(e) => return Err(e).or_raise(|| ErrorKind::Io(path.clone())),
        }
        tracing::debug!(path = %path.display(), "Acquired working directory lock");
        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_holder_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        let lock = WorkdirLock::acquire(&work).unwrap();
        assert!(lock.path().exists());

        let err = WorkdirLock::acquire(&work).unwrap_err();
        assert_eq!(*err, ErrorKind::WorkspaceLocked(work.clone()));

        drop(lock);
        WorkdirLock::acquire(&work).unwrap();
    }
}
