use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type SpaceProbeHandle = Arc<dyn SpaceProbe>;

/// Free space available to an unprivileged writer.
#[async_trait]
pub trait SpaceProbe: Send + Sync + Debug {
    async fn available(&self, path: &Path) -> Result<u64>;
}

/// `statvfs(2)` on the nearest existing ancestor of the path.
#[derive(Clone, Copy, Debug, Default)]
pub struct Statvfs;

#[async_trait]
impl SpaceProbe for Statvfs {
    async fn available(&self, path: &Path) -> Result<u64> {
        let existing = nearest_existing(path);
        let probed = existing.clone();
        let stat = tokio::task::spawn_blocking(move || rustix::fs::statvfs(probed.as_path()))
            .await
            .or_raise(|| ErrorKind::probe(&existing))?
            .or_raise(|| ErrorKind::probe(&existing))?;
        Ok(stat.f_bavail.saturating_mul(stat.f_frsize))
    }
}

fn nearest_existing(path: &Path) -> PathBuf {
    path.ancestors().find(|p| p.exists()).unwrap_or_else(|| Path::new("/")).to_path_buf()
}

/// Reports a fixed amount regardless of path.
#[derive(Clone, Copy, Debug)]
pub struct FixedSpace(pub u64);

#[async_trait]
impl SpaceProbe for FixedSpace {
    async fn available(&self, _path: &Path) -> Result<u64> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_statvfs_on_missing_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        let available = Statvfs.available(&dir.path().join("not/yet/created")).await.unwrap();
        assert!(available > 0);
    }

    #[tokio::test]
    async fn test_fixed() {
        assert_eq!(FixedSpace(42).available(Path::new("/nowhere")).await.unwrap(), 42);
    }
}
