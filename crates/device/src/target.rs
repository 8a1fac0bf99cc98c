use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Where the kernel publishes block devices.
pub const SYSFS_BLOCK: &str = "/sys/class/block";
/// sysfs reports sizes in 512-byte sectors regardless of the device's own.
const SYSFS_SECTOR: u64 = 512;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Device,
    Image,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub path: PathBuf,
    pub size: u64,
}

impl Partition {
    pub fn id(&self) -> String {
        identifier(&self.path)
    }
}

/// A source to recover from. Immutable once a job has started.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub path: PathBuf,
    pub kind: TargetKind,
    pub size: u64,
    pub partitions: Vec<Partition>,
}

impl Target {
    pub fn device(path: impl Into<PathBuf>, size: u64, partitions: Vec<Partition>) -> Self {
        Self { path: path.into(), kind: TargetKind::Device, size, partitions }
    }

    pub fn image(path: impl Into<PathBuf>, size: u64) -> Self {
        Self { path: path.into(), kind: TargetKind::Image, size, partitions: Vec::new() }
    }

    /// Stable name used for artifacts (`images/<id>.img`, `extracted/<id>/`).
    pub fn id(&self) -> String {
        identifier(&self.path)
    }

    pub fn is_device(&self) -> bool {
        self.kind == TargetKind::Device
    }

    /// The target itself followed by each of its partitions.
    pub fn constituents(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.path.as_path()).chain(self.partitions.iter().map(|p| p.path.as_path()))
    }

    /// Probes `path` against the live sysfs tree.
    pub async fn probe(path: impl AsRef<Path>) -> Result<Self> {
        Self::probe_with(path.as_ref(), Path::new(SYSFS_BLOCK)).await
    }

    /// A `/dev/<name>` path with a `<sysfs>/<name>` entry is a block device;
    /// any other regular file is an image.
    #[instrument(level = "debug", skip(sysfs), fields(sysfs = %sysfs.display()))]
    pub async fn probe_with(path: &Path, sysfs: &Path) -> Result<Self> {
        if path.starts_with("/dev")
            && let Some(name) = path.file_name()
        {
            let entry = sysfs.join(name);
            if tokio::fs::try_exists(&entry).await.unwrap_or(false) {
                let size = sysfs_size(&entry).await?;
                let partitions = sysfs_partitions(&entry).await?;
                tracing::debug!(size, partitions = partitions.len(), "Probed block device");
                return Ok(Self::device(path, size, partitions));
            }
        }
        let metadata = tokio::fs::metadata(path).await.or_raise(|| ErrorKind::InvalidTarget(path.to_path_buf()))?;
        if !metadata.is_file() {
            exn::bail!(ErrorKind::InvalidTarget(path.to_path_buf()));
        }
        Ok(Self::image(path, metadata.len()))
    }
}

fn identifier(path: &Path) -> String {
    let stem = path.file_stem().or_else(|| path.file_name()).map(|s| s.to_string_lossy()).unwrap_or_default();
    let id: String =
        stem.chars().map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' }).collect();
    if id.is_empty() { "target".to_string() } else { id }
}

async fn sysfs_size(entry: &Path) -> Result<u64> {
    let file = entry.join("size");
    let sectors = tokio::fs::read_to_string(&file).await.or_raise(|| ErrorKind::probe(&file))?;
    let sectors = sectors.trim().parse::<u64>().or_raise(|| ErrorKind::probe(&file))?;
    Ok(sectors * SYSFS_SECTOR)
}

async fn sysfs_partitions(entry: &Path) -> Result<Vec<Partition>> {
    let mut partitions = Vec::new();
    let mut children = tokio::fs::read_dir(entry).await.or_raise(|| ErrorKind::probe(entry))?;
    while let Some(child) = children.next_entry().await.or_raise(|| ErrorKind::probe(entry))? {
        let child = child.path();
        if !tokio::fs::try_exists(child.join("partition")).await.unwrap_or(false) {
            continue;
        }
        let Some(name) = child.file_name() else { continue };
        partitions.push(Partition { path: Path::new("/dev").join(name), size: sysfs_size(&child).await? });
    }
    partitions.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(partitions)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;

    /// Builds `<root>/<device>/{size, <part>/{size, partition}}`.
    pub(crate) fn fake_sysfs(root: &Path, device: &str, sectors: u64, parts: &[(&str, u64)]) {
        let dir = root.join(device);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("size"), format!("{sectors}\n")).unwrap();
        for (index, (name, sectors)) in parts.iter().enumerate() {
            let part = dir.join(name);
            fs::create_dir_all(&part).unwrap();
            fs::write(part.join("size"), format!("{sectors}\n")).unwrap();
            fs::write(part.join("partition"), format!("{}\n", index + 1)).unwrap();
        }
        // Non-partition children must be ignored.
        fs::create_dir_all(dir.join("queue")).unwrap();
    }

    #[tokio::test]
    async fn test_probe_device_with_partitions() {
        let sysfs = tempfile::tempdir().unwrap();
        fake_sysfs(sysfs.path(), "sdz", 2048, &[("sdz2", 512), ("sdz1", 1024)]);
        let target = Target::probe_with(Path::new("/dev/sdz"), sysfs.path()).await.unwrap();
        assert_eq!(target.kind, TargetKind::Device);
        assert_eq!(target.size, 2048 * 512);
        assert_eq!(
            target.partitions,
            vec![
                Partition { path: "/dev/sdz1".into(), size: 1024 * 512 },
                Partition { path: "/dev/sdz2".into(), size: 512 * 512 },
            ]
        );
        let constituents: Vec<_> = target.constituents().collect();
        assert_eq!(constituents, vec![Path::new("/dev/sdz"), Path::new("/dev/sdz1"), Path::new("/dev/sdz2")]);
        assert_eq!(target.id(), "sdz");
        assert_eq!(target.partitions[0].id(), "sdz1");
    }

    #[tokio::test]
    async fn test_probe_unreadable_sysfs_size() {
        let sysfs = tempfile::tempdir().unwrap();
        fake_sysfs(sysfs.path(), "sdz", 2048, &[]);
        fs::write(sysfs.path().join("sdz/size"), "lots\n").unwrap();
        let err = Target::probe_with(Path::new("/dev/sdz"), sysfs.path()).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Probe(sysfs.path().join("sdz/size")));
    }

    #[tokio::test]
    async fn test_probe_image_file() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("old camera.dd");
        fs::write(&image, vec![0u8; 4096]).unwrap();
        let target = Target::probe_with(&image, dir.path()).await.unwrap();
        assert_eq!(target, Target::image(&image, 4096));
        assert_eq!(target.id(), "old_camera");
    }

    #[tokio::test]
    async fn test_probe_rejects_directories_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = Target::probe_with(dir.path(), dir.path()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidTarget(_)));
        let err = Target::probe_with(Path::new("/dev/sdz"), dir.path()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidTarget(_)));
    }
}
