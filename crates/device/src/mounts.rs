use crate::error::{ErrorKind, Result};
use crate::target::SYSFS_BLOCK;
use async_trait::async_trait;
use exn::ResultExt;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

pub const PROC_MOUNTS: &str = "/proc/self/mounts";

/// Mount points that are never unmounted on the user's behalf.
pub const CRITICAL_MOUNT_POINTS: [&str; 7] = ["/", "/boot", "/home", "/usr", "/var", "/tmp", "/opt"];

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MountEntry {
    pub source: PathBuf,
    pub mount_point: PathBuf,
    pub fs_type: String,
    /// File behind a loop device source.
    pub backing_file: Option<PathBuf>,
}

impl MountEntry {
    pub fn new(source: impl Into<PathBuf>, mount_point: impl Into<PathBuf>, fs_type: impl Into<String>) -> Self {
        Self { source: source.into(), mount_point: mount_point.into(), fs_type: fs_type.into(), backing_file: None }
    }

    pub fn backed_by(mut self, file: impl Into<PathBuf>) -> Self {
        self.backing_file = Some(file.into());
        self
    }

    /// Whether `path` is mounted by this entry, directly or as a loop device's file.
    pub fn is_from(&self, path: &Path) -> bool {
        self.source == path || self.backing_file.as_deref() == Some(path)
    }

    pub fn is_critical(&self) -> bool {
        CRITICAL_MOUNT_POINTS.iter().any(|critical| self.mount_point == Path::new(critical))
    }
}

pub type MountTableHandle = Arc<dyn MountTable>;

/// Read access to the host's current mounts.
///
/// Unmounting is not part of this trait: it is a privileged action and goes
/// through the command runner like every other external program.
#[async_trait]
pub trait MountTable: Send + Sync + Debug {
    async fn entries(&self) -> Result<Vec<MountEntry>>;

    /// Mount whose mount point is the longest prefix of `path`.
    async fn containing(&self, path: &Path) -> Result<Option<MountEntry>> {
        let entries = self.entries().await?;
        Ok(entries
            .into_iter()
            .filter(|entry| path.starts_with(&entry.mount_point))
            .max_by_key(|entry| entry.mount_point.components().count()))
    }
}

/// Reads `/proc/self/mounts` (or any file in the same format).
///
/// Loop device sources are resolved to their backing file through sysfs, so
/// a loop-mounted image counts as mounted.
#[derive(Clone, Debug)]
pub struct ProcMountTable {
    path: PathBuf,
    sysfs: PathBuf,
}

impl Default for ProcMountTable {
    fn default() -> Self {
        Self::new(PROC_MOUNTS)
    }
}

impl ProcMountTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), sysfs: PathBuf::from(SYSFS_BLOCK) }
    }

    pub fn with_sysfs(mut self, sysfs: impl Into<PathBuf>) -> Self {
        self.sysfs = sysfs.into();
        self
    }

    async fn backing_file(&self, source: &Path) -> Option<PathBuf> {
        let name = source.file_name()?.to_str()?;
        if !name.starts_with("loop") {
            return None;
        }
        let file = self.sysfs.join(name).join("loop/backing_file");
        let backing = tokio::fs::read_to_string(file).await.ok()?;
        let backing = backing.trim_end_matches('\n');
        (!backing.is_empty()).then(|| PathBuf::from(backing))
    }
}

#[async_trait]
impl MountTable for ProcMountTable {
    async fn entries(&self) -> Result<Vec<MountEntry>> {
        let contents = tokio::fs::read_to_string(&self.path).await.or_raise(|| ErrorKind::probe(&self.path))?;
        let mut entries = parse_mounts(&contents);
        // Sources such as /dev/disk/by-uuid/... or /dev/mapper/... are symlinks.
        for entry in entries.iter_mut().filter(|e| e.source.starts_with("/dev/")) {
            if let Ok(resolved) = tokio::fs::canonicalize(&entry.source).await {
                entry.source = resolved;
            }
            entry.backing_file = self.backing_file(&entry.source).await;
        }
        Ok(entries)
    }
}

/// Parses the fstab-like format of `/proc/self/mounts`.
pub fn parse_mounts(contents: &str) -> Vec<MountEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_ascii_whitespace();
            let source = fields.next()?;
            let mount_point = fields.next()?;
            let fs_type = fields.next()?;
            Some(MountEntry::new(unescape(source), unescape(mount_point), fs_type))
        })
        .collect()
}

/// The kernel escapes space, tab, newline and backslash as `\ooo`.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && let Some(octal) = bytes.get(i + 1..i + 4)
            && octal.iter().all(|b| (b'0'..=b'7').contains(b))
        {
            out.push(octal.iter().fold(0u8, |acc, b| acc.wrapping_mul(8).wrapping_add(b - b'0')));
            i += 4;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// In-memory mount table for tests and dry runs.
///
/// Tests simulate a successful unmount by calling [`remove`](Self::remove)
/// from a scripted runner.
#[derive(Debug, Default)]
pub struct StaticMountTable {
    entries: RwLock<Vec<MountEntry>>,
}

impl StaticMountTable {
    pub fn new(entries: impl IntoIterator<Item = MountEntry>) -> Arc<Self> {
        Arc::new(Self { entries: RwLock::new(entries.into_iter().collect()) })
    }

    /// Drops every entry mounted from `source`.
    pub fn remove(&self, source: &Path) {
        if let Ok(mut entries) = self.entries.write() {
            entries.retain(|entry| entry.source != source);
        }
    }
}

#[async_trait]
impl MountTable for StaticMountTable {
    async fn entries(&self) -> Result<Vec<MountEntry>> {
        Ok(self.entries.read().map(|entries| entries.clone()).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const SAMPLE: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
/dev/nvme0n1p2 / ext4 rw,relatime 0 0
/dev/nvme0n1p1 /boot vfat rw,relatime 0 0
/dev/sdb1 /run/media/user/My\\040Photos vfat rw,nosuid,nodev 0 0
/dev/sdb2 /mnt/back\\134slash ext4 rw 0 0
";

    #[test]
    fn test_parse_mounts_unescapes() {
        let entries = parse_mounts(SAMPLE);
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[3], MountEntry::new("/dev/sdb1", "/run/media/user/My Photos", "vfat"));
        assert_eq!(entries[4].mount_point, PathBuf::from("/mnt/back\\slash"));
    }

    #[rstest]
    #[case("/", true)]
    #[case("/boot", true)]
    #[case("/home", true)]
    #[case("/home/user/usb", false)]
    #[case("/run/media/user/USB", false)]
    fn test_critical(#[case] mount_point: &str, #[case] critical: bool) {
        assert_eq!(MountEntry::new("/dev/sdb1", mount_point, "ext4").is_critical(), critical);
    }

    #[tokio::test]
    async fn test_containing_is_longest_prefix() {
        let table = StaticMountTable::new(parse_mounts(SAMPLE));
        let found = table.containing(Path::new("/run/media/user/My Photos/recovery")).await.unwrap().unwrap();
        assert_eq!(found.source, PathBuf::from("/dev/sdb1"));
        let found = table.containing(Path::new("/srv/recovery")).await.unwrap().unwrap();
        assert_eq!(found.source, PathBuf::from("/dev/nvme0n1p2"));
    }

    #[tokio::test]
    async fn test_proc_table_reads_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), SAMPLE).unwrap();
        let entries = ProcMountTable::new(file.path()).entries().await.unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0].mount_point, PathBuf::from("/sys"));
    }

    #[tokio::test]
    async fn test_proc_table_resolves_loop_backing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mounts = dir.path().join("mounts");
        std::fs::write(&mounts, "/dev/loop7 /mnt/old\\040camera ext4 ro 0 0\n/dev/sdb1 /media/usb vfat rw 0 0\n").unwrap();
        let sysfs = dir.path().join("sys");
        std::fs::create_dir_all(sysfs.join("loop7/loop")).unwrap();
        std::fs::write(sysfs.join("loop7/loop/backing_file"), "/data/camera.dd\n").unwrap();

        let entries = ProcMountTable::new(&mounts).with_sysfs(&sysfs).entries().await.unwrap();
        assert_eq!(entries[0].backing_file, Some(PathBuf::from("/data/camera.dd")));
        assert!(entries[0].is_from(Path::new("/data/camera.dd")));
        assert_eq!(entries[1].backing_file, None);
    }
}
