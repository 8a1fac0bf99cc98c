use crate::consts::{CORRUPTED, NO_FILE_TYPE, REPORT_XML, SIGNATURES, SNIFF_LEN};
use crate::error::{ErrorKind, Result};
use async_stream::stream;
use exn::ResultExt;
use futures::{Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

/// A file carved out of an image.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RecoveredFile {
    pub path: PathBuf,
    /// Detected type: PhotoRec's extension, else a sniffed one.
    pub kind: Option<String>,
    pub size: u64,
    /// PhotoRec names broken files `b<number>...` instead of `f<number>...`.
    pub corrupted: bool,
}

impl RecoveredFile {
    /// Destination folder name under the organized root.
    pub fn category(&self) -> &str {
        if self.corrupted {
            return CORRUPTED;
        }
        self.kind.as_deref().unwrap_or(NO_FILE_TYPE)
    }

    pub async fn identify(path: PathBuf, size: u64) -> Self {
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let corrupted = is_broken_name(&name);
        let kind = match extension(&name) {
            Some(ext) => Some(ext),
            None => sniff(&path).await.map(str::to_string),
        };
        Self { path, kind, size, corrupted }
    }
}

fn is_broken_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some('b' | 'B')) && chars.next().is_some_and(|c| c.is_ascii_digit())
}

fn extension(name: &str) -> Option<String> {
    if name.starts_with('.') {
        return None;
    }
    let (_, ext) = name.rsplit_once('.')?;
    (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
}

async fn sniff(path: &Path) -> Option<&'static str> {
    let mut file = tokio::fs::File::open(path).await.ok()?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    (&mut file).take(SNIFF_LEN as u64).read_to_end(&mut head).await.ok()?;
    SIGNATURES.iter().find(|(magic, _)| head.starts_with(magic)).map(|(_, kind)| *kind)
}

enum WalkEntry {
    File(PathBuf, u64),
    Descend(PathBuf),
    Skip,
}

async fn process_entry(entry: tokio::fs::DirEntry) -> Result<WalkEntry> {
    let path = entry.path();
    let file_type = entry.file_type().await.or_raise(|| ErrorKind::Io(path.clone()))?;
    if file_type.is_dir() {
        return Ok(WalkEntry::Descend(path));
    }
    if !file_type.is_file() {
        return Ok(WalkEntry::Skip);
    }
    if entry.file_name() == REPORT_XML {
        tokio::fs::remove_file(&path).await.or_raise(|| ErrorKind::Io(path.clone()))?;
        tracing::trace!(path = %path.display(), "Removed PhotoRec report");
        return Ok(WalkEntry::Skip);
    }
    let metadata = entry.metadata().await.or_raise(|| ErrorKind::Io(path.clone()))?;
    Ok(WalkEntry::File(path, metadata.len()))
}

/// Walks `root` for recovered files, deleting PhotoRec's `report.xml`
/// files along the way. A missing root yields nothing.
pub fn walk(root: &Path) -> impl Stream<Item = Result<RecoveredFile>> + Send + 'static {
    let mut stack = vec![root.to_path_buf()];
    stream! {
        while let Some(current) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => {
                    yield Err::<RecoveredFile, _>(err).or_raise(|| ErrorKind::Io(current.clone()));
                    continue;
                },
            };
            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(err) => {
                        yield Err::<RecoveredFile, _>(err).or_raise(|| ErrorKind::Io(current.clone()));
                        break;
                    },
                };
                match process_entry(entry).await {
                    Ok(WalkEntry::File(path, size)) => yield Ok(RecoveredFile::identify(path, size).await),
                    Ok(WalkEntry::Descend(dir)) => stack.push(dir),
                    Ok(WalkEntry::Skip) => {},
                    Err(e) => yield Err(e),
                }
            }
        }
    }
}

/// Every recovered file under `root`, sorted by path.
pub async fn collect(root: &Path) -> Result<Vec<RecoveredFile>> {
    let mut files: Vec<RecoveredFile> = walk(root).try_collect().await?;
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}
