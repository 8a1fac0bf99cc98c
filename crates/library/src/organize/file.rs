use crate::error::{ErrorKind as LibraryErrorKind, Result as LibraryResult};
use crate::organize::conflict::place;
use crate::organize::error::{ErrorKind as OrganizeErrorKind, Result as OrganizeResult};
use datarecovery_extract::RecoveredFile;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The outcome of (successfully) organizing a single file.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Action {
    /// Moved to `<root>/<category>/<name>`.
    Moved { category: String, to: PathBuf, size: u64 },
    /// The name was taken; moved under a suffixed name instead.
    Disambiguated { category: String, wanted: PathBuf, to: PathBuf, size: u64 },
    /// Corrupted and not kept: deleted.
    Discarded(PathBuf),
}

/// Organizing rules shared by every file of one run.
#[derive(Clone, Debug)]
pub struct OrganizeOptions {
    pub destination: PathBuf,
    /// Off: corrupted files are deleted, which cannot be undone.
    pub keep_corrupted: bool,
}

/// Moves one recovered file into `<destination>/<category>/`.
///
/// # Errors
/// Returns [`Exn<LibraryErrorKind::Organize>`](LibraryErrorKind::Organize)
/// raised from, and carrying, the inner [`OrganizeErrorKind`].
pub async fn organize_file(options: &OrganizeOptions, file: RecoveredFile) -> LibraryResult<Action> {
    organize_file_inner(options, file).await.map_err(|e| {
        let kind = LibraryErrorKind::Organize((*e).clone());
        e.raise(kind)
    })
}

pub(crate) async fn organize_file_inner(options: &OrganizeOptions, file: RecoveredFile) -> OrganizeResult<Action> {
    if file.corrupted && !options.keep_corrupted {
        tokio::fs::remove_file(&file.path).await.or_raise(|| OrganizeErrorKind::Io(file.path.clone()))?;
        tracing::debug!(path = %file.path.display(), "Discarded corrupted file");
        return Ok(Action::Discarded(file.path));
    }
    let category = file.category().to_string();
    let name = file_name(&file.path)?;
    let dir = options.destination.join(&category);
    let (to, renamed) = place(&file.path, &dir, &name).await?;
    if renamed {
        tracing::debug!(from = %file.path.display(), to = %to.display(), "Name taken; disambiguated");
        return Ok(Action::Disambiguated { category, wanted: dir.join(name), to, size: file.size });
    }
    Ok(Action::Moved { category, to, size: file.size })
}

fn file_name(path: &Path) -> OrganizeResult<String> {
    match path.file_name() {
        Some(name) => Ok(name.to_string_lossy().into_owned()),
        None => exn::bail!(OrganizeErrorKind::Io(path.to_path_buf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recovered(path: PathBuf, kind: Option<&str>, corrupted: bool) -> RecoveredFile {
        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        RecoveredFile { path, kind: kind.map(str::to_string), size, corrupted }
    }

    #[tokio::test]
    async fn test_discards_corrupted_only_when_not_kept() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("b0001.jpg");
        std::fs::write(&broken, b"x").unwrap();
        let options = OrganizeOptions { destination: dir.path().join("out"), keep_corrupted: true };
        let action = organize_file(&options, recovered(broken.clone(), Some("jpg"), true)).await.unwrap();
        assert_eq!(action, Action::Moved { category: "corrupted".into(), to: dir.path().join("out/corrupted/b0001.jpg"), size: 1 });

        let broken = dir.path().join("b0002.jpg");
        std::fs::write(&broken, b"x").unwrap();
        let options = OrganizeOptions { keep_corrupted: false, ..options };
        let action = organize_file(&options, recovered(broken.clone(), Some("jpg"), true)).await.unwrap();
        assert_eq!(action, Action::Discarded(broken.clone()));
        assert!(!broken.exists());
        assert!(!dir.path().join("out/corrupted/b0002.jpg").exists());
    }
}
