use crate::organize::error::{ErrorKind as OrganizeErrorKind, Result as OrganizeResult};
use exn::ResultExt;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

/// Suffixes tried before giving up with [`OrganizeErrorKind::CollisionUnresolved`].
pub(crate) const MAX_SUFFIX: u32 = 100_000;

/// `name.ext` → `name_<n>.ext`; `attempt == 0` is the name itself.
pub(crate) fn candidate(name: &str, attempt: u32) -> String {
    if attempt == 0 {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{attempt}.{ext}"),
        _ => format!("{name}_{attempt}"),
    }
}

/// Moves `from` into `dir` under `name`, or the first free disambiguated
/// variant of it.
///
/// Never overwrites: a hard link (or, across filesystems, a `create_new`
/// copy) fails if the destination exists, so two concurrent placements can't
/// claim the same name. Returns the destination and whether a suffix was needed.
pub(crate) async fn place(from: &Path, dir: &Path, name: &str) -> OrganizeResult<(PathBuf, bool)> {
    tokio::fs::create_dir_all(dir).await.or_raise(|| OrganizeErrorKind::Io(dir.to_path_buf()))?;
    for attempt in 0..MAX_SUFFIX {
        let to = dir.join(candidate(name, attempt));
        let placed = match tokio::fs::hard_link(from, &to).await {
            Ok(()) => true,
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => false,
            Err(e) => {
                tracing::trace!(error = %e, "Hard link unavailable; copying");
                copy_new(from, &to).await?
            },
        };
        if placed {
            tokio::fs::remove_file(from).await.or_raise(|| OrganizeErrorKind::Io(from.to_path_buf()))?;
            return Ok((to, attempt > 0));
        }
    }
    exn::bail!(OrganizeErrorKind::CollisionUnresolved(dir.join(name)));
}

/// Copies into a file that must not exist yet; `Ok(false)` if it does.
async fn copy_new(from: &Path, to: &Path) -> OrganizeResult<bool> {
    let mut dest = match tokio::fs::OpenOptions::new().write(true).create_new(true).open(to).await {
        Ok(dest) => dest,
        Err(e) if e.kind() == IoErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e).or_raise(|| OrganizeErrorKind::Io(to.to_path_buf())),
    };
    let mut source = tokio::fs::File::open(from).await.or_raise(|| OrganizeErrorKind::Io(from.to_path_buf()))?;
    if let Err(e) = tokio::io::copy(&mut source, &mut dest).await {
        // Don't leave a truncated file claiming the name.
        let _ = tokio::fs::remove_file(to).await;
        return Err(e).or_raise(|| OrganizeErrorKind::Io(to.to_path_buf()));
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("f0001.jpg", 0, "f0001.jpg")]
    #[case("f0001.jpg", 1, "f0001_1.jpg")]
    #[case("f0001.tar.gz", 2, "f0001.tar_2.gz")]
    #[case("f0001", 3, "f0001_3")]
    #[case(".hidden", 1, ".hidden_1")]
    fn test_candidate(#[case] name: &str, #[case] attempt: u32, #[case] expected: &str) {
        assert_eq!(candidate(name, attempt), expected);
    }

    #[tokio::test]
    async fn test_place_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("jpg");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("f0001.jpg"), b"existing").unwrap();
        let incoming = dir.path().join("f0001.jpg");
        std::fs::write(&incoming, b"incoming").unwrap();

        let (to, renamed) = place(&incoming, &dest, "f0001.jpg").await.unwrap();
        assert!(renamed);
        assert_eq!(to, dest.join("f0001_1.jpg"));
        assert_eq!(std::fs::read(dest.join("f0001.jpg")).unwrap(), b"existing");
        assert_eq!(std::fs::read(&to).unwrap(), b"incoming");
        assert!(!incoming.exists());
    }

    #[tokio::test]
    async fn test_copy_new_refuses_existing() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a");
        let to = dir.path().join("b");
        std::fs::write(&from, b"a").unwrap();
        std::fs::write(&to, b"b").unwrap();
        assert!(!copy_new(&from, &to).await.unwrap());
        assert_eq!(std::fs::read(&to).unwrap(), b"b");
        std::fs::remove_file(&to).unwrap();
        assert!(copy_new(&from, &to).await.unwrap());
        assert_eq!(std::fs::read(&to).unwrap(), b"a");
    }
}
