use crate::consts::RECUP_DIR;
use crate::error::{ErrorKind, Result};
use crate::probe::has_ext_superblock;
use crate::recovered::{RecoveredFile, collect};
use async_stream::stream;
use datarecovery_process::{CancellationToken, Invocation, OutputFormat, PassOutcome, PassProgress, RunEvent, RunnerHandle};
use exn::ResultExt;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One PhotoRec run against one image.
#[derive(Clone, Debug)]
pub struct ExtractRequest {
    pub id: String,
    pub image: PathBuf,
    /// `workingDir/extracted`; output goes to `<root>/<id>/`.
    pub output_root: PathBuf,
    pub photorec: PathBuf,
    /// When set, PhotoRec writes `photorec.log` here.
    pub log_dir: Option<PathBuf>,
    pub keep_corrupted: bool,
}

impl ExtractRequest {
    pub fn new(id: impl Into<String>, image: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            image: image.into(),
            output_root: output_root.into(),
            photorec: PathBuf::from("photorec"),
            log_dir: None,
            keep_corrupted: false,
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_root.join(&self.id)
    }

    /// `photorec [/log] /d <out>/recup_dir /cmd <image> options[,mode_ext2][,keep_corrupted_file],search`
    pub fn invocation(&self, ext_filesystem: bool) -> Invocation {
        let mut options = String::from("options");
        if ext_filesystem {
            options.push_str(",mode_ext2");
        }
        if self.keep_corrupted {
            options.push_str(",keep_corrupted_file");
        }
        options.push_str(",search");

        let cwd = self.log_dir.clone().unwrap_or_else(|| self.output_dir());
        let mut invocation = Invocation::new(&self.photorec, cwd, OutputFormat::Photorec);
        if self.log_dir.is_some() {
            invocation = invocation.arg("/log");
        }
        invocation.arg("/d").arg(self.output_dir().join(RECUP_DIR)).arg("/cmd").arg(&self.image).arg(options)
    }
}

/// What one image yielded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extraction {
    pub id: String,
    pub output_dir: PathBuf,
    pub files: Vec<RecoveredFile>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExtractEvent {
    Started { id: String, image: PathBuf },
    Progress(PassProgress),
    Complete(Extraction),
}

/// Carves files out of `request.image` with PhotoRec, then collects what it
/// produced (dropping PhotoRec's `report.xml`).
pub fn extract(
    request: ExtractRequest,
    runner: RunnerHandle,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<ExtractEvent>> {
    stream!({
        yield Ok(ExtractEvent::Started { id: request.id.clone(), image: request.image.clone() });
        if !tokio::fs::try_exists(&request.image).await.unwrap_or(false) {
            yield Err(exn::Exn::from(ErrorKind::MissingImage(request.image.clone())));
            return;
        }
        let output_dir = request.output_dir();
        let mut dirs = vec![output_dir.clone()];
        dirs.extend(request.log_dir.clone());
        for dir in dirs {
            if let Err(e) = tokio::fs::create_dir_all(&dir).await.or_raise(|| ErrorKind::Io(dir.clone())) {
                yield Err(e);
                return;
            }
        }

        let ext_filesystem = has_ext_superblock(&request.image).await;
        let invocation = request.invocation(ext_filesystem);
        tracing::info!(image = %request.image.display(), ext_filesystem, "Running {invocation}");
        let mut events = runner.run(invocation, cancel.clone());
        let mut result = None;
        while let Some(event) = events.next().await {
            match event.or_raise(|| ErrorKind::Launch) {
                Ok(RunEvent::Progress(progress)) => yield Ok(ExtractEvent::Progress(progress)),
                Ok(RunEvent::Finished(done)) => {
                    result = Some(done);
                    break;
                },
                Err(e) => {
                    yield Err(e);
                    return;
                },
            }
        }
        let Some(result) = result else {
            yield Err(exn::Exn::from(ErrorKind::Launch));
            return;
        };
        let failure = match result.outcome {
            PassOutcome::Success => None,
            PassOutcome::Cancelled => Some(ErrorKind::Cancelled),
            PassOutcome::TimedOut => Some(ErrorKind::TimedOut),
            outcome => Some(ErrorKind::Failed { outcome, transient: result.is_transient() }),
        };
        if let Some(kind) = failure {
            tracing::warn!(error = %kind, diagnostics = ?result.summary.diagnostics, "PhotoRec did not finish");
            yield Err(exn::Exn::from(kind));
            return;
        }

        match collect(&output_dir).await {
            Ok(files) => {
                tracing::info!(files = files.len(), "Extraction complete");
                yield Ok(ExtractEvent::Complete(Extraction { id: request.id.clone(), output_dir, files }));
            },
            Err(e) => yield Err(e),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use datarecovery_process::{Reply, ScriptedRunner};
    use futures::TryStreamExt;
    use std::path::Path;

    /// Stands in for PhotoRec: writes files where `/d` points.
    fn photorec(files: &'static [(&'static str, &'static [u8])]) -> std::sync::Arc<ScriptedRunner> {
        ScriptedRunner::new(move |invocation| {
            let position = invocation.args.iter().position(|a| a == "/d").unwrap();
            let recup = invocation.arg_path(position + 1).unwrap().with_extension("1");
            std::fs::create_dir_all(&recup).unwrap();
            for (name, data) in files {
                std::fs::write(recup.join(name), data).unwrap();
            }
            std::fs::write(recup.join("report.xml"), b"<report/>").unwrap();
            Reply::success().with_lines(["Pass 1 - Reading sector    1024/2048, 2 files found"])
        })
    }

    #[test]
    fn test_invocation() {
        let mut request = ExtractRequest::new("sdb1", "/w/images/sdb1.img", "/w/extracted");
        assert_eq!(
            request.invocation(false).to_string(),
            "photorec /d /w/extracted/sdb1/recup_dir /cmd /w/images/sdb1.img options,search"
        );
        assert_eq!(request.invocation(false).working_dir, Path::new("/w/extracted/sdb1"));
        request.keep_corrupted = true;
        request.log_dir = Some("/w/logs".into());
        let invocation = request.invocation(true);
        assert_eq!(
            invocation.to_string(),
            "photorec /log /d /w/extracted/sdb1/recup_dir /cmd /w/images/sdb1.img options,mode_ext2,keep_corrupted_file,search"
        );
        assert_eq!(invocation.working_dir, Path::new("/w/logs"));
        assert!(!invocation.elevated);
    }

    #[tokio::test]
    async fn test_extract_collects_files() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("disk.img");
        std::fs::write(&image, vec![0u8; 2048]).unwrap();
        let runner = photorec(&[("f0000001.jpg", b"\xFF\xD8\xFF"), ("f0000002.txt", b"hello")]);
        let request = ExtractRequest::new("disk", &image, dir.path().join("extracted"));
        let events: Vec<_> = extract(request, runner.clone(), CancellationToken::new()).try_collect().await.unwrap();
        assert!(matches!(events[1], ExtractEvent::Progress(ref p) if p.percent == Some(50.0)));
        let Some(ExtractEvent::Complete(extraction)) = events.last() else { panic!("{events:?}") };
        assert_eq!(extraction.files.len(), 2);
        assert_eq!(extraction.output_dir, dir.path().join("extracted/disk"));
        assert!(!extraction.output_dir.join("recup_dir.1/report.xml").exists());
    }

    #[tokio::test]
    async fn test_missing_image_spawns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::succeeding();
        let request = ExtractRequest::new("disk", dir.path().join("missing.img"), dir.path());
        let err = extract(request, runner.clone(), CancellationToken::new()).try_collect::<Vec<_>>().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::MissingImage(_)));
        assert!(runner.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_reported_with_transience() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("disk.img");
        std::fs::write(&image, b"").unwrap();
        let runner = ScriptedRunner::new(|_| Reply::exit(1).with_diagnostics(["Resource temporarily unavailable"]));
        let request = ExtractRequest::new("disk", &image, dir.path().join("extracted"));
        let err = extract(request, runner, CancellationToken::new()).try_collect::<Vec<_>>().await.unwrap_err();
        assert!(err.is_retryable());
    }
}
