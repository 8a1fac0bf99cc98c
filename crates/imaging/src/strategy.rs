use crate::error::{ErrorKind, Result};
use crate::{MapSummary, PassKind};
use async_stream::stream;
use datarecovery_process::error::ErrorKind as ProcessErrorKind;
use datarecovery_process::{
    CancellationToken, Invocation, OutputFormat, PassOutcome, PassProgress, RunEvent, RunnerHandle,
};
use exn::ResultExt;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Everything needed to image one source (a device, a partition or an image
/// file) into `image_dir`.
#[derive(Clone, Debug)]
pub struct ImagingPlan {
    /// Artifact name: `<id>.img`, `<id>.map`, `<id>.map.pass<N>`.
    pub id: String,
    pub source: PathBuf,
    pub image_dir: PathBuf,
    pub ddrescue: PathBuf,
    /// Block-device source: use `--idirect` and request elevation.
    pub device: bool,
    /// First pass to run. Earlier passes are assumed done (their map is on disk).
    pub resume_from: PassKind,
}

impl ImagingPlan {
    pub fn new(id: impl Into<String>, source: impl Into<PathBuf>, image_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            image_dir: image_dir.into(),
            ddrescue: PathBuf::from("ddrescue"),
            device: false,
            resume_from: PassKind::FastCopy,
        }
    }

    pub fn ddrescue(mut self, path: impl Into<PathBuf>) -> Self {
        self.ddrescue = path.into();
        self
    }

    pub fn device(mut self, device: bool) -> Self {
        self.device = device;
        self
    }

    pub fn resume_from(mut self, pass: PassKind) -> Self {
        self.resume_from = pass;
        self
    }

    pub fn image_path(&self) -> PathBuf {
        self.image_dir.join(format!("{}.img", self.id))
    }

    pub fn map_path(&self) -> PathBuf {
        self.image_dir.join(format!("{}.map", self.id))
    }

    pub fn snapshot_path(&self, pass: PassKind) -> PathBuf {
        self.image_dir.join(format!("{}.map.pass{}", self.id, pass.number()))
    }

    pub fn invocation(&self, pass: PassKind) -> Invocation {
        Invocation::new(&self.ddrescue, &self.image_dir, OutputFormat::Ddrescue)
            .args(pass.args(self.device))
            .args(["--force", "--verbose"])
            .arg(&self.source)
            .arg(self.image_path())
            .arg(self.map_path())
            .elevated(self.device)
    }
}

/// One finished ddrescue invocation. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImagePass {
    pub pass: PassKind,
    pub source: PathBuf,
    pub args: Vec<String>,
    /// Copy of the mapfile as this pass left it.
    pub map_snapshot: PathBuf,
    pub rescued: u64,
    /// Bytes still not rescued (bad, or not yet trimmed/scraped/tried).
    pub remaining_bad: u64,
    pub outcome: PassOutcome,
}

/// The passes run for one source, and the final state of its image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageResult {
    pub id: String,
    pub image: PathBuf,
    pub map: PathBuf,
    pub passes: Vec<ImagePass>,
    pub summary: MapSummary,
}

impl ImageResult {
    /// Imaging partial success is normal: anything rescued is worth carving.
    pub fn is_usable(&self) -> bool {
        self.summary.rescued > 0
    }
}

/// Events emitted by [`image`].
///
/// Ordering: [`Started`](Self::Started) once, then for each pass
/// [`PassStarted`](Self::PassStarted), zero or more
/// [`Progress`](Self::Progress), [`PassFinished`](Self::PassFinished); then
/// [`Complete`](Self::Complete). An error ends the stream early.
#[derive(Clone, Debug, PartialEq)]
pub enum ImagingEvent {
    Started { id: String, passes: Vec<PassKind> },
    PassStarted(PassKind),
    /// `overall` is the strategy's completion, `0.0..=100.0`, weighting each
    /// pass by [`PassKind::weight`].
    Progress { pass: PassKind, overall: f32, progress: PassProgress },
    PassFinished(ImagePass),
    Complete(ImageResult),
}

/// Runs the remaining passes of `plan` strictly in order.
///
/// Pass N+1 is only launched after pass N's result has been observed. Every
/// pass runs regardless of how much the previous one rescued; only
/// cancellation or a failed invocation stops the sequence.
pub fn image(plan: ImagingPlan, runner: RunnerHandle, cancel: CancellationToken) -> impl Stream<Item = Result<ImagingEvent>> {
    stream!({
        let passes: Vec<PassKind> = plan.resume_from.remaining().collect();
        yield Ok(ImagingEvent::Started { id: plan.id.clone(), passes: passes.clone() });

        if let Err(e) = prepare(&plan).await {
            yield Err(e);
            return;
        }

        let done_weight: f32 = PassKind::ALL.iter().filter(|p| **p < plan.resume_from).map(|p| p.weight()).sum();
        let mut completed = done_weight;
        let mut finished = Vec::new();
        for pass in passes {
            if cancel.is_cancelled() {
                yield Err(exn::Exn::from(ErrorKind::Cancelled(pass)));
                return;
            }
            tracing::info!(id = %plan.id, source = %plan.source.display(), "Starting {pass}");
            yield Ok(ImagingEvent::PassStarted(pass));

            let invocation = plan.invocation(pass);
            let args = invocation.args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
            let mut events = runner.run(invocation, cancel.clone());
            let mut result = None;
            while let Some(event) = events.next().await {
                let event = event.map_err(|e| {
                    let kind = match &*e {
                        ProcessErrorKind::Unstoppable(_) => ErrorKind::Unstoppable(pass),
                        _ => ErrorKind::Launch(pass),
                    };
                    e.raise(kind)
                });
                match event {
                    Ok(RunEvent::Progress(progress)) => {
                        let within = progress.percent.unwrap_or(0.0) / 100.0;
                        let overall = ((completed + within * pass.weight()) * 100.0).clamp(0.0, 100.0);
                        yield Ok(ImagingEvent::Progress { pass, overall, progress });
                    },
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
                yield Err(exn::Exn::from(ErrorKind::Launch(pass)));
                return;
            };
            match result.outcome {
                PassOutcome::Success => {},
                PassOutcome::Cancelled => {
                    tracing::info!(id = %plan.id, "{pass} cancelled");
                    yield Err(exn::Exn::from(ErrorKind::Cancelled(pass)));
                    return;
                },
                PassOutcome::TimedOut => {
                    yield Err(exn::Exn::from(ErrorKind::TimedOut(pass)));
                    return;
                },
                outcome => {
                    let transient = result.is_transient();
                    tracing::warn!(id = %plan.id, ?outcome, transient, diagnostics = ?result.summary.diagnostics, "{pass} failed");
                    yield Err(exn::Exn::from(ErrorKind::PassFailed { pass, outcome, transient }));
                    return;
                },
            }

            let record = match record_pass(&plan, pass, args, result.outcome).await {
                Ok(record) => record,
                Err(e) => {
                    yield Err(e);
                    return;
                },
            };
            tracing::info!(id = %plan.id, rescued = record.rescued, remaining_bad = record.remaining_bad, "Finished {pass}");
            completed += pass.weight();
            finished.push(record.clone());
            yield Ok(ImagingEvent::PassFinished(record));
        }

        match MapSummary::read(&plan.map_path()).await {
            Ok(summary) => {
                yield Ok(ImagingEvent::Complete(ImageResult {
                    id: plan.id.clone(),
                    image: plan.image_path(),
                    map: plan.map_path(),
                    passes: finished,
                    summary,
                }));
            },
            Err(e) => yield Err(e),
        }
    })
}

/// Creates the image directory and, as the unprivileged user, the image file
/// itself, so an elevated ddrescue writes into a file we still own.
async fn prepare(plan: &ImagingPlan) -> Result<()> {
    let image = plan.image_path();
    if same_file(&plan.source, &image) {
        exn::bail!(ErrorKind::SourceIsImage(image));
    }
    tokio::fs::create_dir_all(&plan.image_dir).await.or_raise(|| ErrorKind::Io(plan.image_dir.clone()))?;
    tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&image)
        .await
        .or_raise(|| ErrorKind::Io(image.clone()))?;
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

async fn record_pass(plan: &ImagingPlan, pass: PassKind, args: Vec<String>, outcome: PassOutcome) -> Result<ImagePass> {
    let map = plan.map_path();
    let summary = MapSummary::read(&map).await?;
    let snapshot = plan.snapshot_path(pass);
    tokio::fs::copy(&map, &snapshot).await.or_raise(|| ErrorKind::Io(snapshot.clone()))?;
    Ok(ImagePass {
        pass,
        source: plan.source.clone(),
        args,
        map_snapshot: snapshot,
        rescued: summary.rescued,
        remaining_bad: summary.remaining(),
        outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapfile::render;
    use datarecovery_process::{Reply, ScriptedRunner};
    use futures::TryStreamExt;
    use std::sync::Arc;

    const GIB: u64 = 1024 * 1024 * 1024;

    /// Stands in for ddrescue: writes the mapfile it was given.
    fn ddrescue(blocks: Vec<(u64, u64, char)>) -> Arc<ScriptedRunner> {
        ScriptedRunner::new(move |invocation| {
            let map = invocation.args.last().map(PathBuf::from).unwrap_or_default();
            std::fs::write(map, render(&blocks)).unwrap();
            Reply::success().with_lines(["pct rescued:  100.00%, read errors:        0,  remaining time:         n/a"])
        })
    }

    async fn collect(plan: ImagingPlan, runner: Arc<ScriptedRunner>) -> Result<Vec<ImagingEvent>> {
        image(plan, runner, CancellationToken::new()).try_collect().await
    }

    #[tokio::test]
    async fn test_runs_all_four_passes_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("disk.img");
        std::fs::write(&source, b"").unwrap();
        let runner = ddrescue(vec![(0, 10 * GIB, '+')]);
        let plan = ImagingPlan::new("disk", &source, dir.path().join("images"));
        let events = collect(plan.clone(), runner.clone()).await.unwrap();

        let invocations = runner.invocations();
        assert_eq!(invocations.len(), 4);
        assert!(invocations[0].has_arg("--no-scrape"));
        assert!(invocations[2].has_arg("--reverse"));
        assert!(invocations.iter().all(|i| !i.has_arg("--idirect") && !i.elevated));
        assert!(invocations.iter().all(|i| i.has_arg("--force") && i.has_arg("--verbose")));

        let finished: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ImagingEvent::PassFinished(pass) => Some(pass.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(finished.iter().map(|p| p.pass).collect::<Vec<_>>(), PassKind::ALL.to_vec());
        assert!(finished.iter().all(|p| p.remaining_bad == 0 && p.rescued == 10 * GIB));
        for pass in PassKind::ALL {
            assert!(plan.snapshot_path(pass).is_file());
        }
        let Some(ImagingEvent::Complete(result)) = events.last() else { panic!("not complete: {events:?}") };
        assert_eq!(result.summary.pct_rescued(), 100.0);
        assert!(plan.image_path().is_file());

        let overall: Vec<f32> = events
            .iter()
            .filter_map(|e| match e {
                ImagingEvent::Progress { overall, .. } => Some(*overall),
                _ => None,
            })
            .collect();
        assert!(overall.windows(2).all(|w| w[0] <= w[1]), "{overall:?}");
        assert!((overall.last().copied().unwrap_or_default() - 100.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_device_source_uses_direct_io_and_elevation() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ddrescue(vec![(0, GIB, '+')]);
        let plan = ImagingPlan::new("sdb", "/dev/sdb", dir.path()).device(true).ddrescue("/usr/bin/ddrescue");
        collect(plan.clone(), runner.clone()).await.unwrap();
        let invocations = runner.invocations();
        assert!(invocations.iter().all(|i| i.elevated));
        assert!(!invocations[0].has_arg("--idirect"));
        assert!(invocations[1..].iter().all(|i| i.has_arg("--idirect")));
        let map = plan.map_path();
        assert_eq!(
            invocations[3].to_string(),
            format!(
                "/usr/bin/ddrescue --idirect --retry-passes=3 --force --verbose /dev/sdb {} {}",
                plan.image_path().display(),
                map.display()
            )
        );
    }

    #[tokio::test]
    async fn test_failed_open_stops_early() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(|_| {
            Reply::exit(1).with_diagnostics(["ddrescue: Can't open input file: No such file or directory"])
        });
        let plan = ImagingPlan::new("gone", "/dev/gone", dir.path());
        let err = collect(plan, runner.clone()).await.unwrap_err();
        assert_eq!(
            *err,
            ErrorKind::PassFailed { pass: PassKind::FastCopy, outcome: PassOutcome::Failed(1), transient: false }
        );
        assert!(!err.is_retryable());
        assert_eq!(runner.invocations().len(), 1);
    }

    #[tokio::test]
    async fn test_resume_skips_finished_passes() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ddrescue(vec![(0, GIB, '+')]);
        let plan = ImagingPlan::new("disk", "/dev/sdb", dir.path()).resume_from(PassKind::ReverseRetry);
        let events = collect(plan, runner.clone()).await.unwrap();
        assert_eq!(runner.invocations().len(), 2);
        assert!(runner.invocations()[0].has_arg("--reverse"));
        assert_eq!(
            events[0],
            ImagingEvent::Started { id: "disk".into(), passes: vec![PassKind::ReverseRetry, PassKind::Scraping] }
        );
    }

    #[tokio::test]
    async fn test_cancel_mid_pass() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(|_| Reply::hang());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let plan = ImagingPlan::new("disk", "/dev/sdb", dir.path());
        let err = image(plan, runner.clone(), cancel).try_collect::<Vec<_>>().await.unwrap_err();
        assert_eq!(*err, ErrorKind::Cancelled(PassKind::FastCopy));
        assert_eq!(runner.invocations().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_that_cannot_stop_ddrescue() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(|_| Reply::Unstoppable);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let plan = ImagingPlan::new("disk", "/dev/sdb", dir.path());
        let err = image(plan, runner.clone(), cancel).try_collect::<Vec<_>>().await.unwrap_err();
        assert_eq!(*err, ErrorKind::Unstoppable(PassKind::FastCopy));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_refuses_to_overwrite_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("disk.img");
        std::fs::write(&source, b"data").unwrap();
        let runner = ScriptedRunner::succeeding();
        let err = collect(ImagingPlan::new("disk", &source, dir.path()), runner.clone()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::SourceIsImage(_)));
        assert!(runner.invocations().is_empty());
        assert_eq!(std::fs::read(&source).unwrap(), b"data");
    }
}
