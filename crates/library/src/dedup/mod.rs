//! Duplicate removal over the organized tree with rdfind.
//!
//! rdfind is an all-or-nothing step from the job's point of view, but it
//! deletes files as it goes. The tree is counted before and after every run,
//! so whatever rdfind managed to remove is always reported, failure or not.

pub mod error;

use crate::dedup::error::{ErrorKind as DedupErrorKind, Result as DedupResult};
use async_stream::stream;
use datarecovery_process::{CancellationToken, Invocation, OutputFormat, PassOutcome, PassProgress, RunEvent, RunnerHandle};
use exn::ResultExt;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct DedupRequest {
    pub root: PathBuf,
    pub rdfind: PathBuf,
    /// Keep rdfind's results file here; `None` disables it.
    pub results_file: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl DedupRequest {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), rdfind: PathBuf::from("rdfind"), results_file: None, timeout: None }
    }

    pub fn invocation(&self) -> Invocation {
        let invocation = Invocation::new(&self.rdfind, &self.root, OutputFormat::Rdfind)
            .args(["-deleteduplicates", "true"])
            .timeout(self.timeout);
        let invocation = match &self.results_file {
            Some(file) => invocation.arg("-outputname").arg(file),
            None => invocation.args(["-makeresultsfile", "false"]),
        };
        invocation.arg(&self.root)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct DedupReport {
    pub files_scanned: u64,
    pub duplicates_removed: u64,
    pub bytes_reclaimed: u64,
}

/// File count and total size of a tree.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Census {
    pub files: u64,
    pub bytes: u64,
}

impl Census {
    pub async fn take(root: &Path) -> DedupResult<Self> {
        let mut census = Self::default();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e).or_raise(|| DedupErrorKind::Io(dir.clone())),
            };
            while let Some(entry) = entries.next_entry().await.or_raise(|| DedupErrorKind::Io(dir.clone()))? {
                let file_type = entry.file_type().await.or_raise(|| DedupErrorKind::Io(entry.path()))?;
                if file_type.is_dir() {
                    stack.push(entry.path());
                } else if file_type.is_file() {
                    census.files += 1;
                    census.bytes += entry.metadata().await.or_raise(|| DedupErrorKind::Io(entry.path()))?.len();
                }
            }
        }
        Ok(census)
    }

    /// What disappeared between `self` (before) and `after`.
    pub fn report(self, after: Census) -> DedupReport {
        DedupReport {
            files_scanned: self.files,
            duplicates_removed: self.files.saturating_sub(after.files),
            bytes_reclaimed: self.bytes.saturating_sub(after.bytes),
        }
    }
}

/// Events emitted by [`deduplicate`]: [`Started`](Self::Started) with the
/// pre-run census, progress, then [`Complete`](Self::Complete).
#[derive(Clone, Debug, PartialEq)]
pub enum DedupEvent {
    Started(Census),
    Progress(PassProgress),
    Complete(DedupReport),
}

/// Runs rdfind over `request.root`, deleting duplicates in place.
///
/// A failure after rdfind started carries the partial report in its kind
/// (see [`ErrorKind::partial`](error::ErrorKind::partial)).
pub fn deduplicate(
    request: DedupRequest,
    runner: RunnerHandle,
    cancel: CancellationToken,
) -> impl Stream<Item = DedupResult<DedupEvent>> {
    stream!({
        let before = match Census::take(&request.root).await {
            Ok(census) => census,
            Err(e) => {
                yield Err(e);
                return;
            },
        };
        yield Ok(DedupEvent::Started(before));

        let invocation = request.invocation();
        tracing::info!(files = before.files, "Running {invocation}");
        let mut events = runner.run(invocation, cancel.clone());
        let mut outcome = None;
        let mut transient = false;
        while let Some(event) = events.next().await {
            match event {
                Ok(RunEvent::Progress(progress)) => yield Ok(DedupEvent::Progress(progress)),
                Ok(RunEvent::Finished(result)) => {
                    transient = result.is_transient();
                    outcome = Some(result.outcome);
                    break;
                },
                Err(e) => {
                    tracing::warn!(error = %e, "rdfind could not be supervised");
                    break;
                },
            }
        }

        // Count again whatever happened: rdfind may have deleted files before dying.
        let after = match Census::take(&request.root).await {
            Ok(census) => census,
            Err(e) => {
                yield Err(e);
                return;
            },
        };
        let report = before.report(after);
        let failure = match outcome {
            Some(PassOutcome::Success) => None,
            Some(PassOutcome::Cancelled) => Some(DedupErrorKind::Cancelled(report.clone())),
            Some(PassOutcome::TimedOut) => Some(DedupErrorKind::TimedOut(report.clone())),
            Some(outcome) => Some(DedupErrorKind::Failed { outcome, transient, partial: report.clone() }),
            None if report.duplicates_removed > 0 => {
                Some(DedupErrorKind::Failed { outcome: PassOutcome::Signalled, transient: false, partial: report.clone() })
            },
            None => Some(DedupErrorKind::Launch),
        };
        if let Some(kind) = failure {
            tracing::error!(removed = report.duplicates_removed, "Duplicate removal did not finish: {kind}");
            yield Err(exn::Exn::from(kind));
            return;
        }
        tracing::info!(
            scanned = report.files_scanned,
            removed = report.duplicates_removed,
            reclaimed = report.bytes_reclaimed,
            "Duplicate removal complete"
        );
        yield Ok(DedupEvent::Complete(report));
    })
}
