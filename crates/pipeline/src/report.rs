use crate::error::{Error, ErrorKind, Result};
use crate::job::{Job, JobOptions, Phase};
use datarecovery_imaging::ImageResult;
use datarecovery_library::dedup::DedupReport;
use datarecovery_library::organize::OrganizeReport;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// Why a lane or a job stopped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub phase: Phase,
    pub message: String,
    pub retryable: bool,
    #[serde(skip)]
    pub kind: Option<ErrorKind>,
}

impl Failure {
    pub fn new(phase: Phase, kind: ErrorKind) -> Self {
        Self { phase, message: kind.to_string(), retryable: kind.is_retryable(), kind: Some(kind) }
    }

    pub fn from_error(phase: Phase, error: &Error) -> Self {
        Self::new(phase, (**error).clone())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneStatus {
    Pending,
    /// Mount guard and working-directory checks passed.
    Cleared,
    Imaged,
    Extracted,
    Failed,
    /// The job was cancelled before this lane finished.
    Cancelled,
}

/// Outcome of one source (whole target or partition).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LaneReport {
    pub id: String,
    pub source: PathBuf,
    pub status: LaneStatus,
    pub image: Option<ImageResult>,
    pub extracted_dir: Option<PathBuf>,
    pub extracted_files: Option<u64>,
    pub failure: Option<Failure>,
}

impl LaneReport {
    pub fn new(id: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            status: LaneStatus::Pending,
            image: None,
            extracted_dir: None,
            extracted_files: None,
            failure: None,
        }
    }

    pub fn fail(&mut self, failure: Failure) {
        self.status = LaneStatus::Failed;
        self.failure = Some(failure);
    }
}

/// The archived record of a finished job, also written to `job.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub target: PathBuf,
    pub working_dir: PathBuf,
    pub options: JobOptions,
    /// Always terminal.
    pub phase: Phase,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub lanes: Vec<LaneReport>,
    pub organize: Option<OrganizeReport>,
    pub dedup: Option<DedupReport>,
    pub failure: Option<Failure>,
    /// Everything left on disk for the user: images, extraction output,
    /// organized files, logs.
    pub artifacts: Vec<PathBuf>,
}

impl JobReport {
    pub(crate) fn new(job: &Job, lanes: Vec<LaneReport>) -> Self {
        Self {
            target: job.target.path.clone(),
            working_dir: job.working_dir.clone(),
            options: job.options,
            phase: job.phase(),
            created_at: job.created_at,
            completed_at: job.completed_at,
            lanes,
            organize: None,
            dedup: None,
            failure: None,
            artifacts: Vec::new(),
        }
    }

    /// One human-readable line for the terminal state.
    pub fn summary(&self) -> String {
        let usable = self.lanes.iter().filter(|l| l.status == LaneStatus::Extracted).count();
        match self.phase {
            Phase::Complete => {
                let mut line = format!("Recovery complete: {usable} of {} sources carved", self.lanes.len());
                if let Some(organize) = &self.organize {
                    line.push_str(&format!(", {} files organized", organize.organized()));
                    if organize.discarded > 0 {
                        line.push_str(&format!(", {} corrupted files discarded", organize.discarded));
                    }
                }
                if let Some(dedup) = &self.dedup {
                    line.push_str(&format!(", {} duplicates removed", dedup.duplicates_removed));
                }
                line
            },
            Phase::Cancelled => "Recovery cancelled; partial results kept".to_string(),
            phase => match &self.failure {
                Some(failure) => format!("Recovery failed during {:?}: {}", failure.phase, failure.message),
                None => format!("Recovery stopped in {phase:?}"),
            },
        }
    }

    pub async fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
        tokio::fs::write(path, json).await.or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
        Ok(())
    }

    pub async fn read(path: &Path) -> Result<Self> {
        let json = tokio::fs::read(path).await.or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
        serde_json::from_slice(&json).or_raise(|| ErrorKind::Io(path.to_path_buf()))
    }
}
