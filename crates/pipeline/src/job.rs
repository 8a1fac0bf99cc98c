use crate::error::{ErrorKind, Result};
use datarecovery_device::{Target, TargetKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

pub const IMAGES_DIR: &str = "images";
pub const EXTRACTED_DIR: &str = "extracted";
pub const RECOVERED_DIR: &str = "recovered";
pub const LOGS_DIR: &str = "logs";
pub const REPORT_FILE: &str = "job.json";
pub const LOCK_FILE: &str = ".datarecovery.lock";

/// Where a job is in its life.
///
/// ```text
/// Init -> GuardCheck -> Imaging -> Extraction -> Organizing -> [Deduplicating] -> Complete
/// ```
/// `Cancelled` and `Failed` can be reached from any non-terminal phase.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    GuardCheck,
    Imaging,
    Extraction,
    Organizing,
    Deduplicating,
    Complete,
    Cancelled,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled | Self::Failed)
    }

    pub fn can_advance_to(self, to: Phase) -> bool {
        use Phase::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, to),
            (_, Cancelled | Failed)
                | (Init, GuardCheck)
                | (GuardCheck, Imaging)
                | (Imaging, Extraction)
                | (Extraction, Organizing)
                | (Organizing, Deduplicating | Complete)
                | (Deduplicating, Complete)
        )
    }

    /// Share of overall job progress owned by this phase, in percent.
    pub fn band(self) -> (f32, f32) {
        match self {
            Self::Init => (0.0, 0.0),
            Self::GuardCheck => (0.0, 2.0),
            Self::Imaging => (2.0, 60.0),
            Self::Extraction => (60.0, 90.0),
            Self::Organizing => (90.0, 97.0),
            Self::Deduplicating => (97.0, 100.0),
            Self::Complete => (100.0, 100.0),
            // Terminal failures freeze overall progress where it was.
            Self::Cancelled | Self::Failed => (0.0, 0.0),
        }
    }
}

/// The user's choices for one job.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Keep `images/` after a successful run.
    pub save_images: bool,
    pub detailed_logging: bool,
    pub remove_duplicates: bool,
    /// Organize corrupted files into `recovered/corrupted/` instead of deleting them.
    pub keep_corrupted: bool,
    /// Image every partition on its own as well as the whole device.
    pub scan_partitions: bool,
    pub auto_unmount: bool,
}

/// One source imaged on its own: the whole target, or one of its partitions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Lane {
    pub id: String,
    pub source: PathBuf,
    pub size: u64,
    pub device: bool,
}

impl Lane {
    /// The slice of the target the guard must clear before this lane is imaged.
    pub fn guarded(&self, target: &Target) -> Target {
        if self.source == target.path {
            target.clone()
        } else {
            Target::device(&self.source, self.size, Vec::new())
        }
    }
}

/// One end-to-end recovery run, owned by the orchestrator.
#[derive(Clone, Debug)]
pub struct Job {
    pub target: Target,
    pub options: JobOptions,
    pub working_dir: PathBuf,
    pub created_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
    phase: Phase,
}

impl Job {
    pub fn new(target: Target, working_dir: impl Into<PathBuf>, options: JobOptions) -> Self {
        Self {
            target,
            options,
            working_dir: working_dir.into(),
            created_at: OffsetDateTime::now_utc(),
            completed_at: None,
            phase: Phase::Init,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn advance(&mut self, to: Phase) -> Result<()> {
        if !self.phase.can_advance_to(to) {
            exn::bail!(ErrorKind::InvalidTransition { from: self.phase, to });
        }
        tracing::debug!(from = ?self.phase, to = ?to, "Phase transition");
        self.phase = to;
        if to.is_terminal() {
            self.completed_at = Some(OffsetDateTime::now_utc());
        }
        Ok(())
    }

    /// The whole target first, then (when asked for, and only for devices)
    /// each partition. Lanes run one after another.
    pub fn lanes(&self) -> Vec<Lane> {
        let target = &self.target;
        let mut lanes = vec![Lane {
            id: target.id(),
            source: target.path.clone(),
            size: target.size,
            device: target.kind == TargetKind::Device,
        }];
        if self.options.scan_partitions && target.is_device() {
            lanes.extend(target.partitions.iter().map(|partition| Lane {
                id: partition.id(),
                source: partition.path.clone(),
                size: partition.size,
                device: true,
            }));
        }
        lanes
    }

    pub fn images_dir(&self) -> PathBuf {
        self.working_dir.join(IMAGES_DIR)
    }

    pub fn extracted_dir(&self) -> PathBuf {
        self.working_dir.join(EXTRACTED_DIR)
    }

    pub fn recovered_dir(&self) -> PathBuf {
        self.working_dir.join(RECOVERED_DIR)
    }

    /// Only used when detailed logging is on.
    pub fn logs_dir(&self) -> Option<PathBuf> {
        self.options.detailed_logging.then(|| self.working_dir.join(LOGS_DIR))
    }

    pub fn report_path(&self) -> PathBuf {
        self.working_dir.join(REPORT_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        lock_path(&self.working_dir)
    }
}

pub fn lock_path(working_dir: &Path) -> PathBuf {
    working_dir.join(LOCK_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use datarecovery_device::Partition;
    use rstest::rstest;

    fn device() -> Target {
        Target::device(
            "/dev/sdb",
            2048,
            vec![Partition { path: "/dev/sdb1".into(), size: 1024 }, Partition { path: "/dev/sdb2".into(), size: 1024 }],
        )
    }

    #[rstest]
    #[case(Phase::Init, Phase::GuardCheck, true)]
    #[case(Phase::Init, Phase::Imaging, false)]
    #[case(Phase::Organizing, Phase::Complete, true)]
    #[case(Phase::Organizing, Phase::Deduplicating, true)]
    #[case(Phase::Deduplicating, Phase::Organizing, false)]
    #[case(Phase::Imaging, Phase::Cancelled, true)]
    #[case(Phase::Extraction, Phase::Failed, true)]
    #[case(Phase::Cancelled, Phase::Failed, false)]
    #[case(Phase::Complete, Phase::Imaging, false)]
    fn test_transitions(#[case] from: Phase, #[case] to: Phase, #[case] allowed: bool) {
        assert_eq!(from.can_advance_to(to), allowed);
    }

    #[test]
    fn test_advance_rejects_skips() {
        let mut job = Job::new(Target::image("/tmp/disk.img", 10), "/tmp/work", JobOptions::default());
        let err = job.advance(Phase::Imaging).unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidTransition { from: Phase::Init, to: Phase::Imaging });
        job.advance(Phase::GuardCheck).unwrap();
        job.advance(Phase::Cancelled).unwrap();
        assert!(job.completed_at.is_some());
        assert!(job.advance(Phase::Failed).is_err());
    }

    #[test]
    fn test_lanes() {
        let job = Job::new(device(), "/w", JobOptions::default());
        assert_eq!(job.lanes().iter().map(|l| l.id.as_str()).collect::<Vec<_>>(), ["sdb"]);

        let job = Job::new(device(), "/w", JobOptions { scan_partitions: true, ..JobOptions::default() });
        let lanes = job.lanes();
        assert_eq!(lanes.iter().map(|l| l.id.as_str()).collect::<Vec<_>>(), ["sdb", "sdb1", "sdb2"]);
        assert_eq!(lanes.iter().map(|l| l.size).sum::<u64>(), 4096);
        assert_eq!(lanes[0].guarded(&job.target).partitions.len(), 2);
        assert_eq!(lanes[1].guarded(&job.target).path, PathBuf::from("/dev/sdb1"));

        // Image files have no partitions to split out.
        let job = Job::new(Target::image("/tmp/disk.img", 10), "/w", JobOptions { scan_partitions: true, ..JobOptions::default() });
        assert_eq!(job.lanes().len(), 1);
        assert!(!job.lanes()[0].device);
    }
}
