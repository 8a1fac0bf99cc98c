use crate::error::{ErrorKind, Result};
use crate::mounts::{MountEntry, MountTableHandle};
use crate::target::Target;
use datarecovery_process::{CancellationToken, Invocation, OutputFormat, RunnerHandle, run_to_end};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::instrument;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MountState {
    Unmounted,
    /// Mounted somewhere we are allowed to unmount.
    MountedSafe { mount_points: Vec<PathBuf> },
    /// Mounted on a system path; never unmounted automatically.
    MountedBusy { mount_points: Vec<PathBuf> },
}

impl MountState {
    fn classify(mounts: Vec<&MountEntry>) -> Self {
        if mounts.is_empty() {
            return Self::Unmounted;
        }
        let busy = mounts.iter().any(|m| m.is_critical());
        let mount_points = mounts.into_iter().map(|m| m.mount_point.clone()).collect();
        if busy { Self::MountedBusy { mount_points } } else { Self::MountedSafe { mount_points } }
    }

    pub fn mount_points(&self) -> &[PathBuf] {
        match self {
            Self::Unmounted => &[],
            Self::MountedSafe { mount_points } | Self::MountedBusy { mount_points } => mount_points,
        }
    }

    pub fn is_mounted(&self) -> bool {
        !matches!(self, Self::Unmounted)
    }
}

/// Mount state of one constituent (the target itself or a partition).
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConstituentState {
    pub path: PathBuf,
    pub state: MountState,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct MountReport {
    pub constituents: Vec<ConstituentState>,
}

impl MountReport {
    pub fn is_clear(&self) -> bool {
        self.constituents.iter().all(|c| !c.state.is_mounted())
    }

    pub fn mount_points(&self) -> Vec<PathBuf> {
        self.constituents.iter().flat_map(|c| c.state.mount_points().iter().cloned()).collect()
    }

    pub fn mounted(&self) -> impl Iterator<Item = &ConstituentState> {
        self.constituents.iter().filter(|c| c.state.is_mounted())
    }
}

/// How to unmount one constituent: `<program> <args...> <device>`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct UnmountCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub elevated: bool,
}

impl Default for UnmountCommand {
    fn default() -> Self {
        Self { program: PathBuf::from("udisksctl"), args: vec!["unmount".to_string(), "-b".to_string()], elevated: false }
    }
}

/// Decides whether a target may be written from, and makes it so if allowed.
///
/// The guard only ever touches mounts whose source is a constituent of the
/// target; anything else in the mount table is ignored.
#[derive(Clone, Debug)]
pub struct MountGuard {
    mounts: MountTableHandle,
    runner: RunnerHandle,
    unmount: UnmountCommand,
}

impl MountGuard {
    pub fn new(mounts: MountTableHandle, runner: RunnerHandle, unmount: UnmountCommand) -> Self {
        Self { mounts, runner, unmount }
    }

    /// Current mount state of every constituent. Image targets are checked
    /// too: a loop-mounted image is matched through its loop device's
    /// backing file.
    pub async fn inspect(&self, target: &Target) -> Result<MountReport> {
        let entries = self.mounts.entries().await?;
        Ok(report_for(target, &entries))
    }

    /// Succeeds only once nothing belonging to `target` is mounted.
    ///
    /// Calling this on an already-unmounted target does nothing.
    #[instrument(skip(self, target, cancel), fields(target = %target.path.display()))]
    pub async fn ensure_safe(&self, target: &Target, auto_unmount: bool, cancel: &CancellationToken) -> Result<()> {
        let entries = self.mounts.entries().await?;
        let report = report_for(target, &entries);
        if report.is_clear() {
            tracing::debug!("Target is not mounted");
            return Ok(());
        }
        if !auto_unmount {
            let mount_points = report.mount_points();
            tracing::warn!(?mount_points, "Refusing to image a mounted target");
            exn::bail!(ErrorKind::MountedRefused { mount_points });
        }
        for constituent in report.mounted() {
            if let MountState::MountedBusy { mount_points } = &constituent.state {
                tracing::error!(device = %constituent.path.display(), ?mount_points, "System mount; not unmounting");
                exn::bail!(ErrorKind::UnmountFailed(constituent.path.clone()));
            }
        }
        for constituent in report.mounted() {
            // An image is unmounted through the loop devices it backs.
            let mut devices: Vec<&Path> =
                entries.iter().filter(|e| e.is_from(&constituent.path)).map(|e| e.source.as_path()).collect();
            devices.dedup();
            for device in devices {
                self.unmount_one(device, cancel).await?;
            }
        }
        // The unmount helper's exit code is not the last word.
        let after = self.inspect(target).await?;
        if let Some(still) = after.mounted().next() {
            tracing::error!(device = %still.path.display(), "Still mounted after unmount");
            exn::bail!(ErrorKind::UnmountFailed(still.path.clone()));
        }
        tracing::info!("Target unmounted");
        Ok(())
    }

    async fn unmount_one(&self, device: &Path, cancel: &CancellationToken) -> Result<()> {
        let invocation = Invocation::new(&self.unmount.program, "/", OutputFormat::Plain)
            .args(&self.unmount.args)
            .arg(device)
            .elevated(self.unmount.elevated);
        for attempt in 1..=2 {
            let stream = self.runner.run(invocation.clone(), cancel.clone());
            let result = run_to_end(stream, |p| tracing::debug!(status = %p.status, "unmount"))
                .await
                .or_raise(|| ErrorKind::UnmountFailed(device.to_path_buf()))?;
            if result.is_success() {
                return Ok(());
            }
            if attempt == 1 && result.is_transient() {
                tracing::info!(device = %device.display(), "Unmount reported busy; retrying once");
                continue;
            }
            tracing::warn!(device = %device.display(), outcome = ?result.outcome, diagnostics = ?result.summary.diagnostics, "Unmount failed");
            break;
        }
        exn::bail!(ErrorKind::UnmountFailed(device.to_path_buf()))
    }

    /// The working directory must not be on the device being recovered.
    ///
    /// Relative paths are resolved against the current directory, and an
    /// existing directory through its symlinks, since mount points are listed
    /// as canonical absolute paths.
    pub async fn ensure_workdir_off(&self, target: &Target, working_dir: &Path) -> Result<()> {
        let working_dir = match tokio::fs::canonicalize(working_dir).await {
            Ok(resolved) => resolved,
            Err(_) => std::path::absolute(working_dir).or_raise(|| ErrorKind::probe(working_dir))?,
        };
        if let Some(entry) = self.mounts.containing(&working_dir).await?
            && target.constituents().any(|c| entry.is_from(c))
        {
            exn::bail!(ErrorKind::WorkspaceOnTarget(entry.source));
        }
        Ok(())
    }
}

fn report_for(target: &Target, entries: &[MountEntry]) -> MountReport {
    let constituents = target
        .constituents()
        .map(|path| ConstituentState {
            path: path.to_path_buf(),
            state: MountState::classify(entries.iter().filter(|e| e.is_from(path)).collect()),
        })
        .collect();
    MountReport { constituents }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mounts::{MountTable, StaticMountTable};
    use crate::target::Partition;
    use datarecovery_process::{Reply, ScriptedRunner};
    use std::sync::Arc;

    fn device() -> Target {
        Target::device(
            "/dev/sdb",
            2048,
            vec![Partition { path: "/dev/sdb1".into(), size: 1024 }, Partition { path: "/dev/sdb2".into(), size: 1024 }],
        )
    }

    fn table() -> Arc<StaticMountTable> {
        StaticMountTable::new([
            MountEntry::new("/dev/nvme0n1p2", "/", "ext4"),
            MountEntry::new("/dev/sdb1", "/media/usb", "vfat"),
            MountEntry::new("/dev/sdc1", "/media/other", "vfat"),
        ])
    }

    /// A runner whose unmount removes the entry, like the real helper would.
    fn unmounting(table: &Arc<StaticMountTable>) -> Arc<ScriptedRunner> {
        let table = table.clone();
        ScriptedRunner::new(move |invocation| {
            if let Some(device) = invocation.args.last() {
                table.remove(Path::new(device));
            }
            Reply::success()
        })
    }

    #[tokio::test]
    async fn test_inspect() {
        let table = table();
        let guard = MountGuard::new(table.clone(), ScriptedRunner::succeeding(), UnmountCommand::default());
        let report = guard.inspect(&device()).await.unwrap();
        assert_eq!(report.constituents.len(), 3);
        assert_eq!(report.constituents[0].state, MountState::Unmounted);
        assert_eq!(report.constituents[1].state, MountState::MountedSafe { mount_points: vec!["/media/usb".into()] });
        assert_eq!(report.constituents[2].state, MountState::Unmounted);
        assert_eq!(report.mount_points(), vec![PathBuf::from("/media/usb")]);
    }

    #[tokio::test]
    async fn test_refuses_without_auto_unmount_and_spawns_nothing() {
        let table = table();
        let runner = ScriptedRunner::succeeding();
        let guard = MountGuard::new(table.clone(), runner.clone(), UnmountCommand::default());
        let err = guard.ensure_safe(&device(), false, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(*err, ErrorKind::MountedRefused { mount_points: vec!["/media/usb".into()] });
        assert!(runner.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_auto_unmount_touches_only_the_target() {
        let table = table();
        let runner = unmounting(&table);
        let guard = MountGuard::new(table.clone(), runner.clone(), UnmountCommand::default());
        guard.ensure_safe(&device(), true, &CancellationToken::new()).await.unwrap();
        let invocations = runner.invocations();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].to_string(), "udisksctl unmount -b /dev/sdb1");
        let remaining: Vec<_> = table.entries().await.unwrap().into_iter().map(|e| e.source).collect();
        assert_eq!(remaining, vec![PathBuf::from("/dev/nvme0n1p2"), PathBuf::from("/dev/sdc1")]);

        // Idempotent: nothing left to do.
        guard.ensure_safe(&device(), true, &CancellationToken::new()).await.unwrap();
        assert_eq!(runner.invocations().len(), 1);
    }

    #[tokio::test]
    async fn test_loop_mounted_image_is_unmounted_through_its_loop_device() {
        let table = StaticMountTable::new([
            MountEntry::new("/dev/nvme0n1p2", "/", "ext4"),
            MountEntry::new("/dev/loop3", "/mnt/camera", "vfat").backed_by("/data/camera.dd"),
        ]);
        let runner = unmounting(&table);
        let guard = MountGuard::new(table.clone(), runner.clone(), UnmountCommand::default());
        let image = Target::image("/data/camera.dd", 4096);

        let report = guard.inspect(&image).await.unwrap();
        assert_eq!(report.constituents[0].state, MountState::MountedSafe { mount_points: vec!["/mnt/camera".into()] });
        let err = guard.ensure_safe(&image, false, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(*err, ErrorKind::MountedRefused { mount_points: vec!["/mnt/camera".into()] });

        guard.ensure_safe(&image, true, &CancellationToken::new()).await.unwrap();
        assert_eq!(runner.invocations()[0].to_string(), "udisksctl unmount -b /dev/loop3");
        assert!(guard.inspect(&image).await.unwrap().is_clear());
    }

    #[tokio::test]
    async fn test_failed_unmount_is_reported() {
        let table = table();
        let runner = ScriptedRunner::new(|_| Reply::exit(1).with_diagnostics(["Error unmounting /dev/sdb1: target is busy"]));
        let guard = MountGuard::new(table, runner.clone(), UnmountCommand::default());
        let err = guard.ensure_safe(&device(), true, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(*err, ErrorKind::UnmountFailed("/dev/sdb1".into()));
        // Busy is transient: one retry.
        assert_eq!(runner.invocations().len(), 2);
    }

    #[tokio::test]
    async fn test_helper_success_but_still_mounted() {
        let table = table();
        let guard = MountGuard::new(table, ScriptedRunner::succeeding(), UnmountCommand::default());
        let err = guard.ensure_safe(&device(), true, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(*err, ErrorKind::UnmountFailed("/dev/sdb1".into()));
    }

    #[tokio::test]
    async fn test_critical_mount_never_unmounted() {
        let table = StaticMountTable::new([MountEntry::new("/dev/sdb2", "/home", "ext4")]);
        let runner = ScriptedRunner::succeeding();
        let guard = MountGuard::new(table, runner.clone(), UnmountCommand::default());
        let report = guard.inspect(&device()).await.unwrap();
        assert_eq!(report.constituents[2].state, MountState::MountedBusy { mount_points: vec!["/home".into()] });
        let err = guard.ensure_safe(&device(), true, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(*err, ErrorKind::UnmountFailed("/dev/sdb2".into()));
        assert!(runner.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_workdir_on_target() {
        let table = table();
        let guard = MountGuard::new(table, ScriptedRunner::succeeding(), UnmountCommand::default());
        let err = guard.ensure_workdir_off(&device(), Path::new("/media/usb/recovery")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::WorkspaceOnTarget("/dev/sdb1".into()));
        guard.ensure_workdir_off(&device(), Path::new("/media/other/recovery")).await.unwrap();
        guard.ensure_workdir_off(&device(), Path::new("/srv/recovery")).await.unwrap();
    }

    #[tokio::test]
    async fn test_relative_workdir_on_target() {
        let cwd = std::env::current_dir().unwrap();
        let table = StaticMountTable::new([
            MountEntry::new("/dev/nvme0n1p2", "/", "ext4"),
            MountEntry::new("/dev/sdb1", cwd.clone(), "vfat"),
        ]);
        let guard = MountGuard::new(table, ScriptedRunner::succeeding(), UnmountCommand::default());
        let err = guard.ensure_workdir_off(&device(), Path::new("workdir-not-yet-created")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::WorkspaceOnTarget("/dev/sdb1".into()));
    }
}
