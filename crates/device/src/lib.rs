//! Recovery targets and the checks that must pass before anything reads from
//! one: mount safety and scratch space.

pub mod error;
mod guard;
mod mounts;
mod space;
mod target;

pub use crate::guard::{ConstituentState, MountGuard, MountReport, MountState, UnmountCommand};
pub use crate::mounts::{
    CRITICAL_MOUNT_POINTS, MountEntry, MountTable, MountTableHandle, PROC_MOUNTS, ProcMountTable, StaticMountTable,
    parse_mounts,
};
pub use crate::space::{FixedSpace, SpaceProbe, SpaceProbeHandle, Statvfs};
pub use crate::target::{Partition, SYSFS_BLOCK, Target, TargetKind};
