//! The recovery orchestrator.
//!
//! A [`Job`] moves through `Init -> GuardCheck -> Imaging -> Extraction ->
//! Organizing -> [Deduplicating] -> Complete`, or stops in `Cancelled` or
//! `Failed`. [`Orchestrator::start`] runs it on its own task and hands back a
//! [`JobHandle`] for events and commands.
//!
//! Each source (the whole target, and optionally each of its partitions) is a
//! lane. Lanes are processed one after another so a failing drive is never
//! read from twice at once, and a lane that fails only drops that lane.

pub mod error;
mod job;
mod lock;
mod orchestrator;
mod progress;
mod report;

pub use crate::job::{EXTRACTED_DIR, IMAGES_DIR, Job, JobOptions, LOGS_DIR, Lane, RECOVERED_DIR, REPORT_FILE, Phase};
pub use crate::lock::WorkdirLock;
pub use crate::orchestrator::{JobCommand, JobControl, JobEvent, JobHandle, Orchestrator, Settings};
pub use crate::progress::{ProgressAggregator, ProgressEvent};
pub use crate::report::{Failure, JobReport, LaneReport, LaneStatus};
