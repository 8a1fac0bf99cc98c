//! Supervision of the external recovery engines (ddrescue, PhotoRec, rdfind)
//! and of the small helper programs around them (unmounting).
//!
//! Callers describe *what* to run with an [`Invocation`]; a [`CommandRunner`]
//! turns it into a stream of [`RunEvent`]s ending in a [`PassResult`]. The
//! runner never decides retry policy: a non-zero exit is a result, not an
//! error.

mod consts;
mod elevate;
pub mod error;
mod invocation;
#[cfg(feature = "mock")]
mod mock;
pub mod parse;
mod progress;
mod runner;
mod tool;

pub use crate::elevate::Elevation;
pub use crate::invocation::{Invocation, OutputFormat};
#[cfg(feature = "mock")]
pub use crate::mock::{Reply, ScriptedRunner};
pub use crate::progress::{PassOutcome, PassProgress, PassResult, RunEvent, SummaryStats};
pub use crate::runner::{CommandRunner, ProcessRunner, RunStream, RunnerHandle, run_to_end};
pub use crate::tool::{Tool, ToolOverrides, Toolchain};
pub use tokio_util::sync::CancellationToken;
