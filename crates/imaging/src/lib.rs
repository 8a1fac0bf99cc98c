//! The four-pass ddrescue imaging strategy.
//!
//! A source is imaged by [`image`]: fast copy, direct-I/O retry, reverse
//! retry, then scraping. All passes share one mapfile, so each only touches
//! what the previous ones left bad. A copy of the mapfile is kept after every
//! pass.

pub mod error;
mod mapfile;
mod pass;
mod strategy;

pub use crate::mapfile::{MapSummary, render as render_mapfile};
pub use crate::pass::PassKind;
pub use crate::strategy::{ImagePass, ImageResult, ImagingEvent, ImagingPlan, image};
