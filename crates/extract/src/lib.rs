//! File carving with PhotoRec and classification of what it recovers.

mod consts;
pub mod error;
mod photorec;
mod probe;
mod recovered;

pub use crate::consts::{CORRUPTED, NO_FILE_TYPE};
pub use crate::photorec::{ExtractEvent, ExtractRequest, Extraction, extract};
pub use crate::probe::has_ext_superblock;
pub use crate::recovered::{RecoveredFile, collect, walk};
