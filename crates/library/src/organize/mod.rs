//! Sorting recovered files into type folders.
//!
//! Each [`RecoveredFile`](datarecovery_extract::RecoveredFile) is moved to
//! `<destination>/<category>/<name>`, where the category is its detected type
//! (`jpg`, `pdf`, ...), `no_file_type`, or `corrupted`. An occupied name is
//! never overwritten: the file gets the first free `<stem>_<n>.<ext>` instead.
//!
//! The primary entry point is [`organize`], which streams the resulting
//! [`Action`]s and finishes with an [`OrganizeReport`].

mod conflict;
pub mod error;
mod file;
mod stream;

pub use self::file::{Action, OrganizeOptions, organize_file};
pub use self::stream::{OrganizeEvent, OrganizeReport, organize};
