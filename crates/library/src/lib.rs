//! Post-processing of recovered files: sorting them into per-type folders
//! ([`organize`]) and removing byte-identical copies ([`dedup`]).

pub mod dedup;
pub mod error;
pub mod organize;

/// Upper bound on files being placed at the same time.
pub const MAX_PROCESS_CONCURRENCY: usize = 16;
