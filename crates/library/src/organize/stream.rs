use crate::error::{ErrorKind as LibraryErrorKind, Result as LibraryResult};
use crate::organize::error::Result as OrganizeResult;
use crate::organize::file::{Action, OrganizeOptions, organize_file_inner};
use crate::MAX_PROCESS_CONCURRENCY;
use async_stream::stream;
use datarecovery_extract::RecoveredFile;
use futures::stream::FuturesUnordered;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Progress events emitted by [`organize`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started) exactly once, with the number of files.
/// 2. [`Organized`](Self::Organized) once per file.
/// 3. [`Complete`](Self::Complete) exactly once, with the tally.
///
/// The first failure ends the stream; files already moved stay where they are.
#[derive(Clone, Debug, PartialEq)]
pub enum OrganizeEvent {
    Started(u64),
    Organized(Action),
    Complete(OrganizeReport),
}

/// Tally of one organize run.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct OrganizeReport {
    /// Files placed under their own name.
    pub moved: u64,
    /// Files that collided with an existing name and were given a suffix.
    pub collisions: u64,
    /// Corrupted files deleted because they were not to be kept.
    pub discarded: u64,
    pub bytes: u64,
    pub by_category: BTreeMap<String, u64>,
}

impl OrganizeReport {
    pub fn record(&mut self, action: &Action) {
        match action {
            Action::Moved { category, size, .. } => {
                self.moved += 1;
                self.bytes += size;
                *self.by_category.entry(category.clone()).or_default() += 1;
            },
            Action::Disambiguated { category, size, .. } => {
                self.collisions += 1;
                self.bytes += size;
                *self.by_category.entry(category.clone()).or_default() += 1;
            },
            Action::Discarded(_) => self.discarded += 1,
        }
    }

    /// Files now in the destination tree.
    pub fn organized(&self) -> u64 {
        self.moved + self.collisions
    }
}

/// Streams an [`OrganizeEvent`] for each recovered file as it is moved into
/// `<destination>/<category>/`.
///
/// Files are processed concurrently, up to `MAX_PROCESS_CONCURRENCY` at a
/// time. Placement never overwrites, so concurrency cannot lose a file.
pub fn organize(files: Vec<RecoveredFile>, options: OrganizeOptions) -> impl Stream<Item = LibraryResult<OrganizeEvent>> {
    stream! {
        for await event in organize_inner(files, options) {
            yield event.map_err(|e| {
                let kind = LibraryErrorKind::Organize((*e).clone());
                e.raise(kind)
            });
        }
    }
}

fn organize_inner(files: Vec<RecoveredFile>, options: OrganizeOptions) -> impl Stream<Item = OrganizeResult<OrganizeEvent>> {
    stream!({
        // Infallible: a usize (either 32- or 64-bit) will always fit in a u64.
        yield Ok(OrganizeEvent::Started(u64::try_from(files.len()).unwrap_or(0)));

        let mut report = OrganizeReport::default();
        let mut pending = files.into_iter();
        let mut processing = FuturesUnordered::new();
        processing.extend(pending.by_ref().take(MAX_PROCESS_CONCURRENCY).map(|file| organize_file_inner(&options, file)));
        while let Some(result) = processing.next().await {
            match result {
                Ok(action) => {
                    report.record(&action);
                    yield Ok(OrganizeEvent::Organized(action));
                },
                Err(e) => {
                    yield Err(e);
                    return;
                },
            }
            if let Some(file) = pending.next() {
                processing.push(organize_file_inner(&options, file));
            }
        }
        tracing::info!(
            moved = report.moved,
            collisions = report.collisions,
            discarded = report.discarded,
            "Organizing complete"
        );
        yield Ok(OrganizeEvent::Complete(report));
    })
}
