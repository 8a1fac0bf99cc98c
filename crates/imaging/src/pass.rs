use derive_more::Display;
use serde::{Deserialize, Serialize};

/// The four ddrescue passes, in the only order they ever run.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    /// Sequential read of everything easy; skips bad areas.
    #[display("pass 1 (fast copy)")]
    FastCopy,
    /// Direct I/O with retries on what the fast copy skipped.
    #[display("pass 2 (direct retry)")]
    DirectRetry,
    /// Same, reading backwards.
    #[display("pass 3 (reverse retry)")]
    ReverseRetry,
    /// Full trim and scrape of whatever is left.
    #[display("pass 4 (scraping)")]
    Scraping,
}

impl PassKind {
    pub const ALL: [PassKind; 4] = [Self::FastCopy, Self::DirectRetry, Self::ReverseRetry, Self::Scraping];

    pub fn number(self) -> u8 {
        match self {
            Self::FastCopy => 1,
            Self::DirectRetry => 2,
            Self::ReverseRetry => 3,
            Self::Scraping => 4,
        }
    }

    pub fn from_number(number: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|pass| pass.number() == number)
    }

    pub fn next(self) -> Option<Self> {
        Self::from_number(self.number() + 1)
    }

    /// Passes from `self` through the last one.
    pub fn remaining(self) -> impl Iterator<Item = Self> {
        Self::ALL.into_iter().filter(move |pass| *pass >= self)
    }

    /// Share of the whole strategy's progress bar. The first pass reads the
    /// entire source; later passes only revisit what is still bad.
    pub fn weight(self) -> f32 {
        match self {
            Self::FastCopy => 0.7,
            _ => 0.1,
        }
    }

    /// Pass-specific ddrescue options. `--idirect` only applies to block
    /// devices; image files have no page cache to bypass worth the trouble.
    pub fn args(self, direct_io: bool) -> Vec<&'static str> {
        let mut args = match self {
            Self::FastCopy => vec!["--no-scrape"],
            Self::DirectRetry => vec!["--idirect", "--retry-passes=3", "--no-scrape"],
            Self::ReverseRetry => vec!["--idirect", "--retry-passes=3", "--reverse"],
            Self::Scraping => vec!["--idirect", "--retry-passes=3"],
        };
        if !direct_io {
            args.retain(|arg| *arg != "--idirect");
        }
        args
    }
}
