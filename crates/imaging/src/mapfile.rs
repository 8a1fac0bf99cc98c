//! Reading ddrescue mapfiles.
//!
//! ```text
//! # Mapfile. Created by GNU ddrescue version 1.27
//! # current_pos  current_status  current_pass
//! 0x00000000     +               1
//! #      pos        size  status
//! 0x00000000  0x00100000  +
//! 0x00100000  0x00000200  -
//! ```
//!
//! The first data line is the resume position; every following line is a
//! block with one of the statuses below.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Byte counts per block status.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct MapSummary {
    /// `+`
    pub rescued: u64,
    /// `?`
    pub non_tried: u64,
    /// `*`
    pub non_trimmed: u64,
    /// `/`
    pub non_scraped: u64,
    /// `-`
    pub bad_sector: u64,
}

impl MapSummary {
    pub fn total(&self) -> u64 {
        self.rescued + self.remaining()
    }

    /// Bytes not (yet) rescued, whatever their state.
    pub fn remaining(&self) -> u64 {
        self.non_tried + self.non_trimmed + self.non_scraped + self.bad_sector
    }

    pub fn pct_rescued(&self) -> f32 {
        match self.total() {
            0 => 0.0,
            total => (self.rescued as f64 / total as f64 * 100.0) as f32,
        }
    }

    /// Parses mapfile text. Lines that are neither comments nor blocks are an
    /// error: a half-written mapfile must not be mistaken for a clean one.
    pub fn parse(contents: &str) -> Option<Self> {
        let mut summary = Self::default();
        let mut data = contents.lines().map(str::trim).filter(|line| !line.is_empty() && !line.starts_with('#'));
        // Resume position line: "pos status [pass]".
        data.next()?;
        for line in data {
            let mut fields = line.split_ascii_whitespace();
            let _pos = number(fields.next()?)?;
            let size = number(fields.next()?)?;
            let bucket = match fields.next()? {
                "+" => &mut summary.rescued,
                "?" => &mut summary.non_tried,
                "*" => &mut summary.non_trimmed,
                "/" => &mut summary.non_scraped,
                "-" => &mut summary.bad_sector,
                _ => return None,
            };
            *bucket += size;
        }
        Some(summary)
    }

    pub async fn read(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await.or_raise(|| ErrorKind::MapUnreadable(path.to_path_buf()))?;
        match Self::parse(&contents) {
            Some(summary) => Ok(summary),
            None => exn::bail!(ErrorKind::MapUnreadable(path.to_path_buf())),
        }
    }
}

fn number(field: &str) -> Option<u64> {
    match field.strip_prefix("0x").or_else(|| field.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => field.parse().ok(),
    }
}

/// Renders a mapfile. Used to seed tests and by anything that needs to fake
/// a finished ddrescue run.
pub fn render(blocks: &[(u64, u64, char)]) -> String {
    let mut out = String::from("# Mapfile. Created by GNU ddrescue version 1.27\n");
    out.push_str("# current_pos  current_status  current_pass\n0x00000000     +               1\n");
    out.push_str("#      pos        size  status\n");
    for (pos, size, status) in blocks {
        out.push_str(&format!("{pos:#010X}  {size:#010X}  {status}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let contents = render(&[(0, 0x100000, '+'), (0x100000, 0x200, '-'), (0x100200, 0x400, '/'), (0x100600, 0x1000, '?')]);
        let summary = MapSummary::parse(&contents).unwrap();
        assert_eq!(summary.rescued, 0x100000);
        assert_eq!(summary.bad_sector, 0x200);
        assert_eq!(summary.non_scraped, 0x400);
        assert_eq!(summary.non_tried, 0x1000);
        assert_eq!(summary.remaining(), 0x1600);
        assert_eq!(summary.total(), 0x101600);
    }

    #[test]
    fn test_fully_rescued() {
        let summary = MapSummary::parse(&render(&[(0, 10 * 1024 * 1024 * 1024, '+')])).unwrap();
        assert_eq!(summary.pct_rescued(), 100.0);
        assert_eq!(summary.remaining(), 0);
    }

    #[test]
    fn test_rejects_garbage() {
        assert_eq!(MapSummary::parse(""), None);
        assert_eq!(MapSummary::parse("0x0 + 1\n0x0 0x10 X\n"), None);
        assert_eq!(MapSummary::parse("0x0 + 1\n0x0\n"), None);
    }

    #[tokio::test]
    async fn test_read_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = MapSummary::read(&dir.path().join("nope.map")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::MapUnreadable(_)));
    }
}
