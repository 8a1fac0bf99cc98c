use super::{OutputParser, parse_duration, parse_size};
use crate::PassProgress;
use crate::consts::{
    DDRESCUE_BAD_SECTOR, DDRESCUE_CURRENT_RATE, DDRESCUE_FINISHED, DDRESCUE_PCT_RESCUED, DDRESCUE_PHASE,
    DDRESCUE_REMAINING_TIME, DDRESCUE_RESCUED,
};

/// Field labels of the status block that carry nothing we report on their own.
const ABSORBED_LABELS: [&str; 5] = ["ipos:", "opos:", "non-tried:", "time since last successful read", "Current status"];

/// Reassembles ddrescue's multi-line status block into one snapshot.
///
/// ddrescue prints (and, on a terminal, redraws) a block like:
///
/// ```text
///      ipos:    1048 MB, non-trimmed:        0 B,  current rate:  25165 kB/s
///      opos:    1048 MB, non-scraped:        0 B,  average rate:  52428 kB/s
/// non-tried:    9437 MB,  bad-sector:        0 B,    error rate:       0 B/s
///   rescued:    1048 MB,   bad areas:        0,        run time:         20s
/// pct rescued:   10.00%, read errors:        0,  remaining time:      3m 10s
/// ```
///
/// Fields are collected as they arrive; the `pct rescued` line closes the
/// block and produces the snapshot.
#[derive(Default)]
pub struct DdrescueParser {
    pending: PassProgress,
    phase: Option<String>,
    rescued: Option<u64>,
    bad: Option<u64>,
}

impl DdrescueParser {
    fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(phase) = &self.phase {
            parts.push(phase.clone());
        }
        if let Some(rescued) = self.rescued {
            parts.push(format!("rescued {rescued} B"));
        }
        if let Some(bad) = self.bad {
            parts.push(format!("bad {bad} B"));
        }
        parts.join(", ")
    }
}

impl OutputParser for DdrescueParser {
    fn feed(&mut self, line: &str) -> Option<PassProgress> {
        let mut recognised = false;
        if let Some(caps) = DDRESCUE_CURRENT_RATE.captures(line) {
            self.pending.rate_bytes_per_sec = parse_size(&caps[1]);
            recognised = true;
        }
        if let Some(caps) = DDRESCUE_RESCUED.captures(line) {
            self.rescued = parse_size(&caps[1]);
            recognised = true;
        }
        if let Some(caps) = DDRESCUE_BAD_SECTOR.captures(line) {
            self.bad = parse_size(&caps[1]);
            recognised = true;
        }
        if let Some(caps) = DDRESCUE_REMAINING_TIME.captures(line) {
            self.pending.eta = parse_duration(&caps[1]);
            recognised = true;
        }
        if let Some(caps) = DDRESCUE_PCT_RESCUED.captures(line) {
            self.pending.percent = caps[1].parse::<f32>().ok().map(|p| p.clamp(0.0, 100.0));
            self.pending.status = self.describe();
            return Some(self.pending.clone());
        }
        if DDRESCUE_PHASE.is_match(line) || DDRESCUE_FINISHED.is_match(line) {
            self.phase = Some(line.to_string());
            self.pending.status = self.describe();
            return Some(self.pending.clone());
        }
        if recognised || ABSORBED_LABELS.iter().any(|label| line.contains(label)) {
            return None;
        }
        Some(PassProgress::status(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const BLOCK: [&str; 6] = [
        "     ipos:    1048 MB, non-trimmed:        0 B,  current rate:  25165 kB/s",
        "     opos:    1048 MB, non-scraped:        0 B,  average rate:  52428 kB/s",
        "non-tried:    9437 MB,  bad-sector:     4096 B,    error rate:       0 B/s",
        "  rescued:    1048 MB,   bad areas:        1,        run time:         20s",
        "pct rescued:   10.00%, read errors:        2,  remaining time:      3m 10s",
        "                              time since last successful read:         n/a",
    ];

    #[test]
    fn test_status_block_produces_one_snapshot() {
        let mut parser = DdrescueParser::default();
        assert!(parser.feed("Copying non-tried blocks... Pass 1 (forwards)").is_some());
        let snapshots: Vec<_> = BLOCK.iter().filter_map(|line| parser.feed(line.trim())).collect();
        assert_eq!(snapshots.len(), 1);
        let snapshot = &snapshots[0];
        assert_eq!(snapshot.percent, Some(10.0));
        assert_eq!(snapshot.rate_bytes_per_sec, Some(25_165_000));
        assert_eq!(snapshot.eta, Some(Duration::from_secs(190)));
        assert!(snapshot.status.starts_with("Copying non-tried blocks... Pass 1 (forwards)"));
        assert!(snapshot.status.contains("rescued 1048000000 B"));
        assert!(snapshot.status.contains("bad 4096 B"));
    }

    #[test]
    fn test_unknown_lines_surface_as_status() {
        let mut parser = DdrescueParser::default();
        let progress = parser.feed("GNU ddrescue 1.27").unwrap();
        assert_eq!(progress.status, "GNU ddrescue 1.27");
        assert_eq!(progress.percent, None);
    }

    #[test]
    fn test_finished_line() {
        let mut parser = DdrescueParser::default();
        assert_eq!(parser.feed("Finished").unwrap().status, "Finished");
    }
}
