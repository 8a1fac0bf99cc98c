use super::OutputParser;
use crate::PassProgress;
use crate::consts::{RDFIND_DELETED, RDFIND_NOT_UNIQUE, RDFIND_TOTAL};

/// rdfind prints no percentages, only a fixed sequence of steps. Each known
/// step maps to a fixed position on the progress bar.
const STEPS: [(&str, f32); 8] = [
    ("Now scanning", 5.0),
    ("Now have", 15.0),
    ("due to unique sizes", 30.0),
    ("based on first bytes", 45.0),
    ("based on last bytes", 60.0),
    ("checksum", 75.0),
    ("It seems like you have", 85.0),
    ("Now deleting duplicates", 95.0),
];

#[derive(Default)]
pub struct RdfindParser {
    percent: f32,
}

impl OutputParser for RdfindParser {
    fn feed(&mut self, line: &str) -> Option<PassProgress> {
        let step = STEPS.iter().find(|(marker, _)| line.contains(marker)).map(|(_, percent)| *percent);
        let status = if let Some(caps) = RDFIND_TOTAL.captures(line) {
            format!("{} files to compare", &caps[1])
        } else if let Some(caps) = RDFIND_NOT_UNIQUE.captures(line) {
            format!("{} files are not unique", &caps[1])
        } else if let Some(caps) = RDFIND_DELETED.captures(line) {
            self.percent = 100.0;
            format!("deleted {} duplicates", &caps[1])
        } else {
            line.to_string()
        };
        if let Some(step) = step {
            self.percent = self.percent.max(step);
        }
        Some(PassProgress { percent: Some(self.percent), status, ..PassProgress::default() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_are_monotonic() {
        let mut parser = RdfindParser::default();
        let lines = [
            "Now scanning \"/work/recovered\", found 12 files.",
            "Now have 12 files in total.",
            "Removed 3 files due to unique sizes from list.9 files left.",
            "Now eliminating candidates based on first bytes:removed 2 files from list.7 files left.",
            "Now eliminating candidates based on last bytes:removed 0 files from list.7 files left.",
            "Now eliminating candidates based on sha1 checksum:removed 0 files from list.7 files left.",
            "It seems like you have 7 files that are not unique",
            "Now deleting duplicates:",
            "Deleted 4 files.",
        ];
        let mut last = 0.0;
        for line in lines {
            let progress = parser.feed(line).unwrap();
            let percent = progress.percent.unwrap();
            assert!(percent >= last, "{line}: {percent} < {last}");
            last = percent;
        }
        assert_eq!(last, 100.0);
        assert_eq!(parser.feed("Deleted 4 files.").unwrap().status, "deleted 4 duplicates");
    }
}
