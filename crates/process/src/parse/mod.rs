//! Line-oriented parsers for the external engines' progress output.
//!
//! All knowledge of an engine's text format lives here, behind the
//! [`PassProgress`] contract, so that a format change in ddrescue, PhotoRec or
//! rdfind touches exactly one file. Parsers never fail: a line they do not
//! understand is surfaced as raw status text.

mod ddrescue;
mod photorec;
mod rdfind;
mod units;

use crate::consts::ANSI_ESCAPE;
use crate::{OutputFormat, PassProgress};

pub use self::ddrescue::DdrescueParser;
pub use self::photorec::PhotorecParser;
pub use self::rdfind::RdfindParser;
pub use self::units::{parse_duration, parse_size};

/// Incremental, line-at-a-time parser.
pub trait OutputParser: Send {
    /// Feed one line (already stripped of terminal control sequences).
    ///
    /// Returns a snapshot when the line completes or changes something worth
    /// reporting, `None` when the line was absorbed into pending state.
    fn feed(&mut self, line: &str) -> Option<PassProgress>;
}

/// Surfaces every non-empty line verbatim.
#[derive(Default)]
pub struct PlainParser;
impl OutputParser for PlainParser {
    fn feed(&mut self, line: &str) -> Option<PassProgress> {
        Some(PassProgress::status(line))
    }
}

impl OutputFormat {
    pub fn parser(self) -> Box<dyn OutputParser> {
        match self {
            Self::Ddrescue => Box::new(DdrescueParser::default()),
            Self::Photorec => Box::new(PhotorecParser::default()),
            Self::Rdfind => Box::new(RdfindParser::default()),
            Self::Plain => Box::new(PlainParser),
        }
    }
}

/// Removes terminal control sequences (ddrescue redraws its status block with
/// cursor movement) and surrounding whitespace.
pub fn clean_line(raw: &str) -> String {
    ANSI_ESCAPE.replace_all(raw, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_line_strips_cursor_movement() {
        assert_eq!(clean_line("\x1b[A\x1b[2K  rescued:   1048 MB, "), "rescued:   1048 MB,");
        assert_eq!(clean_line("plain text"), "plain text");
    }

    #[test]
    fn test_plain_parser_echoes() {
        let mut parser = OutputFormat::Plain.parser();
        assert_eq!(parser.feed("Successfully unmounted /dev/sdb1").unwrap().status, "Successfully unmounted /dev/sdb1");
    }
}
