use regex::Regex;
use std::sync::LazyLock;

const SIZE: &str = r"(\d+(?:\.\d+)?\s*[kKMGTP]?i?B)";

macro_rules! regex {
    ($name:ident, $regex:expr) => {
        pub(crate) static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($regex).unwrap());
    };
}

// Cursor movement and line clearing; ddrescue redraws its status block in place.
regex!(ANSI_ESCAPE, r"\x1b(?:\[[0-9;?]*[ -/]*[@-~]|[@-Z\\-_])");

// ddrescue status screen (`--verbose`).
regex!(DDRESCUE_PCT_RESCUED, r"pct rescued:\s*(\d+(?:\.\d+)?)%");
regex!(DDRESCUE_CURRENT_RATE, format!(r"current rate:\s*{SIZE}/s").as_str());
regex!(DDRESCUE_REMAINING_TIME, r"remaining time:\s*([\dhmsd ]+|n/a)");
regex!(DDRESCUE_RESCUED, format!(r"(?:^|,\s*)rescued:\s*{SIZE}").as_str());
regex!(DDRESCUE_BAD_SECTOR, format!(r"bad-sector:\s*{SIZE}").as_str());
regex!(DDRESCUE_PHASE, r"^(Copying|Trimming|Scraping|Retrying|Reading)\b.*");
regex!(DDRESCUE_FINISHED, r"^(Finished|Interrupted by user)");

// PhotoRec `/cmd` mode.
regex!(PHOTOREC_SECTOR, r"Pass\s+(\d+)\s+-\s+Reading sector\s+(\d+)/(\d+)(?:,\s*(\d+)\s+files?\s+found)?");
regex!(PHOTOREC_ESTIMATE, r"Estimated time to completion\s+(\d+h\d+m\d+s?)");

// rdfind's fixed, step-by-step narration.
regex!(RDFIND_TOTAL, r"Now have (\d+) files in total");
regex!(RDFIND_NOT_UNIQUE, r"It seems like you have (\d+) files that are not unique");
regex!(RDFIND_DELETED, r"Deleted (\d+) files");
