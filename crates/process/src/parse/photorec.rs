use super::{OutputParser, parse_duration};
use crate::PassProgress;
use crate::consts::{PHOTOREC_ESTIMATE, PHOTOREC_SECTOR};

/// PhotoRec in `/cmd` mode reports sector position and files found per pass:
///
/// ```text
/// Pass 1 - Reading sector    1232896/20971520, 312 files found
/// Elapsed time 0h00m12s - Estimated time to completion 0h03m13
/// ```
#[derive(Default)]
pub struct PhotorecParser {
    eta: Option<std::time::Duration>,
}

impl OutputParser for PhotorecParser {
    fn feed(&mut self, line: &str) -> Option<PassProgress> {
        if let Some(caps) = PHOTOREC_ESTIMATE.captures(line) {
            self.eta = parse_duration(&caps[1]);
            return None;
        }
        let Some(caps) = PHOTOREC_SECTOR.captures(line) else {
            return Some(PassProgress::status(line));
        };
        let current: f64 = caps[2].parse().ok()?;
        let total: f64 = caps[3].parse().ok()?;
        let percent = if total > 0.0 { Some(((current / total) * 100.0).clamp(0.0, 100.0) as f32) } else { None };
        let status = match caps.get(4) {
            Some(found) => format!("pass {}: {} files found", &caps[1], found.as_str()),
            None => format!("pass {}", &caps[1]),
        };
        Some(PassProgress { percent, rate_bytes_per_sec: None, eta: self.eta, status })
    }
}
