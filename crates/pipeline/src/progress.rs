use crate::job::Phase;
use datarecovery_process::PassProgress;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Job-level progress snapshot. Transient; never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: Phase,
    /// Completion of the current phase, never decreasing until the phase changes.
    pub percent: f32,
    pub overall_percent: f32,
    pub rate_bytes_per_sec: Option<u64>,
    pub eta: Option<Duration>,
    pub status: String,
}

/// Turns per-step progress into monotonic phase and job percentages.
///
/// Phases with several lanes report `step` of `steps`; each lane owns an
/// equal slice of the phase.
#[derive(Clone, Debug)]
pub struct ProgressAggregator {
    phase: Phase,
    percent: f32,
    overall: f32,
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self { phase: Phase::Init, percent: 0.0, overall: 0.0 }
    }
}

impl ProgressAggregator {
    pub fn enter(&mut self, phase: Phase) {
        if phase != self.phase {
            self.phase = phase;
            self.percent = 0.0;
            let (start, _) = phase.band();
            if !phase.is_terminal() || phase == Phase::Complete {
                self.overall = self.overall.max(start);
            }
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// `within` is the step's own completion (`0.0..=100.0`).
    pub fn update(&mut self, step: usize, steps: usize, within: f32, progress: &PassProgress) -> ProgressEvent {
        let steps = steps.max(1) as f32;
        let raw = (step as f32 + within.clamp(0.0, 100.0) / 100.0) / steps * 100.0;
        self.advance_to(raw);
        ProgressEvent {
            phase: self.phase,
            percent: self.percent,
            overall_percent: self.overall,
            rate_bytes_per_sec: progress.rate_bytes_per_sec,
            eta: progress.eta,
            status: progress.status.clone(),
        }
    }

    /// A status-only event at the current position.
    pub fn status(&mut self, status: impl Into<String>) -> ProgressEvent {
        let percent = self.percent;
        self.update(0, 1, percent, &PassProgress::status(status))
    }

    fn advance_to(&mut self, raw: f32) {
        self.percent = self.percent.max(raw.clamp(0.0, 100.0));
        let (start, end) = self.phase.band();
        if end > start {
            self.overall = self.overall.max(start + (end - start) * self.percent / 100.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(percent: f32) -> PassProgress {
        PassProgress { percent: Some(percent), ..PassProgress::status("x") }
    }

    #[test]
    fn test_percent_never_decreases_within_phase() {
        let mut progress = ProgressAggregator::default();
        progress.enter(Phase::Imaging);
        assert_eq!(progress.update(0, 1, 40.0, &at(40.0)).percent, 40.0);
        // ddrescue restarts its own percentage on every pass.
        assert_eq!(progress.update(0, 1, 10.0, &at(10.0)).percent, 40.0);
        assert_eq!(progress.update(0, 1, 90.0, &at(90.0)).percent, 90.0);
    }

    #[test]
    fn test_lanes_share_phase() {
        let mut progress = ProgressAggregator::default();
        progress.enter(Phase::Extraction);
        assert_eq!(progress.update(0, 2, 50.0, &at(50.0)).percent, 25.0);
        assert_eq!(progress.update(1, 2, 0.0, &at(0.0)).percent, 50.0);
        assert_eq!(progress.update(1, 2, 100.0, &at(100.0)).percent, 100.0);
    }

    #[test]
    fn test_overall_weights() {
        let mut progress = ProgressAggregator::default();
        progress.enter(Phase::GuardCheck);
        assert_eq!(progress.update(0, 1, 100.0, &at(100.0)).overall_percent, 2.0);
        progress.enter(Phase::Imaging);
        assert_eq!(progress.update(0, 1, 50.0, &at(50.0)).overall_percent, 31.0);
        progress.enter(Phase::Organizing);
        let event = progress.status("sorting");
        assert_eq!(event.percent, 0.0);
        assert_eq!(event.overall_percent, 90.0);
        progress.enter(Phase::Failed);
        assert_eq!(progress.status("failed").overall_percent, 90.0);
        progress.enter(Phase::Complete);
        assert_eq!(progress.status("done").overall_percent, 100.0);
    }
}
