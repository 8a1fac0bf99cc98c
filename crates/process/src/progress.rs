use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A point-in-time snapshot derived from one or more lines of engine output.
///
/// Every field except `status` is optional: engines only report what they
/// know, and unparseable lines still produce a snapshot carrying the raw text.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PassProgress {
    /// Completion of the current invocation, `0.0..=100.0`.
    pub percent: Option<f32>,
    pub rate_bytes_per_sec: Option<u64>,
    pub eta: Option<Duration>,
    pub status: String,
}

impl PassProgress {
    pub fn status(status: impl Into<String>) -> Self {
        Self { status: status.into(), ..Self::default() }
    }
}

/// How a child process ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum PassOutcome {
    Success,
    /// Non-zero exit code; the caller owns the retry/continue policy.
    Failed(i32),
    /// Killed by a signal that the runner did not send.
    Signalled,
    Cancelled,
    TimedOut,
}

/// Facts gathered while supervising a child, kept small regardless of how
/// much the engine printed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub lines: u64,
    pub last_progress: Option<PassProgress>,
    /// Tail of stderr (bounded), for diagnostics and transient-failure detection.
    pub diagnostics: Vec<String>,
    pub elapsed: Duration,
}

/// Terminal state of a supervised invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PassResult {
    pub outcome: PassOutcome,
    pub summary: SummaryStats,
}

/// Diagnostic fragments that indicate the failure might go away on its own.
const TRANSIENT_MARKERS: [&str; 3] = ["device or resource busy", "resource temporarily unavailable", "target is busy"];

impl PassResult {
    pub fn is_success(&self) -> bool {
        self.outcome == PassOutcome::Success
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.outcome {
            PassOutcome::Success => Some(0),
            PassOutcome::Failed(code) => Some(code),
            _ => None,
        }
    }

    /// A failure worth retrying once: the engine complained about a busy or
    /// temporarily unavailable device.
    pub fn is_transient(&self) -> bool {
        matches!(self.outcome, PassOutcome::Failed(_) | PassOutcome::Signalled)
            && self.summary.diagnostics.iter().any(|line| {
                let line = line.to_ascii_lowercase();
                TRANSIENT_MARKERS.iter().any(|marker| line.contains(marker))
            })
    }
}

/// Items yielded by a [`RunStream`](crate::RunStream).
///
/// A well-formed stream yields zero or more [`Progress`](Self::Progress)
/// events followed by exactly one [`Finished`](Self::Finished).
#[derive(Clone, Debug, PartialEq)]
pub enum RunEvent {
    Progress(PassProgress),
    Finished(PassResult),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn result(outcome: PassOutcome, diagnostics: &[&str]) -> PassResult {
        PassResult {
            outcome,
            summary: SummaryStats {
                diagnostics: diagnostics.iter().map(|s| s.to_string()).collect(),
                ..SummaryStats::default()
            },
        }
    }

    #[rstest]
    #[case(PassOutcome::Failed(1), &["ddrescue: Can't open input file: Device or resource busy"], true)]
    #[case(PassOutcome::Failed(32), &["umount: /media/usb: target is busy."], true)]
    #[case(PassOutcome::Failed(1), &["ddrescue: Can't open input file: No such file or directory"], false)]
    #[case(PassOutcome::Success, &["Device or resource busy"], false)]
    #[case(PassOutcome::Cancelled, &["Device or resource busy"], false)]
    fn test_transient(#[case] outcome: PassOutcome, #[case] diagnostics: &[&str], #[case] expected: bool) {
        assert_eq!(result(outcome, diagnostics).is_transient(), expected);
    }

    #[test]
    fn test_exit_code() {
        assert_eq!(result(PassOutcome::Success, &[]).exit_code(), Some(0));
        assert_eq!(result(PassOutcome::Failed(2), &[]).exit_code(), Some(2));
        assert_eq!(result(PassOutcome::TimedOut, &[]).exit_code(), None);
    }
}
