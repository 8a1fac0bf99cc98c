//! Scripted runner for tests in this and dependent crates.

use crate::error::ErrorKind;
use crate::{CommandRunner, Invocation, PassOutcome, PassResult, RunEvent, RunStream, RunnerHandle, SummaryStats};
use async_stream::stream;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// What a scripted "process" does.
#[derive(Clone, Debug)]
pub enum Reply {
    /// Print `lines` (stdout) and `diagnostics` (stderr), then exit with `code`.
    Exit { lines: Vec<String>, diagnostics: Vec<String>, code: i32 },
    /// Print `lines`, then run until cancelled.
    Hang { lines: Vec<String> },
    /// Runs until cancelled, then cannot be stopped.
    Unstoppable,
    /// The program cannot be started.
    SpawnError,
}

impl Reply {
    pub fn success() -> Self {
        Self::exit(0)
    }

    pub fn exit(code: i32) -> Self {
        Self::Exit { lines: Vec::new(), diagnostics: Vec::new(), code }
    }

    pub fn hang() -> Self {
        Self::Hang { lines: Vec::new() }
    }

    pub fn with_lines<I: IntoIterator<Item = S>, S: Into<String>>(mut self, new: I) -> Self {
        match &mut self {
            Self::Exit { lines, .. } | Self::Hang { lines } => lines.extend(new.into_iter().map(Into::into)),
            Self::Unstoppable | Self::SpawnError => {},
        }
        self
    }

    pub fn with_diagnostics<I: IntoIterator<Item = S>, S: Into<String>>(mut self, new: I) -> Self {
        if let Self::Exit { diagnostics, .. } = &mut self {
            diagnostics.extend(new.into_iter().map(Into::into));
        }
        self
    }
}

type Script = dyn Fn(&Invocation) -> Reply + Send + Sync;

/// Records every invocation and answers with the script's [`Reply`].
///
/// The script runs when [`CommandRunner::run`] is called, so it may create
/// files the real engine would have produced.
pub struct ScriptedRunner {
    invocations: Mutex<Vec<Invocation>>,
    script: Box<Script>,
}

impl std::fmt::Debug for ScriptedRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedRunner").field("invocations", &self.invocations).finish_non_exhaustive()
    }
}

impl ScriptedRunner {
    pub fn new(script: impl Fn(&Invocation) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self { invocations: Mutex::new(Vec::new()), script: Box::new(script) })
    }

    /// Every program exits 0 without output.
    pub fn succeeding() -> Arc<Self> {
        Self::new(|_| Reply::success())
    }

    pub fn handle(self: &Arc<Self>) -> RunnerHandle {
        self.clone()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().map(|i| i.clone()).unwrap_or_default()
    }

    /// Program names in invocation order.
    pub fn programs(&self) -> Vec<String> {
        self.invocations().iter().map(|i| i.program_name().to_string()).collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, invocation: Invocation, cancel: CancellationToken) -> RunStream {
        if let Ok(mut invocations) = self.invocations.lock() {
            invocations.push(invocation.clone());
        }
        let reply = (self.script)(&invocation);
        Box::pin(stream! {
            let mut parser = invocation.format.parser();
            let mut summary = SummaryStats::default();
            let (lines, diagnostics, end) = match reply {
                Reply::SpawnError => {
                    yield Err(exn::Exn::from(ErrorKind::Spawn(invocation.program.clone())));
                    return;
                },
                Reply::Unstoppable => {
                    cancel.cancelled().await;
                    yield Err(exn::Exn::from(ErrorKind::Unstoppable(invocation.program.clone())));
                    return;
                },
                Reply::Exit { lines, diagnostics, code } => (lines, diagnostics, Some(code)),
                Reply::Hang { lines } => (lines, Vec::new(), None),
            };
            for line in lines.iter().chain(diagnostics.iter()) {
                summary.lines += 1;
                if let Some(progress) = parser.feed(line) {
                    summary.last_progress = Some(progress.clone());
                    yield Ok(RunEvent::Progress(progress));
                }
            }
            summary.diagnostics = diagnostics;
            let outcome = match end {
                Some(0) => PassOutcome::Success,
                Some(code) if !cancel.is_cancelled() => PassOutcome::Failed(code),
                _ => {
                    cancel.cancelled().await;
                    PassOutcome::Cancelled
                },
            };
            yield Ok(RunEvent::Finished(PassResult { outcome, summary }));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OutputFormat, run_to_end};
    use std::time::Duration;

    #[tokio::test]
    async fn test_records_and_replays() {
        let runner = ScriptedRunner::new(|invocation| {
            if invocation.has_arg("--fail") { Reply::exit(2).with_diagnostics(["Device or resource busy"]) } else { Reply::success() }
        });
        let ok = Invocation::new("ddrescue", "/tmp", OutputFormat::Ddrescue);
        let failing = Invocation::new("photorec", "/tmp", OutputFormat::Photorec).arg("--fail");
        assert!(run_to_end(runner.run(ok, CancellationToken::new()), |_| {}).await.unwrap().is_success());
        let result = run_to_end(runner.run(failing, CancellationToken::new()), |_| {}).await.unwrap();
        assert_eq!(result.outcome, PassOutcome::Failed(2));
        assert!(result.is_transient());
        assert_eq!(runner.programs(), vec!["ddrescue", "photorec"]);
    }

    #[tokio::test]
    async fn test_hang_until_cancelled() {
        let runner = ScriptedRunner::new(|_| Reply::hang().with_lines(["working"]));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let mut seen = Vec::new();
        let invocation = Invocation::new("rdfind", "/tmp", OutputFormat::Plain);
        let result = run_to_end(runner.run(invocation, cancel), |p| seen.push(p.status)).await.unwrap();
        assert_eq!(result.outcome, PassOutcome::Cancelled);
        assert_eq!(seen, vec!["working"]);
    }
}
