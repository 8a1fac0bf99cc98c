use crate::error::{ErrorKind, Result};
use crate::parse::clean_line;
use crate::{Elevation, Invocation, PassOutcome, PassResult, RunEvent, SummaryStats};
use async_stream::stream;
use exn::ResultExt;
use futures::{Stream, StreamExt};
use rustix::io::Errno;
use rustix::process::{Pid, Signal};
use std::collections::VecDeque;
use std::fmt::Debug;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Stream of events for one invocation.
pub type RunStream = Pin<Box<dyn Stream<Item = Result<RunEvent>> + Send>>;
/// Shared handle to a runner implementation.
pub type RunnerHandle = Arc<dyn CommandRunner>;

/// Lines of stderr kept for diagnostics.
const DIAGNOSTIC_TAIL: usize = 20;
/// Upper bound for the elevation helper to deliver a signal; it may prompt.
const HELPER_TIMEOUT: Duration = Duration::from_secs(60);

/// Launches external programs and translates their output into [`RunEvent`]s.
///
/// Implementations must yield exactly one [`RunEvent::Finished`] as the last
/// item of a successful stream. An `Err` item means the program could not be
/// supervised at all (it never started, or we lost the child).
pub trait CommandRunner: Send + Sync + Debug {
    fn run(&self, invocation: Invocation, cancel: CancellationToken) -> RunStream;
}

/// Drains a run stream, forwarding progress to `on_progress`, and returns the
/// terminal result.
pub async fn run_to_end(mut stream: RunStream, mut on_progress: impl FnMut(crate::PassProgress)) -> Result<PassResult> {
    while let Some(event) = stream.next().await {
        match event? {
            RunEvent::Progress(progress) => on_progress(progress),
            RunEvent::Finished(result) => return Ok(result),
        }
    }
    exn::bail!(ErrorKind::Truncated);
}

/// Runs real child processes with tokio.
#[derive(Clone, Debug)]
pub struct ProcessRunner {
    elevation: Elevation,
    grace: Duration,
    max_line: usize,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self { elevation: Elevation::None, grace: Duration::from_secs(5), max_line: 64 * 1024 }
    }
}

impl ProcessRunner {
    pub fn new(elevation: Elevation, grace: Duration, max_line: usize) -> Self {
        Self { elevation, grace, max_line }
    }

    pub fn handle(self) -> RunnerHandle {
        Arc::new(self)
    }
}

#[derive(Clone, Copy, Debug)]
enum Channel {
    Stdout,
    Stderr,
}

enum Step {
    Line(Channel, std::result::Result<String, AnyDelimiterCodecError>),
    Drained,
    Exited(Result<ExitStatus>),
    Stop(PassOutcome),
}

impl CommandRunner for ProcessRunner {
    fn run(&self, invocation: Invocation, cancel: CancellationToken) -> RunStream {
        let runner = self.clone();
        Box::pin(stream! {
            let started = Instant::now();
            let (program, args) = if invocation.elevated {
                runner.elevation.wrap(&invocation.program, &invocation.args)
            } else {
                (invocation.program.clone(), invocation.args.clone())
            };
            tracing::debug!(program = %program.display(), cwd = %invocation.working_dir.display(), "Spawning {invocation}");
            let spawned = Command::new(&program)
                .args(&args)
                .current_dir(&invocation.working_dir)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .or_raise(|| ErrorKind::Spawn(invocation.program.clone()));
            let mut child = match spawned {
                Ok(child) => child,
                Err(err) => {
                    yield Err(err);
                    return;
                },
            };
            let framed = |reader| {
                FramedRead::new(reader, AnyDelimiterCodec::new_with_max_length(b"\r\n".to_vec(), b"\n".to_vec(), runner.max_line))
                    .map(|frame| frame.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
            };
            let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
                yield Err(exn::Exn::from(ErrorKind::Supervise(invocation.program.clone())));
                return;
            };
            let mut lines = futures::stream::select(
                framed(Box::new(stdout) as Box<dyn tokio::io::AsyncRead + Send + Unpin>).map(|l| (Channel::Stdout, l)),
                framed(Box::new(stderr) as Box<dyn tokio::io::AsyncRead + Send + Unpin>).map(|l| (Channel::Stderr, l)),
            );
            let deadline = invocation.timeout.map(|timeout| started + timeout);
            let expired = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };
            tokio::pin!(expired);

            let mut parser = invocation.format.parser();
            let mut summary = SummaryStats::default();
            let mut diagnostics = VecDeque::with_capacity(DIAGNOSTIC_TAIL);
            let mut drained = false;
            let outcome = loop {
                let step = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Step::Stop(PassOutcome::Cancelled),
                    _ = &mut expired => Step::Stop(PassOutcome::TimedOut),
                    line = lines.next(), if !drained => match line {
                        Some((channel, line)) => Step::Line(channel, line),
                        None => Step::Drained,
                    },
                    status = child.wait(), if drained => {
                        Step::Exited(status.or_raise(|| ErrorKind::Supervise(invocation.program.clone())))
                    },
                };
                match step {
                    Step::Line(channel, Ok(raw)) => {
                        let line = clean_line(&raw);
                        if line.is_empty() {
                            continue;
                        }
                        summary.lines += 1;
                        if let Channel::Stderr = channel {
                            if diagnostics.len() == DIAGNOSTIC_TAIL {
                                diagnostics.pop_front();
                            }
                            diagnostics.push_back(line.clone());
                        }
                        tracing::trace!(?channel, "{line}");
                        if let Some(progress) = parser.feed(&line) {
                            summary.last_progress = Some(progress.clone());
                            yield Ok(RunEvent::Progress(progress));
                        }
                    },
                    Step::Line(channel, Err(err)) => {
                        tracing::warn!(?channel, error = %err, "Discarding unreadable output line");
                    },
                    Step::Drained => drained = true,
                    Step::Exited(Ok(status)) => break outcome_of(status),
                    Step::Exited(Err(err)) => {
                        yield Err(err);
                        return;
                    },
                    Step::Stop(outcome) => {
                        tracing::info!(program = invocation.program_name(), ?outcome, "Stopping child process");
                        let elevation = invocation.elevated.then_some(&runner.elevation);
                        let terminated = terminate(&mut child, runner.grace, elevation).await;
                        if let Err(err) = terminated.or_raise(|| ErrorKind::Unstoppable(invocation.program.clone())) {
                            tracing::error!(program = invocation.program_name(), "Child process could not be stopped");
                            yield Err(err);
                            return;
                        }
                        break outcome;
                    },
                }
            };
            summary.diagnostics = diagnostics.into();
            summary.elapsed = started.elapsed();
            tracing::debug!(program = invocation.program_name(), ?outcome, elapsed = ?summary.elapsed, "Child process finished");
            yield Ok(RunEvent::Finished(PassResult { outcome, summary }));
        })
    }
}

fn outcome_of(status: ExitStatus) -> PassOutcome {
    match status.code() {
        Some(0) => PassOutcome::Success,
        Some(code) => PassOutcome::Failed(code),
        None => PassOutcome::Signalled,
    }
}

/// Polite SIGTERM, then SIGKILL if the child outlives the grace period.
///
/// An elevated child usually runs as root, out of our reach; when a signal is
/// refused it is sent again through the elevation helper.
#[instrument(skip(child, elevation), fields(pid = child.id()))]
async fn terminate(child: &mut Child, grace: Duration, elevation: Option<&Elevation>) -> std::io::Result<()> {
    let Some(id) = child.id() else {
        // Already reaped.
        return Ok(());
    };
    send_signal(id, Signal::TERM, "TERM", elevation).await;
    if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
        return status.map(|_| ());
    }
    tracing::warn!(?grace, "Child ignored SIGTERM; killing");
    send_signal(id, Signal::KILL, "KILL", elevation).await;
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status.map(|_| ()),
        Err(_) => Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "child outlived SIGKILL")),
    }
}

async fn send_signal(id: u32, signal: Signal, name: &str, elevation: Option<&Elevation>) {
    let Some(pid) = Pid::from_raw(id as i32) else {
        return;
    };
    let refused = match rustix::process::kill_process(pid, signal) {
        Ok(()) => return,
        Err(err) => {
            tracing::debug!(error = %err, signal = name, "Signal not delivered");
            err == Errno::PERM
        },
    };
    let Some((program, args)) = elevation.filter(|_| refused).and_then(|e| e.signal_command(id, name)) else {
        return;
    };
    tracing::info!(signal = name, helper = %program.display(), "Signalling elevated child through the helper");
    let status = Command::new(&program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();
    match tokio::time::timeout(HELPER_TIMEOUT, status).await {
        Ok(Ok(status)) if status.success() => {},
        Ok(Ok(status)) => tracing::warn!(?status, signal = name, "Helper could not signal the child"),
        Ok(Err(err)) => tracing::warn!(error = %err, signal = name, "Helper could not be started"),
        Err(_) => tracing::warn!(signal = name, "Helper did not answer in time"),
    }
}
