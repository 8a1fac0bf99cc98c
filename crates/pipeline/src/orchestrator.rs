use crate::error::{ErrorKind, Result};
use crate::job::{Job, Lane, Phase};
use crate::lock::WorkdirLock;
use crate::progress::{ProgressAggregator, ProgressEvent};
use crate::report::{Failure, JobReport, LaneReport, LaneStatus};
use datarecovery_device::{MountGuard, SpaceProbeHandle};
use datarecovery_extract::{ExtractEvent, ExtractRequest, Extraction, RecoveredFile, extract};
use datarecovery_imaging::{ImageResult, ImagingEvent, ImagingPlan, PassKind, image};
use datarecovery_library::dedup::error::ErrorKind as DedupErrorKind;
use datarecovery_library::dedup::{DedupEvent, DedupReport, DedupRequest, deduplicate};
use datarecovery_library::error::ErrorKind as LibraryErrorKind;
use datarecovery_library::organize::error::ErrorKind as OrganizeErrorKind;
use datarecovery_library::organize::{OrganizeEvent, OrganizeOptions, OrganizeReport, organize};
use datarecovery_process::error::ErrorKind as ProcessErrorKind;
use datarecovery_process::{CancellationToken, PassProgress, RunnerHandle, Tool, Toolchain};
use exn::ResultExt;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Everything a job can tell its observer, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum JobEvent {
    Phase(Phase),
    Progress(ProgressEvent),
    /// A lane changed status.
    Lane(LaneReport),
    /// Always the last event.
    Finished(JobReport),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobCommand {
    /// Stop at the next opportunity. With `discard`, `images/` and
    /// `extracted/` are deleted afterwards; otherwise they are kept.
    Cancel { discard: bool },
}

/// Sends commands to a running job. Dropping it does not affect the job.
#[derive(Clone, Debug)]
pub struct JobControl {
    commands: mpsc::UnboundedSender<JobCommand>,
}

impl JobControl {
    pub fn send(&self, command: JobCommand) {
        // The job may already be over; nothing left to tell it.
        let _ = self.commands.send(command);
    }

    pub fn cancel(&self, discard: bool) {
        self.send(JobCommand::Cancel { discard });
    }
}

/// A started job: its event stream, a control handle and its final report.
#[derive(Debug)]
pub struct JobHandle {
    events: mpsc::UnboundedReceiver<JobEvent>,
    control: JobControl,
    task: JoinHandle<JobReport>,
}

impl JobHandle {
    pub fn control(&self) -> JobControl {
        self.control.clone()
    }

    pub fn cancel(&self, discard: bool) {
        self.control.cancel(discard);
    }

    /// `None` once the job has finished and every event was received.
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }

    pub async fn wait(self) -> Result<JobReport> {
        self.task.await.or_raise(|| ErrorKind::Worker)
    }
}

/// Fixed behaviour shared by every job.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Free space that must remain once every image is written.
    pub reserve_bytes: u64,
    /// Pause before the single automatic retry of a transient failure.
    pub transient_delay: Duration,
    pub dedup_timeout: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            reserve_bytes: 1024 * 1024 * 1024,
            transient_delay: Duration::from_secs(5),
            dedup_timeout: Some(Duration::from_secs(30 * 60)),
        }
    }
}

/// Drives jobs through guard checks, imaging, extraction and post-processing.
#[derive(Clone, Debug)]
pub struct Orchestrator {
    runner: RunnerHandle,
    guard: MountGuard,
    space: SpaceProbeHandle,
    toolchain: Toolchain,
    settings: Settings,
}

impl Orchestrator {
    pub fn new(
        runner: RunnerHandle,
        guard: MountGuard,
        space: SpaceProbeHandle,
        toolchain: Toolchain,
        settings: Settings,
    ) -> Self {
        Self { runner, guard, space, toolchain, settings }
    }

    /// Runs `job` on its own task. Must be called within a tokio runtime.
    pub fn start(&self, job: Job) -> JobHandle {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (commands, mut commands_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let discard = Arc::new(AtomicBool::new(false));

        tokio::spawn({
            let cancel = cancel.clone();
            let discard = discard.clone();
            async move {
                while let Some(command) = commands_rx.recv().await {
                    match command {
                        JobCommand::Cancel { discard: wanted } => {
                            tracing::info!(discard = wanted, "Cancellation requested");
                            if wanted {
                                discard.store(true, Ordering::SeqCst);
                            }
                            cancel.cancel();
                        },
                    }
                }
            }
        });

        let lanes = job.lanes().into_iter().map(|lane| (LaneReport::new(&lane.id, &lane.source), lane)).collect();
        let worker = Worker {
            orchestrator: self.clone(),
            job,
            lanes,
            events: events_tx,
            cancel,
            discard,
            progress: ProgressAggregator::default(),
            organized: None,
            deduplicated: None,
        };
        JobHandle { events, control: JobControl { commands }, task: tokio::spawn(worker.run()) }
    }

    fn tool(&self, tool: Tool) -> PathBuf {
        self.toolchain.path(tool).map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(tool.name()))
    }
}

/// Why the phase sequence stopped early.
enum Stop {
    Cancelled,
    Failed(Failure),
}

impl From<Failure> for Stop {
    fn from(failure: Failure) -> Self {
        Self::Failed(failure)
    }
}

type Flow<T = ()> = std::result::Result<T, Stop>;

struct Worker {
    orchestrator: Orchestrator,
    job: Job,
    lanes: Vec<(LaneReport, Lane)>,
    events: mpsc::UnboundedSender<JobEvent>,
    cancel: CancellationToken,
    discard: Arc<AtomicBool>,
    progress: ProgressAggregator,
    organized: Option<OrganizeReport>,
    deduplicated: Option<DedupReport>,
}

impl Worker {
    #[tracing::instrument(name = "job", skip_all, fields(target = %self.job.target.path.display()))]
    async fn run(mut self) -> JobReport {
        self.emit(JobEvent::Phase(Phase::Init));
        let lock = match WorkdirLock::acquire(&self.job.working_dir) {
            Ok(lock) => lock,
            Err(e) => {
                tracing::error!(error = ?e, "Could not lock the working directory");
                // The directory belongs to someone else; leave its job.json alone.
                return self.finish(Err(Failure::from_error(Phase::Init, &e).into()), false).await;
            },
        };
        let flow = self.drive().await;
        let report = self.finish(flow, true).await;
        drop(lock);
        report
    }

    async fn drive(&mut self) -> Flow {
        self.init().await?;
        self.enter(Phase::GuardCheck)?;
        self.guard_lanes().await?;
        self.enter(Phase::Imaging)?;
        self.image_lanes().await?;
        self.enter(Phase::Extraction)?;
        let files = self.extract_lanes().await?;
        self.enter(Phase::Organizing)?;
        self.organize(files).await?;
        if self.job.options.remove_duplicates {
            self.enter(Phase::Deduplicating)?;
            self.deduplicate().await?;
        }
        // Organizing runs to the end once started; a cancel that arrived
        // meanwhile still decides the outcome.
        self.checkpoint()
    }

    fn emit(&self, event: JobEvent) {
        // Observers may stop listening; the job carries on regardless.
        let _ = self.events.send(event);
    }

    fn checkpoint(&self) -> Flow {
        if self.cancel.is_cancelled() {
            return Err(Stop::Cancelled);
        }
        Ok(())
    }

    /// Phase boundary: a pending cancellation stops the job before new work
    /// starts.
    fn enter(&mut self, phase: Phase) -> Flow {
        self.checkpoint()?;
        let from = self.job.phase();
        self.job.advance(phase).map_err(|e| Failure::from_error(from, &e))?;
        tracing::info!(phase = ?phase, "Entering phase");
        self.progress.enter(phase);
        self.emit(JobEvent::Phase(phase));
        Ok(())
    }

    fn report_progress(&mut self, step: usize, steps: usize, within: f32, progress: &PassProgress) {
        let event = self.progress.update(step, steps, within, progress);
        self.emit(JobEvent::Progress(event));
    }

    fn report_status(&mut self, status: impl Into<String>) {
        let event = self.progress.status(status);
        self.emit(JobEvent::Progress(event));
    }

    fn publish_lane(&self, index: usize) {
        self.emit(JobEvent::Lane(self.lanes[index].0.clone()));
    }

    fn lanes_with(&self, status: LaneStatus) -> Vec<usize> {
        (0..self.lanes.len()).filter(|i| self.lanes[*i].0.status == status).collect()
    }

    /// The job-level failure once no lane is left: the lane's own reason when
    /// there was only one, a summary otherwise.
    fn no_usable_target(&self, phase: Phase) -> Stop {
        match self.lanes.as_slice() {
            [(LaneReport { failure: Some(failure), .. }, _)] => Stop::Failed(failure.clone()),
            _ => Stop::Failed(Failure::new(phase, ErrorKind::NoUsableTarget)),
        }
    }

    /// Turns a lane-level error into a stop if it was caused by cancellation.
    /// A child that outlived the cancel fails the job instead.
    fn check_cancelled(&self, kind: &ErrorKind) -> Flow {
        if kind.is_unstoppable() {
            return Err(Failure::new(self.job.phase(), kind.clone()).into());
        }
        if self.cancel.is_cancelled() || kind.is_cancellation() {
            return Err(Stop::Cancelled);
        }
        Ok(())
    }

    async fn pause_before_retry(&self) -> Flow {
        let delay = self.orchestrator.settings.transient_delay;
        tracing::info!(?delay, "Transient failure; retrying once");
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Stop::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    async fn init(&mut self) -> Flow {
        let options = self.job.options;
        if let Err(e) = self.orchestrator.toolchain.require(&Toolchain::required_for(options.remove_duplicates)) {
            let missing = match &*e {
                ProcessErrorKind::ToolsMissing(missing) => missing.clone(),
                _ => Vec::new(),
            };
            return Err(Failure::new(Phase::Init, ErrorKind::ToolsMissing(missing)).into());
        }

        let mut dirs = vec![self.job.images_dir()];
        dirs.extend(self.job.logs_dir());
        for dir in dirs {
            tokio::fs::create_dir_all(&dir).await.map_err(|_| Failure::new(Phase::Init, ErrorKind::Io(dir.clone())))?;
        }

        self.check_space().await.map_err(|e| Failure::from_error(Phase::Init, &e))?;
        Ok(())
    }

    /// Every lane's image must fit next to the reserve. Images left by an
    /// earlier run of the same job are already paid for.
    async fn check_space(&self) -> Result<()> {
        let images = self.job.images_dir();
        let mut needed: u64 = 0;
        let mut existing: u64 = 0;
        for (_, lane) in &self.lanes {
            needed = needed.saturating_add(lane.size);
            if let Ok(metadata) = tokio::fs::metadata(images.join(format!("{}.img", lane.id))).await {
                existing = existing.saturating_add(metadata.len().min(lane.size));
            }
        }
        let required = needed.saturating_sub(existing).saturating_add(self.orchestrator.settings.reserve_bytes);
        let available = match self.orchestrator.space.available(&images).await {
            Ok(available) => available,
            Err(e) => {
                let kind = ErrorKind::Guard((*e).clone());
                return Err(e).or_raise(|| kind);
            },
        };
        tracing::info!(required, available, lanes = self.lanes.len(), "Scratch space check");
        if required > available {
            exn::bail!(ErrorKind::InsufficientSpace { required, available });
        }
        Ok(())
    }

    async fn guard_lanes(&mut self) -> Flow {
        let steps = self.lanes.len();
        for index in 0..steps {
            if self.cancel.is_cancelled() {
                return Err(Stop::Cancelled);
            }
            let lane = self.lanes[index].1.clone();
            self.report_status(format!("checking {}", lane.source.display()));
            let mut retried = false;
            let outcome = loop {
                match self.guard_lane(&lane).await {
                    Ok(()) => break Ok(()),
                    Err(e) => {
                        let kind = (*e).clone();
                        self.check_cancelled(&kind)?;
                        if kind.is_retryable() && !retried {
                            retried = true;
                            self.pause_before_retry().await?;
                            continue;
                        }
                        break Err(kind);
                    },
                }
            };
            match outcome {
                Ok(()) => self.lanes[index].0.status = LaneStatus::Cleared,
                Err(kind) => {
                    tracing::warn!(lane = %lane.id, error = %kind, "Lane refused by guard");
                    self.lanes[index].0.fail(Failure::new(Phase::GuardCheck, kind));
                },
            }
            self.publish_lane(index);
            self.report_progress(index, steps, 100.0, &PassProgress::status(format!("checked {}", lane.id)));
        }
        if self.lanes_with(LaneStatus::Cleared).is_empty() {
            return Err(self.no_usable_target(Phase::GuardCheck));
        }
        Ok(())
    }

    async fn guard_lane(&self, lane: &Lane) -> Result<()> {
        let guard = &self.orchestrator.guard;
        let target = lane.guarded(&self.job.target);
        let checked = match guard.ensure_workdir_off(&target, &self.job.working_dir).await {
            Ok(()) => guard.ensure_safe(&target, self.job.options.auto_unmount, &self.cancel).await,
            Err(e) => Err(e),
        };
        if let Err(e) = checked {
            let kind = ErrorKind::Guard((*e).clone());
            return Err(e).or_raise(|| kind);
        }
        Ok(())
    }

    async fn image_lanes(&mut self) -> Flow {
        let cleared = self.lanes_with(LaneStatus::Cleared);
        let steps = cleared.len();
        for (step, index) in cleared.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(Stop::Cancelled);
            }
            let lane = self.lanes[index].1.clone();
            let mut plan = ImagingPlan::new(&lane.id, &lane.source, self.job.images_dir())
                .ddrescue(self.orchestrator.tool(Tool::Ddrescue))
                .device(lane.device);
            let mut retried = false;
            let outcome = loop {
                match self.image_lane(plan.clone(), step, steps).await {
                    Ok(result) => break Ok(result),
                    Err(e) => {
                        let kind = (*e).clone();
                        self.check_cancelled(&kind)?;
                        let resume = match &kind {
                            ErrorKind::Imaging(failed) if kind.is_retryable() && !retried => failed.pass(),
                            _ => None,
                        };
                        if let Some(pass) = resume {
                            retried = true;
                            self.pause_before_retry().await?;
                            plan = plan.resume_from(pass);
                            continue;
                        }
                        break Err(kind);
                    },
                }
            };
            let report = &mut self.lanes[index].0;
            match outcome {
                Ok(result) if result.is_usable() => {
                    tracing::info!(lane = %lane.id, rescued = result.summary.rescued, "Lane imaged");
                    report.status = LaneStatus::Imaged;
                    report.image = Some(result);
                },
                Ok(result) => {
                    tracing::warn!(lane = %lane.id, "Nothing rescued");
                    report.image = Some(result);
                    report.fail(Failure::new(Phase::Imaging, ErrorKind::NothingRescued(lane.source.clone())));
                },
                Err(kind) => {
                    tracing::warn!(lane = %lane.id, error = %kind, "Imaging failed");
                    report.fail(Failure::new(Phase::Imaging, kind));
                },
            }
            self.publish_lane(index);
        }
        if self.lanes_with(LaneStatus::Imaged).is_empty() {
            return Err(self.no_usable_target(Phase::Imaging));
        }
        Ok(())
    }

    async fn image_lane(&mut self, plan: ImagingPlan, step: usize, steps: usize) -> Result<ImageResult> {
        let id = plan.id.clone();
        let source = plan.source.clone();
        let mut events = pin!(image(plan, self.orchestrator.runner.clone(), self.cancel.clone()));
        while let Some(event) = events.next().await {
            match event {
                Ok(ImagingEvent::Started { passes, .. }) => {
                    if passes.first() != Some(&PassKind::FastCopy) {
                        tracing::info!(lane = %id, ?passes, "Resuming imaging");
                    }
                },
                Ok(ImagingEvent::PassStarted(pass)) => self.report_status(format!("{id}: {pass}")),
                Ok(ImagingEvent::Progress { pass, overall, progress }) => {
                    let progress = PassProgress { status: format!("{id}: {pass}: {}", progress.status), ..progress };
                    self.report_progress(step, steps, overall, &progress);
                },
                Ok(ImagingEvent::PassFinished(pass)) => {
                    tracing::debug!(lane = %id, pass = %pass.pass, rescued = pass.rescued, remaining_bad = pass.remaining_bad, "Pass recorded");
                },
                Ok(ImagingEvent::Complete(result)) => return Ok(result),
                Err(e) => {
                    let kind = ErrorKind::Imaging((*e).clone());
                    return Err(e).or_raise(|| kind);
                },
            }
        }
        exn::bail!(ErrorKind::NothingRescued(source))
    }

    async fn extract_lanes(&mut self) -> Flow<Vec<RecoveredFile>> {
        let imaged = self.lanes_with(LaneStatus::Imaged);
        let steps = imaged.len();
        let mut files = Vec::new();
        for (step, index) in imaged.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(Stop::Cancelled);
            }
            let (report, lane) = &self.lanes[index];
            let Some(image) = report.image.as_ref().map(|image| image.image.clone()) else {
                continue;
            };
            let mut request = ExtractRequest::new(&lane.id, image, self.job.extracted_dir());
            request.photorec = self.orchestrator.tool(Tool::Photorec);
            request.log_dir = self.job.logs_dir();
            request.keep_corrupted = self.job.options.keep_corrupted;
            let lane_id = lane.id.clone();

            let mut retried = false;
            let outcome = loop {
                match self.extract_lane(request.clone(), step, steps).await {
                    Ok(extraction) => break Ok(extraction),
                    Err(e) => {
                        let kind = (*e).clone();
                        self.check_cancelled(&kind)?;
                        if kind.is_retryable() && !retried {
                            retried = true;
                            self.pause_before_retry().await?;
                            continue;
                        }
                        break Err(kind);
                    },
                }
            };
            let report = &mut self.lanes[index].0;
            match outcome {
                Ok(extraction) => {
                    tracing::info!(lane = %lane_id, files = extraction.files.len(), "Lane extracted");
                    report.status = LaneStatus::Extracted;
                    report.extracted_dir = Some(extraction.output_dir);
                    report.extracted_files = Some(extraction.files.len() as u64);
                    files.extend(extraction.files);
                },
                Err(kind) => {
                    tracing::warn!(lane = %lane_id, error = %kind, "Extraction failed");
                    report.fail(Failure::new(Phase::Extraction, kind));
                },
            }
            self.publish_lane(index);
        }
        if self.lanes_with(LaneStatus::Extracted).is_empty() {
            return Err(self.no_usable_target(Phase::Extraction));
        }
        Ok(files)
    }

    async fn extract_lane(&mut self, request: ExtractRequest, step: usize, steps: usize) -> Result<Extraction> {
        let id = request.id.clone();
        let image = request.image.clone();
        let mut events = pin!(extract(request, self.orchestrator.runner.clone(), self.cancel.clone()));
        while let Some(event) = events.next().await {
            match event {
                Ok(ExtractEvent::Started { .. }) => self.report_status(format!("{id}: carving files")),
                Ok(ExtractEvent::Progress(progress)) => {
                    let within = progress.percent.unwrap_or(0.0);
                    let progress = PassProgress { status: format!("{id}: {}", progress.status), ..progress };
                    self.report_progress(step, steps, within, &progress);
                },
                Ok(ExtractEvent::Complete(extraction)) => return Ok(extraction),
                Err(e) => {
                    let kind = ErrorKind::Extraction((*e).clone());
                    return Err(e).or_raise(|| kind);
                },
            }
        }
        exn::bail!(ErrorKind::Extraction(datarecovery_extract::error::ErrorKind::MissingImage(image)))
    }

    async fn organize(&mut self, files: Vec<RecoveredFile>) -> Flow {
        let options = OrganizeOptions { destination: self.job.recovered_dir(), keep_corrupted: self.job.options.keep_corrupted };
        let mut events = pin!(organize(files, options));
        let mut total = 0;
        let mut done = 0;
        while let Some(event) = events.next().await {
            match event {
                Ok(OrganizeEvent::Started(count)) => total = count,
                Ok(OrganizeEvent::Organized(_)) => {
                    done += 1;
                    let within = if total == 0 { 100.0 } else { done as f32 / total as f32 * 100.0 };
                    self.report_progress(0, 1, within, &PassProgress::status(format!("organized {done} of {total} files")));
                },
                Ok(OrganizeEvent::Complete(report)) => {
                    tracing::info!(
                        moved = report.moved,
                        collisions = report.collisions,
                        discarded = report.discarded,
                        "Organizing complete"
                    );
                    self.organized = Some(report);
                    return Ok(());
                },
                Err(e) => {
                    tracing::error!(error = ?e, "Organizing failed");
                    let LibraryErrorKind::Organize(kind) = (*e).clone();
                    return Err(Failure::new(Phase::Organizing, ErrorKind::Organize(kind)).into());
                },
            }
        }
        let destination = self.job.recovered_dir();
        Err(Failure::new(Phase::Organizing, ErrorKind::Organize(OrganizeErrorKind::Io(destination))).into())
    }

    async fn deduplicate(&mut self) -> Flow {
        let request = DedupRequest {
            root: self.job.recovered_dir(),
            rdfind: self.orchestrator.tool(Tool::Rdfind),
            results_file: self.job.logs_dir().map(|logs| logs.join("duplicates.txt")),
            timeout: self.orchestrator.settings.dedup_timeout,
        };
        let mut retried = false;
        loop {
            let kind = match self.dedup_once(request.clone()).await {
                Ok(report) => {
                    self.deduplicated = Some(merge_dedup(self.deduplicated.take(), report));
                    return Ok(());
                },
                Err(kind) => kind,
            };
            // Whatever rdfind managed to remove is reported, failed or not.
            if let Some(partial) = kind.partial() {
                self.deduplicated = Some(merge_dedup(self.deduplicated.take(), partial.clone()));
            }
            let kind = ErrorKind::Dedup(kind);
            self.check_cancelled(&kind)?;
            if kind.is_retryable() && !retried {
                retried = true;
                self.pause_before_retry().await?;
                continue;
            }
            tracing::error!(error = %kind, "Duplicate removal failed; organized files are left as they are");
            return Err(Failure::new(Phase::Deduplicating, kind).into());
        }
    }

    async fn dedup_once(&mut self, request: DedupRequest) -> std::result::Result<DedupReport, DedupErrorKind> {
        let mut events = pin!(deduplicate(request, self.orchestrator.runner.clone(), self.cancel.clone()));
        while let Some(event) = events.next().await {
            match event {
                Ok(DedupEvent::Started(census)) => {
                    self.report_status(format!("looking for duplicates among {} files", census.files));
                },
                Ok(DedupEvent::Progress(progress)) => {
                    let within = progress.percent.unwrap_or(0.0);
                    self.report_progress(0, 1, within, &progress);
                },
                Ok(DedupEvent::Complete(report)) => return Ok(report),
                Err(e) => return Err((*e).clone()),
            }
        }
        Err(DedupErrorKind::Launch)
    }

    async fn finish(mut self, flow: Flow, write: bool) -> JobReport {
        let (terminal, failure) = match flow {
            Ok(()) => (Phase::Complete, None),
            Err(Stop::Cancelled) => (Phase::Cancelled, None),
            Err(Stop::Failed(failure)) => (Phase::Failed, Some(failure)),
        };
        if let Err(e) = self.job.advance(terminal) {
            tracing::error!(error = ?e, "Could not record the terminal phase");
        }
        self.progress.enter(terminal);
        self.emit(JobEvent::Phase(terminal));

        match terminal {
            Phase::Complete if !self.job.options.save_images => remove_dir(&self.job.images_dir()).await,
            Phase::Cancelled if self.discard.load(Ordering::SeqCst) => {
                remove_dir(&self.job.images_dir()).await;
                remove_dir(&self.job.extracted_dir()).await;
            },
            _ => {},
        }
        if terminal == Phase::Cancelled {
            for (report, _) in &mut self.lanes {
                if matches!(report.status, LaneStatus::Pending | LaneStatus::Cleared | LaneStatus::Imaged) {
                    report.status = LaneStatus::Cancelled;
                }
            }
        }

        let lanes = self.lanes.iter().map(|(report, _)| report.clone()).collect();
        let mut report = JobReport::new(&self.job, lanes);
        report.organize = self.organized.take();
        report.dedup = self.deduplicated.take();
        report.failure = failure;
        if write {
            let mut candidates = vec![self.job.images_dir(), self.job.extracted_dir(), self.job.recovered_dir()];
            candidates.extend(self.job.logs_dir());
            for dir in candidates {
                if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
                    report.artifacts.push(dir);
                }
            }
            if let Err(e) = report.write(&self.job.report_path()).await {
                tracing::warn!(error = ?e, "Could not write the job report");
            }
        }
        match terminal {
            Phase::Complete => tracing::info!("{}", report.summary()),
            _ => tracing::warn!("{}", report.summary()),
        }
        let event = self.progress.status(report.summary());
        self.emit(JobEvent::Progress(event));
        self.emit(JobEvent::Finished(report.clone()));
        report
    }
}

/// A retry counts the tree again, so the first attempt's census is the one
/// that describes what was scanned.
fn merge_dedup(earlier: Option<DedupReport>, later: DedupReport) -> DedupReport {
    match earlier {
        Some(earlier) => DedupReport {
            files_scanned: earlier.files_scanned,
            duplicates_removed: earlier.duplicates_removed + later.duplicates_removed,
            bytes_reclaimed: earlier.bytes_reclaimed + later.bytes_reclaimed,
        },
        None => later,
    }
}

async fn remove_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => tracing::info!(dir = %dir.display(), "Removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
        Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "Could not remove"),
    }
}
