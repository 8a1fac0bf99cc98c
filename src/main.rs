mod cli;
mod logging;

use crate::cli::{Cli, Command, RecoverArgs};
use clap::Parser;
use datarecovery_config::Config;
use datarecovery_device::{
    MountGuard, MountState, MountTableHandle, ProcMountTable, Statvfs, Target, UnmountCommand,
};
use datarecovery_pipeline::{JobEvent, Job, JobReport, LOGS_DIR, Orchestrator, Phase, ProgressEvent, Settings};
use datarecovery_process::{Elevation, ProcessRunner, RunnerHandle, Tool, ToolOverrides, Toolchain};
use derive_more::{Display, Error};
use exn::ResultExt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

const DEFAULT_WORKDIR: &str = "recovery";
const EXIT_CANCELLED: u8 = 130;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("cannot use {} as a recovery source", _0.display())]
    Target(#[error(not(source))] PathBuf),
    #[display("could not read the mount table")]
    Mounts,
    #[display("the recovery job stopped unexpectedly")]
    Job,
}

type Result<T> = std::result::Result<T, exn::Exn<ErrorKind>>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:?}");
            return ExitCode::FAILURE;
        },
    };

    let outcome = match cli.command {
        Command::Recover(args) => recover(args, config).await,
        Command::Inspect { source } => {
            logging::init(None);
            inspect(source, &config).await
        },
        Command::Preflight => {
            logging::init(None);
            Ok(preflight(&config))
        },
    };
    outcome.unwrap_or_else(|e| {
        tracing::error!("{e:?}");
        ExitCode::FAILURE
    })
}

fn toolchain(config: &Config) -> Toolchain {
    Toolchain::discover(&ToolOverrides {
        ddrescue: config.tools.ddrescue.clone(),
        photorec: config.tools.photorec.clone(),
        rdfind: config.tools.rdfind.clone(),
        unmount: Some(config.unmount.program.clone()),
    })
}

fn runner(config: &Config) -> RunnerHandle {
    let elevation = config.elevation.name().and_then(Elevation::from_name).unwrap_or_else(Elevation::discover);
    tracing::debug!(?elevation, "Privileged commands");
    ProcessRunner::new(elevation, config.runner.grace_period(), config.runner.max_line_bytes).handle()
}

fn guard(config: &Config, toolchain: &Toolchain, runner: RunnerHandle) -> MountGuard {
    let unmount = UnmountCommand {
        program: toolchain.path(Tool::Unmount).map(Path::to_path_buf).unwrap_or_else(|| config.unmount.program.clone()),
        args: config.unmount.args.clone(),
        elevated: config.unmount.elevated,
    };
    let mounts: MountTableHandle = Arc::new(ProcMountTable::default());
    MountGuard::new(mounts, runner, unmount)
}

async fn recover(args: RecoverArgs, config: Config) -> Result<ExitCode> {
    let options = args.options(&config.defaults);
    let working_dir = args.workdir.clone().or(config.working_dir.clone()).unwrap_or_else(|| DEFAULT_WORKDIR.into());
    logging::init(options.detailed_logging.then(|| working_dir.join(LOGS_DIR)).as_deref());

    let target = Target::probe(&args.source).await.or_raise(|| ErrorKind::Target(args.source.clone()))?;
    tracing::info!(
        source = %target.path.display(),
        size = target.size,
        partitions = target.partitions.len(),
        workdir = %working_dir.display(),
        "Starting recovery"
    );

    let toolchain = toolchain(&config);
    let runner = runner(&config);
    let settings = Settings {
        reserve_bytes: config.space.reserve_bytes,
        transient_delay: config.retry.transient_delay(),
        dedup_timeout: config.dedup.timeout(),
    };
    let guard = guard(&config, &toolchain, runner.clone());
    let orchestrator = Orchestrator::new(runner, guard, Arc::new(Statvfs), toolchain, settings);

    let mut handle = orchestrator.start(Job::new(target, working_dir, options));
    let control = handle.control();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling; waiting for the running tool to stop...");
            control.cancel(false);
        }
    });

    let mut printer = Printer::default();
    while let Some(event) = handle.next_event().await {
        printer.print(&event);
    }
    let report = handle.wait().await.or_raise(|| ErrorKind::Job)?;
    Ok(exit_code(&report))
}

fn exit_code(report: &JobReport) -> ExitCode {
    match report.phase {
        Phase::Complete => ExitCode::SUCCESS,
        Phase::Cancelled => ExitCode::from(EXIT_CANCELLED),
        _ => ExitCode::FAILURE,
    }
}

/// Console rendering of job events; progress lines are only printed when
/// something visible changed.
#[derive(Default)]
struct Printer {
    last: Option<(Phase, u32, String)>,
}

impl Printer {
    fn print(&mut self, event: &JobEvent) {
        match event {
            JobEvent::Phase(phase) => println!("==> {phase:?}"),
            JobEvent::Progress(progress) => self.progress(progress),
            JobEvent::Lane(lane) => match &lane.failure {
                Some(failure) => println!("    {}: {:?} ({})", lane.id, lane.status, failure.message),
                None => println!("    {}: {:?}", lane.id, lane.status),
            },
            JobEvent::Finished(report) => {
                println!("{}", report.summary());
                for artifact in &report.artifacts {
                    println!("    {}", artifact.display());
                }
            },
        }
    }

    fn progress(&mut self, progress: &ProgressEvent) {
        let tenths = (progress.overall_percent * 10.0) as u32;
        let key = (progress.phase, tenths, progress.status.clone());
        if self.last.as_ref() == Some(&key) {
            return;
        }
        self.last = Some(key);
        let eta = progress.eta.map(|eta| format!(", {}s left", eta.as_secs())).unwrap_or_default();
        println!("[{:5.1}%] {}{eta}", progress.overall_percent, progress.status);
    }
}

async fn inspect(source: PathBuf, config: &Config) -> Result<ExitCode> {
    let target = Target::probe(&source).await.or_raise(|| ErrorKind::Target(source.clone()))?;
    let toolchain = toolchain(config);
    let guard = guard(config, &toolchain, runner(config));
    let report = guard.inspect(&target).await.or_raise(|| ErrorKind::Mounts)?;

    println!("{} ({:?}, {} bytes)", target.path.display(), target.kind, target.size);
    for constituent in &report.constituents {
        let state = match &constituent.state {
            MountState::Unmounted => "not mounted".to_string(),
            MountState::MountedSafe { mount_points } => format!("mounted at {}", join(mount_points)),
            MountState::MountedBusy { mount_points } => format!("mounted at {} (system mount)", join(mount_points)),
        };
        println!("    {}: {state}", constituent.path.display());
    }
    Ok(if report.is_clear() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn join(paths: &[PathBuf]) -> String {
    paths.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
}

fn preflight(config: &Config) -> ExitCode {
    let toolchain = toolchain(config);
    for tool in Tool::ALL {
        match toolchain.path(tool) {
            Some(path) => println!("{:>10}: {}", tool.name(), path.display()),
            None => println!("{:>10}: not found", tool.name()),
        }
    }
    match toolchain.require(&Toolchain::required_for(false)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("{e:?}");
            ExitCode::FAILURE
        },
    }
}
