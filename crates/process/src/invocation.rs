use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which engine's output grammar the runner should apply to the child's lines.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutputFormat {
    Ddrescue,
    Photorec,
    Rdfind,
    /// Every line is surfaced verbatim as status text.
    Plain,
}

/// A single external program invocation.
///
/// Built by the component that knows the engine's CLI contract (imaging,
/// extraction, deduplication, unmounting) and handed to a
/// [`CommandRunner`](crate::CommandRunner), which owns the child from then on.
#[derive(Clone, Debug)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub working_dir: PathBuf,
    /// Request the host's elevation capability for this invocation.
    pub elevated: bool,
    /// Terminate the child (and report [`PassOutcome::TimedOut`](crate::PassOutcome::TimedOut))
    /// if it runs longer than this.
    pub timeout: Option<Duration>,
    pub format: OutputFormat,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>, working_dir: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            elevated: false,
            timeout: None,
            format,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn elevated(mut self, elevated: bool) -> Self {
        self.elevated = elevated;
        self
    }

    pub fn timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.timeout = timeout.into();
        self
    }

    /// The program's file name, used for log fields and test assertions.
    pub fn program_name(&self) -> &str {
        self.program.file_name().and_then(|n| n.to_str()).unwrap_or_default()
    }

    /// True if any argument equals `needle` exactly.
    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a == needle)
    }

    /// Positional argument lookup that tolerates non-UTF-8 paths.
    pub fn arg_path(&self, index: usize) -> Option<&Path> {
        self.args.get(index).map(Path::new)
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}
