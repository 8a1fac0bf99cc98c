//! Layered configuration: built-in defaults, then a TOML file, then
//! `DATARECOVERY_` environment variables (`__` separates nested keys, so
//! `DATARECOVERY_RUNNER__GRACE_PERIOD_SECS=10` sets `runner.grace_period_secs`).

pub mod error;

use crate::error::{ErrorKind as ConfigErrorKind, Result as ConfigResult};
use directories::ProjectDirs;
use exn::{ResultExt, bail};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "DATARECOVERY_";
const MIN_LINE_BYTES: usize = 1024;

/// `$XDG_CONFIG_HOME/datarecovery/config.toml` on Linux.
pub fn default_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "datarecovery").map(|dirs| dirs.config_dir().join("config.toml"))
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub working_dir: Option<PathBuf>,
    pub tools: Tools,
    pub elevation: ElevationSetting,
    pub unmount: Unmount,
    pub runner: Runner,
    pub dedup: Dedup,
    pub retry: Retry,
    pub space: Space,
    pub defaults: JobDefaults,
}

/// Explicit engine paths; unset entries are looked up on `PATH`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tools {
    pub ddrescue: Option<PathBuf>,
    pub photorec: Option<PathBuf>,
    pub rdfind: Option<PathBuf>,
}

/// How privileged commands are run. `auto` picks whatever the host has.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElevationSetting {
    #[default]
    Auto,
    Pkexec,
    Sudo,
    None,
}

impl ElevationSetting {
    /// The helper name, or `None` for auto-discovery.
    pub fn name(&self) -> Option<&'static str> {
        match self {
            Self::Auto => None,
            Self::Pkexec => Some("pkexec"),
            Self::Sudo => Some("sudo"),
            Self::None => Some("none"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Unmount {
    pub program: PathBuf,
    /// Placed before the device path.
    pub args: Vec<String>,
    pub elevated: bool,
}

impl Default for Unmount {
    fn default() -> Self {
        Self { program: PathBuf::from("udisksctl"), args: vec!["unmount".into(), "-b".into()], elevated: false }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Runner {
    /// Time a child gets between SIGTERM and SIGKILL.
    pub grace_period_secs: u64,
    pub max_line_bytes: usize,
}

impl Default for Runner {
    fn default() -> Self {
        Self { grace_period_secs: 5, max_line_bytes: 64 * 1024 }
    }
}

impl Runner {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dedup {
    /// Zero disables the timeout.
    pub timeout_secs: u64,
}

impl Default for Dedup {
    fn default() -> Self {
        Self { timeout_secs: 30 * 60 }
    }
}

impl Dedup {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Retry {
    pub transient_delay_secs: u64,
}

impl Default for Retry {
    fn default() -> Self {
        Self { transient_delay_secs: 5 }
    }
}

impl Retry {
    pub fn transient_delay(&self) -> Duration {
        Duration::from_secs(self.transient_delay_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Space {
    /// Free space that must remain after every image has been written.
    pub reserve_bytes: u64,
}

impl Default for Space {
    fn default() -> Self {
        Self { reserve_bytes: 1024 * 1024 * 1024 }
    }
}

/// Job options used when the command line does not say otherwise.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobDefaults {
    pub save_images: bool,
    pub detailed_logging: bool,
    pub remove_duplicates: bool,
    pub keep_corrupted: bool,
    pub scan_partitions: bool,
    pub auto_unmount: bool,
}

impl Config {
    /// Loads from `explicit` if given (it must exist), otherwise from
    /// [`default_path`] if it exists, then applies the environment.
    #[tracing::instrument(level = "debug")]
    pub fn load(explicit: Option<&Path>) -> ConfigResult<Self> {
        if let Some(path) = explicit
            && !path.is_file()
        {
            bail!(ConfigErrorKind::Missing(path.to_path_buf()));
        }
        let file = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => default_path().filter(|path| path.is_file()),
        };
        if let Some(file) = &file {
            tracing::debug!(path = %file.display(), "Reading configuration file");
        }
        Self::from_figment(Self::figment(file.as_deref()).merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Defaults layered under an optional TOML file.
    pub fn figment(file: Option<&Path>) -> Figment {
        let figment = Figment::from(Serialized::defaults(Self::default()));
        match file {
            Some(file) => figment.merge(Toml::file(file)),
            None => figment,
        }
    }

    pub fn from_figment(figment: Figment) -> ConfigResult<Self> {
        let config: Self = figment.extract().or_raise(|| ConfigErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.runner.grace_period_secs == 0 {
            bail!(ConfigErrorKind::Invalid { key: "runner.grace_period_secs", reason: "must be greater than zero" });
        }
        if self.runner.max_line_bytes < MIN_LINE_BYTES {
            bail!(ConfigErrorKind::Invalid { key: "runner.max_line_bytes", reason: "must be at least 1024" });
        }
        if self.unmount.program.as_os_str().is_empty() {
            bail!(ConfigErrorKind::Invalid { key: "unmount.program", reason: "must not be empty" });
        }
        Ok(())
    }
}
