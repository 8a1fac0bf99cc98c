use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// How the host grants raised privileges.
///
/// The runner never handles credentials: an elevated invocation is simply
/// re-targeted at the host's helper program, which owns authentication.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Elevation {
    /// Polkit prompt; the original desktop behaviour.
    Pkexec(PathBuf),
    /// Non-interactive sudo (`-n`); fails instead of prompting on a terminal we don't own.
    Sudo(PathBuf),
    /// Already privileged (or elevation disabled): run programs as-is.
    #[default]
    None,
}

impl Elevation {
    /// Picks the first available helper, or [`Elevation::None`] when the
    /// process is already running as root.
    pub fn discover() -> Self {
        if rustix::process::geteuid().is_root() {
            tracing::debug!("Running as root; elevation not required");
            return Self::None;
        }
        if let Ok(path) = which::which("pkexec") {
            return Self::Pkexec(path);
        }
        if let Ok(path) = which::which("sudo") {
            return Self::Sudo(path);
        }
        tracing::warn!("Neither pkexec nor sudo found; elevated invocations will run unprivileged");
        Self::None
    }

    /// Resolves a configured helper name (`pkexec`, `sudo`, `none`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pkexec" => Some(which::which("pkexec").map(Self::Pkexec).unwrap_or_else(|_| Self::Pkexec("pkexec".into()))),
            "sudo" => Some(which::which("sudo").map(Self::Sudo).unwrap_or_else(|_| Self::Sudo("sudo".into()))),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    /// Rewrites `program args...` into the helper's form.
    pub fn wrap(&self, program: &Path, args: &[OsString]) -> (PathBuf, Vec<OsString>) {
        let mut wrapped = Vec::with_capacity(args.len() + 2);
        let helper = match self {
            Self::Pkexec(helper) => helper,
            Self::Sudo(helper) => {
                wrapped.push(OsString::from("-n"));
                helper
            },
            Self::None => return (program.to_path_buf(), args.to_vec()),
        };
        wrapped.push(program.as_os_str().to_os_string());
        wrapped.extend(args.iter().cloned());
        (helper.clone(), wrapped)
    }

    /// `kill -s <signal> <pid>` through the helper, for elevated children the
    /// unprivileged parent is not allowed to signal. `None` without a helper.
    pub fn signal_command(&self, pid: u32, signal: &str) -> Option<(PathBuf, Vec<OsString>)> {
        if *self == Self::None {
            return None;
        }
        let kill = which::which("kill").unwrap_or_else(|_| PathBuf::from("/bin/kill"));
        let args = [OsString::from("-s"), OsString::from(signal), OsString::from(pid.to_string())];
        Some(self.wrap(&kill, &args))
    }
}
