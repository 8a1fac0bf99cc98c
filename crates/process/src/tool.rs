use crate::error::{ErrorKind, Result};
use std::path::{Path, PathBuf};

/// The external engines a recovery job may invoke.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Tool {
    Ddrescue,
    Photorec,
    Rdfind,
    Unmount,
}

impl Tool {
    pub const ALL: [Tool; 4] = [Tool::Ddrescue, Tool::Photorec, Tool::Rdfind, Tool::Unmount];

    /// Executable names searched on `PATH`, in preference order.
    fn candidates(self) -> &'static [&'static str] {
        match self {
            Self::Ddrescue => &["ddrescue", "gddrescue"],
            Self::Photorec => &["photorec", "photorec_static"],
            Self::Rdfind => &["rdfind"],
            Self::Unmount => &["udisksctl", "umount"],
        }
    }

    pub fn name(self) -> &'static str {
        self.candidates()[0]
    }
}

/// Explicit paths (from configuration) that bypass `PATH` lookup.
#[derive(Clone, Debug, Default)]
pub struct ToolOverrides {
    pub ddrescue: Option<PathBuf>,
    pub photorec: Option<PathBuf>,
    pub rdfind: Option<PathBuf>,
    pub unmount: Option<PathBuf>,
}

impl ToolOverrides {
    fn get(&self, tool: Tool) -> Option<&PathBuf> {
        match tool {
            Tool::Ddrescue => self.ddrescue.as_ref(),
            Tool::Photorec => self.photorec.as_ref(),
            Tool::Rdfind => self.rdfind.as_ref(),
            Tool::Unmount => self.unmount.as_ref(),
        }
    }
}

/// Resolved locations of the external engines.
#[derive(Clone, Debug, Default)]
pub struct Toolchain {
    pub ddrescue: Option<PathBuf>,
    pub photorec: Option<PathBuf>,
    pub rdfind: Option<PathBuf>,
    pub unmount: Option<PathBuf>,
}

impl Toolchain {
    /// Looks every tool up; never fails, missing tools are simply `None`.
    pub fn discover(overrides: &ToolOverrides) -> Self {
        let mut toolchain = Self::default();
        for tool in Tool::ALL {
            let found = match overrides.get(tool) {
                Some(path) if path.is_file() => Some(path.clone()),
                Some(path) => {
                    // A bare name in config ("ddrescue") is still worth a PATH lookup.
                    which::which(path).ok()
                },
                None => tool.candidates().iter().find_map(|exe| which::which(exe).ok()),
            };
            match &found {
                Some(path) => tracing::debug!(tool = tool.name(), path = %path.display(), "Discovered tool"),
                None => tracing::info!(tool = tool.name(), "Tool not found in PATH"),
            }
            *toolchain.slot(tool) = found;
        }
        toolchain
    }

    fn slot(&mut self, tool: Tool) -> &mut Option<PathBuf> {
        match tool {
            Tool::Ddrescue => &mut self.ddrescue,
            Tool::Photorec => &mut self.photorec,
            Tool::Rdfind => &mut self.rdfind,
            Tool::Unmount => &mut self.unmount,
        }
    }

    pub fn path(&self, tool: Tool) -> Option<&Path> {
        match tool {
            Tool::Ddrescue => self.ddrescue.as_deref(),
            Tool::Photorec => self.photorec.as_deref(),
            Tool::Rdfind => self.rdfind.as_deref(),
            Tool::Unmount => self.unmount.as_deref(),
        }
    }

    /// Fails with every missing tool listed at once.
    pub fn require(&self, tools: &[Tool]) -> Result<()> {
        let missing: Vec<String> =
            tools.iter().filter(|tool| self.path(**tool).is_none()).map(|tool| tool.name().to_string()).collect();
        if !missing.is_empty() {
            exn::bail!(ErrorKind::ToolsMissing(missing));
        }
        Ok(())
    }

    /// Tools a job needs: rdfind only matters when duplicates are removed.
    pub fn required_for(remove_duplicates: bool) -> Vec<Tool> {
        let mut tools = vec![Tool::Ddrescue, Tool::Photorec];
        if remove_duplicates {
            tools.push(Tool::Rdfind);
        }
        tools
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toolchain(rdfind: bool) -> Toolchain {
        Toolchain {
            ddrescue: Some("/usr/bin/ddrescue".into()),
            photorec: Some("/usr/bin/photorec".into()),
            rdfind: rdfind.then(|| "/usr/bin/rdfind".into()),
            unmount: Some("/usr/bin/udisksctl".into()),
        }
    }

    #[test]
    fn test_missing_rdfind_only_fatal_for_dedup() {
        let tools = toolchain(false);
        assert!(tools.require(&Toolchain::required_for(false)).is_ok());
        let err = tools.require(&Toolchain::required_for(true)).unwrap_err();
        assert_eq!(*err, ErrorKind::ToolsMissing(vec!["rdfind".to_string()]));
    }

    #[test]
    fn test_reports_all_missing() {
        let err = Toolchain::default().require(&Tool::ALL).unwrap_err();
        assert_eq!(
            *err,
            ErrorKind::ToolsMissing(vec![
                "ddrescue".to_string(),
                "photorec".to_string(),
                "rdfind".to_string(),
                "udisksctl".to_string()
            ])
        );
    }

    #[test]
    fn test_override_to_existing_file_wins() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let overrides = ToolOverrides { rdfind: Some(file.path().to_path_buf()), ..ToolOverrides::default() };
        assert_eq!(Toolchain::discover(&overrides).rdfind.as_deref(), Some(file.path()));
    }
}
