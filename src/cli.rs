use clap::{Args, Parser, Subcommand};
use datarecovery_config::JobDefaults;
use datarecovery_pipeline::JobOptions;
use std::path::PathBuf;

/// Guarded, resumable ddrescue and PhotoRec recovery.
#[derive(Parser, Debug)]
#[command(name = "datarecovery", version, about)]
pub struct Cli {
    /// Configuration file (default: $XDG_CONFIG_HOME/datarecovery/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Image a device or image file, carve files from it and organize them
    Recover(RecoverArgs),
    /// Show the mount state of a device and its partitions
    Inspect {
        /// Block device or image file
        source: PathBuf,
    },
    /// Check that the external recovery tools are installed
    Preflight,
}

#[derive(Args, Debug)]
pub struct RecoverArgs {
    /// Block device (e.g. /dev/sdb) or image file to recover from
    pub source: PathBuf,

    /// Where images, carved files and the report are written
    #[arg(long, value_name = "DIR")]
    pub workdir: Option<PathBuf>,

    /// Keep the disk images after a successful run
    #[arg(long)]
    pub save_images: bool,

    /// Write tool and job logs to <workdir>/logs
    #[arg(long)]
    pub detailed_logs: bool,

    /// Delete byte-identical files after organizing
    #[arg(long)]
    pub remove_duplicates: bool,

    /// Keep files PhotoRec marks as corrupted instead of deleting them
    #[arg(long)]
    pub keep_corrupted: bool,

    /// Also image every partition on its own (needs twice the space)
    #[arg(long)]
    pub scan_partitions: bool,

    /// Unmount the target's partitions instead of refusing to start
    #[arg(long)]
    pub auto_unmount: bool,
}

impl RecoverArgs {
    /// Flags switch options on; configured defaults fill in the rest.
    pub fn options(&self, defaults: &JobDefaults) -> JobOptions {
        JobOptions {
            save_images: self.save_images || defaults.save_images,
            detailed_logging: self.detailed_logs || defaults.detailed_logging,
            remove_duplicates: self.remove_duplicates || defaults.remove_duplicates,
            keep_corrupted: self.keep_corrupted || defaults.keep_corrupted,
            scan_partitions: self.scan_partitions || defaults.scan_partitions,
            auto_unmount: self.auto_unmount || defaults.auto_unmount,
        }
    }
}
