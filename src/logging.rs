use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

pub const LOG_FILE: &str = "datarecovery.log";

/// Installs the global subscriber: `RUST_LOG` (default `info`) to stderr, and
/// with `log_dir` a plain-text copy in `<log_dir>/datarecovery.log`.
pub fn init(log_dir: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file = log_dir.and_then(|dir| {
        let opened = std::fs::create_dir_all(dir).and_then(|()| {
            File::options().create(true).append(true).open(dir.join(LOG_FILE))
        });
        match opened {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!("cannot write log file in {}: {e}", dir.display());
                None
            },
        }
    });
    let file_layer = file.map(|file| fmt::layer().with_ansi(false).with_writer(Mutex::new(file)));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
}
