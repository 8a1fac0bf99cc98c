use derive_more::{Display, Error};
use std::path::PathBuf;

/// A configuration error with automatic location tracking via [`exn::Exn`].
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration loading.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("configuration file {} does not exist", _0.display())]
    Missing(#[error(not(source))] PathBuf),
    /// A source could not be parsed or a value has the wrong type.
    #[display("could not read configuration")]
    Load,
    #[display("invalid configuration value for {key}: {reason}")]
    Invalid { key: &'static str, reason: &'static str },
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
