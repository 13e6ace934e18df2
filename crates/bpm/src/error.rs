//! Crate-wide error types.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for bpm operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while supervising a process.
#[derive(Debug, Error)]
pub enum Error {
    /// The process definition failed pre-flight validation.
    #[error("invalid process config: {0}")]
    InvalidConfig(String),

    /// A lock file could not be created or acquired.
    #[error("lock file {}: {source}", path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The pre-start hook failed or could not be launched. Start aborts
    /// before any container exists.
    #[error("pre-start hook {} failed: {reason}", hook.display())]
    HookFailed { hook: PathBuf, reason: String },

    /// The external runtime returned failure or was unreachable.
    #[error("runtime {command} failed: {message}")]
    RuntimeCommand { command: String, message: String },

    /// The container does not exist. Callers use this to make "nothing to
    /// stop/remove" read as success.
    #[error("container not found: {0}")]
    NotFound(String),

    /// A graceful stop exceeded its deadline; the forceful signal has
    /// already been sent.
    #[error("timed out waiting for {0} to stop")]
    TimedOut(String),

    /// A container identifier did not round-trip through the codec.
    #[error("invalid container id: {0}")]
    InvalidId(String),

    /// A human-readable size string could not be parsed.
    #[error("invalid limit: {0}")]
    InvalidLimit(String),

    /// A stop schedule referenced an action key the caller never supplied.
    #[error("unknown schedule action: {0}")]
    UnknownAction(String),

    /// Generic IO error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether this error means the target container does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
