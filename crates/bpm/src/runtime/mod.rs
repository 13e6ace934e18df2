//! Runtime client boundary.
//!
//! The supervisor drives an external OCI-compatible runtime through a
//! narrow command/query interface. The production adapter shells out to
//! the runtime binary; tests substitute a double. State is always fetched
//! live from the runtime, never cached here.

mod runc;

pub use runc::RuncClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::ExitStatus;

use crate::error::Result;
use crate::spec::Spec;
use crate::users::BpmUser;

/// Live container state as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    pub id: String,
    #[serde(default)]
    pub pid: i32,
    pub status: Status,
}

/// Runtime-level container status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Created,
    Running,
    Stopped,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Signals the supervisor sends to containers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    #[default]
    Term,
    Quit,
    Int,
    Kill,
    Hup,
    Usr1,
    Usr2,
}

impl Signal {
    /// The name the runtime's `kill` command expects.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Term => "TERM",
            Self::Quit => "QUIT",
            Self::Int => "INT",
            Self::Kill => "KILL",
            Self::Hup => "HUP",
            Self::Usr1 => "USR1",
            Self::Usr2 => "USR2",
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stdio destinations for a container launch. Detached launches write to
/// the process's log files; attached launches inherit the caller's stdio.
#[derive(Debug, Default)]
pub struct LaunchIo {
    pub stdout: Option<std::fs::File>,
    pub stderr: Option<std::fs::File>,
}

/// Command/query interface over the external container runtime.
///
/// Implementations must not retry internally; recovery policy belongs to
/// the lifecycle.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Materialize a bundle: the directory, the serialized spec, and an
    /// empty user-owned root filesystem. Errors if a non-directory already
    /// occupies the path.
    async fn create_bundle(&self, bundle_path: &Path, spec: &Spec, user: &BpmUser) -> Result<()>;

    /// Create and start a container, recording its outermost PID in
    /// `pidfile`. Detached mode returns `None` once creation is
    /// confirmed; attached mode blocks until the contained process exits
    /// and yields its exit status.
    async fn run_container(
        &self,
        pidfile: &Path,
        bundle_path: &Path,
        container_id: &str,
        detach: bool,
        io: LaunchIo,
    ) -> Result<Option<ExitStatus>>;

    /// Fetch live state, or `Error::NotFound`.
    async fn container_state(&self, container_id: &str) -> Result<ContainerState>;

    /// Enumerate all containers known to the runtime.
    async fn list_containers(&self) -> Result<Vec<ContainerState>>;

    /// Send a signal. Best-effort primitive for the stop path.
    async fn signal_container(&self, container_id: &str, signal: Signal) -> Result<()>;

    /// Delete runtime bookkeeping for a container, forcefully. Deleting
    /// an absent container is not an error.
    async fn delete_container(&self, container_id: &str) -> Result<()>;

    /// Remove a bundle directory. Removing an absent bundle is not an
    /// error.
    async fn destroy_bundle(&self, bundle_path: &Path) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parses_runtime_json() {
        let state: ContainerState =
            serde_json::from_str(r#"{"id":"bpm-nats","pid":4242,"status":"running"}"#).unwrap();
        assert_eq!(state.pid, 4242);
        assert_eq!(state.status, Status::Running);
    }

    #[test]
    fn test_signal_names() {
        assert_eq!(Signal::Term.as_str(), "TERM");
        assert_eq!(Signal::Quit.as_str(), "QUIT");
        assert_eq!(Signal::default(), Signal::Term);
    }

    #[test]
    fn test_signal_serde_uses_uppercase_names() {
        let signal: Signal = serde_json::from_str("\"QUIT\"").unwrap();
        assert_eq!(signal, Signal::Quit);
        assert_eq!(serde_json::to_string(&Signal::Term).unwrap(), "\"TERM\"");
    }
}
