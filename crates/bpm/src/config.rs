//! Process definitions and identities.
//!
//! A `ProcessConfig` is the declarative description of one supervised
//! process. Configs arrive from the host job-management system already
//! parsed; `validate` only re-checks the invariants the lifecycle depends
//! on before touching the runtime.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::runtime::Signal;

/// A (job, process) pair naming one supervised process.
///
/// Jobs with a single process conventionally name it after the job itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    job: String,
    process: String,
}

impl Identity {
    /// Create an identity for a named process within a job.
    pub fn new(job: impl Into<String>, process: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            process: process.into(),
        }
    }

    /// Create the identity of a job's default process (process == job).
    pub fn for_job(job: impl Into<String>) -> Self {
        let job = job.into();
        Self {
            process: job.clone(),
            job,
        }
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn process(&self) -> &str {
        &self.process
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.job, self.process)
    }
}

/// Declarative definition of one supervised process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Path to the executable to run inside the container.
    pub executable: String,
    /// Arguments passed after the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables injected into the container.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Resource limits. Absent limits inherit runtime defaults.
    #[serde(default)]
    pub limits: Option<Limits>,
    /// Additional host directories mounted into the container.
    #[serde(default)]
    pub volumes: Vec<Volume>,
    /// Additional capabilities (unprefixed, e.g. "NET_BIND_SERVICE").
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Lifecycle hooks run on the host.
    #[serde(default)]
    pub hooks: Option<Hooks>,
    /// Signal sent on graceful shutdown.
    #[serde(default)]
    pub shutdown_signal: Signal,
    /// Run with a broad capability set and no syscall filtering. Explicit
    /// opt-in; never a default.
    #[serde(default)]
    pub privileged: bool,
    /// Disable the default seccomp profile without going fully privileged.
    #[serde(default)]
    pub unsafe_unrestricted_syscalls: bool,
    /// Mount the host-wide ephemeral data root read-write, not just the
    /// job's own data directory.
    #[serde(default)]
    pub ephemeral_disk: bool,
    /// Mount the job's persistent store directory read-write.
    #[serde(default)]
    pub persistent_disk: bool,
}

impl ProcessConfig {
    /// Re-check the invariants the lifecycle depends on. Full validation
    /// happens in the invoking layer when the config is loaded.
    pub fn validate(&self) -> Result<()> {
        if self.executable.is_empty() {
            return Err(Error::InvalidConfig("executable must be set".to_string()));
        }
        for volume in &self.volumes {
            if !volume.path.is_absolute() {
                return Err(Error::InvalidConfig(format!(
                    "volume path {} is not absolute",
                    volume.path.display()
                )));
            }
        }
        Ok(())
    }
}

/// Resource limits for a process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Limits {
    /// Memory ceiling as a human-readable size string (e.g. "512M", "2G").
    #[serde(default)]
    pub memory: Option<String>,
    /// Ceiling on open file descriptors (RLIMIT_NOFILE, hard == soft).
    #[serde(default)]
    pub open_files: Option<u64>,
    /// Ceiling on the number of processes in the container.
    #[serde(default)]
    pub processes: Option<i64>,
}

/// A user-declared volume mounted into the container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    /// Absolute host path; mounted at the same path inside the container.
    pub path: PathBuf,
    /// Mount read-write. Volumes are read-only unless marked writable.
    #[serde(default)]
    pub writable: bool,
    /// Allow executing binaries from the volume (drops `noexec`).
    #[serde(default)]
    pub allow_executions: bool,
    /// Only mount the path; do not create or chown it during scaffolding.
    #[serde(default)]
    pub mount_only: bool,
}

impl Volume {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writable: false,
            allow_executions: false,
            mount_only: false,
        }
    }
}

/// Host-side lifecycle hooks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hooks {
    /// Executable run on the host before the container is created. A
    /// failure aborts the start.
    #[serde(default)]
    pub pre_start: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_for_job_defaults_process_to_job() {
        let id = Identity::for_job("nats");
        assert_eq!(id.job(), "nats");
        assert_eq!(id.process(), "nats");
    }

    #[test]
    fn test_validate_rejects_empty_executable() {
        let cfg = ProcessConfig {
            executable: String::new(),
            args: vec![],
            env: BTreeMap::new(),
            limits: None,
            volumes: vec![],
            capabilities: vec![],
            hooks: None,
            shutdown_signal: Signal::default(),
            privileged: false,
            unsafe_unrestricted_syscalls: false,
            ephemeral_disk: false,
            persistent_disk: false,
        };
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_config_deserializes_from_yaml() {
        let yaml = r#"
executable: /var/vcap/packages/server/bin/server
args:
  - --port
  - "2424"
env:
  FOO: BAR
limits:
  memory: 1G
  open_files: 2048
volumes:
  - path: /var/vcap/data/shared
    writable: true
shutdown_signal: QUIT
"#;
        let cfg: ProcessConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.executable, "/var/vcap/packages/server/bin/server");
        assert_eq!(cfg.args, vec!["--port", "2424"]);
        assert_eq!(cfg.env.get("FOO").map(String::as_str), Some("BAR"));
        assert_eq!(cfg.limits.as_ref().unwrap().memory.as_deref(), Some("1G"));
        assert_eq!(cfg.limits.as_ref().unwrap().open_files, Some(2048));
        assert!(cfg.volumes[0].writable);
        assert_eq!(cfg.shutdown_signal, Signal::Quit);
        assert!(!cfg.privileged);
        cfg.validate().unwrap();
    }
}
