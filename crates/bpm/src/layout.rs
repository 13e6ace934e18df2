//! On-disk layout of supervisor state.
//!
//! All paths derive from two configurable roots: the job filesystem root
//! (conventionally `/var/vcap`) and the bundle root the runtime consumes.
//! Containers see the same paths the host does, so destinations inside the
//! container mirror these host paths.

use std::path::{Path, PathBuf};

use crate::config::Identity;

/// Derives every supervisor-owned path for jobs and processes.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
    bundles_root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>, bundles_root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            bundles_root: bundles_root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding pid files and per-identity lock files.
    pub fn run_dir(&self, job: &str) -> PathBuf {
        self.root.join("sys").join("run").join("bpm").join(job)
    }

    /// Host-wide lock directory shared by every supervisor invocation.
    pub fn lock_dir(&self) -> PathBuf {
        self.root.join("sys").join("run").join("bpm")
    }

    pub fn pidfile(&self, identity: &Identity) -> PathBuf {
        self.run_dir(identity.job())
            .join(format!("{}.pid", identity.process()))
    }

    pub fn log_dir(&self, job: &str) -> PathBuf {
        self.root.join("sys").join("log").join(job)
    }

    pub fn stdout_log(&self, identity: &Identity) -> PathBuf {
        self.log_dir(identity.job())
            .join(format!("{}.stdout.log", identity.process()))
    }

    pub fn stderr_log(&self, identity: &Identity) -> PathBuf {
        self.log_dir(identity.job())
            .join(format!("{}.stderr.log", identity.process()))
    }

    /// Host-wide ephemeral data root, mounted only on request.
    pub fn data_root(&self) -> PathBuf {
        self.root.join("data")
    }

    /// Ephemeral per-job data directory, mounted read-write.
    pub fn data_dir(&self, job: &str) -> PathBuf {
        self.data_root().join(job)
    }

    /// Per-job temp directory; injected as TMPDIR.
    pub fn temp_dir(&self, job: &str) -> PathBuf {
        self.data_dir(job).join("tmp")
    }

    /// Persistent per-job store directory, mounted only on request.
    pub fn store_dir(&self, job: &str) -> PathBuf {
        self.root.join("store").join(job)
    }

    /// Read-only job configuration directory.
    pub fn job_dir(&self, job: &str) -> PathBuf {
        self.root.join("jobs").join(job)
    }

    /// Read-only shared package directories.
    pub fn packages_dir(&self) -> PathBuf {
        self.root.join("packages")
    }

    pub fn data_packages_dir(&self) -> PathBuf {
        self.data_root().join("packages")
    }

    /// Bundle directory handed to the runtime.
    pub fn bundle(&self, identity: &Identity) -> PathBuf {
        self.bundles_root
            .join(identity.job())
            .join(identity.process())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_follow_layout() {
        let layout = Layout::new("/var/vcap", "/var/vcap/data/bpm/bundles");
        let identity = Identity::new("nats", "metrics");

        assert_eq!(
            layout.pidfile(&identity),
            PathBuf::from("/var/vcap/sys/run/bpm/nats/metrics.pid")
        );
        assert_eq!(
            layout.stdout_log(&identity),
            PathBuf::from("/var/vcap/sys/log/nats/metrics.stdout.log")
        );
        assert_eq!(
            layout.stderr_log(&identity),
            PathBuf::from("/var/vcap/sys/log/nats/metrics.stderr.log")
        );
        assert_eq!(layout.temp_dir("nats"), PathBuf::from("/var/vcap/data/nats/tmp"));
        assert_eq!(layout.store_dir("nats"), PathBuf::from("/var/vcap/store/nats"));
        assert_eq!(
            layout.bundle(&identity),
            PathBuf::from("/var/vcap/data/bpm/bundles/nats/metrics")
        );
        assert_eq!(layout.lock_dir(), PathBuf::from("/var/vcap/sys/run/bpm"));
    }
}
