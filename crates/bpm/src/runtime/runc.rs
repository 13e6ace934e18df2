//! Subprocess adapter for an OCI-compatible runtime binary.

use async_trait::async_trait;
use log::debug;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;

use super::{ContainerState, LaunchIo, RuntimeClient, Signal};
use crate::error::{Error, Result};
use crate::spec::Spec;
use crate::users::BpmUser;

/// Drives the runtime binary (`runc` by convention) with the subprocess
/// protocol: `run`, `state`, `list`, `kill`, `delete`.
#[derive(Debug, Clone)]
pub struct RuncClient {
    runtime_path: PathBuf,
}

impl RuncClient {
    pub fn new(runtime_path: impl Into<PathBuf>) -> Self {
        Self {
            runtime_path: runtime_path.into(),
        }
    }

    /// Run a runtime subcommand to completion, folding a failure exit into
    /// `Error::RuntimeCommand`.
    async fn output(&self, command: &str, args: &[&str]) -> Result<Vec<u8>> {
        debug!("running {} {} {}", self.runtime_path.display(), command, args.join(" "));
        let output = Command::new(&self.runtime_path)
            .arg(command)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::RuntimeCommand {
                command: command.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::RuntimeCommand {
                command: command.to_string(),
                message: stderr.trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

fn missing_container(message: &str) -> bool {
    message.contains("does not exist") || message.contains("not found")
}

#[async_trait]
impl RuntimeClient for RuncClient {
    async fn create_bundle(&self, bundle_path: &Path, spec: &Spec, user: &BpmUser) -> Result<()> {
        // create_dir_all fails if a non-directory occupies any component.
        tokio::fs::create_dir_all(bundle_path).await?;

        let config = serde_json::to_vec_pretty(spec).map_err(io::Error::other)?;
        let config_path = bundle_path.join("config.json");
        {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&config_path)?;
            file.write_all(&config)?;
        }

        let rootfs = bundle_path.join("rootfs");
        tokio::fs::create_dir_all(&rootfs).await?;
        std::os::unix::fs::chown(&rootfs, Some(user.uid), Some(user.gid))?;
        Ok(())
    }

    async fn run_container(
        &self,
        pidfile: &Path,
        bundle_path: &Path,
        container_id: &str,
        detach: bool,
        io: LaunchIo,
    ) -> Result<Option<ExitStatus>> {
        let mut command = Command::new(&self.runtime_path);
        command
            .arg("run")
            .arg("--bundle")
            .arg(bundle_path)
            .arg("--pid-file")
            .arg(pidfile);
        if detach {
            command.arg("--detach");
        }
        command.arg(container_id);

        match io.stdout {
            Some(file) => command.stdout(Stdio::from(file)),
            None => command.stdout(Stdio::inherit()),
        };
        match io.stderr {
            Some(file) => command.stderr(Stdio::from(file)),
            None => command.stderr(Stdio::inherit()),
        };

        if detach {
            let status = command.status().await.map_err(|e| Error::RuntimeCommand {
                command: "run".to_string(),
                message: e.to_string(),
            })?;
            if !status.success() {
                return Err(Error::RuntimeCommand {
                    command: "run".to_string(),
                    message: format!("runtime exited with {status}"),
                });
            }
            return Ok(None);
        }

        // Attached: the runtime's exit status is the contained process's
        // exit status, which the caller propagates verbatim.
        let status = command.status().await.map_err(|e| Error::RuntimeCommand {
            command: "run".to_string(),
            message: e.to_string(),
        })?;
        Ok(Some(status))
    }

    async fn container_state(&self, container_id: &str) -> Result<ContainerState> {
        match self.output("state", &[container_id]).await {
            Ok(stdout) => serde_json::from_slice(&stdout).map_err(|e| Error::RuntimeCommand {
                command: "state".to_string(),
                message: format!("parsing state output: {e}"),
            }),
            Err(Error::RuntimeCommand { message, .. }) if missing_container(&message) => {
                Err(Error::NotFound(container_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn list_containers(&self) -> Result<Vec<ContainerState>> {
        let stdout = self.output("list", &["--format", "json"]).await?;
        let text = String::from_utf8_lossy(&stdout);
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(vec![]);
        }
        serde_json::from_str(trimmed).map_err(|e| Error::RuntimeCommand {
            command: "list".to_string(),
            message: format!("parsing list output: {e}"),
        })
    }

    async fn signal_container(&self, container_id: &str, signal: Signal) -> Result<()> {
        self.output("kill", &[container_id, signal.as_str()])
            .await?;
        Ok(())
    }

    async fn delete_container(&self, container_id: &str) -> Result<()> {
        match self.output("delete", &["-f", container_id]).await {
            Ok(_) => Ok(()),
            Err(Error::RuntimeCommand { message, .. }) if missing_container(&message) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn destroy_bundle(&self, bundle_path: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(bundle_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Identity;
    use crate::layout::Layout;
    use crate::spec::{BuildOptions, SpecBuilder};
    use std::os::unix::fs::PermissionsExt;

    fn sample_spec() -> Spec {
        let layout = Layout::new("/var/vcap", "/var/vcap/data/bpm/bundles");
        SpecBuilder::new(layout, BuildOptions::default())
            .build(
                &Identity::for_job("nats"),
                &crate::config::ProcessConfig {
                    executable: "/bin/server".to_string(),
                    args: vec![],
                    env: Default::default(),
                    limits: None,
                    volumes: vec![],
                    capabilities: vec![],
                    hooks: None,
                    shutdown_signal: Default::default(),
                    privileged: false,
                    unsafe_unrestricted_syscalls: false,
                    ephemeral_disk: false,
                    persistent_disk: false,
                },
                &BpmUser::current(),
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_bundle_materializes_spec_and_rootfs() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("nats").join("nats");
        let client = RuncClient::new("/usr/bin/runc");

        client
            .create_bundle(&bundle, &sample_spec(), &BpmUser::current())
            .await
            .unwrap();

        let config_path = bundle.join("config.json");
        let mode = std::fs::metadata(&config_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let raw = std::fs::read(&config_path).unwrap();
        let parsed: Spec = serde_json::from_slice(&raw).unwrap();
        assert_eq!(parsed, sample_spec());

        let rootfs = bundle.join("rootfs");
        assert!(rootfs.is_dir());
        assert_eq!(std::fs::read_dir(&rootfs).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_create_bundle_rejects_non_directory_occupant() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("occupied");
        std::fs::write(&bundle, b"file").unwrap();

        let client = RuncClient::new("/usr/bin/runc");
        let err = client
            .create_bundle(&bundle, &sample_spec(), &BpmUser::current())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn test_destroy_bundle_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("gone");
        let client = RuncClient::new("/usr/bin/runc");
        client.destroy_bundle(&bundle).await.unwrap();

        std::fs::create_dir_all(bundle.join("rootfs")).unwrap();
        client.destroy_bundle(&bundle).await.unwrap();
        assert!(!bundle.exists());
    }

    #[tokio::test]
    async fn test_missing_runtime_binary_surfaces_command_error() {
        let client = RuncClient::new("/no/such/runtime");
        let err = client.container_state("bpm-nats").await.unwrap_err();
        assert!(matches!(err, Error::RuntimeCommand { .. }));
    }

    #[test]
    fn test_missing_container_detection() {
        assert!(missing_container("container \"bpm-x\" does not exist"));
        assert!(!missing_container("permission denied"));
    }
}
