//! Process lifecycle orchestration.
//!
//! The controller composes the codec, the lock namespace, the spec
//! builder, the schedule engine and the runtime client into the public
//! start/run/stop/remove/stat/list operations. Every mutating operation
//! holds the identity's advisory lock from entry to exit; reads take no
//! lock and may observe a racing snapshot.

use log::{debug, info, warn};
use serde::Serialize;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::{Identity, ProcessConfig};
use crate::error::{Error, Result};
use crate::ids;
use crate::layout::Layout;
use crate::lockfile::{LockDir, LockFile};
use crate::runtime::{LaunchIo, RuntimeClient, Signal, Status};
use crate::schedule::{ActionMap, RunOptions, Schedule, action};
use crate::spec::{BuildOptions, SpecBuilder};
use crate::users::{BpmUser, UserFinder};

/// Schedule action key for the graceful shutdown signal.
const GRACEFUL: &str = "graceful";
/// Schedule action key for the forceful shutdown signal.
const FORCEFUL: &str = "forceful";

/// Tunables for the lifecycle controller.
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Account that owns containers and their filesystem state.
    pub username: String,
    /// Interval between state polls while stopping.
    pub poll_interval: Duration,
    /// Wait after the forceful signal before giving up.
    pub force_grace: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            username: "vcap".to_string(),
            poll_interval: Duration::from_secs(1),
            force_grace: Duration::from_secs(5),
        }
    }
}

/// Logical view of one supervised process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessStat {
    pub name: String,
    pub pid: i32,
    pub status: ProcessStatus,
}

/// Logical process status presented to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Created,
    Running,
    Stopped,
    /// The runtime reports a non-running container with no recorded pid:
    /// the process died outside our control.
    Failed,
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

fn logical_status(pid: i32, status: Status) -> ProcessStatus {
    match status {
        Status::Running => ProcessStatus::Running,
        _ if pid == 0 => ProcessStatus::Failed,
        Status::Created => ProcessStatus::Created,
        Status::Stopped => ProcessStatus::Stopped,
    }
}

/// Orchestrates container lifecycle transitions for supervised processes.
pub struct Lifecycle {
    runtime: Arc<dyn RuntimeClient>,
    users: Arc<dyn UserFinder>,
    builder: SpecBuilder,
    layout: Layout,
    locks: LockDir,
    options: LifecycleOptions,
}

impl Lifecycle {
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        users: Arc<dyn UserFinder>,
        layout: Layout,
        build_options: BuildOptions,
        options: LifecycleOptions,
    ) -> Self {
        let locks = LockDir::new(layout.lock_dir());
        let builder = SpecBuilder::new(layout.clone(), build_options);
        Self {
            runtime,
            users,
            builder,
            layout,
            locks,
            options,
        }
    }

    /// Start a process in a detached container.
    ///
    /// Starting an already-running identity is a no-op. A stopped, failed
    /// or unreadable runtime record is force-removed first and a fresh
    /// start proceeds.
    pub async fn start_process(&self, identity: &Identity, cfg: &ProcessConfig) -> Result<()> {
        let mut lock = self.locks.lock_for(identity)?;
        lock.lock().await?;
        let result = self.start_locked(identity, cfg).await;
        finish(result, &mut lock)
    }

    /// Run a process attached, returning the contained process's exit
    /// status. The pidfile is always deleted on completion: an errand
    /// leaves no durable running-state behind.
    pub async fn run_process(
        &self,
        identity: &Identity,
        cfg: &ProcessConfig,
    ) -> Result<ExitStatus> {
        let mut lock = self.locks.lock_for(identity)?;
        lock.lock().await?;
        let result = self.run_locked(identity, cfg).await;
        finish(result, &mut lock)
    }

    /// Stop a process gracefully, escalating to the forceful signal when
    /// `timeout` elapses. Stopping an absent or already-stopped identity
    /// is success without sending any signal.
    pub async fn stop_process(
        &self,
        identity: &Identity,
        cfg: &ProcessConfig,
        timeout: Duration,
    ) -> Result<()> {
        let mut lock = self.locks.lock_for(identity)?;
        lock.lock().await?;
        let result = self.stop_locked(identity, cfg, timeout).await;
        finish(result, &mut lock)
    }

    /// Remove all runtime bookkeeping for a process. Removing an absent
    /// identity is not an error.
    pub async fn remove_process(&self, identity: &Identity) -> Result<()> {
        let mut lock = self.locks.lock_for(identity)?;
        lock.lock().await?;
        let result = self.remove_locked(identity).await;
        finish(result, &mut lock)
    }

    /// Fetch the logical view of one process. Takes no lock.
    pub async fn stat_process(&self, identity: &Identity) -> Result<ProcessStat> {
        let id = ids::for_identity(identity);
        let state = self.runtime.container_state(&id).await?;
        Ok(ProcessStat {
            name: ids::decode(&state.id).unwrap_or(state.id),
            pid: state.pid,
            status: logical_status(state.pid, state.status),
        })
    }

    /// List every supervised process the runtime knows about. Containers
    /// whose identifiers were not produced by the codec belong to someone
    /// else and are skipped. Takes no lock.
    pub async fn list_processes(&self) -> Result<Vec<ProcessStat>> {
        let containers = self.runtime.list_containers().await?;
        let mut stats = Vec::with_capacity(containers.len());
        for state in containers {
            match ids::decode(&state.id) {
                Ok(name) => stats.push(ProcessStat {
                    name,
                    pid: state.pid,
                    status: logical_status(state.pid, state.status),
                }),
                Err(_) => debug!("skipping foreign container {}", state.id),
            }
        }
        Ok(stats)
    }

    async fn start_locked(&self, identity: &Identity, cfg: &ProcessConfig) -> Result<()> {
        cfg.validate()?;
        let id = ids::for_identity(identity);

        match self.runtime.container_state(&id).await {
            Ok(state) if state.status == Status::Running => {
                info!("{identity} is already running (pid {}), nothing to do", state.pid);
                return Ok(());
            }
            Ok(state) => {
                info!("removing {identity} container in state {}", state.status);
                self.force_remove(identity, &id).await?;
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                // Broken runtime bookkeeping self-heals: remove and retry.
                warn!("unreadable state for {identity}: {e}; force removing");
                self.force_remove(identity, &id).await?;
            }
        }

        let user = self.users.find(&self.options.username).await?;
        self.scaffold(identity, cfg, &user).await?;
        self.run_pre_start_hook(identity, cfg).await?;

        let spec = self.builder.build(identity, cfg, &user)?;
        let bundle = self.layout.bundle(identity);
        self.runtime.create_bundle(&bundle, &spec, &user).await?;

        let (stdout, stderr) = self.open_log_files(identity)?;
        info!("starting {identity} as container {id}");
        self.runtime
            .run_container(
                &self.layout.pidfile(identity),
                &bundle,
                &id,
                true,
                LaunchIo {
                    stdout: Some(stdout),
                    stderr: Some(stderr),
                },
            )
            .await?;
        Ok(())
    }

    async fn run_locked(&self, identity: &Identity, cfg: &ProcessConfig) -> Result<ExitStatus> {
        cfg.validate()?;
        let id = ids::for_identity(identity);

        match self.runtime.container_state(&id).await {
            Err(e) if e.is_not_found() => {}
            Ok(state) if state.status == Status::Running => {
                return Err(Error::InvalidConfig(format!(
                    "{identity} is already running (pid {})",
                    state.pid
                )));
            }
            _ => self.force_remove(identity, &id).await?,
        }

        let user = self.users.find(&self.options.username).await?;
        self.scaffold(identity, cfg, &user).await?;
        self.run_pre_start_hook(identity, cfg).await?;

        let spec = self.builder.build(identity, cfg, &user)?;
        let bundle = self.layout.bundle(identity);
        self.runtime.create_bundle(&bundle, &spec, &user).await?;

        let pidfile = self.layout.pidfile(identity);
        info!("running {identity} attached as container {id}");
        let launch = self
            .runtime
            .run_container(&pidfile, &bundle, &id, false, LaunchIo::default())
            .await;

        if let Err(e) = tokio::fs::remove_file(&pidfile).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("removing pidfile {}: {e}", pidfile.display());
        }

        launch?.ok_or_else(|| Error::RuntimeCommand {
            command: "run".to_string(),
            message: "attached run yielded no exit status".to_string(),
        })
    }

    async fn stop_locked(
        &self,
        identity: &Identity,
        cfg: &ProcessConfig,
        timeout: Duration,
    ) -> Result<()> {
        let id = ids::for_identity(identity);

        match self.runtime.container_state(&id).await {
            Err(e) if e.is_not_found() => return Ok(()),
            Ok(state) if state.status == Status::Stopped => return Ok(()),
            // A transient state error reads as still running.
            _ => {}
        }

        let schedule = Schedule::parse(&format!(
            "{GRACEFUL}/{}/{FORCEFUL}/{}",
            timeout.as_secs(),
            self.options.force_grace.as_secs()
        ));

        let stopped = CancellationToken::new();
        let poller = self.spawn_stop_poller(id.clone(), stopped.clone());

        let mut actions = ActionMap::new();
        actions.insert(GRACEFUL.to_string(), {
            let runtime = self.runtime.clone();
            let id = id.clone();
            let signal = cfg.shutdown_signal;
            action(move || {
                let runtime = runtime.clone();
                let id = id.clone();
                async move {
                    info!("sending {signal} to {id}");
                    match runtime.signal_container(&id, signal).await {
                        Err(e) if !e.is_not_found() => Err(e),
                        _ => Ok(()),
                    }
                }
            })
        });
        actions.insert(FORCEFUL.to_string(), {
            let runtime = self.runtime.clone();
            let id = id.clone();
            action(move || {
                let runtime = runtime.clone();
                let id = id.clone();
                async move {
                    warn!("graceful stop deadline passed, sending {} to {id}", Signal::Quit);
                    // Best-effort: the verdict is TimedOut regardless.
                    if let Err(e) = runtime.signal_container(&id, Signal::Quit).await {
                        warn!("forceful signal to {id} failed: {e}");
                    }
                    Ok(())
                }
            })
        });

        let run_result = schedule.run(&stopped, &actions, RunOptions::default()).await;
        poller.abort();
        run_result?;

        if stopped.is_cancelled() {
            return Ok(());
        }

        match self.runtime.container_state(&id).await {
            Ok(state) if state.status == Status::Stopped => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            _ => Err(Error::TimedOut(identity.to_string())),
        }
    }

    fn spawn_stop_poller(
        &self,
        id: String,
        stopped: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let runtime = self.runtime.clone();
        let interval = self.options.poll_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match runtime.container_state(&id).await {
                    Ok(state) if state.status == Status::Stopped => {
                        stopped.cancel();
                        return;
                    }
                    Err(e) if e.is_not_found() => {
                        stopped.cancel();
                        return;
                    }
                    // Transient fetch errors read as still running.
                    _ => {}
                }
            }
        })
    }

    async fn remove_locked(&self, identity: &Identity) -> Result<()> {
        let id = ids::for_identity(identity);
        self.runtime.delete_container(&id).await?;
        self.runtime.destroy_bundle(&self.layout.bundle(identity)).await?;

        let pidfile = self.layout.pidfile(identity);
        match tokio::fs::remove_file(&pidfile).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove broken runtime bookkeeping so a fresh start can proceed.
    async fn force_remove(&self, identity: &Identity, id: &str) -> Result<()> {
        self.runtime.delete_container(id).await?;
        self.runtime.destroy_bundle(&self.layout.bundle(identity)).await?;
        let pidfile = self.layout.pidfile(identity);
        if let Err(e) = tokio::fs::remove_file(&pidfile).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            return Err(e.into());
        }
        Ok(())
    }

    /// Create the directories and log files a start needs, owned by the
    /// target user. Scaffolding is never rolled back on failure; it is
    /// safe to reuse on retry.
    async fn scaffold(
        &self,
        identity: &Identity,
        cfg: &ProcessConfig,
        user: &BpmUser,
    ) -> Result<()> {
        let job = identity.job();
        let mut dirs = vec![
            self.layout.run_dir(job),
            self.layout.log_dir(job),
            self.layout.data_dir(job),
            self.layout.temp_dir(job),
        ];
        if cfg.persistent_disk {
            dirs.push(self.layout.store_dir(job));
        }
        for dir in dirs {
            tokio::fs::create_dir_all(&dir).await?;
            std::os::unix::fs::chown(&dir, Some(user.uid), Some(user.gid))?;
        }

        for path in [self.layout.stdout_log(identity), self.layout.stderr_log(identity)] {
            let file = std::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(&path)?;
            drop(file);
            std::os::unix::fs::chown(&path, Some(user.uid), Some(user.gid))?;
        }

        // Volume directories may be shared between jobs, so their creation
        // serializes on a path-keyed lock rather than the identity lock.
        for volume in cfg.volumes.iter().filter(|v| !v.mount_only) {
            let mut lock = self.locks.lock_for_path(&volume.path)?;
            lock.lock().await?;
            let result: Result<()> = async {
                tokio::fs::create_dir_all(&volume.path).await?;
                std::os::unix::fs::chown(&volume.path, Some(user.uid), Some(user.gid))?;
                Ok(())
            }
            .await;
            finish(result, &mut lock)?;
        }

        Ok(())
    }

    /// Run the pre-start hook on the host, logging into the process's log
    /// files. A failure aborts the start before any container exists.
    async fn run_pre_start_hook(&self, identity: &Identity, cfg: &ProcessConfig) -> Result<()> {
        let Some(hook) = cfg.hooks.as_ref().and_then(|h| h.pre_start.as_ref()) else {
            return Ok(());
        };

        let (stdout, stderr) = self.open_log_files(identity)?;
        debug!("running pre-start hook {} for {identity}", hook.display());
        let status = Command::new(hook)
            .envs(cfg.env.iter())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .status()
            .await
            .map_err(|e| Error::HookFailed {
                hook: hook.clone(),
                reason: e.to_string(),
            })?;

        if !status.success() {
            return Err(Error::HookFailed {
                hook: hook.clone(),
                reason: format!("exited with {status}"),
            });
        }
        Ok(())
    }

    fn open_log_files(&self, identity: &Identity) -> Result<(std::fs::File, std::fs::File)> {
        let open = |path: std::path::PathBuf| {
            std::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
        };
        Ok((
            open(self.layout.stdout_log(identity))?,
            open(self.layout.stderr_log(identity))?,
        ))
    }
}

/// Release the lock on every exit path. An unlock failure surfaces only
/// when the operation itself succeeded.
fn finish<T>(result: Result<T>, lock: &mut LockFile) -> Result<T> {
    let unlocked = lock.unlock();
    match (result, unlocked) {
        (Err(e), _) => Err(e),
        (Ok(_), Err(e)) => Err(e),
        (Ok(v), Ok(())) => Ok(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_status_maps_pid_zero_to_failed() {
        assert_eq!(logical_status(4242, Status::Running), ProcessStatus::Running);
        assert_eq!(logical_status(0, Status::Stopped), ProcessStatus::Failed);
        assert_eq!(logical_status(0, Status::Created), ProcessStatus::Failed);
        assert_eq!(logical_status(4242, Status::Stopped), ProcessStatus::Stopped);
        assert_eq!(logical_status(4242, Status::Created), ProcessStatus::Created);
        // pid 0 while running is still running; the kernel never reports
        // pid 0 for a live process, but the runtime's word wins.
        assert_eq!(logical_status(0, Status::Running), ProcessStatus::Running);
    }

    #[test]
    fn test_default_options() {
        let options = LifecycleOptions::default();
        assert_eq!(options.username, "vcap");
        assert_eq!(options.poll_interval, Duration::from_secs(1));
    }
}
