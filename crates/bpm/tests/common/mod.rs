//! Shared test doubles for lifecycle tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Mutex;

use bpm::error::{Error, Result};
use bpm::runtime::{ContainerState, LaunchIo, RuntimeClient, Signal, Status};
use bpm::spec::Spec;
use bpm::users::{BpmUser, UserFinder};

/// One scripted response for `container_state`.
#[derive(Debug, Clone)]
pub enum ScriptedState {
    Found(i32, Status),
    NotFound,
    /// The runtime is unreachable or its bookkeeping is corrupt.
    Broken,
}

/// A recorded runtime invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    CreateBundle(PathBuf),
    Run { id: String, detach: bool },
    Signal { id: String, signal: Signal },
    Delete(String),
    DestroyBundle(PathBuf),
}

/// Scripted in-memory runtime. State responses are consumed in order;
/// once the script is exhausted the last response repeats.
pub struct MockRuntime {
    id: String,
    states: Mutex<VecDeque<ScriptedState>>,
    last: Mutex<ScriptedState>,
    listing: Mutex<Vec<ContainerState>>,
    run_exit: Mutex<i32>,
    calls: Mutex<Vec<RuntimeCall>>,
}

impl MockRuntime {
    pub fn new(id: impl Into<String>, script: Vec<ScriptedState>) -> Self {
        Self {
            id: id.into(),
            states: Mutex::new(script.into()),
            last: Mutex::new(ScriptedState::NotFound),
            listing: Mutex::new(vec![]),
            run_exit: Mutex::new(0),
            calls: Mutex::new(vec![]),
        }
    }

    pub fn with_listing(self, listing: Vec<ContainerState>) -> Self {
        *self.listing.lock().unwrap() = listing;
        self
    }

    /// Raw wait status the next attached run reports.
    pub fn set_run_exit(&self, raw: i32) {
        *self.run_exit.lock().unwrap() = raw;
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn signals_sent(&self) -> Vec<Signal> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RuntimeCall::Signal { signal, .. } => Some(signal),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: RuntimeCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_state(&self) -> ScriptedState {
        let mut states = self.states.lock().unwrap();
        match states.pop_front() {
            Some(state) => {
                *self.last.lock().unwrap() = state.clone();
                state
            }
            None => self.last.lock().unwrap().clone(),
        }
    }
}

#[async_trait]
impl RuntimeClient for MockRuntime {
    async fn create_bundle(&self, bundle_path: &Path, _spec: &Spec, _user: &BpmUser) -> Result<()> {
        self.record(RuntimeCall::CreateBundle(bundle_path.to_path_buf()));
        Ok(())
    }

    async fn run_container(
        &self,
        _pidfile: &Path,
        _bundle_path: &Path,
        container_id: &str,
        detach: bool,
        _io: LaunchIo,
    ) -> Result<Option<ExitStatus>> {
        self.record(RuntimeCall::Run {
            id: container_id.to_string(),
            detach,
        });
        if detach {
            Ok(None)
        } else {
            Ok(Some(ExitStatus::from_raw(*self.run_exit.lock().unwrap())))
        }
    }

    async fn container_state(&self, container_id: &str) -> Result<ContainerState> {
        match self.next_state() {
            ScriptedState::Found(pid, status) => Ok(ContainerState {
                id: self.id.clone(),
                pid,
                status,
            }),
            ScriptedState::NotFound => Err(Error::NotFound(container_id.to_string())),
            ScriptedState::Broken => Err(Error::RuntimeCommand {
                command: "state".to_string(),
                message: "bookkeeping corrupted".to_string(),
            }),
        }
    }

    async fn list_containers(&self) -> Result<Vec<ContainerState>> {
        Ok(self.listing.lock().unwrap().clone())
    }

    async fn signal_container(&self, container_id: &str, signal: Signal) -> Result<()> {
        self.record(RuntimeCall::Signal {
            id: container_id.to_string(),
            signal,
        });
        Ok(())
    }

    async fn delete_container(&self, container_id: &str) -> Result<()> {
        self.record(RuntimeCall::Delete(container_id.to_string()));
        Ok(())
    }

    async fn destroy_bundle(&self, bundle_path: &Path) -> Result<()> {
        self.record(RuntimeCall::DestroyBundle(bundle_path.to_path_buf()));
        Ok(())
    }
}

/// Resolves every name to the current process's uid/gid, so chown calls
/// in scaffolding always succeed under an unprivileged test run.
pub struct CurrentUserFinder;

#[async_trait]
impl UserFinder for CurrentUserFinder {
    async fn find(&self, name: &str) -> Result<BpmUser> {
        let current = BpmUser::current();
        Ok(BpmUser::new(name, current.uid, current.gid))
    }
}
