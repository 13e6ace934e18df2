//! bpm: a per-process container supervisor.
//!
//! Translates declarative process definitions into OCI runtime
//! specifications and drives an external runtime through
//! create/start/stop/remove transitions. Concurrent invocations against
//! the same logical process serialize on cross-process advisory locks, so
//! the supervisor itself may run many times in parallel on one host.

pub mod config;
pub mod error;
pub mod ids;
pub mod layout;
pub mod lifecycle;
pub mod lockfile;
pub mod runtime;
pub mod schedule;
pub mod spec;
pub mod users;

pub use config::{Hooks, Identity, Limits, ProcessConfig, Volume};
pub use error::{Error, Result};
pub use layout::Layout;
pub use lifecycle::{Lifecycle, LifecycleOptions, ProcessStat, ProcessStatus};
pub use lockfile::{LockDir, LockFile};
pub use runtime::{ContainerState, LaunchIo, RuncClient, RuntimeClient, Signal, Status};
pub use schedule::{ActionMap, RunOptions, Schedule, Step};
pub use spec::{BuildOptions, Spec, SpecBuilder};
pub use users::{BpmUser, UserFinder};
