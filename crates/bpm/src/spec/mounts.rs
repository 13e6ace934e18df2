//! Mount composition.
//!
//! Mounts are composed in four fixed layers: virtual filesystems, the
//! supervisor's own per-identity binds, host identity paths, then
//! user-declared volumes. Later layers override earlier ones at the same
//! destination, so more specific layers win. The final list is sorted by
//! destination depth so nested mount points never apply before their
//! parents.

use log::debug;
use std::path::{Component, Path};

use super::Mount;
use crate::config::{Identity, ProcessConfig, Volume};
use crate::layout::Layout;

/// Layer 1: virtual filesystem mounts every container receives.
pub(super) fn vfs_mounts() -> Vec<Mount> {
    vec![
        Mount::new("/proc", "proc", "proc", &["nodev", "noexec", "nosuid"]),
        Mount::new(
            "/dev",
            "tmpfs",
            "tmpfs",
            &["nosuid", "noexec", "mode=755", "size=65536k"],
        ),
        Mount::new(
            "/dev/pts",
            "devpts",
            "devpts",
            &[
                "nosuid",
                "noexec",
                "newinstance",
                "ptmxmode=0666",
                "mode=0620",
                "gid=5",
            ],
        ),
        Mount::new(
            "/dev/shm",
            "tmpfs",
            "shm",
            &["nosuid", "noexec", "nodev", "mode=1777", "size=65536k"],
        ),
        Mount::new("/dev/mqueue", "mqueue", "mqueue", &["nosuid", "noexec", "nodev"]),
        Mount::new("/sys", "sysfs", "sysfs", &["nosuid", "noexec", "nodev", "ro"]),
    ]
}

/// Layer 2: the supervisor's per-identity bind mounts.
pub(super) fn bpm_mounts(layout: &Layout, identity: &Identity, cfg: &ProcessConfig) -> Vec<Mount> {
    let job = identity.job();
    let mut mounts = vec![
        Mount::bind(layout.data_dir(job), &["rw"]),
        Mount::bind(layout.temp_dir(job), &["rw"]),
        Mount::bind(layout.job_dir(job), &["ro"]),
        Mount::bind(layout.packages_dir(), &["ro"]),
        Mount::bind(layout.data_packages_dir(), &["ro"]),
        Mount::bind(layout.log_dir(job), &["rw"]),
    ];
    if cfg.ephemeral_disk {
        mounts.push(Mount::bind(layout.data_root(), &["rw"]));
    }
    if cfg.persistent_disk {
        mounts.push(Mount::bind(layout.store_dir(job), &["rw"]));
    }
    mounts
}

/// Layer 3: read-only host identity mounts.
pub(super) fn host_identity_mounts() -> Vec<Mount> {
    ["/bin", "/etc", "/usr", "/lib", "/lib64"]
        .iter()
        .map(|path| Mount::bind(*path, &["ro", "nosuid", "nodev"]))
        .collect()
}

/// Layer 4: user-declared volumes.
pub(super) fn volume_mounts(volumes: &[Volume]) -> Vec<Mount> {
    volumes
        .iter()
        .map(|volume| {
            let mut options = vec![if volume.writable { "rw" } else { "ro" }, "nodev", "nosuid"];
            if !volume.allow_executions {
                options.push("noexec");
            }
            Mount::bind(&volume.path, &options)
        })
        .collect()
}

/// Deduplicate composed layers (later wins, logging the discard) and sort
/// by ascending destination depth.
pub fn compose(layers: Vec<Vec<Mount>>) -> Vec<Mount> {
    let mut mounts: Vec<Mount> = Vec::new();
    for mount in layers.into_iter().flatten() {
        if let Some(existing) = mounts
            .iter_mut()
            .find(|m| m.destination == mount.destination)
        {
            debug!(
                "discarding mount of {} at {}: overridden by later mount of {}",
                existing.source.display(),
                existing.destination.display(),
                mount.source.display()
            );
            *existing = mount;
        } else {
            mounts.push(mount);
        }
    }
    mounts.sort_by_key(|m| depth(&m.destination));
    mounts
}

fn depth(path: &Path) -> usize {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count()
}
