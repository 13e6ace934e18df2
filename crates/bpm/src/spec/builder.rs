//! Builds a runtime specification from a process definition.

use std::path::{Path, PathBuf};

use super::{
    Capabilities, Linux, Memory, Mount, Namespace, Pids, Process, Resources, Rlimit, Root, Seccomp,
    Spec, User, mounts,
};
use crate::config::{Identity, ProcessConfig};
use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::users::BpmUser;

const OCI_VERSION: &str = "1.0.2";

/// Capabilities granted to privileged containers.
const PRIVILEGED_CAPS: &[&str] = &[
    "CAP_AUDIT_CONTROL",
    "CAP_AUDIT_READ",
    "CAP_AUDIT_WRITE",
    "CAP_BLOCK_SUSPEND",
    "CAP_CHOWN",
    "CAP_DAC_OVERRIDE",
    "CAP_DAC_READ_SEARCH",
    "CAP_FOWNER",
    "CAP_FSETID",
    "CAP_IPC_LOCK",
    "CAP_IPC_OWNER",
    "CAP_KILL",
    "CAP_LEASE",
    "CAP_LINUX_IMMUTABLE",
    "CAP_MKNOD",
    "CAP_NET_ADMIN",
    "CAP_NET_BIND_SERVICE",
    "CAP_NET_BROADCAST",
    "CAP_NET_RAW",
    "CAP_SETFCAP",
    "CAP_SETGID",
    "CAP_SETPCAP",
    "CAP_SETUID",
    "CAP_SYSLOG",
    "CAP_SYS_ADMIN",
    "CAP_SYS_BOOT",
    "CAP_SYS_CHROOT",
    "CAP_SYS_NICE",
    "CAP_SYS_PACCT",
    "CAP_SYS_PTRACE",
    "CAP_SYS_RAWIO",
    "CAP_SYS_RESOURCE",
    "CAP_SYS_TIME",
    "CAP_SYS_TTY_CONFIG",
    "CAP_WAKE_ALARM",
];

/// Host facts the builder must not probe itself; build them once with
/// [`host_swap_accounting`] and inject.
#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    /// Whether the kernel exposes swap accounting. When false, memory
    /// limits are not mirrored to swap.
    pub swap_accounting: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            swap_accounting: true,
        }
    }
}

/// Probe whether the host kernel accounts swap in the memory cgroup.
pub fn host_swap_accounting() -> bool {
    Path::new("/sys/fs/cgroup/memory/memory.memsw.limit_in_bytes").exists()
}

/// Pure translation from a process definition and resolved identity to a
/// runtime specification.
#[derive(Debug, Clone)]
pub struct SpecBuilder {
    layout: Layout,
    options: BuildOptions,
}

impl SpecBuilder {
    pub fn new(layout: Layout, options: BuildOptions) -> Self {
        Self { layout, options }
    }

    /// Build the specification for one start of `identity`.
    pub fn build(
        &self,
        identity: &Identity,
        cfg: &ProcessConfig,
        user: &BpmUser,
    ) -> Result<Spec> {
        let mut args = vec![cfg.executable.clone()];
        args.extend(cfg.args.iter().cloned());

        let mut env: Vec<String> = cfg.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        env.push(format!(
            "TMPDIR={}",
            self.layout.temp_dir(identity.job()).display()
        ));

        let mut rlimits = Vec::new();
        if let Some(open_files) = cfg.limits.as_ref().and_then(|l| l.open_files) {
            rlimits.push(Rlimit {
                kind: "RLIMIT_NOFILE".to_string(),
                hard: open_files,
                soft: open_files,
            });
        }

        let spec_user = if cfg.privileged {
            User { uid: 0, gid: 0 }
        } else {
            User {
                uid: user.uid,
                gid: user.gid,
            }
        };

        let capabilities = if cfg.privileged {
            Capabilities::uniform(PRIVILEGED_CAPS.iter().map(|c| (*c).to_string()).collect())
        } else {
            Capabilities::uniform(
                cfg.capabilities
                    .iter()
                    .map(|c| format!("CAP_{c}"))
                    .collect(),
            )
        };

        let mut mounts = mounts::compose(vec![
            mounts::vfs_mounts(),
            mounts::bpm_mounts(&self.layout, identity, cfg),
            mounts::host_identity_mounts(),
            mounts::volume_mounts(&cfg.volumes),
        ]);
        if cfg.privileged {
            // nosuid comes off every layer, virtual filesystems included.
            for mount in &mut mounts {
                mount.options.retain(|o| o != "nosuid");
            }
        }

        let seccomp = if cfg.privileged || cfg.unsafe_unrestricted_syscalls {
            None
        } else {
            Some(Seccomp::default_profile())
        };

        let (masked_paths, readonly_paths) = if cfg.privileged {
            (Vec::new(), Vec::new())
        } else {
            (default_masked_paths(), default_readonly_paths())
        };

        Ok(Spec {
            oci_version: OCI_VERSION.to_string(),
            process: Process {
                user: spec_user,
                args,
                env,
                cwd: self.layout.root().to_path_buf(),
                rlimits,
                capabilities,
                no_new_privileges: true,
            },
            root: Root {
                path: PathBuf::from("rootfs"),
                readonly: false,
            },
            mounts,
            linux: Linux {
                namespaces: vec![
                    Namespace::of("mount"),
                    Namespace::of("pid"),
                    Namespace::of("ipc"),
                    Namespace::of("uts"),
                ],
                resources: self.resources(cfg)?,
                masked_paths,
                readonly_paths,
                rootfs_propagation: "private".to_string(),
                seccomp,
            },
        })
    }

    /// Absent limits inherit the runtime's defaults.
    fn resources(&self, cfg: &ProcessConfig) -> Result<Option<Resources>> {
        let Some(limits) = cfg.limits.as_ref() else {
            return Ok(None);
        };

        let memory = limits
            .memory
            .as_deref()
            .map(parse_memory_limit)
            .transpose()?
            .map(|limit| Memory {
                limit,
                swap: self.options.swap_accounting.then_some(limit),
            });

        let pids = limits.processes.map(|limit| Pids { limit });

        Ok(Some(Resources { memory, pids }))
    }
}

fn default_masked_paths() -> Vec<PathBuf> {
    [
        "/proc/kcore",
        "/proc/keys",
        "/proc/latency_stats",
        "/proc/sched_debug",
        "/proc/scsi",
        "/proc/timer_list",
        "/proc/timer_stats",
        "/sys/firmware",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

fn default_readonly_paths() -> Vec<PathBuf> {
    [
        "/proc/asound",
        "/proc/bus",
        "/proc/fs",
        "/proc/irq",
        "/proc/sys",
        "/proc/sysrq-trigger",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

/// Parse a human-readable size string ("512K", "1G", "64mb", bare bytes)
/// into bytes. Multiples are binary.
pub fn parse_memory_limit(s: &str) -> Result<u64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidLimit(s.to_string()));
    }

    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, suffix) = trimmed.split_at(digits_end);
    let value: u64 = digits
        .parse()
        .map_err(|_| Error::InvalidLimit(s.to_string()))?;

    let multiplier: u64 = match suffix.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" => 1 << 10,
        "M" | "MB" => 1 << 20,
        "G" | "GB" => 1 << 30,
        "T" | "TB" => 1 << 40,
        _ => return Err(Error::InvalidLimit(s.to_string())),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| Error::InvalidLimit(s.to_string()))
}
