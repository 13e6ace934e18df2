//! Container runtime specification.
//!
//! The types here are the subset of the OCI runtime configuration the
//! supervisor emits. A spec is built fresh on every start by
//! [`builder::SpecBuilder`], serialized into the bundle's `config.json`,
//! and never retained by the core.

mod builder;
mod mounts;

pub use builder::{BuildOptions, SpecBuilder, host_swap_accounting, parse_memory_limit};
pub use mounts::compose;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The serialized specification handed to the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    pub oci_version: String,
    pub process: Process,
    pub root: Root,
    pub mounts: Vec<Mount>,
    pub linux: Linux,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    pub user: User,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub cwd: PathBuf,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rlimits: Vec<Rlimit>,
    pub capabilities: Capabilities,
    pub no_new_privileges: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rlimit {
    #[serde(rename = "type")]
    pub kind: String,
    pub hard: u64,
    pub soft: u64,
}

/// Capability sets. All default to empty; privileged mode substitutes a
/// broad set into every one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub bounding: Vec<String>,
    pub effective: Vec<String>,
    pub inheritable: Vec<String>,
    pub permitted: Vec<String>,
    pub ambient: Vec<String>,
}

impl Capabilities {
    /// The same capability names in every set.
    pub fn uniform(caps: Vec<String>) -> Self {
        Self {
            bounding: caps.clone(),
            effective: caps.clone(),
            inheritable: caps.clone(),
            permitted: caps.clone(),
            ambient: caps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    pub path: PathBuf,
    pub readonly: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub destination: PathBuf,
    #[serde(rename = "type")]
    pub kind: String,
    pub source: PathBuf,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl Mount {
    pub fn new(
        destination: impl Into<PathBuf>,
        kind: impl Into<String>,
        source: impl Into<PathBuf>,
        options: &[&str],
    ) -> Self {
        Self {
            destination: destination.into(),
            kind: kind.into(),
            source: source.into(),
            options: options.iter().map(|o| (*o).to_string()).collect(),
        }
    }

    /// A bind mount of a host path at the same path in the container.
    pub fn bind(path: impl Into<PathBuf>, options: &[&str]) -> Self {
        let path = path.into();
        let mut all = vec!["rbind".to_string()];
        all.extend(options.iter().map(|o| (*o).to_string()));
        Self {
            destination: path.clone(),
            kind: "bind".to_string(),
            source: path,
            options: all,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Linux {
    pub namespaces: Vec<Namespace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub masked_paths: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readonly_paths: Vec<PathBuf>,
    pub rootfs_propagation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seccomp: Option<Seccomp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    #[serde(rename = "type")]
    pub kind: String,
}

impl Namespace {
    pub fn of(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<Memory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pids: Option<Pids>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    pub limit: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swap: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pids {
    pub limit: i64,
}

/// A syscall filter program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seccomp {
    pub default_action: String,
    pub architectures: Vec<String>,
    pub syscalls: Vec<SeccompRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeccompRule {
    pub names: Vec<String>,
    pub action: String,
}

impl Seccomp {
    /// The default restrictive profile: allow by default, reject syscalls
    /// that load code into the kernel, reconfigure the host, or inspect
    /// other containers' processes.
    pub fn default_profile() -> Self {
        const DENIED: &[&str] = &[
            "acct",
            "add_key",
            "bpf",
            "clock_adjtime",
            "clock_settime",
            "create_module",
            "delete_module",
            "finit_module",
            "get_kernel_syms",
            "init_module",
            "ioperm",
            "iopl",
            "kcmp",
            "kexec_file_load",
            "kexec_load",
            "keyctl",
            "lookup_dcookie",
            "mount",
            "move_mount",
            "nfsservctl",
            "open_by_handle_at",
            "perf_event_open",
            "personality",
            "pivot_root",
            "process_vm_readv",
            "process_vm_writev",
            "ptrace",
            "query_module",
            "quotactl",
            "reboot",
            "request_key",
            "setns",
            "settimeofday",
            "swapoff",
            "swapon",
            "umount2",
            "unshare",
            "uselib",
            "userfaultfd",
            "ustat",
            "vm86",
            "vm86old",
        ];

        Self {
            default_action: "SCMP_ACT_ALLOW".to_string(),
            architectures: vec![
                "SCMP_ARCH_X86_64".to_string(),
                "SCMP_ARCH_AARCH64".to_string(),
            ],
            syscalls: vec![SeccompRule {
                names: DENIED.iter().map(|s| (*s).to_string()).collect(),
                action: "SCMP_ACT_ERRNO".to_string(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_serializes_with_oci_field_names() {
        let spec = Spec {
            oci_version: "1.0.2".to_string(),
            process: Process {
                user: User { uid: 1000, gid: 1000 },
                args: vec!["/bin/server".to_string()],
                env: vec!["TMPDIR=/var/vcap/data/nats/tmp".to_string()],
                cwd: PathBuf::from("/var/vcap"),
                rlimits: vec![Rlimit {
                    kind: "RLIMIT_NOFILE".to_string(),
                    hard: 1024,
                    soft: 1024,
                }],
                capabilities: Capabilities::default(),
                no_new_privileges: true,
            },
            root: Root {
                path: PathBuf::from("rootfs"),
                readonly: false,
            },
            mounts: vec![Mount::new("/proc", "proc", "proc", &["nodev"])],
            linux: Linux {
                namespaces: vec![Namespace::of("mount")],
                resources: None,
                masked_paths: vec![PathBuf::from("/proc/kcore")],
                readonly_paths: vec![],
                rootfs_propagation: "private".to_string(),
                seccomp: Some(Seccomp::default_profile()),
            },
        };

        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["ociVersion"], "1.0.2");
        assert_eq!(json["process"]["noNewPrivileges"], true);
        assert_eq!(json["process"]["rlimits"][0]["type"], "RLIMIT_NOFILE");
        assert_eq!(json["mounts"][0]["type"], "proc");
        assert_eq!(json["linux"]["rootfsPropagation"], "private");
        assert_eq!(json["linux"]["maskedPaths"][0], "/proc/kcore");
        assert_eq!(json["linux"]["seccomp"]["defaultAction"], "SCMP_ACT_ALLOW");

        let back: Spec = serde_json::from_value(json).unwrap();
        assert_eq!(back, spec);
    }
}
