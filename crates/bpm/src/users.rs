//! Target user resolution.
//!
//! Containers run as an unprivileged system account (conventionally
//! `vcap`). Resolving that account against the OS is the invoking layer's
//! concern, so the lifecycle only sees the `UserFinder` seam; tests supply
//! a double that returns the current process's identity.

use async_trait::async_trait;

use crate::error::Result;

/// A resolved OS account that owns the container and its filesystem state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BpmUser {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

impl BpmUser {
    pub fn new(name: impl Into<String>, uid: u32, gid: u32) -> Self {
        Self {
            name: name.into(),
            uid,
            gid,
        }
    }

    /// The superuser identity substituted for privileged containers.
    pub fn root() -> Self {
        Self::new("root", 0, 0)
    }

    /// The identity of the calling process.
    pub fn current() -> Self {
        Self::new(
            "current",
            rustix::process::getuid().as_raw(),
            rustix::process::getgid().as_raw(),
        )
    }
}

/// Resolves an account name to a concrete uid/gid pair.
#[async_trait]
pub trait UserFinder: Send + Sync {
    async fn find(&self, name: &str) -> Result<BpmUser>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_user_matches_process_ids() {
        let user = BpmUser::current();
        assert_eq!(user.uid, rustix::process::getuid().as_raw());
        assert_eq!(user.gid, rustix::process::getgid().as_raw());
    }

    #[test]
    fn test_root_user() {
        let root = BpmUser::root();
        assert_eq!((root.uid, root.gid), (0, 0));
    }
}
