//! Locating container cgroups and reading their accounting files.
//!
//! This module maps a sandbox ID onto its cgroup v2 control directory on a
//! mounted host filesystem and parses the pseudo-files found there into
//! integers.
//!
//! # Key Components
//!
//! - [`Resolver`]: Searches `<host>/sys/fs/cgroup` for the directory of a sandbox,
//!   covering both the cgroupfs and the systemd cgroup driver naming.
//! - [`CgroupHandle`]: A resolved directory, confined to the host root.
//! - [`CgroupHandle::read_scalar`] / [`CgroupHandle::read_keyed_field`]: Reads
//!   single-value files such as `memory.current` and `key value` files such as
//!   `cpu.stat`.
//!
//! # Platform Requirements
//!
//! - Linux with the unified cgroup v2 hierarchy mounted at `/sys/fs/cgroup` on the host.
//! - Read access to the host filesystem under the configured mount path.
mod resolve;
mod stat;

use std::path::{Path, PathBuf};

pub use resolve::{ResolveError, Resolver};
pub use stat::{InvalidValue, ReadError, parse_keyed_field, parse_scalar};

/// Absolute path of a resolved cgroup directory.
///
/// A handle always lies below the host root it was resolved against. It is
/// created fresh per sandbox per poll and never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupHandle {
    path: PathBuf,
}

impl CgroupHandle {
    /// Creates a handle for `path`, returning `None` if it does not lexically
    /// start with `host_root`.
    pub fn new(host_root: &Path, path: PathBuf) -> Option<Self> {
        if !path.starts_with(host_root) {
            return None;
        }
        Some(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
