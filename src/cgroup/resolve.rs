use std::ffi::OsString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::sandbox::SandboxId;

use super::CgroupHandle;

/// Location of the unified cgroup v2 mount relative to the host root.
const CGROUP2_MOUNT: &str = "sys/fs/cgroup";

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no cgroup found for sandbox `{id}` below `{root}`")]
    NotFound { id: SandboxId, root: PathBuf },

    #[error("failed to traverse cgroup directory `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("resolved cgroup `{path}` lies outside of host root `{host_root}`")]
    OutsideRoot { path: PathBuf, host_root: PathBuf },
}

/// Naming convention a cgroup directory was matched under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Driver {
    /// Directory named after the ID, e.g. `docker/<id>` or `kubepods/besteffort/pod<uid>/<id>`.
    Cgroupfs,
    /// systemd unit whose stem carries the ID, e.g. `docker-<id>.scope` or `cri-containerd-<id>.scope`.
    Systemd,
}

/// Maps sandbox IDs onto cgroup directories below `<host_root>/sys/fs/cgroup`.
///
/// Nothing is cached: every call re-traverses the hierarchy, as sandboxes come
/// and go between polls and IDs may be reused.
#[derive(Debug, Clone)]
pub struct Resolver {
    host_root: PathBuf,
    cgroup_root: PathBuf,
}

impl Resolver {
    /// Creates a resolver for the host filesystem mounted at `host_root`.
    ///
    /// A relative `host_root` is made absolute against the current directory.
    pub fn new(host_root: impl Into<PathBuf>) -> Self {
        let host_root = host_root.into();
        let host_root = std::path::absolute(&host_root).unwrap_or(host_root);
        let cgroup_root = host_root.join(CGROUP2_MOUNT);
        Self {
            host_root,
            cgroup_root,
        }
    }

    pub fn host_root(&self) -> &Path {
        &self.host_root
    }

    pub fn cgroup_root(&self) -> &Path {
        &self.cgroup_root
    }

    /// Finds the cgroup directory of the sandbox with the given ID.
    ///
    /// The hierarchy is walked depth-first, visiting siblings in lexicographic
    /// order, and the first directory whose name carries `id` is returned. The
    /// cgroup root itself is never a match and symbolic links are not followed.
    /// Subtrees that disappear while being walked are skipped.
    ///
    /// # Errors
    ///
    /// - [`ResolveError::NotFound`] if no directory matches.
    /// - [`ResolveError::Io`] if a directory cannot be listed.
    /// - [`ResolveError::OutsideRoot`] if the match is not below the host root.
    pub fn resolve(&self, id: &SandboxId) -> Result<CgroupHandle, ResolveError> {
        let id_bytes = id.as_str().as_bytes();
        let mut stack = Vec::new();
        push_subdirectories(&self.cgroup_root, &mut stack).map_err(|source| ResolveError::Io {
            path: self.cgroup_root.clone(),
            source,
        })?;

        while let Some((path, name)) = stack.pop() {
            if let Some(driver) = match_unit_name(name.as_bytes(), id_bytes) {
                log::trace!(
                    "Matched sandbox `{}` to cgroup `{}` ({:?} naming)",
                    id,
                    path.display(),
                    driver
                );
                return CgroupHandle::new(&self.host_root, path.clone()).ok_or_else(|| {
                    ResolveError::OutsideRoot {
                        path,
                        host_root: self.host_root.clone(),
                    }
                });
            }

            match push_subdirectories(&path, &mut stack) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    log::trace!("cgroup `{}` vanished during traversal", path.display());
                }
                Err(source) => return Err(ResolveError::Io { path, source }),
            }
        }

        Err(ResolveError::NotFound {
            id: id.clone(),
            root: self.cgroup_root.clone(),
        })
    }
}

/// Pushes the subdirectories of `dir` onto `stack` so that the lexicographically
/// smallest one is popped first.
///
/// Entries are classified via [`std::fs::DirEntry::file_type`], which does not
/// follow symbolic links, so links are never descended into.
fn push_subdirectories(dir: &Path, stack: &mut Vec<(PathBuf, OsString)>) -> std::io::Result<()> {
    let mut children = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        children.push((entry.path(), entry.file_name()));
    }

    children.sort_by(|(_, a), (_, b)| a.as_bytes().cmp(b.as_bytes()));
    stack.extend(children.into_iter().rev());
    Ok(())
}

/// Tests whether a cgroup directory name belongs to the sandbox `id`.
///
/// Matching is by substring, as drivers may embed the full or a truncated ID
/// between a runtime prefix and a unit suffix.
#[inline]
fn match_unit_name(name: &[u8], id: &[u8]) -> Option<Driver> {
    if id.is_empty() {
        return None;
    }

    for suffix in [b".scope".as_slice(), b".slice".as_slice()] {
        if let Some(stem) = name.strip_suffix(suffix) {
            return contains(stem, id).then_some(Driver::Systemd);
        }
    }

    contains(name, id).then_some(Driver::Cgroupfs)
}

#[inline]
fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.len() >= needle.len() && haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_ID: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn cgroup_tree(dirs: &[&str]) -> tempfile::TempDir {
        let host = tempfile::tempdir().unwrap();
        let root = host.path().join(CGROUP2_MOUNT);
        std::fs::create_dir_all(&root).unwrap();
        for dir in dirs {
            std::fs::create_dir_all(root.join(dir)).unwrap();
        }
        host
    }

    fn id(raw: &str) -> SandboxId {
        SandboxId::new(raw).unwrap()
    }

    #[test]
    fn test_match_systemd_scope() {
        assert_eq!(
            match_unit_name(b"docker-abc123.scope", b"abc123"),
            Some(Driver::Systemd)
        );
        assert_eq!(
            match_unit_name(b"cri-containerd-abc123.scope", b"abc123"),
            Some(Driver::Systemd)
        );
        assert_eq!(match_unit_name(b"docker-abc123.scope", b"scope"), None);
    }

    #[test]
    fn test_match_cgroupfs_directory() {
        assert_eq!(match_unit_name(b"abc123", b"abc123"), Some(Driver::Cgroupfs));
        assert_eq!(
            match_unit_name(FULL_ID.as_bytes(), &FULL_ID.as_bytes()[..12]),
            Some(Driver::Cgroupfs)
        );
        assert_eq!(match_unit_name(b"abc12", b"abc123"), None);
    }

    #[test]
    fn test_match_never_on_empty_id() {
        assert_eq!(match_unit_name(b"system.slice", b""), None);
    }

    #[test]
    fn test_resolve_systemd_docker_scope() {
        let host = cgroup_tree(&["system.slice/docker-abc123.scope", "system.slice/cron.service"]);
        let resolver = Resolver::new(host.path());

        let handle = resolver.resolve(&id("abc123")).unwrap();
        assert_eq!(
            handle.path(),
            host.path()
                .join("sys/fs/cgroup/system.slice/docker-abc123.scope")
        );
        assert!(handle.path().is_absolute());
    }

    #[test]
    fn test_resolve_nested_kubepods_slices() {
        let host = cgroup_tree(&[
            "kubepods.slice/kubepods-burstable.slice/podXYZ.slice/cri-containerd-abc123.scope",
            "kubepods.slice/kubepods-besteffort.slice",
            "system.slice/containerd.service",
        ]);
        let resolver = Resolver::new(host.path());

        let handle = resolver.resolve(&id("abc123")).unwrap();
        assert!(handle.path().ends_with(
            "kubepods.slice/kubepods-burstable.slice/podXYZ.slice/cri-containerd-abc123.scope"
        ));
    }

    #[test]
    fn test_resolve_cgroupfs_layout() {
        let dir = format!("kubepods/besteffort/pod1234/{FULL_ID}");
        let host = cgroup_tree(&[dir.as_str()]);
        let resolver = Resolver::new(host.path());

        let handle = resolver.resolve(&id(FULL_ID)).unwrap();
        assert!(handle.path().ends_with(dir));
    }

    #[test]
    fn test_resolve_not_found() {
        let host = cgroup_tree(&["system.slice/docker-abc123.scope", "user.slice"]);
        let resolver = Resolver::new(host.path());

        let err = resolver.resolve(&id("def456")).unwrap_err();
        match err {
            ResolveError::NotFound { id, root } => {
                assert_eq!(id.as_str(), "def456");
                assert_eq!(root, host.path().join(CGROUP2_MOUNT));
            }
            other => panic!("Expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_missing_cgroup_root_is_io_error() {
        let host = tempfile::tempdir().unwrap();
        let resolver = Resolver::new(host.path());

        let err = resolver.resolve(&id("abc123")).unwrap_err();
        assert!(matches!(err, ResolveError::Io { .. }));
    }

    #[test]
    fn test_resolve_depth_first_lexicographic_order() {
        let host = cgroup_tree(&[
            "b.slice/docker-abc123.scope",
            "a.slice/deep.slice/abc123",
            "abc123-top",
        ]);
        let resolver = Resolver::new(host.path());

        // `a.slice` sorts first and is fully explored before its siblings.
        let handle = resolver.resolve(&id("abc123")).unwrap();
        assert!(handle.path().ends_with("a.slice/deep.slice/abc123"));
    }

    #[test]
    fn test_resolve_is_reproducible() {
        let host = cgroup_tree(&["x/abc123", "y/abc123"]);
        let resolver = Resolver::new(host.path());

        let first = resolver.resolve(&id("abc123")).unwrap();
        let second = resolver.resolve(&id("abc123")).unwrap();
        assert_eq!(first, second);
        assert!(first.path().ends_with("x/abc123"));
    }

    #[test]
    fn test_resolve_does_not_follow_symlinks() {
        let host = cgroup_tree(&["system.slice"]);
        let outside = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(outside.path().join("docker-abc123.scope")).unwrap();
        std::os::unix::fs::symlink(
            outside.path(),
            host.path().join("sys/fs/cgroup/system.slice/escape"),
        )
        .unwrap();
        let resolver = Resolver::new(host.path());

        let err = resolver.resolve(&id("abc123")).unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { .. }));
    }

    #[test]
    fn test_resolve_ignores_matching_files() {
        let host = cgroup_tree(&["system.slice"]);
        std::fs::write(
            host.path().join("sys/fs/cgroup/system.slice/abc123.scope"),
            "",
        )
        .unwrap();
        let resolver = Resolver::new(host.path());

        assert!(matches!(
            resolver.resolve(&id("abc123")),
            Err(ResolveError::NotFound { .. })
        ));
    }

    #[test]
    fn test_resolver_makes_relative_root_absolute() {
        let resolver = Resolver::new("relative/host");
        assert!(resolver.host_root().is_absolute());
        assert!(resolver.cgroup_root().starts_with(resolver.host_root()));
    }
}
