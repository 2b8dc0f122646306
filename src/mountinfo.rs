//! Detection of the cgroup v2 mount in a `/proc/<pid>/mountinfo` file.
//!
//! See [`proc_pid_mountinfo(5)`](https://man7.org/linux/man-pages/man5/proc_pid_mountinfo.5.html)
//! for the line format.
use std::io::BufRead;
use std::path::{Path, PathBuf};

use crate::fsutil;

/// Where the resolver expects the unified hierarchy on the host.
const EXPECTED_MOUNT_POINT: &str = "/sys/fs/cgroup";

#[derive(Debug, thiserror::Error)]
pub enum MountInfoError {
    #[error(transparent)]
    FileUnreadable(#[from] fsutil::FileReadError),
    #[error("failed to read line of file `{path}`: {source}")]
    ReadLine {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed mountinfo line in file `{path}`: `{line}`")]
    Parse { path: PathBuf, line: String },
    #[error("no cgroup2 mount found in file `{path}`")]
    MissingCgroup2Mount { path: PathBuf },
}

/// Mount point and filesystem type of one mountinfo line.
#[derive(Debug, PartialEq, Eq)]
struct MountEntry<'a> {
    mount_point: &'a str,
    fs_type: &'a str,
}

/// Extracts the fifth field (mount point) and the first field after the
/// ` - ` separator (filesystem type).
fn parse_line(line: &str) -> Option<MountEntry<'_>> {
    let (pre, post) = line.split_once(" - ")?;
    let mount_point = pre.split_whitespace().nth(4)?;
    let fs_type = post.split_whitespace().next()?;
    Some(MountEntry {
        mount_point,
        fs_type,
    })
}

/// Returns the mount point of the first `cgroup2` entry in the mountinfo file at `path`.
///
/// # Errors
///
/// - [`MountInfoError::FileUnreadable`] if the file cannot be opened.
/// - [`MountInfoError::ReadLine`] if reading from the file fails.
/// - [`MountInfoError::Parse`] if a line does not follow the mountinfo format.
/// - [`MountInfoError::MissingCgroup2Mount`] if no `cgroup2` entry exists.
pub fn find_cgroup2_mount(path: impl AsRef<Path>) -> Result<PathBuf, MountInfoError> {
    let path = path.as_ref();
    let reader = fsutil::open_file_reader(path)?;
    find_cgroup2_mount_in(reader, path)
}

fn find_cgroup2_mount_in<R: BufRead>(reader: R, origin: &Path) -> Result<PathBuf, MountInfoError> {
    for line in reader.lines() {
        let line = line.map_err(|source| MountInfoError::ReadLine {
            path: origin.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = parse_line(&line).ok_or_else(|| MountInfoError::Parse {
            path: origin.to_path_buf(),
            line: line.clone(),
        })?;
        if entry.fs_type == "cgroup2" {
            return Ok(PathBuf::from(entry.mount_point));
        }
    }

    Err(MountInfoError::MissingCgroup2Mount {
        path: origin.to_path_buf(),
    })
}

/// Checks that the host's init process sees cgroup v2 at `/sys/fs/cgroup`.
///
/// Problems are logged as warnings only, the resolver keeps searching
/// `<host_root>/sys/fs/cgroup` either way.
pub fn check_host_cgroup2_mount(host_root: &Path) {
    let mountinfo = host_root.join("proc/1/mountinfo");
    match find_cgroup2_mount(&mountinfo) {
        Ok(mount_point) if mount_point == Path::new(EXPECTED_MOUNT_POINT) => {
            log::debug!("Host cgroup2 mount found at `{}`", mount_point.display());
        }
        Ok(mount_point) => log::warn!(
            "Host cgroup2 is mounted at `{}` instead of `{}`, cgroups may not be found",
            mount_point.display(),
            EXPECTED_MOUNT_POINT
        ),
        Err(err) => log::warn!("Could not verify host cgroup2 mount: {}", err),
    }
}
