use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

/// Error that occurs when opening or reading a file fails.
#[derive(Debug, thiserror::Error)]
#[error("failed to read file `{path}`: {source}")]
pub struct FileReadError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Opens a file at the given path and wraps it in a [`BufReader`].
///
/// # Errors
///
/// Returns a [`FileReadError`] if the file cannot be opened.
///
/// # Example
/// ```no_run
/// # use cgroup_exporter::fsutil;
/// let reader = fsutil::open_file_reader("/proc/1/mountinfo")?;
/// # Ok::<(), fsutil::FileReadError>(())
/// ```
pub fn open_file_reader(path: impl AsRef<Path>) -> Result<BufReader<File>, FileReadError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| FileReadError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file))
}

/// Reads the whole content of a (pseudo-)file as raw bytes.
///
/// Kernel pseudo-files report a size of zero, so the content is read until EOF
/// instead of being sized from the file metadata. Decoding is left to the
/// caller.
pub fn read_bytes(path: impl AsRef<Path>) -> Result<Vec<u8>, FileReadError> {
    let path = path.as_ref();
    let mut content = Vec::with_capacity(256);
    open_file_reader(path)?
        .read_to_end(&mut content)
        .map_err(|source| FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(content)
}
