//! Parsing of cgroup pseudo-files into integers.
//!
//! Two shapes are supported:
//!
//! - single-value files such as `memory.current` or `pids.current`, whose whole
//!   trimmed content is one base-10 integer, and
//! - flat keyed files such as `memory.stat` or `cpu.stat`, with one
//!   whitespace-separated `key value` pair per line.
//!
//! # Example
//!
//! ```rust
//! use cgroup_exporter::cgroup::{parse_keyed_field, parse_scalar};
//!
//! assert_eq!(parse_scalar("104857600\n").unwrap(), 104857600);
//! assert_eq!(parse_keyed_field("anon 1000\nfile 2000\n", "file").unwrap(), Some(2000));
//! assert_eq!(parse_keyed_field("anon 1000\n", "missing").unwrap(), None);
//! ```

use std::num::ParseIntError;
use std::path::PathBuf;

use crate::fsutil;

use super::CgroupHandle;

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("failed to read cgroup file: {0}")]
    FileUnreadable(#[from] fsutil::FileReadError),

    #[error("field '{field}' not found in `{path}`")]
    FieldNotFound { path: PathBuf, field: String },

    #[error("invalid value in `{path}`: '{value}': {source}")]
    Parse {
        path: PathBuf,
        value: String,
        #[source]
        source: ParseIntError,
    },
}

/// Value token that failed to parse, before the file path is attached.
#[derive(Debug, thiserror::Error)]
#[error("invalid value '{value}': {source}")]
pub struct InvalidValue {
    value: String,
    #[source]
    source: ParseIntError,
}

/// Parses the trimmed content as one optionally signed base-10 integer.
///
/// # Errors
///
/// Returns an error if the trimmed content is empty or not an integer, e.g. the
/// `max` keyword of `memory.max`.
pub fn parse_scalar(content: &str) -> Result<i64, InvalidValue> {
    let value = content.trim();
    value.parse::<i64>().map_err(|source| InvalidValue {
        value: value.to_owned(),
        source,
    })
}

/// Looks up `field` in flat `key value` content.
///
/// Returns `Ok(None)` if no line has `field` as its key. Keys are compared
/// exactly and the first matching line wins. Lines without a value token are
/// ignored.
///
/// # Errors
///
/// Returns an error if the value of the matching line is not an integer.
pub fn parse_keyed_field(content: &str, field: &str) -> Result<Option<i64>, InvalidValue> {
    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        if key != field {
            continue;
        }
        return value
            .parse::<i64>()
            .map(Some)
            .map_err(|source| InvalidValue {
                value: value.to_owned(),
                source,
            });
    }
    Ok(None)
}

impl CgroupHandle {
    /// Reads a single-value file such as `memory.current` below this cgroup.
    ///
    /// # Errors
    ///
    /// - [`ReadError::FileUnreadable`] if the file cannot be opened or read.
    /// - [`ReadError::Parse`] if the trimmed content is not an integer, including
    ///   content that is not valid UTF-8.
    pub fn read_scalar(&self, file: &str) -> Result<i64, ReadError> {
        let path = self.path().join(file);
        let content = fsutil::read_bytes(&path)?;
        parse_scalar(&String::from_utf8_lossy(&content)).map_err(|err| ReadError::Parse {
            path,
            value: err.value,
            source: err.source,
        })
    }

    /// Reads `field` from a `key value` file such as `cpu.stat` below this cgroup.
    ///
    /// # Errors
    ///
    /// - [`ReadError::FileUnreadable`] if the file cannot be opened or read.
    /// - [`ReadError::FieldNotFound`] if no line has `field` as its key.
    /// - [`ReadError::Parse`] if the value of the matching line is not an integer.
    pub fn read_keyed_field(&self, file: &str, field: &str) -> Result<i64, ReadError> {
        let path = self.path().join(file);
        let content = fsutil::read_bytes(&path)?;
        match parse_keyed_field(&String::from_utf8_lossy(&content), field) {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(ReadError::FieldNotFound {
                path,
                field: field.to_owned(),
            }),
            Err(err) => Err(ReadError::Parse {
                path,
                value: err.value,
                source: err.source,
            }),
        }
    }
}
