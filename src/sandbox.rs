//! Sandboxes reported by a discovery source for one poll cycle.
//!
//! A [`Sandbox`] is the unit metrics are collected for: a bare container, a
//! Kubernetes pod sandbox, or a container inside a pod. Its [`SandboxId`] is
//! the key the cgroup resolver matches against directory names, the remaining
//! fields become metric labels.
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// The maximum allowed length for a [`SandboxId`].
const SANDBOX_ID_MAX_LEN: usize = 255;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("empty sandbox id")]
    EmptySandboxId,
    #[error("sandbox id exceeds {SANDBOX_ID_MAX_LEN} bytes: {0}")]
    SandboxIdTooLong(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A validated sandbox identifier, e.g. a 64 character container ID.
///
/// # Examples
///
/// ```
/// # use cgroup_exporter::sandbox::SandboxId;
/// let id = SandboxId::new("abc123").unwrap();
/// assert_eq!(id.as_ref(), "abc123");
/// assert!(SandboxId::new("").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SandboxId(Arc<str>);

impl SandboxId {
    /// Creates a new `SandboxId` from the given raw id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptySandboxId`] for an empty input and
    /// [`Error::SandboxIdTooLong`] if the input exceeds [`SANDBOX_ID_MAX_LEN`] bytes.
    pub fn new(src: impl AsRef<str>) -> Result<Self> {
        let src = src.as_ref();
        if src.is_empty() {
            return Err(Error::EmptySandboxId);
        }
        if src.len() > SANDBOX_ID_MAX_LEN {
            return Err(Error::SandboxIdTooLong(src.to_owned()));
        }

        Ok(Self(src.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SandboxId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SandboxId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A running container or pod sandbox as reported by discovery.
///
/// `namespace` and `pod` are empty for runtimes without an orchestration
/// concept, `container` is empty for a pod-level sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sandbox {
    id: SandboxId,
    container: String,
    namespace: String,
    pod: String,
}

impl Sandbox {
    pub fn new(
        id: SandboxId,
        container: impl Into<String>,
        namespace: impl Into<String>,
        pod: impl Into<String>,
    ) -> Self {
        Self {
            id,
            container: container.into(),
            namespace: namespace.into(),
            pod: pod.into(),
        }
    }

    /// A sandbox without pod context, as reported by a plain container engine.
    pub fn standalone(id: SandboxId, container: impl Into<String>) -> Self {
        Self::new(id, container, String::new(), String::new())
    }

    pub fn id(&self) -> &SandboxId {
        &self.id
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn pod(&self) -> &str {
        &self.pod
    }

    /// Label values in the order of [`crate::sink::LABEL_NAMES`].
    pub fn label_values(&self) -> [&str; 3] {
        [&self.container, &self.namespace, &self.pod]
    }
}

impl fmt::Display for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "container={:?} namespace={:?} pod={:?} id={}",
            self.container, self.namespace, self.pod, self.id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_id_rejects_empty() {
        assert_eq!(SandboxId::new(""), Err(Error::EmptySandboxId));
    }

    #[test]
    fn test_sandbox_id_rejects_oversized() {
        let raw = "a".repeat(SANDBOX_ID_MAX_LEN + 1);
        assert!(matches!(
            SandboxId::new(&raw),
            Err(Error::SandboxIdTooLong(_))
        ));
        assert!(SandboxId::new(&raw[1..]).is_ok());
    }

    #[test]
    fn test_standalone_sandbox_has_empty_pod_labels() {
        let sandbox = Sandbox::standalone(SandboxId::new("abc123").unwrap(), "web");
        assert_eq!(sandbox.label_values(), ["web", "", ""]);
        assert_eq!(sandbox.id().as_str(), "abc123");
    }
}
