//! Discovery of the sandboxes currently running on the node.
//!
//! The collection loop only depends on the [`Discovery`] capability. Two
//! adapters implement it, selected at startup by [`Discoverer`]:
//!
//! - [`docker::DockerDiscovery`]: Docker Engine API over its unix socket.
//! - [`cri::CriDiscovery`]: Kubernetes CRI `RuntimeService` over gRPC (containerd).
use std::future::Future;
use std::path::PathBuf;

use crate::sandbox::{Sandbox, SandboxId};

pub mod cri;
pub mod docker;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("failed to connect to socket `{path}`: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to connect to gRPC socket `{path}`: {source}")]
    GrpcConnect {
        path: PathBuf,
        #[source]
        source: tonic::transport::Error,
    },
    #[error("HTTP request to container engine failed: {0}")]
    Http(#[from] hyper::Error),
    #[error("failed to build HTTP request: {0}")]
    Request(#[from] hyper::http::Error),
    #[error("container engine responded with status {status}: {body}")]
    Status {
        status: hyper::StatusCode,
        body: String,
    },
    #[error("failed to decode container engine response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("runtime service call `{method}` failed: {source}")]
    Rpc {
        method: &'static str,
        #[source]
        source: Box<tonic::Status>,
    },
    #[error("discovery did not finish within {0:?}")]
    Timeout(std::time::Duration),
}

/// Source of the sandbox list for one poll cycle.
pub trait Discovery: Send + Sync {
    /// Lists the sandboxes that are running right now.
    ///
    /// # Errors
    ///
    /// Returns a [`DiscoveryError`] if the upstream service is unreachable or
    /// answers with a malformed response. No partial list is returned.
    fn list_sandboxes(&self) -> impl Future<Output = Result<Vec<Sandbox>, DiscoveryError>> + Send;
}

/// The discovery adapter selected by the configured mode.
#[derive(Debug, Clone)]
pub enum Discoverer {
    Docker(docker::DockerDiscovery),
    Kubernetes(cri::CriDiscovery),
}

impl Discovery for Discoverer {
    async fn list_sandboxes(&self) -> Result<Vec<Sandbox>, DiscoveryError> {
        match self {
            Discoverer::Docker(docker) => docker.list_sandboxes().await,
            Discoverer::Kubernetes(cri) => cri.list_sandboxes().await,
        }
    }
}

/// Validates a raw ID reported by a runtime, logging and dropping invalid ones.
fn sandbox_id(raw: &str, source: &str) -> Option<SandboxId> {
    match SandboxId::new(raw) {
        Ok(id) => Some(id),
        Err(err) => {
            log::warn!("Skipping {} with invalid id: {}", source, err);
            None
        }
    }
}
