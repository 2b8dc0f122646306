use std::path::{Path, PathBuf};

use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper_util::rt::TokioIo;

use crate::sandbox::Sandbox;

use super::{Discovery, DiscoveryError};

/// Subset of the Docker Engine `GET /containers/json` response.
#[derive(Debug, serde::Deserialize)]
struct EngineContainer {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Names", default)]
    names: Vec<String>,
    #[serde(rename = "State", default)]
    state: String,
}

/// Lists running containers from the Docker Engine API over its unix socket.
#[derive(Debug, Clone)]
pub struct DockerDiscovery {
    socket_path: PathBuf,
}

impl DockerDiscovery {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Issues a single `GET` over a fresh HTTP/1.1 connection and returns the body.
    async fn get(&self, path_and_query: &str) -> Result<Bytes, DiscoveryError> {
        let stream = tokio::net::UnixStream::connect(&self.socket_path)
            .await
            .map_err(|source| DiscoveryError::Connect {
                path: self.socket_path.clone(),
                source,
            })?;
        let (mut sender, connection) =
            hyper::client::conn::http1::handshake::<_, Empty<Bytes>>(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                log::debug!("Docker API connection closed with error: {}", err);
            }
        });

        let request = hyper::Request::get(path_and_query)
            .header(hyper::header::HOST, "docker")
            .body(Empty::<Bytes>::new())?;
        let response = sender.send_request(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();

        if !status.is_success() {
            return Err(DiscoveryError::Status {
                status,
                body: String::from_utf8_lossy(&body).trim().to_owned(),
            });
        }

        Ok(body)
    }
}

impl Discovery for DockerDiscovery {
    async fn list_sandboxes(&self) -> Result<Vec<Sandbox>, DiscoveryError> {
        log::debug!(
            "Listing Docker containers via `{}`",
            self.socket_path.display()
        );
        let body = self.get("/containers/json?all=1").await?;
        let containers: Vec<EngineContainer> = serde_json::from_slice(&body)?;
        Ok(running_sandboxes(containers))
    }
}

/// Keeps running containers, labelled by their first name without the leading `/`.
fn running_sandboxes(containers: Vec<EngineContainer>) -> Vec<Sandbox> {
    let mut sandboxes = Vec::with_capacity(containers.len());
    for container in containers {
        if container.state != "running" {
            log::debug!(
                "Skipping non-running Docker container: id={}, names={:?}, state={}",
                container.id,
                container.names,
                container.state
            );
            continue;
        }

        let Some(id) = super::sandbox_id(&container.id, "Docker container") else {
            continue;
        };
        let name = container
            .names
            .first()
            .map(|name| name.trim_start_matches('/'))
            .unwrap_or_default();
        log::debug!("Found Docker container: id={}, name={}", id, name);
        sandboxes.push(Sandbox::standalone(id, name));
    }
    sandboxes
}
