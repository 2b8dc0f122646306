use std::path::{Path, PathBuf};

use crate::sandbox::Sandbox;

use super::{Discovery, DiscoveryError};

mod runtime;

use runtime::{
    Container, ContainerFilter, ContainerState, ContainerStateValue, ListContainersRequest,
    ListPodSandboxRequest, PodSandbox, PodSandboxState, RuntimeServiceClient,
};

/// Lists ready pods and their running containers through the Kubernetes CRI.
///
/// A new channel is opened for every poll, so a restarted runtime is picked
/// up on the next cycle without extra reconnect handling.
#[derive(Debug, Clone)]
pub struct CriDiscovery {
    socket_path: PathBuf,
}

impl CriDiscovery {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Discovery for CriDiscovery {
    async fn list_sandboxes(&self) -> Result<Vec<Sandbox>, DiscoveryError> {
        log::debug!("Listing pod sandboxes via `{}`", self.socket_path.display());
        let channel = crate::grpc::channel_for_unix_socket(&self.socket_path)
            .await
            .map_err(|source| DiscoveryError::GrpcConnect {
                path: self.socket_path.clone(),
                source,
            })?;
        let mut client = RuntimeServiceClient::new(channel);

        let pods = client
            .list_pod_sandbox(ListPodSandboxRequest {})
            .await
            .map_err(|status| DiscoveryError::Rpc {
                method: "ListPodSandbox",
                source: Box::new(status),
            })?
            .items;

        let mut sandboxes = Vec::with_capacity(pods.len());
        for pod in pods {
            if pod.state() != PodSandboxState::SandboxReady {
                log::debug!("Skipping pod sandbox `{}` that is not ready", pod.id);
                continue;
            }

            let request = ListContainersRequest {
                filter: Some(ContainerFilter {
                    pod_sandbox_id: pod.id.clone(),
                    state: Some(ContainerStateValue {
                        state: ContainerState::ContainerRunning as i32,
                    }),
                    ..Default::default()
                }),
            };
            let containers = match client.list_containers(request).await {
                Ok(response) => response.containers,
                Err(status) => {
                    log::warn!(
                        "Failed to list containers of pod sandbox `{}`: {}",
                        pod.id,
                        status
                    );
                    Vec::new()
                }
            };

            sandboxes.extend(pod_sandboxes(&pod, containers));
        }

        Ok(sandboxes)
    }
}

/// Turns a ready pod and its containers into sandboxes.
///
/// The pod itself comes first with an empty container label, followed by
/// every running container that belongs to it.
fn pod_sandboxes(pod: &PodSandbox, containers: Vec<Container>) -> Vec<Sandbox> {
    let (namespace, pod_name) = pod
        .metadata
        .as_ref()
        .map(|meta| (meta.namespace.as_str(), meta.name.as_str()))
        .unwrap_or_default();

    let mut out = Vec::with_capacity(containers.len() + 1);
    if let Some(id) = super::sandbox_id(&pod.id, "pod sandbox") {
        log::debug!(
            "Found pod sandbox: id={}, namespace={}, pod={}",
            id,
            namespace,
            pod_name
        );
        out.push(Sandbox::new(id, "", namespace, pod_name));
    }

    for container in containers {
        if container.pod_sandbox_id != pod.id
            || container.state() != ContainerState::ContainerRunning
        {
            continue;
        }
        let Some(id) = super::sandbox_id(&container.id, "container") else {
            continue;
        };
        let name = container
            .metadata
            .as_ref()
            .map(|meta| meta.name.as_str())
            .unwrap_or_default();
        log::debug!(
            "Found container: id={}, name={}, namespace={}, pod={}",
            id,
            name,
            namespace,
            pod_name
        );
        out.push(Sandbox::new(id, name, namespace, pod_name));
    }

    out
}
