//! gRPC transport over unix domain sockets.
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use hyper_util::rt::TokioIo;
use tonic::transport::{Channel, Endpoint};

/// Connector that ignores the request URI and always dials the same socket.
#[derive(Debug, Clone)]
struct UnixConnector {
    path: PathBuf,
}

impl tower::Service<hyper::Uri> for UnixConnector {
    type Response = TokioIo<tokio::net::UnixStream>;
    type Error = std::io::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _uri: hyper::Uri) -> Self::Future {
        let path = self.path.clone();
        Box::pin(async move {
            let stream = tokio::net::UnixStream::connect(path).await?;
            Ok(TokioIo::new(stream))
        })
    }
}

/// Opens a channel to the gRPC server listening on the unix socket at `path`.
///
/// The endpoint authority is a placeholder, HTTP/2 requests are routed to the
/// socket regardless of it.
pub async fn channel_for_unix_socket(
    path: impl AsRef<Path>,
) -> Result<Channel, tonic::transport::Error> {
    let path = path.as_ref();
    log::trace!("Opening gRPC channel to `{}`", path.display());
    let connector = UnixConnector {
        path: path.to_path_buf(),
    };
    Endpoint::from_static("http://localhost")
        .connect_with_connector(connector)
        .await
}
