use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use prometheus::{Encoder, TextEncoder};
use tokio::net::ToSocketAddrs;

use crate::sink::PrometheusSinks;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to bind metrics listener: {0}")]
    Bind(#[source] std::io::Error),
    #[error("metrics server failed: {0}")]
    Serve(#[source] std::io::Error),
}

async fn root() -> impl IntoResponse {
    (StatusCode::FOUND, [(header::LOCATION, "/metrics")])
}

async fn metrics(sinks: State<PrometheusSinks>) -> Response {
    let encoder = TextEncoder::new();
    let mut body = Vec::with_capacity(16 * 1024);
    if let Err(err) = encoder.encode(&sinks.gather(), &mut body) {
        log::error!("Failed to encode metrics: {}", err);
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_owned())],
        body,
    )
        .into_response()
}

/// HTTP server exposing the sinks in the Prometheus text format on `/metrics`.
pub struct ApiServer {
    router: axum::Router,
}

impl ApiServer {
    pub fn new(sinks: PrometheusSinks) -> Self {
        let router = axum::Router::new()
            .route("/", get(root))
            .route("/metrics", get(metrics))
            .with_state(sinks);
        Self { router }
    }

    /// Serves requests on `addr` until `shutdown` completes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the address cannot be bound and
    /// [`Error::Serve`] if accepting connections fails.
    pub async fn listen(
        self,
        addr: impl ToSocketAddrs,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), Error> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(Error::Bind)?;
        if let Ok(local) = listener.local_addr() {
            log::info!("Serving metrics on http://{}/metrics", local);
        }
        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(Error::Serve)
    }
}
