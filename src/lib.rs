//! cgroup exporter: publishes cgroup v2 resource accounting of running
//! containers and pod sandboxes as Prometheus metrics.
//!
//! Sandboxes are listed through the Docker Engine API or the Kubernetes CRI,
//! their cgroup directories are located below the mounted host filesystem
//! and the accounting files are read on a fixed interval.
use std::sync::Arc;

use tokio::sync::watch;

pub mod api;
pub mod catalog;
pub mod cgroup;
pub mod collector;
pub mod config;
pub mod discovery;
pub mod fsutil;
pub mod grpc;
pub mod mountinfo;
pub mod sandbox;
pub mod sink;

use config::{Config, Mode};
use discovery::Discoverer;

/// Runs the exporter until SIGINT or SIGTERM.
///
/// Validates `config`, starts the collection loop and serves `/metrics`. On a
/// shutdown signal the HTTP server stops accepting connections and the
/// running collection cycle finishes its current sandbox.
///
/// # Errors
///
/// Possible errors include:
/// - An invalid configuration, e.g. a missing host path or runtime socket.
/// - A metric catalog that cannot be registered.
/// - A listen address that cannot be bound.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    log::debug!("Configuration: {:?}", config);

    mountinfo::check_host_cgroup2_mount(&config.host_path);

    let sinks = sink::PrometheusSinks::new(catalog::DEFAULT_CATALOG)?;
    let discoverer = match config.mode {
        Mode::Docker => Discoverer::Docker(discovery::docker::DockerDiscovery::new(
            config.docker_sock.clone(),
        )),
        Mode::Kubernetes => Discoverer::Kubernetes(discovery::cri::CriDiscovery::new(
            config.containerd_sock.clone(),
        )),
    };
    log::info!(
        "Collecting {} metrics every {:?} in {} mode via `{}`",
        catalog::DEFAULT_CATALOG.len(),
        config.scrape_interval,
        config.mode,
        config.socket().display()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        log::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let collector = collector::Collector::new(
        cgroup::Resolver::new(&config.host_path),
        catalog::DEFAULT_CATALOG,
        Arc::new(discoverer),
        Arc::new(sinks.clone()),
    )
    .with_discovery_timeout(config.discovery_timeout);
    let collection = tokio::spawn(collector.run(config.scrape_interval, shutdown_rx.clone()));

    let mut server_shutdown = shutdown_rx;
    let served = api::ApiServer::new(sinks)
        .listen(config.addr, async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        })
        .await;

    if served.is_err() {
        collection.abort();
    }
    if let Err(err) = collection.await {
        if !err.is_cancelled() {
            log::error!("Collection loop failed: {}", err);
        }
    }
    served?;

    log::info!("Exporter stopped");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for SIGINT: {}", err);
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                log::error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
