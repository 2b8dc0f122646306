//! Command line and environment configuration.
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("host path `{0}` does not exist")]
    MissingHostPath(PathBuf),
    #[error("scrape interval must be greater than zero")]
    ZeroInterval,
    #[error("{mode} socket `{path}` does not exist")]
    MissingSocket { mode: Mode, path: PathBuf },
}

/// Which runtime API lists the sandboxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Docker Engine API, one sandbox per running container.
    Docker,
    /// Kubernetes CRI, one sandbox per ready pod and per running container in it.
    Kubernetes,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Docker => f.write_str("docker"),
            Mode::Kubernetes => f.write_str("kubernetes"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    None,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::None => log::LevelFilter::Off,
        }
    }
}

/// Exports cgroup v2 resource accounting of containers as Prometheus metrics.
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct Config {
    /// Address the metrics endpoint listens on.
    #[arg(long, env = "CGROUP_EXPORTER_ADDR", default_value = "0.0.0.0:8080")]
    pub addr: SocketAddr,

    /// Mount path of the host filesystem.
    #[arg(long, env = "HOST_PATH", default_value = "/host")]
    pub host_path: PathBuf,

    /// Time between two collection cycles, e.g. `1s` or `500ms`.
    #[arg(long, env = "SCRAPE_INTERVAL", default_value = "1s", value_parser = humantime::parse_duration)]
    pub scrape_interval: Duration,

    /// Upper bound on a single discovery call.
    #[arg(long, env = "DISCOVERY_TIMEOUT", default_value = "5s", value_parser = humantime::parse_duration)]
    pub discovery_timeout: Duration,

    /// Docker Engine API socket, used in `docker` mode.
    #[arg(long, env = "DOCKER_SOCK", default_value = "/var/run/docker.sock")]
    pub docker_sock: PathBuf,

    /// CRI runtime socket, used in `kubernetes` mode.
    #[arg(long, env = "CONTAINERD_SOCK", default_value = "/run/containerd/containerd.sock")]
    pub containerd_sock: PathBuf,

    #[arg(long, env = "MODE", value_enum, default_value_t = Mode::Kubernetes)]
    pub mode: Mode,

    /// Default log level, `RUST_LOG` takes precedence.
    #[arg(long, env = "LOG_LEVEL", value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,
}

impl Config {
    /// The socket of the runtime selected by [`Config::mode`].
    pub fn socket(&self) -> &PathBuf {
        match self.mode {
            Mode::Docker => &self.docker_sock,
            Mode::Kubernetes => &self.containerd_sock,
        }
    }

    /// Checks the parts of the configuration argument parsing cannot.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::MissingHostPath`] if the host path does not exist.
    /// - [`ConfigError::ZeroInterval`] if the scrape interval is zero.
    /// - [`ConfigError::MissingSocket`] if the socket of the selected mode does not exist.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.host_path.exists() {
            return Err(ConfigError::MissingHostPath(self.host_path.clone()));
        }
        if self.scrape_interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        let socket = self.socket();
        if !socket.exists() {
            return Err(ConfigError::MissingSocket {
                mode: self.mode,
                path: socket.clone(),
            });
        }
        Ok(())
    }
}
