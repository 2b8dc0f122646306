use clap::Parser;

use cgroup_exporter::config::Config;

/// Entry point of the cgroup exporter.
///
/// Parses the configuration from flags and environment, initializes logging
/// and runs until SIGINT or SIGTERM.
///
/// # Examples
///
/// ```bash
/// MODE=docker HOST_PATH=/ cargo run -- --scrape-interval 5s
/// ```
#[tokio::main]
async fn main() {
    let config = Config::parse();
    env_logger::Builder::new()
        .filter_level(config.log_level.into())
        .parse_default_env()
        .init();

    if let Err(err) = cgroup_exporter::run(config).await {
        log::error!("{err}");
        std::process::exit(1);
    }
}
