//! Watches the chains listed in a TOML file until Ctrl-C.
//!
//! ```text
//! RUST_LOG=vaa_watcher=info cargo run --example watch_chains -- demos/chains.toml
//! ```

use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vaa_watcher::{Supervisor, WatcherConfig, sink::AnySink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).try_init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "demos/chains.toml".to_owned());
    let config = WatcherConfig::from_file(&path)?;
    info!(path = %path, chains = config.chains.len(), network = ?config.network, "Loaded configuration");

    let sink = AnySink::from_config(&config.sink).await?;
    let supervisor = Supervisor::from_config(&config, sink);
    if supervisor.running() == 0 {
        error!("No chain could be started");
    } else {
        tokio::signal::ctrl_c().await?;
        info!("Ctrl-C received");
    }

    for report in supervisor.stop().await {
        match report.result {
            Ok(()) => info!(chain = %report.chain, "Watcher stopped"),
            Err(e) => error!(chain = %report.chain, error = %e, "Watcher failed"),
        }
    }
    Ok(())
}
