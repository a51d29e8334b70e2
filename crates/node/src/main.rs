//! Fleet node binary.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::time::Duration;

use clap::Parser;
use fleet_node::{NodeConfig, spawn_signal_watcher};
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Pause before a failed process exits, so buffered logs reach the collector.
const EXIT_DELAY: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() {
    let config = NodeConfig::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            Targets::new()
                .with_default(config.log_level)
                .with_target("openraft", Level::WARN),
        )
        .init();

    let shutdown = CancellationToken::new();

    let signals = match spawn_signal_watcher(shutdown.clone()) {
        Ok(signals) => signals,
        Err(e) => {
            report_failure(&format!("failed to install signal handlers: {e}")).await;
            std::process::exit(1);
        }
    };

    match fleet_node::run(config, shutdown).await {
        Ok(report) => {
            if !report.is_clean() {
                warn!(?report, "teardown finished with errors");
            }

            info!("node stopped");
            signals.abort();
        }
        Err(e) => {
            report_failure(&e.to_string()).await;
            std::process::exit(1);
        }
    }
}

async fn report_failure(message: &str) {
    error!("startup failed: {message}");
    tokio::time::sleep(EXIT_DELAY).await;
}
