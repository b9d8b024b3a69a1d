//! Binary entrypoint. Loads env config, wires the pipeline, and runs the
//! poll loop until a shutdown signal lands.

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use newswire_relay::bootstrap::build_relay;
use newswire_relay::config::Settings;
use newswire_relay::metrics;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("newswire_relay=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let settings = Settings::from_env().context("loading settings")?;

    if let Some(addr) = settings.metrics_addr {
        metrics::install_exporter(addr)?;
    } else {
        metrics::describe_metrics();
    }

    let relay = build_relay(&settings).context("building relay")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("ctrl-c handler failed: {e:#}");
            return;
        }
        tracing::info!("shutdown signal received, finishing current item");
        let _ = shutdown_tx.send(true);
    });

    relay.run(shutdown_rx).await
}
