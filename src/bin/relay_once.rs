//! One-shot runner: a single poll cycle, then exit. Useful for cron-style
//! scheduling and for verifying config without the long-lived loop.

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use newswire_relay::bootstrap::build_relay;
use newswire_relay::config::Settings;
use newswire_relay::metrics;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("newswire_relay=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();

    metrics::describe_metrics();
    let settings = Settings::from_env().context("loading settings")?;
    let mut relay = build_relay(&settings).context("building relay")?;

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let summary = relay.run_cycle(&shutdown_rx).await;
    tracing::info!(
        fetched = summary.fetched,
        dispatched = summary.dispatched,
        suppressed = summary.suppressed,
        failed_items = summary.failed_items,
        failed_sources = summary.failed_sources,
        "single cycle complete"
    );
    Ok(())
}
