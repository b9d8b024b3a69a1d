use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;

static DESCRIBED: OnceCell<()> = OnceCell::new();

/// Registers metric descriptions once per process. Safe to call from any
/// entry point; later calls are no-ops.
pub fn describe_metrics() {
    DESCRIBED.get_or_init(|| {
        describe_counter!(
            "relay_items_fetched_total",
            "Raw items fetched across all sources"
        );
        describe_counter!(
            "relay_items_suppressed_total",
            "Items held back by quote suppression or the recency window"
        );
        describe_counter!(
            "relay_translations_total",
            "Successful translations by engine"
        );
        describe_counter!(
            "relay_translation_failures_total",
            "Failed translation attempts by engine"
        );
        describe_counter!(
            "relay_messages_dispatched_total",
            "Messages delivered to the channel"
        );
        describe_counter!(
            "relay_dispatch_failures_total",
            "Deliveries that failed; the item retries next cycle"
        );
        describe_counter!(
            "relay_source_errors_total",
            "Per-source fetch failures after retries were exhausted"
        );
        describe_counter!("relay_cycles_total", "Completed poll cycles");
        describe_histogram!(
            "relay_cycle_duration_seconds",
            "Wall-clock duration of one poll cycle"
        );
        describe_gauge!(
            "relay_last_cycle_unix_seconds",
            "Unix time the last cycle finished"
        );
    });
}

/// Installs the Prometheus recorder with its own scrape listener on `addr`.
/// Must run inside a tokio runtime.
pub fn install_exporter(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("prometheus: install recorder")?;
    describe_metrics();
    tracing::info!(%addr, "metrics exporter listening");
    Ok(())
}
