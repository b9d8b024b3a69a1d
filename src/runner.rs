use std::time::Duration;

use anyhow::Result;
use metrics::{counter, gauge, histogram};
use tokio::sync::watch;

use crate::dispatch::Dispatcher;
use crate::ingest::SourceFetcher;
use crate::normalize::{Normalized, Normalizer, PageSession};
use crate::render::render_message;
use crate::state::{CursorStore, RecencyWindow};
use crate::translate::Translator;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub fetched: usize,
    pub dispatched: usize,
    pub suppressed: usize,
    pub failed_items: usize,
    pub failed_sources: usize,
}

#[derive(Debug, Default)]
struct SourceStats {
    fetched: usize,
    dispatched: usize,
    suppressed: usize,
    failed_items: usize,
}

/// The single-threaded polling pipeline. Owns all durable state and the
/// page session; sources run strictly in priority order, items strictly in
/// chronological order, nothing interleaves.
pub struct Relay {
    sources: Vec<Box<dyn SourceFetcher>>,
    normalizer: Normalizer,
    translator: Translator,
    dispatcher: Dispatcher,
    cursors: CursorStore,
    recency: RecencyWindow,
    session: Option<PageSession>,
    poll_interval: Duration,
}

impl Relay {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sources: Vec<Box<dyn SourceFetcher>>,
        normalizer: Normalizer,
        translator: Translator,
        dispatcher: Dispatcher,
        cursors: CursorStore,
        recency: RecencyWindow,
        session: Option<PageSession>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            sources,
            normalizer,
            translator,
            dispatcher,
            cursors,
            recency,
            session,
            poll_interval,
        }
    }

    /// Poll forever: one cycle, then sleep, until the shutdown flag flips.
    /// The in-flight item always finishes; the session closes on the way out.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!(
            sources = self.sources.len(),
            interval_secs = self.poll_interval.as_secs(),
            "relay loop starting"
        );
        loop {
            let summary = self.run_cycle(&shutdown).await;
            tracing::info!(
                fetched = summary.fetched,
                dispatched = summary.dispatched,
                suppressed = summary.suppressed,
                failed_items = summary.failed_items,
                failed_sources = summary.failed_sources,
                "cycle complete"
            );
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        if let Some(session) = self.session.take() {
            session.close();
        }
        tracing::info!("relay loop stopped");
        Ok(())
    }

    /// One pass over every source. A source that errors is skipped with its
    /// cursor untouched; the others still run.
    pub async fn run_cycle(&mut self, shutdown: &watch::Receiver<bool>) -> CycleSummary {
        let started = std::time::Instant::now();
        if let Some(session) = self.session.as_mut() {
            session.recycle_if_due();
        }
        let mut summary = CycleSummary::default();
        for idx in 0..self.sources.len() {
            if *shutdown.borrow() {
                tracing::info!("shutdown requested, cycle cut short");
                break;
            }
            let source_id = self.sources[idx].source_id().to_string();
            match self.run_source(idx, shutdown).await {
                Ok(stats) => {
                    summary.fetched += stats.fetched;
                    summary.dispatched += stats.dispatched;
                    summary.suppressed += stats.suppressed;
                    summary.failed_items += stats.failed_items;
                }
                Err(e) => {
                    summary.failed_sources += 1;
                    counter!("relay_source_errors_total").increment(1);
                    tracing::error!(source = %source_id, "source skipped this cycle: {e:#}");
                }
            }
        }
        counter!("relay_cycles_total").increment(1);
        histogram!("relay_cycle_duration_seconds").record(started.elapsed().as_secs_f64());
        gauge!("relay_last_cycle_unix_seconds").set(chrono::Utc::now().timestamp() as f64);
        summary
    }

    async fn run_source(
        &mut self,
        idx: usize,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<SourceStats> {
        let source_id = self.sources[idx].source_id().to_string();
        let cursor = self.cursors.get(&source_id)?;
        let batch = self.sources[idx].fetch_new(cursor).await?;

        let mut stats = SourceStats {
            fetched: batch.items.len(),
            ..SourceStats::default()
        };
        let mut delivered: Vec<String> = Vec::new();
        let mut interrupted = false;
        let mut fatal: Option<anyhow::Error> = None;

        for raw in batch.items {
            if *shutdown.borrow() {
                interrupted = true;
                break;
            }
            let item = match self.normalizer.normalize(raw, self.session.as_mut()).await {
                Normalized::Item(item) => item,
                Normalized::Suppressed => {
                    stats.suppressed += 1;
                    counter!("relay_items_suppressed_total").increment(1);
                    continue;
                }
            };
            let translated = self.translator.translate_or_sentinel(&item.text).await;
            match self.recency.contains(&item.item_id) {
                Ok(true) => {
                    stats.suppressed += 1;
                    counter!("relay_items_suppressed_total").increment(1);
                    tracing::debug!(item = %item.item_id, "already delivered inside recency window");
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    fatal = Some(e);
                    break;
                }
            }
            let message = render_message(&item, &translated);
            match self.dispatcher.dispatch(&message, &item.media).await {
                Ok(()) => delivered.push(item.item_id),
                Err(e) => {
                    stats.failed_items += 1;
                    counter!("relay_dispatch_failures_total").increment(1);
                    // Full payload in the log so an operator can post it by
                    // hand if the retry never lands.
                    tracing::error!(
                        item = %item.item_id,
                        payload = %message,
                        "dispatch failed, item retries next cycle: {e:#}"
                    );
                }
            }
        }

        // Delivered ids are recorded no matter how the batch ended; the
        // window is what stops a replayed batch from double-posting.
        stats.dispatched = delivered.len();
        if !delivered.is_empty() {
            self.recency.add_all(&delivered)?;
        }
        if let Some(e) = fatal {
            return Err(e);
        }

        // The cursor only moves on a clean batch. Held back, it makes the
        // source re-report this batch next cycle, so a failed item gets its
        // retry while the recency window filters the rest.
        if interrupted {
            tracing::info!(source = %source_id, "batch interrupted, cursor held");
        } else if stats.failed_items > 0 {
            tracing::warn!(
                source = %source_id,
                failed = stats.failed_items,
                "dispatch failures, cursor held for replay"
            );
        } else if let Some(marker) = batch.next_marker {
            self.cursors.set(&source_id, marker)?;
        }

        tracing::info!(
            source = %source_id,
            fetched = stats.fetched,
            dispatched = stats.dispatched,
            suppressed = stats.suppressed,
            failed = stats.failed_items,
            "source cycle done"
        );
        Ok(stats)
    }
}
