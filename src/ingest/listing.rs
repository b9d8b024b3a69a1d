use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;

use crate::clients::fetch_document;
use crate::clients::listing_page::ListingParser;
use crate::ingest::{FetchBatch, RawItem, SourceFetcher};
use crate::retry::{with_backoff, RetryPolicy};
use crate::state::Marker;

pub enum Mode {
    Fixture(String),
    Http { client: reqwest::Client },
}

/// Ranked-listing source. "New" is approximated by set difference against
/// the previously ranked ids; the recency window downstream remains the
/// authority, since an id can leave the ranking and come back.
pub struct ListingFetcher {
    source_id: String,
    author: String,
    url: String,
    parser: Arc<dyn ListingParser>,
    top_n: usize,
    retry: RetryPolicy,
    mode: Mode,
}

impl ListingFetcher {
    pub fn from_url(
        source_id: &str,
        author: &str,
        url: &str,
        client: reqwest::Client,
        parser: Arc<dyn ListingParser>,
        top_n: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source_id: source_id.to_string(),
            author: author.to_string(),
            url: url.to_string(),
            parser,
            top_n,
            retry,
            mode: Mode::Http { client },
        }
    }

    pub fn from_fixture(
        source_id: &str,
        author: &str,
        url: &str,
        html: &str,
        parser: Arc<dyn ListingParser>,
        top_n: usize,
    ) -> Self {
        Self {
            source_id: source_id.to_string(),
            author: author.to_string(),
            url: url.to_string(),
            parser,
            top_n,
            retry: RetryPolicy::default(),
            mode: Mode::Fixture(html.to_string()),
        }
    }
}

#[async_trait]
impl SourceFetcher for ListingFetcher {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch_new(&self, cursor: Option<Marker>) -> Result<FetchBatch> {
        let prev: BTreeSet<String> = match cursor {
            None => BTreeSet::new(),
            Some(Marker::RankedSet { ids }) => ids,
            Some(other) => bail!("listing cursor has wrong shape: {other:?}"),
        };

        let html = match &self.mode {
            Mode::Fixture(s) => s.clone(),
            Mode::Http { client } => {
                with_backoff(self.retry, "listing fetch", || {
                    fetch_document(client, &self.url)
                })
                .await?
            }
        };

        let entries = self.parser.top_ranked(&html, &self.url, self.top_n);
        if entries.is_empty() {
            // Markup change or empty page: degrade to "no new items", keep
            // the ranked set as it was.
            tracing::warn!(source = %self.source_id, "listing parse yielded nothing, cursor untouched");
            return Ok(FetchBatch::unchanged());
        }

        let current: BTreeSet<String> = entries.iter().map(|e| e.url.clone()).collect();
        let now = Utc::now();
        let items: Vec<RawItem> = entries
            .into_iter()
            .filter(|e| !prev.contains(&e.url))
            .map(|e| {
                let mut text = e.title;
                if let Some(summary) = e.summary {
                    text.push_str("\n\n");
                    text.push_str(&summary);
                }
                text.push_str("\n\n");
                text.push_str(&e.url);
                RawItem {
                    source_id: self.source_id.clone(),
                    item_id: e.url.clone(),
                    occurred_at: now,
                    text,
                    media: Vec::new(),
                    author: self.author.clone(),
                    link: Some(e.url),
                    reference: None,
                }
            })
            .collect();

        tracing::info!(
            source = %self.source_id,
            ranked = current.len(),
            new_in_rank = items.len(),
            "listing scraped"
        );
        counter!("relay_items_fetched_total").increment(items.len() as u64);

        Ok(FetchBatch {
            items,
            next_marker: Some(Marker::RankedSet { ids: current }),
        })
    }
}
