use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::clients::page_reader::PageReader;
use crate::clients::timeline_api::{Post, TimelineApi};
use crate::ingest::{ContentItem, ItemRef, OriginKind, RawItem, RefKind};

pub fn sibling_link(web_base: &str, id: u64) -> String {
    format!("{}/i/web/status/{}", web_base.trim_end_matches('/'), id)
}

pub trait ReaderFactory: Send + Sync {
    fn open(&self) -> Box<dyn PageReader>;
}

/// Long-lived rendered-page session. Owned by the run loop, handed to the
/// normalizer by reference, recycled on a fixed wall-clock interval no
/// matter how healthy it looks.
pub struct PageSession {
    factory: Box<dyn ReaderFactory>,
    reader: Box<dyn PageReader>,
    opened_at: Instant,
    last_crawl: Option<Instant>,
    min_spacing: Duration,
    recycle_after: Duration,
}

impl PageSession {
    pub fn open(
        factory: Box<dyn ReaderFactory>,
        min_spacing: Duration,
        recycle_after: Duration,
    ) -> Self {
        let reader = factory.open();
        Self {
            factory,
            reader,
            opened_at: Instant::now(),
            last_crawl: None,
            min_spacing,
            recycle_after,
        }
    }

    pub fn recycle_if_due(&mut self) {
        if self.opened_at.elapsed() >= self.recycle_after {
            self.reader = self.factory.open();
            self.opened_at = Instant::now();
            tracing::info!("page session recycled");
        }
    }

    pub fn close(self) {
        tracing::debug!("page session closed");
    }

    /// Renders `url` and returns its post text. Consecutive crawls are kept
    /// at least `min_spacing` apart; the wait happens here.
    pub async fn rendered_text(&mut self, url: &str) -> Result<String> {
        if let Some(last) = self.last_crawl {
            let since = last.elapsed();
            if since < self.min_spacing {
                tokio::time::sleep(self.min_spacing - since).await;
            }
        }
        let out = self.reader.render_text(url).await;
        self.last_crawl = Some(Instant::now());
        out
    }
}

#[derive(Debug, PartialEq)]
pub enum Normalized {
    Item(ContentItem),
    Suppressed,
}

/// Turns a raw fetch result into the canonical record: resolves reposts to
/// the referenced original, upgrades text that looks truncated via a
/// rendered-page crawl, and drops quotes from sources configured to
/// suppress them. Nothing in here is allowed to fail the cycle.
pub struct Normalizer {
    lookup: Option<Arc<dyn TimelineApi>>,
    truncation_threshold: usize,
    suppress_quotes_from: HashSet<String>,
    web_base: String,
}

impl Normalizer {
    pub fn new(
        lookup: Option<Arc<dyn TimelineApi>>,
        truncation_threshold: usize,
        suppress_quotes_from: impl IntoIterator<Item = String>,
        web_base: &str,
    ) -> Self {
        Self {
            lookup,
            truncation_threshold,
            suppress_quotes_from: suppress_quotes_from.into_iter().collect(),
            web_base: web_base.to_string(),
        }
    }

    pub async fn normalize(
        &self,
        raw: RawItem,
        session: Option<&mut PageSession>,
    ) -> Normalized {
        if self.suppress_quotes_from.contains(&raw.source_id)
            && raw.reference.is_some_and(|r| r.kind == RefKind::Quote)
        {
            tracing::info!(source = %raw.source_id, item = %raw.item_id, "quote suppressed");
            return Normalized::Suppressed;
        }

        let mut text = raw.text;
        let mut media = raw.media;
        let mut origin_kind = OriginKind::Original;
        let mut page_link = raw.link;

        if let Some(ItemRef {
            kind: RefKind::Repost,
            id,
        }) = raw.reference
        {
            // The wrapper text of a reshare is cut off upstream; the
            // referenced post carries the real content. A failed lookup
            // keeps the wrapper text rather than losing the item.
            if let Some(original) = self.resolve_original(id).await {
                text = original.text;
                if media.is_empty() {
                    media = original.media;
                }
                origin_kind = OriginKind::Reshared;
                page_link = Some(sibling_link(&self.web_base, id));
            }
        }

        if let Some(session) = session {
            if text.chars().count() >= self.truncation_threshold {
                if let Some(url) = page_link.as_deref() {
                    match session.rendered_text(url).await {
                        Ok(full) if full.chars().count() > text.chars().count() => {
                            tracing::info!(
                                item = %raw.item_id,
                                from = text.chars().count(),
                                to = full.chars().count(),
                                "full text recovered from rendered page"
                            );
                            text = full;
                        }
                        Ok(_) => {
                            tracing::debug!(item = %raw.item_id, "rendered text not longer, keeping original");
                        }
                        Err(e) => {
                            tracing::warn!(item = %raw.item_id, "full-text crawl failed: {e:#}");
                        }
                    }
                }
            }
        }

        Normalized::Item(ContentItem {
            source_id: raw.source_id,
            item_id: raw.item_id,
            occurred_at: raw.occurred_at,
            text,
            media,
            origin_kind,
            author: raw.author,
        })
    }

    async fn resolve_original(&self, id: u64) -> Option<Post> {
        let api = self.lookup.as_ref()?;
        match api.lookup(id).await {
            Ok(Some(post)) => Some(post),
            Ok(None) => {
                tracing::debug!(id, "referenced post gone or inaccessible");
                None
            }
            Err(e) => {
                tracing::warn!(id, "referenced post lookup failed: {e:#}");
                None
            }
        }
    }
}
