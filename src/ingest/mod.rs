// src/ingest/mod.rs
pub mod feed;
pub mod listing;
pub mod timeline;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::state::Marker;

/// How an item points at another item, when it does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// A plain reshare: wrapper text is machine-generated, the referenced
    /// item carries the real content.
    Repost,
    /// A quote: the item has its own text plus a pointer to what it quotes.
    Quote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemRef {
    pub kind: RefKind,
    pub id: u64,
}

/// What a fetcher yields before normalization: source-shaped, chronological,
/// possibly truncated or pointing at a referenced original.
#[derive(Debug, Clone, PartialEq)]
pub struct RawItem {
    pub source_id: String,
    pub item_id: String,
    pub occurred_at: DateTime<Utc>,
    pub text: String,
    pub media: Vec<String>,
    /// Display handle used in rendered messages.
    pub author: String,
    /// Canonical page for the item, when one exists.
    pub link: Option<String>,
    pub reference: Option<ItemRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginKind {
    Original,
    /// Text/media were resolved from a referenced original item.
    Reshared,
}

/// Canonical unit flowing through translation and dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentItem {
    pub source_id: String,
    pub item_id: String,
    pub occurred_at: DateTime<Utc>,
    pub text: String,
    pub media: Vec<String>,
    pub origin_kind: OriginKind,
    pub author: String,
}

/// One fetch cycle's output for a source.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchBatch {
    /// Strictly non-decreasing `occurred_at`.
    pub items: Vec<RawItem>,
    /// `None` leaves the stored cursor untouched (e.g. a degraded scrape or
    /// the first poll of an empty feed).
    pub next_marker: Option<Marker>,
}

impl FetchBatch {
    pub fn unchanged() -> Self {
        Self {
            items: Vec::new(),
            next_marker: None,
        }
    }
}

/// A pollable upstream. Implementations reorder whatever the upstream
/// returns so `items` comes out oldest-first, and compute the next cursor
/// marker without ever moving it backwards.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Stable identity; cursor and log key.
    fn source_id(&self) -> &str;

    /// New items strictly after `cursor`. An absent cursor is a warm start:
    /// sources with replayable history yield nothing and just establish the
    /// marker; bounded-backfill sources may yield a small tail.
    async fn fetch_new(&self, cursor: Option<Marker>) -> anyhow::Result<FetchBatch>;
}
