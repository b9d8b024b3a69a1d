use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use once_cell::sync::Lazy;
use quick_xml::de::from_str;
use regex::Regex;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use crate::clients::fetch_document;
use crate::ingest::{FetchBatch, RawItem, SourceFetcher};
use crate::retry::{with_backoff, RetryPolicy};
use crate::state::Marker;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    #[serde(default)]
    enclosure: Vec<Enclosure>,
    guid: Option<Guid>,
}
#[derive(Debug, Deserialize)]
struct Enclosure {
    #[serde(rename = "@url")]
    url: Option<String>,
    #[serde(rename = "@type")]
    kind: Option<String>,
}
// guid carries an isPermaLink attribute, so it cannot map to a bare String.
#[derive(Debug, Deserialize)]
struct Guid {
    #[serde(rename = "$text")]
    value: Option<String>,
}

fn parse_rfc2822_to_unix(ts: &str) -> i64 {
    OffsetDateTime::parse(ts, &Rfc2822)
        .ok()
        .map(|dt| dt.to_offset(UtcOffset::UTC).unix_timestamp())
        .unwrap_or(0)
}

pub enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

/// Syndication-feed source with a publish-timestamp cursor. The first poll
/// backfills a short tail of the feed instead of replaying all of it.
pub struct FeedFetcher {
    source_id: String,
    author: String,
    backfill: usize,
    retry: RetryPolicy,
    mode: Mode,
}

impl FeedFetcher {
    pub fn from_url(
        source_id: &str,
        author: &str,
        url: &str,
        client: reqwest::Client,
        backfill: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source_id: source_id.to_string(),
            author: author.to_string(),
            backfill,
            retry,
            mode: Mode::Http {
                url: url.to_string(),
                client,
            },
        }
    }

    pub fn from_fixture(source_id: &str, author: &str, body: &str, backfill: usize) -> Self {
        Self {
            source_id: source_id.to_string(),
            author: author.to_string(),
            backfill,
            retry: RetryPolicy::default(),
            mode: Mode::Fixture(body.to_string()),
        }
    }

    /// Parse the feed body into items sorted oldest-first. Entries with an
    /// empty cleaned body are dropped.
    fn parse_entries(&self, body: &str) -> Result<Vec<RawItem>> {
        let xml = sanitize_feed_xml(body);
        let rss: Rss = from_str(&xml).context("parsing feed xml")?;

        let mut out = Vec::with_capacity(rss.channel.items.len());
        for it in rss.channel.items {
            let text = clean_entry_body(it.description.as_deref().unwrap_or_default());
            if text.is_empty() {
                tracing::debug!(source = %self.source_id, link = ?it.link, "feed entry without body skipped");
                continue;
            }
            let ts = it
                .pub_date
                .as_deref()
                .map(parse_rfc2822_to_unix)
                .unwrap_or(0);
            let media = extract_entry_media(&it);
            let item_id = it
                .link
                .clone()
                .or_else(|| it.guid.as_ref().and_then(|g| g.value.clone()))
                .unwrap_or_else(|| format!("{}:{}", self.source_id, ts));

            out.push(RawItem {
                source_id: self.source_id.clone(),
                item_id,
                occurred_at: DateTime::<Utc>::from_timestamp(ts, 0).unwrap_or_else(Utc::now),
                text,
                media,
                author: self.author.clone(),
                link: it.link,
                reference: None,
            });
        }
        out.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at));
        Ok(out)
    }
}

#[async_trait]
impl SourceFetcher for FeedFetcher {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch_new(&self, cursor: Option<Marker>) -> Result<FetchBatch> {
        let last_ts = match cursor {
            None => None,
            Some(Marker::LastTimestamp { ts }) => Some(ts),
            Some(other) => bail!("feed cursor has wrong shape: {other:?}"),
        };

        let body = match &self.mode {
            Mode::Fixture(s) => s.clone(),
            Mode::Http { url, client } => {
                with_backoff(self.retry, "feed fetch", || fetch_document(client, url)).await?
            }
        };

        let entries = self.parse_entries(&body)?;
        if entries.is_empty() {
            // Nothing parseable: leave the cursor alone so a first poll can
            // still backfill once the feed has content.
            return Ok(FetchBatch::unchanged());
        }

        let max_seen = entries
            .iter()
            .map(|e| e.occurred_at.timestamp())
            .max()
            .unwrap_or(0);

        let items: Vec<RawItem> = match last_ts {
            // Warm start: only the most recent tail goes out.
            None => {
                let skip = entries.len().saturating_sub(self.backfill);
                tracing::info!(
                    source = %self.source_id,
                    backfill = entries.len() - skip,
                    "feed warm start"
                );
                entries.into_iter().skip(skip).collect()
            }
            Some(ts) => entries
                .into_iter()
                .filter(|e| e.occurred_at.timestamp() > ts)
                .collect(),
        };

        counter!("relay_items_fetched_total").increment(items.len() as u64);
        Ok(FetchBatch {
            items,
            // Never moves backwards even if the feed regresses.
            next_marker: Some(Marker::LastTimestamp {
                ts: max_seen.max(last_ts.unwrap_or(i64::MIN)),
            }),
        })
    }
}

/// Feeds in the wild carry HTML entities that are not valid XML; swap the
/// common ones before handing the document to the XML parser.
fn sanitize_feed_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

/// Entry bodies arrive as HTML: keep line breaks, drop tags, decode
/// entities, squeeze runs of blank lines.
fn clean_entry_body(html: &str) -> String {
    static RE_BR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
    static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<[^>]+>").unwrap());
    static RE_BLANKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

    let step = RE_BR.replace_all(html, "\n");
    let step = RE_TAGS.replace_all(&step, "");
    let step = html_escape::decode_html_entities(&step).into_owned();
    RE_BLANKS.replace_all(&step, "\n\n").trim().to_string()
}

fn extract_entry_media(item: &Item) -> Vec<String> {
    static RE_IMG_SRC: Lazy<Regex> =
        Lazy::new(|| Regex::new(r#"(?i)<img[^>]+src=["']([^"']+)["']"#).unwrap());

    let mut urls: Vec<String> = Vec::new();
    if let Some(desc) = &item.description {
        for caps in RE_IMG_SRC.captures_iter(desc) {
            let url = caps[1].trim().to_string();
            if !url.is_empty() && !urls.contains(&url) {
                urls.push(url);
            }
        }
    }
    for enc in &item.enclosure {
        let Some(href) = enc.url.as_deref() else {
            continue;
        };
        let kind = enc.kind.as_deref().unwrap_or("").to_ascii_lowercase();
        let lower = href.to_ascii_lowercase();
        let looks_like_image = kind.contains("image")
            || [".jpg", ".jpeg", ".png", ".gif", ".webp"]
                .iter()
                .any(|ext| lower.ends_with(ext));
        if looks_like_image && !urls.iter().any(|u| u == href) {
            urls.push(href.to_string());
        }
    }
    urls
}
