//! v2-style timeline API client: since-id pagination over a user's posts
//! plus single-post lookup for reshare resolution.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::ingest::{ItemRef, RefKind};
use crate::retry::{parse_retry_after, FetchError};

/// One post as the API reports it, with photo URLs already resolved from the
/// media includes.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub media: Vec<String>,
    pub reference: Option<ItemRef>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub posts: Vec<Post>,
    pub next_token: Option<String>,
}

#[async_trait]
pub trait TimelineApi: Send + Sync {
    /// One page of an account's posts, newest-first as upstream sends them.
    /// `since_id` bounds the walk; `page_token` continues a prior page.
    async fn page(
        &self,
        account_id: &str,
        since_id: Option<u64>,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<Page, FetchError>;

    /// Fetch one post by id; `Ok(None)` when it is gone or inaccessible.
    async fn lookup(&self, post_id: u64) -> Result<Option<Post>, FetchError>;
}

pub struct HttpTimelineApi {
    http: reqwest::Client,
    base_url: String,
    bearer_token: String,
}

impl HttpTimelineApi {
    pub fn new(base_url: &str, bearer_token: &str) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("newswire-relay/0.1")
            .connect_timeout(std::time::Duration::from_secs(4))
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token: bearer_token.to_string(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.bearer_token)
            .query(query)
            .send()
            .await
            .map_err(FetchError::from)?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(FetchError::RateLimited {
                retry_after: parse_retry_after(resp.headers()),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        resp.json::<T>()
            .await
            .map_err(|e| FetchError::Other(format!("decode timeline response: {e}")))
    }
}

#[async_trait]
impl TimelineApi for HttpTimelineApi {
    async fn page(
        &self,
        account_id: &str,
        since_id: Option<u64>,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<Page, FetchError> {
        let url = format!("{}/users/{}/tweets", self.base_url, account_id);
        let mut query: Vec<(&str, String)> = vec![
            ("max_results", page_size.to_string()),
            ("exclude", "replies,retweets".to_string()),
            (
                "tweet.fields",
                "created_at,id,text,attachments,referenced_tweets".to_string(),
            ),
            (
                "expansions",
                "attachments.media_keys,referenced_tweets.id".to_string(),
            ),
            ("media.fields", "url,type".to_string()),
        ];
        if let Some(since) = since_id {
            query.push(("since_id", since.to_string()));
        }
        if let Some(token) = page_token {
            query.push(("pagination_token", token.to_string()));
        }

        let body: WireTimeline = self.get_json(&url, &query).await?;
        let includes = body.includes.unwrap_or_default();
        let posts = body
            .data
            .into_iter()
            .filter_map(|w| w.into_post(&includes))
            .collect();
        Ok(Page {
            posts,
            next_token: body.meta.and_then(|m| m.next_token),
        })
    }

    async fn lookup(&self, post_id: u64) -> Result<Option<Post>, FetchError> {
        let url = format!("{}/tweets/{}", self.base_url, post_id);
        let query: Vec<(&str, String)> = vec![
            (
                "tweet.fields",
                "created_at,id,text,attachments".to_string(),
            ),
            ("expansions", "attachments.media_keys".to_string()),
            ("media.fields", "url,type".to_string()),
        ];
        match self.get_json::<WireLookup>(&url, &query).await {
            Ok(body) => {
                let includes = body.includes.unwrap_or_default();
                Ok(body.data.and_then(|w| w.into_post(&includes)))
            }
            // A deleted or protected post is not an error worth retrying.
            Err(FetchError::Status(404)) | Err(FetchError::Status(403)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ---- wire format --------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WireTimeline {
    #[serde(default)]
    data: Vec<WirePost>,
    includes: Option<WireIncludes>,
    meta: Option<WireMeta>,
}

#[derive(Debug, Deserialize)]
struct WireLookup {
    data: Option<WirePost>,
    includes: Option<WireIncludes>,
}

#[derive(Debug, Deserialize)]
struct WirePost {
    id: String,
    text: String,
    created_at: Option<String>,
    attachments: Option<WireAttachments>,
    #[serde(default)]
    referenced_tweets: Vec<WireRef>,
}

#[derive(Debug, Deserialize)]
struct WireAttachments {
    #[serde(default)]
    media_keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WireRef {
    #[serde(rename = "type")]
    kind: String,
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct WireIncludes {
    #[serde(default)]
    media: Vec<WireMedia>,
}

#[derive(Debug, Deserialize)]
struct WireMedia {
    media_key: String,
    #[serde(rename = "type")]
    kind: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMeta {
    next_token: Option<String>,
}

impl WirePost {
    /// Drops posts with an unparseable id; everything else degrades field by
    /// field (missing created_at becomes "now", media resolve best-effort).
    fn into_post(self, includes: &WireIncludes) -> Option<Post> {
        let id: u64 = match self.id.parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(raw_id = %self.id, "timeline post with non-numeric id dropped");
                return None;
            }
        };

        let created_at = self
            .created_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let media = match &self.attachments {
            Some(att) => includes
                .media
                .iter()
                .filter(|m| m.kind == "photo" && att.media_keys.contains(&m.media_key))
                .filter_map(|m| m.url.clone())
                .collect(),
            None => Vec::new(),
        };

        let reference = self.referenced_tweets.iter().find_map(|r| {
            let kind = match r.kind.as_str() {
                "retweeted" => RefKind::Repost,
                "quoted" => RefKind::Quote,
                _ => return None,
            };
            r.id.parse().ok().map(|id| ItemRef { kind, id })
        });

        Some(Post {
            id,
            created_at,
            text: self.text,
            media,
            reference,
        })
    }
}
