use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use metrics::counter;

use crate::clients::timeline_api::{Post, TimelineApi};
use crate::ingest::{FetchBatch, RawItem, SourceFetcher};
use crate::retry::{with_backoff, RetryPolicy};
use crate::state::Marker;

/// Provider minimum page size; enough to learn the newest id.
const WARM_START_PAGE_SIZE: u32 = 5;

/// Polls one account's timeline through since-id pagination. Pages arrive
/// newest-first, so they are buffered and replayed oldest-page-first with
/// each page reversed, then sorted as a final ordering guard.
pub struct TimelineFetcher {
    account_id: String,
    author: String,
    link_base: String,
    api: Arc<dyn TimelineApi>,
    page_size: u32,
    retry: RetryPolicy,
}

impl TimelineFetcher {
    pub fn new(
        api: Arc<dyn TimelineApi>,
        account_id: &str,
        author: &str,
        link_base: &str,
        page_size: u32,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            account_id: account_id.to_string(),
            author: author.to_string(),
            link_base: link_base.trim_end_matches('/').to_string(),
            api,
            page_size,
            retry,
        }
    }

    fn to_raw(&self, post: Post) -> RawItem {
        let link = format!("{}/{}/status/{}", self.link_base, self.author, post.id);
        RawItem {
            source_id: self.account_id.clone(),
            item_id: post.id.to_string(),
            occurred_at: post.created_at,
            text: post.text,
            media: post.media,
            author: self.author.clone(),
            link: Some(link),
            reference: post.reference,
        }
    }

    /// First contact with an account: record the newest visible id and yield
    /// nothing, so history is never replayed into the channel.
    async fn warm_start(&self) -> Result<FetchBatch> {
        let page = with_backoff(self.retry, "timeline warm start", || {
            self.api
                .page(&self.account_id, None, None, WARM_START_PAGE_SIZE)
        })
        .await?;
        let newest = page.posts.iter().map(|p| p.id).max().unwrap_or(0);
        tracing::info!(
            account = %self.account_id,
            last_id = newest,
            "timeline warm start, marker recorded"
        );
        Ok(FetchBatch {
            items: Vec::new(),
            next_marker: Some(Marker::LastId { id: newest }),
        })
    }
}

#[async_trait]
impl SourceFetcher for TimelineFetcher {
    fn source_id(&self) -> &str {
        &self.account_id
    }

    async fn fetch_new(&self, cursor: Option<Marker>) -> Result<FetchBatch> {
        let last_id = match cursor {
            None => return self.warm_start().await,
            Some(Marker::LastId { id }) => id,
            Some(other) => bail!("timeline cursor has wrong shape: {other:?}"),
        };

        // id 0 marks an account that had no posts at warm start; there is no
        // valid since-id yet, everything it posts is new.
        let since = (last_id > 0).then_some(last_id);

        let mut pages: Vec<Vec<Post>> = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let token_arg = token.clone();
            let page = with_backoff(self.retry, "timeline page", || {
                self.api.page(
                    &self.account_id,
                    since,
                    token_arg.as_deref(),
                    self.page_size,
                )
            })
            .await?;

            if page.posts.is_empty() {
                break;
            }
            pages.push(page.posts);
            token = match page.next_token {
                Some(t) => Some(t),
                None => break,
            };
        }

        let mut posts: Vec<Post> = Vec::new();
        for page in pages.into_iter().rev() {
            posts.extend(page.into_iter().rev());
        }
        posts.sort_by_key(|p| (p.created_at, p.id));
        posts.retain(|p| p.id > last_id);

        let next_id = posts.iter().map(|p| p.id).max().unwrap_or(0).max(last_id);
        let items: Vec<RawItem> = posts.into_iter().map(|p| self.to_raw(p)).collect();
        counter!("relay_items_fetched_total").increment(items.len() as u64);

        Ok(FetchBatch {
            items,
            next_marker: Some(Marker::LastId { id: next_id }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::timeline_api::Page;
    use crate::retry::FetchError;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    fn post(id: u64, ts: i64, text: &str) -> Post {
        Post {
            id,
            created_at: Utc.timestamp_opt(ts, 0).unwrap(),
            text: text.to_string(),
            media: Vec::new(),
            reference: None,
        }
    }

    /// Serves a scripted sequence of pages keyed by pagination token.
    struct FakeApi {
        pages: Vec<Page>,
        calls: Mutex<Vec<Option<String>>>,
    }

    impl FakeApi {
        fn new(pages: Vec<Page>) -> Self {
            Self {
                pages,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TimelineApi for FakeApi {
        async fn page(
            &self,
            _account_id: &str,
            _since_id: Option<u64>,
            page_token: Option<&str>,
            _page_size: u32,
        ) -> Result<Page, FetchError> {
            self.calls
                .lock()
                .unwrap()
                .push(page_token.map(String::from));
            let idx = match page_token {
                None => 0,
                Some(t) => t.parse::<usize>().unwrap(),
            };
            Ok(self.pages.get(idx).cloned().unwrap_or_default())
        }

        async fn lookup(&self, _post_id: u64) -> Result<Option<Post>, FetchError> {
            Ok(None)
        }
    }

    fn fetcher(api: FakeApi) -> TimelineFetcher {
        TimelineFetcher::new(
            Arc::new(api),
            "42",
            "alice",
            "https://posts.example.com",
            100,
            RetryPolicy::default().with_max_attempts(1),
        )
    }

    #[tokio::test]
    async fn warm_start_yields_nothing_and_records_newest_id() {
        let api = FakeApi::new(vec![Page {
            posts: vec![post(907, 3000, "c"), post(905, 2000, "b"), post(901, 1000, "a")],
            next_token: None,
        }]);
        let batch = fetcher(api).fetch_new(None).await.unwrap();
        assert!(batch.items.is_empty());
        assert_eq!(batch.next_marker, Some(Marker::LastId { id: 907 }));
    }

    #[tokio::test]
    async fn warm_start_on_empty_account_records_zero() {
        let api = FakeApi::new(vec![Page::default()]);
        let batch = fetcher(api).fetch_new(None).await.unwrap();
        assert!(batch.items.is_empty());
        assert_eq!(batch.next_marker, Some(Marker::LastId { id: 0 }));
    }

    #[tokio::test]
    async fn pages_replay_in_chronological_order() {
        // Upstream page 1 is the newest batch, page 2 older, both newest-first.
        let api = FakeApi::new(vec![
            Page {
                posts: vec![post(910, 5000, "e"), post(909, 4000, "d")],
                next_token: Some("1".into()),
            },
            Page {
                posts: vec![post(908, 3000, "c"), post(906, 2000, "b")],
                next_token: None,
            },
        ]);
        let batch = fetcher(api).fetch_new(Some(Marker::LastId { id: 905 })).await.unwrap();
        let ids: Vec<&str> = batch.items.iter().map(|i| i.item_id.as_str()).collect();
        assert_eq!(ids, vec!["906", "908", "909", "910"]);
        assert_eq!(batch.next_marker, Some(Marker::LastId { id: 910 }));

        let times: Vec<i64> = batch.items.iter().map(|i| i.occurred_at.timestamp()).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn disorder_across_pages_is_still_sorted() {
        // A page boundary that interleaves timestamps.
        let api = FakeApi::new(vec![
            Page {
                posts: vec![post(920, 7000, "late"), post(918, 5000, "mid")],
                next_token: Some("1".into()),
            },
            Page {
                posts: vec![post(919, 6000, "swapped"), post(917, 4000, "early")],
                next_token: None,
            },
        ]);
        let batch = fetcher(api).fetch_new(Some(Marker::LastId { id: 0 })).await.unwrap();
        let times: Vec<i64> = batch.items.iter().map(|i| i.occurred_at.timestamp()).collect();
        assert_eq!(times, vec![4000, 5000, 6000, 7000]);
    }

    #[tokio::test]
    async fn empty_poll_keeps_marker() {
        let api = FakeApi::new(vec![Page::default()]);
        let batch = fetcher(api).fetch_new(Some(Marker::LastId { id: 905 })).await.unwrap();
        assert!(batch.items.is_empty());
        assert_eq!(batch.next_marker, Some(Marker::LastId { id: 905 }));
    }

    #[tokio::test]
    async fn wrong_marker_shape_is_an_error() {
        let api = FakeApi::new(vec![]);
        let out = fetcher(api)
            .fetch_new(Some(Marker::LastTimestamp { ts: 5 }))
            .await;
        assert!(out.is_err());
    }

    #[tokio::test]
    async fn items_carry_author_and_canonical_link() {
        let api = FakeApi::new(vec![Page {
            posts: vec![post(906, 2000, "hello")],
            next_token: None,
        }]);
        let batch = fetcher(api).fetch_new(Some(Marker::LastId { id: 905 })).await.unwrap();
        let item = &batch.items[0];
        assert_eq!(item.author, "alice");
        assert_eq!(
            item.link.as_deref(),
            Some("https://posts.example.com/alice/status/906")
        );
    }
}
