// tests/feed_relay.rs
//
// Whole-pipeline runs over real fetchers: a syndication-feed fixture and a
// faked timeline API, through normalization, rendering and dispatch.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::watch;

use newswire_relay::clients::timeline_api::{Page, Post, TimelineApi};
use newswire_relay::dispatch::{ChannelSender, Dispatcher, PayloadLimits};
use newswire_relay::ingest::feed::FeedFetcher;
use newswire_relay::ingest::timeline::TimelineFetcher;
use newswire_relay::ingest::{ItemRef, RefKind};
use newswire_relay::normalize::Normalizer;
use newswire_relay::retry::{FetchError, RetryPolicy};
use newswire_relay::translate::{Translator, TRANSLATION_UNAVAILABLE};
use newswire_relay::{CursorStore, Marker, RecencyWindow, Relay, SourceFetcher};

const FEED_XML: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/tests/fixtures/newswire_rss.xml"
));

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<String>>,
    photos: Mutex<Vec<String>>,
}

#[async_trait]
impl ChannelSender for RecordingSender {
    async fn send_text(&self, text: &str) -> Result<()> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
    async fn send_photo(&self, photo_url: &str, caption: Option<&str>) -> Result<()> {
        self.photos.lock().unwrap().push(photo_url.to_string());
        self.sent
            .lock()
            .unwrap()
            .push(caption.unwrap_or_default().to_string());
        Ok(())
    }
    async fn send_media_group(&self, photo_urls: &[String], caption: Option<&str>) -> Result<()> {
        self.photos.lock().unwrap().extend(photo_urls.iter().cloned());
        self.sent
            .lock()
            .unwrap()
            .push(caption.unwrap_or_default().to_string());
        Ok(())
    }
}

/// Single-page timeline backed by a mutable post list; `since_id` filters,
/// pages come out newest-first the way the real API sends them.
struct FakeTimelineApi {
    posts: Mutex<Vec<Post>>,
}

#[async_trait]
impl TimelineApi for FakeTimelineApi {
    async fn page(
        &self,
        _account_id: &str,
        since_id: Option<u64>,
        _page_token: Option<&str>,
        page_size: u32,
    ) -> Result<Page, FetchError> {
        let posts = self.posts.lock().unwrap();
        let mut out: Vec<Post> = posts
            .iter()
            .filter(|p| since_id.map_or(true, |s| p.id > s))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.id.cmp(&a.id));
        out.truncate(page_size as usize);
        Ok(Page {
            posts: out,
            next_token: None,
        })
    }

    async fn lookup(&self, post_id: u64) -> Result<Option<Post>, FetchError> {
        Ok(self
            .posts
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == post_id)
            .cloned())
    }
}

fn post(id: u64, text: &str, media: Vec<String>, reference: Option<ItemRef>) -> Post {
    Post {
        id,
        created_at: Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap()
            + chrono::Duration::minutes(id as i64),
        text: text.to_string(),
        media,
        reference,
    }
}

fn relay_over(
    dir: &Path,
    sources: Vec<Box<dyn SourceFetcher>>,
    sender: Arc<RecordingSender>,
    lookup: Option<Arc<dyn TimelineApi>>,
) -> Relay {
    Relay::new(
        sources,
        Normalizer::new(lookup, 250, Vec::<String>::new(), "https://x.example.com"),
        Translator::new(Vec::new()),
        Dispatcher::new(
            sender,
            PayloadLimits {
                max_caption_chars: 1000,
                max_group_size: 10,
            },
        ),
        CursorStore::new(dir),
        RecencyWindow::new(dir, 3600, 200),
        None,
        Duration::from_secs(600),
    )
}

#[tokio::test]
async fn feed_warm_start_backfills_then_goes_quiet() {
    let dir = tempfile::tempdir().unwrap();
    let sender = Arc::new(RecordingSender::default());
    let fetcher = FeedFetcher::from_fixture("wire", "Newswire Desk", FEED_XML, 2);
    let mut relay = relay_over(dir.path(), vec![Box::new(fetcher)], sender.clone(), None);

    let (_tx, rx) = watch::channel(false);
    let first = relay.run_cycle(&rx).await;
    assert_eq!(first.fetched, 2, "backfill is capped at two entries");
    assert_eq!(first.dispatched, 2);

    {
        let sent = sender.sent.lock().unwrap();
        assert!(sent[0].starts_with("🐦 Original:\n"));
        assert!(sent[0].contains(
            "The company lifted its full-year outlook,\nciting stronger data-center demand."
        ));
        assert!(sent[0].contains(&format!("🌐 Translation:\n{TRANSLATION_UNAVAILABLE}")));
        assert!(sent[0].contains("🔗👤 Author : Newswire Desk"));
        assert!(sent[0].contains("🕒 Posted: 01/02 10:30"));
        // The newest entry carries a photo, so it goes out captioned.
        assert!(sent[1].contains("Dockworkers approved a new contract late Wednesday."));
        assert_eq!(
            sender.photos.lock().unwrap().as_slice(),
            ["https://img.wire.example.com/port.jpg"]
        );
    }

    // Same document on the next poll: nothing is newer than the cursor.
    let second = relay.run_cycle(&rx).await;
    assert_eq!(second.fetched, 0);
    assert_eq!(second.dispatched, 0);
    assert_eq!(sender.sent.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn timeline_warm_start_emits_nothing_then_relays_new_posts() {
    let dir = tempfile::tempdir().unwrap();
    let sender = Arc::new(RecordingSender::default());
    let api = Arc::new(FakeTimelineApi {
        posts: Mutex::new(vec![
            post(100, "an old story", Vec::new(), None),
            post(101, "a slightly newer old story", Vec::new(), None),
        ]),
    });
    let fetcher = TimelineFetcher::new(
        api.clone(),
        "8400",
        "newsdesk",
        "https://x.example.com",
        5,
        RetryPolicy::default(),
    );
    let mut relay = relay_over(dir.path(), vec![Box::new(fetcher)], sender.clone(), None);

    let (_tx, rx) = watch::channel(false);
    let first = relay.run_cycle(&rx).await;
    assert_eq!(first.dispatched, 0, "history must not replay into the channel");
    assert_eq!(
        CursorStore::new(dir.path()).get("8400").unwrap(),
        Some(Marker::LastId { id: 101 })
    );

    api.posts
        .lock()
        .unwrap()
        .push(post(102, "fresh off the wire", Vec::new(), None));
    let second = relay.run_cycle(&rx).await;

    assert_eq!(second.dispatched, 1);
    let sent = sender.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("fresh off the wire"));
    assert!(sent[0].contains("🔗👤 Author : newsdesk"));
}

#[tokio::test]
async fn reshared_post_relays_the_referenced_original() {
    let dir = tempfile::tempdir().unwrap();
    let sender = Arc::new(RecordingSender::default());
    let api = Arc::new(FakeTimelineApi {
        posts: Mutex::new(vec![
            post(
                90,
                "the full story behind the merger, with every detail intact",
                vec!["https://img.example/merger.jpg".to_string()],
                None,
            ),
            post(
                101,
                "RT @elsewhere: the full story behind the mer…",
                Vec::new(),
                Some(ItemRef {
                    kind: RefKind::Repost,
                    id: 90,
                }),
            ),
        ]),
    });
    // Marker seeded as if warm start happened at post 100.
    CursorStore::new(dir.path())
        .set("8400", Marker::LastId { id: 100 })
        .unwrap();

    let fetcher = TimelineFetcher::new(
        api.clone(),
        "8400",
        "newsdesk",
        "https://x.example.com",
        5,
        RetryPolicy::default(),
    );
    let mut relay = relay_over(
        dir.path(),
        vec![Box::new(fetcher)],
        sender.clone(),
        Some(api.clone() as _),
    );

    let (_tx, rx) = watch::channel(false);
    let summary = relay.run_cycle(&rx).await;
    assert_eq!(summary.dispatched, 1);

    let sent = sender.sent.lock().unwrap();
    assert!(sent[0].contains("the full story behind the merger, with every detail intact"));
    assert!(!sent[0].contains("RT @elsewhere"));
    // The wrapper had no media of its own, so the original's photo rides along.
    assert_eq!(
        sender.photos.lock().unwrap().as_slice(),
        ["https://img.example/merger.jpg"]
    );
}
