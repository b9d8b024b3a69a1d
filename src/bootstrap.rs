//! Wires Settings into a running Relay: clients, fetchers, translator,
//! dispatcher, durable state.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::clients::default_http_client;
use crate::clients::listing_page::ArticleLinkParser;
use crate::clients::page_reader::{BrowserlessReader, PageReader};
use crate::clients::timeline_api::HttpTimelineApi;
use crate::config::Settings;
use crate::dispatch::telegram::TelegramSender;
use crate::dispatch::{Dispatcher, PayloadLimits};
use crate::ingest::feed::FeedFetcher;
use crate::ingest::listing::ListingFetcher;
use crate::ingest::timeline::TimelineFetcher;
use crate::ingest::SourceFetcher;
use crate::normalize::{Normalizer, PageSession, ReaderFactory};
use crate::retry::RetryPolicy;
use crate::runner::Relay;
use crate::state::{CursorStore, RecencyWindow};
use crate::translate::{build_chain, Translator};

struct BrowserlessFactory {
    base_url: String,
    token: Option<String>,
}

impl ReaderFactory for BrowserlessFactory {
    fn open(&self) -> Box<dyn PageReader> {
        Box::new(BrowserlessReader::new(&self.base_url, self.token.as_deref()))
    }
}

/// Source priority order is fixed: timeline accounts in configured order,
/// then the feed, then the ranked listing.
pub fn build_relay(settings: &Settings) -> Result<Relay> {
    let retry = RetryPolicy::default().with_max_attempts(settings.fetch_max_attempts);
    let mut sources: Vec<Box<dyn SourceFetcher>> = Vec::new();

    let timeline_api = if settings.timeline_accounts.is_empty() {
        None
    } else {
        Some(Arc::new(HttpTimelineApi::new(
            &settings.timeline_api_base,
            &settings.timeline_bearer_token,
        )))
    };
    if let Some(api) = &timeline_api {
        for account in &settings.timeline_accounts {
            sources.push(Box::new(TimelineFetcher::new(
                api.clone(),
                &account.id,
                &account.name,
                &settings.timeline_link_base,
                settings.timeline_page_size,
                retry,
            )));
        }
    }

    if let Some(url) = &settings.feed_url {
        sources.push(Box::new(FeedFetcher::from_url(
            &settings.feed_name,
            &settings.feed_name,
            url,
            default_http_client(),
            settings.feed_backfill,
            retry,
        )));
    }

    if let Some(url) = &settings.listing_url {
        let parser = ArticleLinkParser::new(settings.listing_link_pattern.as_deref())
            .context("listing link pattern")?;
        sources.push(Box::new(ListingFetcher::from_url(
            &settings.listing_name,
            &settings.listing_name,
            url,
            default_http_client(),
            Arc::new(parser),
            settings.listing_top_n,
            retry,
        )));
    }

    if sources.is_empty() {
        bail!("no sources configured; set FEED_URL, TIMELINE_ACCOUNT_IDS or LISTING_URL");
    }

    let session = settings.page_reader_url.as_ref().map(|url| {
        PageSession::open(
            Box::new(BrowserlessFactory {
                base_url: url.clone(),
                token: settings.page_reader_token.clone(),
            }),
            Duration::from_secs(settings.fulltext_min_spacing_secs),
            Duration::from_secs(settings.session_recycle_secs),
        )
    });

    let normalizer = Normalizer::new(
        timeline_api.map(|api| api as _),
        settings.truncation_threshold,
        settings.quote_excluded_sources.iter().cloned(),
        &settings.timeline_link_base,
    );

    let translator = Translator::new(build_chain(settings));
    if translator.engine_count() == 0 {
        tracing::warn!("no translation engines available, every message will carry the sentinel");
    }

    let sender = Arc::new(TelegramSender::new(
        &settings.channel_api_base,
        &settings.channel_bot_token,
        &settings.channel_chat_id,
    ));
    let dispatcher = Dispatcher::new(
        sender,
        PayloadLimits {
            max_caption_chars: settings.max_caption_chars,
            max_group_size: settings.max_group_size,
        },
    );

    Ok(Relay::new(
        sources,
        normalizer,
        translator,
        dispatcher,
        CursorStore::new(&settings.state_dir),
        RecencyWindow::new(
            &settings.state_dir,
            settings.recency_ttl_secs,
            settings.recency_max_entries,
        ),
        session,
        Duration::from_secs(settings.poll_interval_secs),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_sources_is_a_config_error() {
        let settings = Settings::default();
        assert!(build_relay(&settings).is_err());
    }

    #[test]
    fn feed_only_settings_build() {
        let settings = Settings {
            feed_url: Some("https://feed.example.com/rss".to_string()),
            ..Settings::default()
        };
        assert!(build_relay(&settings).is_ok());
    }

    #[test]
    fn bad_listing_pattern_is_rejected() {
        let settings = Settings {
            listing_url: Some("https://listing.example.com/".to_string()),
            listing_link_pattern: Some("([unclosed".to_string()),
            ..Settings::default()
        };
        assert!(build_relay(&settings).is_err());
    }
}
