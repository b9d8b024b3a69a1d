//! Runtime configuration. Everything arrives as environment variables so the
//! relay can run from a plain `.env` in dev and injected env in deploys.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Result};

/// One timeline account to poll: the API identity plus a display handle used
/// in rendered messages and canonical links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSpec {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Seconds between poll cycles.
    pub poll_interval_secs: u64,
    /// Directory holding cursors.json and recency.json.
    pub state_dir: PathBuf,

    // Timeline source
    pub timeline_api_base: String,
    pub timeline_link_base: String,
    pub timeline_bearer_token: String,
    pub timeline_accounts: Vec<AccountSpec>,
    pub timeline_page_size: u32,

    // Feed source
    pub feed_url: Option<String>,
    pub feed_name: String,
    pub feed_backfill: usize,

    // Ranked listing source
    pub listing_url: Option<String>,
    pub listing_name: String,
    pub listing_top_n: usize,
    pub listing_link_pattern: Option<String>,

    // Normalization
    pub truncation_threshold: usize,
    pub fulltext_min_spacing_secs: u64,
    pub quote_excluded_sources: HashSet<String>,

    // Page reader (browser-render service)
    pub page_reader_url: Option<String>,
    pub page_reader_token: Option<String>,
    pub session_recycle_secs: u64,

    // Translation
    pub engine_order: Vec<String>,
    pub source_lang: String,
    pub target_lang: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub ms_translator_key: Option<String>,
    pub ms_translator_region: Option<String>,
    pub deepl_api_key: Option<String>,
    /// Character cap per request for the length-limited engine.
    pub mymemory_chunk_limit: usize,

    // Delivery channel
    pub channel_api_base: String,
    pub channel_bot_token: String,
    pub channel_chat_id: String,
    pub max_caption_chars: usize,
    pub max_group_size: usize,

    // Recency window
    pub recency_ttl_secs: u64,
    pub recency_max_entries: usize,

    // Upstream retries
    pub fetch_max_attempts: u32,

    /// Bind address for the Prometheus exporter, if any.
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 1000,
            state_dir: PathBuf::from("state"),
            timeline_api_base: "https://api.x.com/2".to_string(),
            timeline_link_base: "https://x.com".to_string(),
            timeline_bearer_token: String::new(),
            timeline_accounts: Vec::new(),
            timeline_page_size: 100,
            feed_url: None,
            feed_name: "feed".to_string(),
            feed_backfill: 3,
            listing_url: None,
            listing_name: "listing".to_string(),
            listing_top_n: 7,
            listing_link_pattern: None,
            truncation_threshold: 250,
            fulltext_min_spacing_secs: 30,
            quote_excluded_sources: HashSet::new(),
            page_reader_url: None,
            page_reader_token: None,
            session_recycle_secs: 3600,
            engine_order: vec![
                "openai".to_string(),
                "mymemory".to_string(),
                "microsoft".to_string(),
                "deepl".to_string(),
            ],
            source_lang: "en".to_string(),
            target_lang: "ko".to_string(),
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            ms_translator_key: None,
            ms_translator_region: None,
            deepl_api_key: None,
            mymemory_chunk_limit: 430,
            channel_api_base: "https://api.telegram.org".to_string(),
            channel_bot_token: String::new(),
            channel_chat_id: String::new(),
            max_caption_chars: 1000,
            max_group_size: 10,
            recency_ttl_secs: 7 * 24 * 3600,
            recency_max_entries: 500,
            fetch_max_attempts: 5,
            metrics_addr: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let defaults = Settings::default();

        let channel_bot_token = match std::env::var("CHANNEL_BOT_TOKEN") {
            Ok(v) if !v.trim().is_empty() => v,
            _ => bail!("CHANNEL_BOT_TOKEN is required"),
        };
        let channel_chat_id = match std::env::var("CHANNEL_CHAT_ID") {
            Ok(v) if !v.trim().is_empty() => v,
            _ => bail!("CHANNEL_CHAT_ID is required"),
        };

        let account_ids = env_csv("TIMELINE_ACCOUNT_IDS");
        let account_names = env_csv("TIMELINE_ACCOUNT_NAMES");
        let timeline_accounts: Vec<AccountSpec> = account_ids
            .iter()
            .enumerate()
            .map(|(i, id)| AccountSpec {
                id: id.clone(),
                name: account_names.get(i).cloned().unwrap_or_else(|| id.clone()),
            })
            .collect();

        let timeline_bearer_token = env_string("TIMELINE_BEARER_TOKEN", "");
        if !timeline_accounts.is_empty() && timeline_bearer_token.is_empty() {
            bail!("TIMELINE_BEARER_TOKEN is required when TIMELINE_ACCOUNT_IDS is set");
        }

        let engine_order = {
            let configured = env_csv("TRANSLATE_ENGINES");
            if configured.is_empty() {
                defaults.engine_order.clone()
            } else {
                configured
            }
        };

        let metrics_addr = std::env::var("METRICS_ADDR")
            .ok()
            .and_then(|v| v.parse().ok());

        Ok(Self {
            poll_interval_secs: env_u64("CHECK_INTERVAL_SECS", defaults.poll_interval_secs),
            state_dir: PathBuf::from(env_string("STATE_DIR", "state")),
            timeline_api_base: env_string("TIMELINE_API_BASE", &defaults.timeline_api_base),
            timeline_link_base: env_string("TIMELINE_LINK_BASE", &defaults.timeline_link_base),
            timeline_bearer_token,
            timeline_accounts,
            timeline_page_size: env_u64("TIMELINE_PAGE_SIZE", defaults.timeline_page_size as u64)
                as u32,
            feed_url: env_opt("FEED_URL"),
            feed_name: env_string("FEED_NAME", &defaults.feed_name),
            feed_backfill: env_u64("FEED_BACKFILL_COUNT", defaults.feed_backfill as u64) as usize,
            listing_url: env_opt("LISTING_URL"),
            listing_name: env_string("LISTING_NAME", &defaults.listing_name),
            listing_top_n: env_u64("LISTING_TOP_N", defaults.listing_top_n as u64) as usize,
            listing_link_pattern: env_opt("LISTING_LINK_PATTERN"),
            truncation_threshold: env_u64(
                "TEXT_LENGTH_THRESHOLD",
                defaults.truncation_threshold as u64,
            ) as usize,
            fulltext_min_spacing_secs: env_u64(
                "FULLTEXT_MIN_SPACING_SECS",
                defaults.fulltext_min_spacing_secs,
            ),
            quote_excluded_sources: env_csv("QUOTE_EXCLUDED_SOURCES").into_iter().collect(),
            page_reader_url: env_opt("PAGE_READER_URL"),
            page_reader_token: env_opt("PAGE_READER_TOKEN"),
            session_recycle_secs: env_u64("SESSION_RECYCLE_SECS", defaults.session_recycle_secs),
            engine_order,
            source_lang: env_string("SOURCE_LANG", &defaults.source_lang),
            target_lang: env_string("TARGET_LANG", &defaults.target_lang),
            openai_api_key: env_opt("OPENAI_API_KEY"),
            openai_model: env_string("OPENAI_MODEL", &defaults.openai_model),
            ms_translator_key: env_opt("MS_TRANSLATOR_KEY"),
            ms_translator_region: env_opt("MS_TRANSLATOR_REGION"),
            deepl_api_key: env_opt("DEEPL_API_KEY"),
            mymemory_chunk_limit: env_u64(
                "MYMEMORY_CHUNK_LIMIT",
                defaults.mymemory_chunk_limit as u64,
            ) as usize,
            channel_api_base: env_string("CHANNEL_API_BASE", &defaults.channel_api_base),
            channel_bot_token,
            channel_chat_id,
            max_caption_chars: env_u64("MAX_CAPTION_CHARS", defaults.max_caption_chars as u64)
                as usize,
            max_group_size: env_u64("MAX_MEDIA_GROUP_SIZE", defaults.max_group_size as u64)
                as usize,
            recency_ttl_secs: env_u64("RECENCY_TTL_SECS", defaults.recency_ttl_secs),
            recency_max_entries: env_u64(
                "RECENCY_MAX_ENTRIES",
                defaults.recency_max_entries as u64,
            ) as usize,
            fetch_max_attempts: env_u64("FETCH_MAX_ATTEMPTS", defaults.fetch_max_attempts as u64)
                as u32,
            metrics_addr,
        })
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Comma-separated list; empty segments dropped, whitespace trimmed.
fn env_csv(key: &str) -> Vec<String> {
    std::env::var(key)
        .ok()
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
