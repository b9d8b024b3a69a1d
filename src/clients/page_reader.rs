//! Secondary full-text retrieval through a browser-rendering service.
//! Upstream APIs truncate long post bodies; rendering the public page and
//! scraping the text node recovers the rest.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

#[async_trait]
pub trait PageReader: Send + Sync {
    /// Render `url` and return the post body text, emoji intact.
    async fn render_text(&self, url: &str) -> Result<String>;
}

/// Client for a Browserless-style `/content` endpoint: POST a URL, get the
/// fully rendered HTML back.
pub struct BrowserlessReader {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BrowserlessReader {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("newswire-relay/0.1")
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        }
    }

    async fn content(&self, url: &str) -> Result<String> {
        let mut endpoint = format!("{}/content", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }
        let body = serde_json::json!({ "url": url });

        let resp = self
            .http
            .post(&endpoint)
            .json(&body)
            .send()
            .await
            .context("render service request")?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            bail!("render service returned {status}: {message}");
        }
        resp.text().await.context("render service body")
    }
}

#[async_trait]
impl PageReader for BrowserlessReader {
    async fn render_text(&self, url: &str) -> Result<String> {
        let html = self.content(url).await?;
        match extract_post_text(&html) {
            Some(text) if !text.is_empty() => Ok(text),
            _ => bail!("post text not found in rendered page"),
        }
    }
}

/// Find the post body node in a rendered page and flatten it to text.
pub fn extract_post_text(html: &str) -> Option<String> {
    static SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
        [
            r#"[data-testid="tweetText"]"#,
            r#"article[data-testid="tweet"] span[dir="auto"]"#,
            "article",
        ]
        .iter()
        .map(|s| Selector::parse(s).unwrap())
        .collect()
    });

    let doc = Html::parse_document(html);
    for selector in SELECTORS.iter() {
        if let Some(el) = doc.select(selector).next() {
            let text = html_to_text_with_glyphs(&el.inner_html());
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

/// HTML fragment to plain text. Emoji rendered as `<img alt="..">` or
/// `<svg aria-label="..">` glyphs come back as their unicode characters;
/// `<br>` stays a newline; horizontal whitespace collapses, newlines do not.
pub fn html_to_text_with_glyphs(fragment: &str) -> String {
    static RE_IMG_ALT: Lazy<Regex> =
        Lazy::new(|| Regex::new(r#"(?i)<img[^>]*\salt="([^"]+)"[^>]*>"#).unwrap());
    static RE_SVG_LABEL: Lazy<Regex> =
        Lazy::new(|| Regex::new(r#"(?is)<svg[^>]*\saria-label="([^"]+)"[^>]*>.*?</svg>"#).unwrap());
    static RE_BR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
    static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").unwrap());
    static RE_HSPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\S\n]+").unwrap());

    let step = RE_IMG_ALT.replace_all(fragment, |caps: &regex::Captures| {
        html_escape::decode_html_entities(&caps[1]).into_owned()
    });
    let step = RE_SVG_LABEL.replace_all(&step, |caps: &regex::Captures| {
        html_escape::decode_html_entities(&caps[1]).into_owned()
    });
    let step = RE_BR.replace_all(&step, "\n");
    let step = RE_TAGS.replace_all(&step, "");
    let step = html_escape::decode_html_entities(&step).into_owned();
    RE_HSPACE.replace_all(&step, " ").trim().to_string()
}
