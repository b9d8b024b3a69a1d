//! Ranked-listing page scraping. The page markup is site-specific and
//! unstable, so parsing sits behind a trait and a degraded parse is just an
//! empty result, never an error that could touch cursor state.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

/// One ranked entry, best rank first as scraped.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingEntry {
    pub url: String,
    pub title: String,
    pub summary: Option<String>,
}

pub trait ListingParser: Send + Sync {
    /// Top `n` entries in rank order. Empty on any markup surprise.
    fn top_ranked(&self, html: &str, base_url: &str, n: usize) -> Vec<ListingEntry>;
}

/// Generic parser: scans anchors in document order, resolves relative hrefs,
/// optionally keeps only URLs matching a configured pattern, dedups by URL.
/// Rank is document order of first appearance.
pub struct ArticleLinkParser {
    link_pattern: Option<Regex>,
}

impl ArticleLinkParser {
    pub fn new(link_pattern: Option<&str>) -> Result<Self> {
        let link_pattern = match link_pattern {
            Some(p) => Some(Regex::new(p).with_context(|| format!("listing link pattern {p:?}"))?),
            None => None,
        };
        Ok(Self { link_pattern })
    }
}

impl ListingParser for ArticleLinkParser {
    fn top_ranked(&self, html: &str, base_url: &str, n: usize) -> Vec<ListingEntry> {
        static ANCHORS: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());

        let base = match reqwest::Url::parse(base_url) {
            Ok(u) => u,
            Err(_) => return Vec::new(),
        };

        let doc = Html::parse_document(html);
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();

        for el in doc.select(&ANCHORS) {
            if out.len() >= n {
                break;
            }
            let href = match el.value().attr("href") {
                Some(h) => h.trim(),
                None => continue,
            };
            if href.is_empty()
                || href.starts_with('#')
                || href.starts_with("javascript:")
                || href.starts_with("mailto:")
            {
                continue;
            }
            let resolved = match base.join(href) {
                Ok(u) => u,
                Err(_) => continue,
            };
            if resolved.scheme() != "http" && resolved.scheme() != "https" {
                continue;
            }
            if let Some(re) = &self.link_pattern {
                if !re.is_match(resolved.as_str()) && !re.is_match(resolved.path()) {
                    continue;
                }
            }

            let title = el.text().collect::<String>();
            let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
            if title.is_empty() {
                continue;
            }
            let url = resolved.to_string();
            if !seen.insert(url.clone()) {
                continue;
            }
            out.push(ListingEntry {
                url,
                title,
                summary: None,
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <nav><a href="/login">Log in</a></nav>
          <section class="trending">
            <a href="/news/AAA/first-story.html"><h3>First story</h3></a>
            <a href="/news/BBB/second-story.html">Second story</a>
            <a href="/news/BBB/second-story.html">Second story (again)</a>
            <a href="https://elsewhere.example.com/news/CCC/offsite.html">Offsite story</a>
            <a href="javascript:void(0)">Widget</a>
            <a href="/news/DDD/fourth-story.html">Fourth story</a>
            <a href="/news/EEE/fifth-story.html">Fifth story</a>
          </section>
        </body></html>"#;

    #[test]
    fn ranks_follow_document_order_with_dedup() {
        let parser = ArticleLinkParser::new(Some(r"^/news/[A-Z]+/.+\.html$")).unwrap();
        let entries = parser.top_ranked(PAGE, "https://listing.example.com/", 7);
        let urls: Vec<&str> = entries.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://listing.example.com/news/AAA/first-story.html",
                "https://listing.example.com/news/BBB/second-story.html",
                "https://elsewhere.example.com/news/CCC/offsite.html",
                "https://listing.example.com/news/DDD/fourth-story.html",
                "https://listing.example.com/news/EEE/fifth-story.html",
            ]
        );
        assert_eq!(entries[0].title, "First story");
    }

    #[test]
    fn top_n_caps_results() {
        let parser = ArticleLinkParser::new(Some(r"^/news/")).unwrap();
        let entries = parser.top_ranked(PAGE, "https://listing.example.com/", 2);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].title, "Second story");
    }

    #[test]
    fn unparseable_markup_degrades_to_empty() {
        let parser = ArticleLinkParser::new(None).unwrap();
        assert!(parser.top_ranked("", "https://listing.example.com/", 7).is_empty());
        assert!(parser.top_ranked("<html>", "not a url", 7).is_empty());
    }
}
