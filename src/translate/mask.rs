//! Placeholder masking for spans that must survive translation byte-for-byte.
//!
//! Emoji runs and URLs are swapped for `[EMOJI_n]` / `[URL_n]` tags before any
//! engine sees the text, and swapped back afterwards. Restoration matches the
//! tags case-insensitively because engines routinely lowercase them.

use once_cell::sync::Lazy;
use regex::Regex;

static EMOJI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x{1F300}-\x{1FAFF}\x{2700}-\x{27BF}]+").unwrap());
static URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)https?://[^\s)\]}]+").unwrap());
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[(emoji|url)_(\d+)\]").unwrap());

/// One masked request: the tagged text plus the spans it stands in for.
/// Ephemeral, alive for a single engine-chain pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskedText {
    pub text: String,
    emojis: Vec<String>,
    urls: Vec<String>,
}

pub fn mask(text: &str) -> MaskedText {
    let mut emojis = Vec::new();
    let tagged = EMOJI.replace_all(text, |caps: &regex::Captures| {
        emojis.push(caps[0].to_string());
        format!("[EMOJI_{}]", emojis.len() - 1)
    });
    let mut urls = Vec::new();
    let tagged = URL.replace_all(&tagged, |caps: &regex::Captures| {
        urls.push(caps[0].to_string());
        format!("[URL_{}]", urls.len() - 1)
    });
    MaskedText {
        text: tagged.into_owned(),
        emojis,
        urls,
    }
}

impl MaskedText {
    pub fn span_count(&self) -> usize {
        self.emojis.len() + self.urls.len()
    }

    /// Puts original spans back into `translated`. URLs come back padded
    /// with single spaces so a translation that glued words around the tag
    /// cannot fuse into the link. Tags with an index this request never
    /// issued are left alone.
    pub fn restore(&self, translated: &str) -> String {
        PLACEHOLDER
            .replace_all(translated, |caps: &regex::Captures| {
                let idx: usize = match caps[2].parse() {
                    Ok(i) => i,
                    Err(_) => return caps[0].to_string(),
                };
                if caps[1].eq_ignore_ascii_case("emoji") {
                    self.emojis
                        .get(idx)
                        .cloned()
                        .unwrap_or_else(|| caps[0].to_string())
                } else {
                    self.urls
                        .get(idx)
                        .map(|u| format!(" {u} "))
                        .unwrap_or_else(|| caps[0].to_string())
                }
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_emoji_runs_and_urls_in_order() {
        let m = mask("🚀 big news 🎉🎉 at https://example.com/x?a=1 now");
        assert_eq!(m.text, "[EMOJI_0] big news [EMOJI_1] at [URL_0] now");
        assert_eq!(m.span_count(), 3);
    }

    #[test]
    fn restore_is_case_insensitive() {
        let m = mask("🚀 look https://example.com");
        let mangled = "[emoji_0] 보세요 [Url_0]";
        let out = m.restore(mangled);
        assert!(out.contains('🚀'));
        assert!(out.contains("https://example.com"));
    }

    #[test]
    fn urls_come_back_space_padded() {
        let m = mask("see https://example.com/a ok");
        let out = m.restore("보기[URL_0]완료");
        assert_eq!(out, "보기 https://example.com/a 완료");
    }

    #[test]
    fn unknown_index_left_untouched() {
        let m = mask("plain text, no spans");
        assert_eq!(m.restore("x [EMOJI_4] y"), "x [EMOJI_4] y");
    }

    #[test]
    fn round_trip_preserves_every_span() {
        let text = "Launch 🚀 at https://a.example/one and 🎉 https://b.example/two?q=1.";
        let m = mask(text);
        // Identity "engine": translation returns the tagged text unchanged.
        let restored = m.restore(&m.text);
        for span in ["🚀", "🎉", "https://a.example/one", "https://b.example/two?q=1."] {
            assert!(restored.contains(span), "missing {span} in {restored}");
        }
    }

    #[test]
    fn url_regex_stops_at_closing_brackets() {
        let m = mask("(see https://example.com/a) and [https://example.com/b]");
        assert_eq!(m.text, "(see [URL_0]) and [[URL_1]]");
    }
}
