use chrono::{DateTime, Utc};

use crate::ingest::ContentItem;

/// Channel message: original on top, translation under it, author and
/// post time in the footer.
pub fn render_message(item: &ContentItem, translated: &str) -> String {
    format!(
        "🐦 Original:\n{}\n\n🌐 Translation:\n{}\n\n🔗👤 Author : {}\n🕒 Posted: {}\n",
        item.text,
        translated,
        item.author,
        format_mmdd_hhmm(item.occurred_at),
    )
}

pub fn format_mmdd_hhmm(at: DateTime<Utc>) -> String {
    at.format("%m/%d %H:%M").to_string()
}
