use chrono::{DateTime, Utc};
use feed_rs::parser;
use sha2::{Digest, Sha256};

/// One entry read from a syndication feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    /// Feed-assigned identifier, stable across polls.
    pub id: String,
    pub title: String,
    pub link: String,
    /// Entry body markup: the full content when present, else the summary.
    pub raw_content: String,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Parses RSS/Atom bytes into entries, in the order the feed lists them.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<FeedEntry>, parser::ParseFeedError> {
    let feed = parser::parse(bytes)?;

    let entries = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default();
            let published_at = entry.published.or(entry.updated);
            let raw_content = entry
                .content
                .and_then(|c| c.body)
                .or_else(|| entry.summary.map(|s| s.content))
                .unwrap_or_default();
            let title = entry
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Untitled".to_string());
            let author = entry
                .authors
                .into_iter()
                .map(|p| p.name)
                .find(|name| !name.trim().is_empty());

            let existing_id = if entry.id.is_empty() {
                None
            } else {
                Some(entry.id.as_str())
            };
            let id = generate_id(existing_id, &link, &title, published_at);

            FeedEntry {
                id,
                title,
                link,
                raw_content,
                author,
                published_at,
            }
        })
        .collect();

    Ok(entries)
}

/// Uses the feed's own id, or derives a stable one when the feed omits it.
fn generate_id(
    existing: Option<&str>,
    link: &str,
    title: &str,
    published: Option<DateTime<Utc>>,
) -> String {
    if let Some(id) = existing {
        let trimmed = id.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let input = format!(
        "{}|{}|{}",
        link,
        title,
        published.map(|p| p.timestamp().to_string()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}
