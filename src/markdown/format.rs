use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;

use super::{transcode, MarkdownDocument};
use crate::feed::FeedEntry;
use crate::util::{collapse_whitespace, strip_control_chars, truncate_chars};

/// Body budget per post. Reddit accepts 10 000 chars; the rest is headroom.
pub const DEFAULT_MAX_SEGMENT_LENGTH: usize = 8000;

/// Reddit rejects submission titles longer than this.
pub const MAX_TITLE_LENGTH: usize = 300;

/// Everything the publisher needs to post one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPlan {
    /// Subreddit the root post goes to.
    pub target: String,
    pub title: String,
    pub segments: MarkdownDocument,
}

/// Per-feed presentation settings.
#[derive(Debug, Clone, Copy)]
pub struct EntryStyle<'a> {
    pub target: &'a str,
    /// Label shown in brackets before the title, e.g. `Dev Blog`.
    pub post_type: &'a str,
    /// The feed carries plain text with bare URLs instead of markup.
    pub raw: bool,
    /// Appended to the last segment.
    pub signature: &'a str,
    pub max_segment_length: usize,
}

fn url_pattern() -> &'static Regex {
    static URL: OnceLock<Regex> = OnceLock::new();
    URL.get_or_init(|| {
        Regex::new(r"https?://[\da-z.-]+\.[a-z.]{2,6}[/\w&.?=%#~+-]*")
            .unwrap_or_else(|e| panic!("invalid URL pattern: {e}"))
    })
}

/// Builds the publish plan for one entry.
///
/// The entry link heads the first segment and the signature closes the last
/// one. Both can land on the same segment, so the transcoder's budget is
/// reduced by their sum.
pub fn plan_entry(entry: &FeedEntry, style: &EntryStyle<'_>) -> PublishPlan {
    let (title, content): (Cow<'_, str>, Cow<'_, str>) = if style.raw {
        (
            url_pattern().replace_all(&entry.title, ""),
            Cow::Owned(linkify_raw(&entry.raw_content)),
        )
    } else {
        (
            Cow::Borrowed(entry.title.as_str()),
            Cow::Borrowed(entry.raw_content.as_str()),
        )
    };

    let header = format!("{}\n\n", entry.link);
    let decoration = header.chars().count() + style.signature.chars().count();
    let budget = style
        .max_segment_length
        .saturating_sub(decoration)
        .max(1);

    let mut texts = transcode(&content, budget).into_texts();
    match texts.first_mut() {
        Some(first) => first.insert_str(0, &header),
        None => texts.push(entry.link.clone()),
    }
    if let Some(last) = texts.last_mut() {
        last.push_str(style.signature);
    }

    PublishPlan {
        target: style.target.to_string(),
        title: format_title(style.post_type, &title, entry.author.as_deref()),
        segments: MarkdownDocument::from_texts(texts),
    }
}

/// `[post type] title ~author`, cleaned and cut to the platform limit.
fn format_title(post_type: &str, title: &str, author: Option<&str>) -> String {
    let mut formatted = String::new();
    if !post_type.is_empty() {
        formatted.push_str(&format!("[{post_type}] "));
    }
    formatted.push_str(title.trim());
    if let Some(author) = author.map(str::trim).filter(|a| !a.is_empty()) {
        formatted.push_str(&format!(" ~{author}"));
    }

    let cleaned = collapse_whitespace(&strip_control_chars(&formatted));
    truncate_chars(&cleaned, MAX_TITLE_LENGTH).into_owned()
}

/// Escapes plain text into markup and wraps bare URLs in anchors so
/// plain-text feeds get clickable links.
fn linkify_raw(content: &str) -> String {
    let content = content.replace('\u{2026}', " ...");
    let mut markup = String::with_capacity(content.len());
    let mut last = 0;
    for url in url_pattern().find_iter(&content) {
        markup.push_str(&escape_text(&content[last..url.start()]));
        markup.push_str(&format!(r#"<a href="{}">link</a>"#, escape_text(url.as_str())));
        last = url.end();
    }
    markup.push_str(&escape_text(&content[last..]));
    markup
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
