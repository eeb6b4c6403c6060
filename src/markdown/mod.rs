//! Markup to Reddit-markdown conversion.
//!
//! - [`transcoder`] - single-pass markup scanner producing length-bounded segments
//! - [`format`] - turns a feed entry into a complete [`PublishPlan`]
//!
//! Each [`Segment`] maps to exactly one post or reply on the platform, so the
//! segment limit is the platform's body limit minus the decorations the
//! formatter adds.

mod format;
mod transcoder;

pub use format::{
    plan_entry, EntryStyle, PublishPlan, DEFAULT_MAX_SEGMENT_LENGTH, MAX_TITLE_LENGTH,
};
pub use transcoder::transcode;

/// One length-bounded chunk of markdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    /// Length of `text` in chars.
    pub length: usize,
}

impl Segment {
    pub fn new(text: String) -> Self {
        let length = text.chars().count();
        Self { text, length }
    }
}

/// Ordered segments produced for one entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkdownDocument {
    segments: Vec<Segment>,
}

impl MarkdownDocument {
    pub fn from_texts<I>(texts: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            segments: texts.into_iter().map(Segment::new).collect(),
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn into_texts(self) -> Vec<String> {
        self.segments.into_iter().map(|s| s.text).collect()
    }
}
