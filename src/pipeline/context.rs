use std::sync::Arc;
use std::time::Duration;

use crate::config::FeedConfig;
use crate::feed::FeedReader;
use crate::publish::{Platform, Sequencer};
use crate::storage::Database;

/// Relay-wide settings that shape how entries are posted.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Subreddit for feeds without their own target.
    pub default_target: String,
    /// When false, plans are logged instead of posted (entries are still
    /// recorded as seen).
    pub submit: bool,
    pub signature: String,
    pub max_segment_length: usize,
    /// Username to message when a publish chain breaks.
    pub notify: Option<String>,
    /// Pause after each published entry.
    pub post_delay: Duration,
    /// Delete own submissions scoring at or below this; `None` disables the sweep.
    pub downvote_threshold: Option<i64>,
}

/// Everything one pipeline cycle needs.
pub struct Context {
    pub feeds: Vec<FeedConfig>,
    pub settings: RelaySettings,
    pub reader: FeedReader,
    pub db: Database,
    pub platform: Arc<dyn Platform>,
    pub sequencer: Sequencer,
}

impl Context {
    pub fn new(
        feeds: Vec<FeedConfig>,
        settings: RelaySettings,
        reader: FeedReader,
        db: Database,
        platform: Arc<dyn Platform>,
        segment_delay: Duration,
    ) -> Self {
        let sequencer = Sequencer::new(platform.clone(), segment_delay);
        Self {
            feeds,
            settings,
            reader,
            db,
            platform,
            sequencer,
        }
    }

    /// Replaces the sequencer, e.g. to shorten retry delays.
    pub fn with_sequencer(mut self, sequencer: Sequencer) -> Self {
        self.sequencer = sequencer;
        self
    }

    pub(crate) fn target_for<'a>(&'a self, feed: &'a FeedConfig) -> &'a str {
        feed.target
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.settings.default_target)
    }
}
