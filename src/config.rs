//! Configuration file parser for the relay's TOML config.
//!
//! Unlike most settings files the config is required: without `[[feeds]]`
//! there is nothing to relay. Unknown keys are accepted by serde but logged,
//! since they are usually typos.
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use secrecy::SecretString;

use crate::markdown::DEFAULT_MAX_SEGMENT_LENGTH;
use crate::pipeline::RelaySettings;
use crate::publish::Credentials;
use crate::util::validate_feed_url;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required setting `{0}`")]
    Missing(&'static str),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// One feed to relay.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Key the feed's story records are stored under. Renaming a feed
    /// forgets what it already published.
    pub name: String,
    pub url: String,
    /// Subreddit override for this feed.
    #[serde(default)]
    pub target: Option<String>,
    /// Bracketed title prefix, e.g. `Dev Blog`.
    #[serde(default)]
    pub post_type: String,
    /// Content is plain text with bare URLs rather than markup.
    #[serde(default)]
    pub raw: bool,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 {
    30
}

impl FeedConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

/// Top-level relay configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
///
/// Custom Debug impl masks `password` and `client_secret`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub username: String,
    pub password: Option<String>,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub user_agent: String,

    /// Default subreddit for feeds without a `target`.
    pub subreddit: String,
    /// Post for real. When false the relay only logs what it would post.
    pub submit: bool,

    /// Baseline sleep between cycles, in seconds.
    pub sleep_time_secs: u64,
    /// Upper bound for the backed-off sleep, in seconds.
    pub max_sleep_secs: u64,
    /// Pause after each published entry, in seconds.
    pub post_delay_secs: u64,
    /// Pause between the segments of one entry, in seconds.
    pub segment_delay_secs: u64,

    pub max_segment_length: usize,
    /// Appended to the last segment of every entry.
    pub signature: String,
    /// Username to message when a publish chain breaks.
    pub notify: Option<String>,
    pub database: PathBuf,

    pub delete_downvoted: bool,
    pub downvote_threshold: i64,

    pub feeds: Vec<FeedConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: None,
            client_id: String::new(),
            client_secret: None,
            user_agent: concat!("feedpost/", env!("CARGO_PKG_VERSION")).to_string(),
            subreddit: String::new(),
            submit: false,
            sleep_time_secs: 300,
            max_sleep_secs: 3600,
            post_delay_secs: 30,
            segment_delay_secs: 5,
            max_segment_length: DEFAULT_MAX_SEGMENT_LENGTH,
            signature: String::new(),
            notify: None,
            database: PathBuf::from("feedpost.db"),
            delete_downvoted: false,
            downvote_threshold: -4,
            feeds: Vec::new(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("user_agent", &self.user_agent)
            .field("subreddit", &self.subreddit)
            .field("submit", &self.submit)
            .field("sleep_time_secs", &self.sleep_time_secs)
            .field("max_sleep_secs", &self.max_sleep_secs)
            .field("post_delay_secs", &self.post_delay_secs)
            .field("segment_delay_secs", &self.segment_delay_secs)
            .field("max_segment_length", &self.max_segment_length)
            .field("signature", &self.signature)
            .field("notify", &self.notify)
            .field("database", &self.database)
            .field("delete_downvoted", &self.delete_downvoted)
            .field("downvote_threshold", &self.downvote_threshold)
            .field("feeds", &self.feeds)
            .finish()
    }
}

/// Values given on the command line; each one replaces the file's value.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub username: Option<String>,
    pub password: Option<String>,
    pub subreddit: Option<String>,
    pub submit: Option<bool>,
    pub notify: Option<String>,
}

/// Segments shorter than this leave no room for real content once the link
/// header and signature are added.
const MIN_SEGMENT_LENGTH: usize = 200;
/// Upper bound for `retention_days`, a century.
const MAX_RETENTION_DAYS: u32 = 36_500;

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Err(ConfigError::NotFound)`
    /// - Empty file → `Ok(Config::default())` (rejected later by `validate`)
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse as a raw table first to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw);
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            feeds = config.feeds.len(),
            submit = config.submit,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(username) = overrides.username {
            self.username = username;
        }
        if let Some(password) = overrides.password {
            self.password = Some(password);
        }
        if let Some(subreddit) = overrides.subreddit {
            self.subreddit = subreddit;
        }
        if let Some(submit) = overrides.submit {
            self.submit = submit;
        }
        if let Some(notify) = overrides.notify {
            self.notify = Some(notify);
        }
    }

    /// Checks everything a cycle relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feeds.is_empty() {
            return Err(ConfigError::Invalid("no [[feeds]] configured".into()));
        }

        let mut names = HashSet::new();
        for feed in &self.feeds {
            if feed.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "feed with url {} has an empty name",
                    feed.url
                )));
            }
            if !names.insert(feed.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate feed name `{}`",
                    feed.name
                )));
            }
            validate_feed_url(&feed.url).map_err(|e| {
                ConfigError::Invalid(format!("feed `{}`: {}", feed.name, e))
            })?;

            if !(1..=MAX_RETENTION_DAYS).contains(&feed.retention_days) {
                return Err(ConfigError::Invalid(format!(
                    "feed `{}`: retention_days must be between 1 and {MAX_RETENTION_DAYS}",
                    feed.name
                )));
            }

            let has_target = feed.target.as_deref().is_some_and(|t| !t.is_empty());
            if !has_target && self.subreddit.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "feed `{}` has no target and no default subreddit is set",
                    feed.name
                )));
            }
        }

        if self.max_segment_length < MIN_SEGMENT_LENGTH {
            return Err(ConfigError::Invalid(format!(
                "max_segment_length must be at least {MIN_SEGMENT_LENGTH}"
            )));
        }
        if self.sleep_time_secs == 0 {
            return Err(ConfigError::Invalid(
                "sleep_time_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Platform credentials. Required for everything except dry runs.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        if self.username.is_empty() {
            return Err(ConfigError::Missing("username"));
        }
        if self.client_id.is_empty() {
            return Err(ConfigError::Missing("client_id"));
        }
        let password = self
            .password
            .clone()
            .ok_or(ConfigError::Missing("password"))?;
        let client_secret = self
            .client_secret
            .clone()
            .ok_or(ConfigError::Missing("client_secret"))?;

        Ok(Credentials {
            username: self.username.clone(),
            password: SecretString::from(password),
            client_id: self.client_id.clone(),
            client_secret: SecretString::from(client_secret),
            user_agent: self.user_agent.clone(),
        })
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            default_target: self.subreddit.clone(),
            submit: self.submit,
            signature: self.signature.clone(),
            max_segment_length: self.max_segment_length,
            notify: self.notify.clone().filter(|n| !n.is_empty()),
            post_delay: Duration::from_secs(self.post_delay_secs),
            downvote_threshold: self.delete_downvoted.then_some(self.downvote_threshold),
        }
    }

    pub fn sleep_time(&self) -> Duration {
        Duration::from_secs(self.sleep_time_secs)
    }

    pub fn max_sleep(&self) -> Duration {
        Duration::from_secs(self.max_sleep_secs)
    }

    pub fn segment_delay(&self) -> Duration {
        Duration::from_secs(self.segment_delay_secs)
    }
}

fn warn_unknown_keys(raw: &toml::Table) {
    let known_keys = [
        "username",
        "password",
        "client_id",
        "client_secret",
        "user_agent",
        "subreddit",
        "submit",
        "sleep_time_secs",
        "max_sleep_secs",
        "post_delay_secs",
        "segment_delay_secs",
        "max_segment_length",
        "signature",
        "notify",
        "database",
        "delete_downvoted",
        "downvote_threshold",
        "feeds",
    ];
    let known_feed_keys = ["name", "url", "target", "post_type", "raw", "retention_days"];

    for key in raw.keys() {
        if !known_keys.contains(&key.as_str()) {
            tracing::warn!(key = %key, "Unknown key in config file, ignoring");
        }
    }

    let feeds = raw.get("feeds").and_then(|f| f.as_array());
    for feed in feeds.into_iter().flatten().filter_map(|f| f.as_table()) {
        for key in feed.keys() {
            if !known_feed_keys.contains(&key.as_str()) {
                tracing::warn!(key = %key, "Unknown key in [[feeds]] entry, ignoring");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
