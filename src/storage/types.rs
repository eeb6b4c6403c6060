use chrono::{DateTime, Utc};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Story store errors. All of them are fatal to the pipeline: publishing
/// without a working dedup store would repost everything.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("Database is locked by another process; is another instance running?")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Maps lock-related sqlx errors to `InstanceLocked`.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

// SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Story Records
// ============================================================================

/// Marker that an entry of a feed was published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryRecord {
    pub feed: String,
    pub entry_id: String,
    pub first_seen_at: DateTime<Utc>,
}

/// Raw row as stored; `first_seen` is a unix timestamp in seconds.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct StoryRow {
    pub feed: String,
    pub entry_id: String,
    pub first_seen: i64,
}

impl StoryRow {
    pub(crate) fn into_record(self) -> StoryRecord {
        StoryRecord {
            feed: self.feed,
            entry_id: self.entry_id,
            first_seen_at: DateTime::from_timestamp(self.first_seen, 0).unwrap_or_default(),
        }
    }
}
