//! SQLite-backed dedup store.
//!
//! One `stories` row per published entry, keyed by `(feed, entry_id)`.
//! [`StoryLog`] scopes the queries to a single feed.

mod schema;
mod stories;
mod types;

pub use schema::Database;
pub use stories::StoryLog;
pub use types::{DatabaseError, StoryRecord};
