use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{DatabaseError, StoryRecord, StoryRow};

impl Database {
    /// Story log handle for one feed.
    pub fn story_log(&self, feed: &str) -> StoryLog {
        StoryLog {
            db: self.clone(),
            feed: feed.to_string(),
        }
    }
}

// ============================================================================
// Story Log
// ============================================================================

/// Dedup records of one feed.
///
/// Every write auto-commits, so a recorded entry survives a crash right
/// after the call returns.
#[derive(Debug, Clone)]
pub struct StoryLog {
    db: Database,
    feed: String,
}

impl StoryLog {
    pub fn feed(&self) -> &str {
        &self.feed
    }

    /// True when the entry has never been recorded for this feed.
    pub async fn is_new(&self, entry_id: &str) -> Result<bool, DatabaseError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM stories WHERE feed = ? AND entry_id = ?")
                .bind(&self.feed)
                .bind(entry_id)
                .fetch_optional(&self.db.pool)
                .await?;

        Ok(row.is_none())
    }

    /// Records the entry as published. Recording an existing entry is a no-op
    /// and keeps its original timestamp.
    pub async fn record_seen(
        &self,
        entry_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        sqlx::query("INSERT OR IGNORE INTO stories (feed, entry_id, first_seen) VALUES (?, ?, ?)")
            .bind(&self.feed)
            .bind(entry_id)
            .bind(at.timestamp())
            .execute(&self.db.pool)
            .await?;

        Ok(())
    }

    /// Deletes records first seen more than `retention` ago, except ids that
    /// are still listed by the feed. Returns the number of deleted records.
    ///
    /// A retention reaching back before the earliest representable time
    /// deletes nothing.
    pub async fn prune(
        &self,
        retention: chrono::Duration,
        still_live: &HashSet<String>,
    ) -> Result<u64, DatabaseError> {
        let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
            return Ok(0);
        };
        let cutoff = cutoff.timestamp();

        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("DELETE FROM stories WHERE feed = ");
        builder.push_bind(&self.feed);
        builder.push(" AND first_seen < ");
        builder.push_bind(cutoff);

        if !still_live.is_empty() {
            builder.push(" AND entry_id NOT IN (");
            let mut separated = builder.separated(", ");
            for id in still_live {
                separated.push_bind(id);
            }
            separated.push_unseparated(")");
        }

        let result = builder.build().execute(&self.db.pool).await?;
        let removed = result.rows_affected();
        if removed > 0 {
            tracing::debug!(feed = %self.feed, removed, "Pruned story records");
        }
        Ok(removed)
    }

    /// All records of this feed, newest first.
    pub async fn records(&self) -> Result<Vec<StoryRecord>, DatabaseError> {
        let rows: Vec<StoryRow> = sqlx::query_as(
            r#"
            SELECT feed, entry_id, first_seen
            FROM stories
            WHERE feed = ?
            ORDER BY first_seen DESC, entry_id
        "#,
        )
        .bind(&self.feed)
        .fetch_all(&self.db.pool)
        .await?;

        Ok(rows.into_iter().map(StoryRow::into_record).collect())
    }
}
