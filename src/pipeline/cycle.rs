use std::collections::HashSet;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::watch;

use super::context::Context;
use super::moderation::sweep_downvoted;
use crate::config::FeedConfig;
use crate::feed::FeedEntry;
use crate::markdown::{plan_entry, EntryStyle, PublishPlan};
use crate::publish::PublishError;
use crate::storage::{DatabaseError, StoryLog};

/// Errors that end the polling loop.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Story store failed: {0}")]
    Storage(#[from] DatabaseError),
    #[error("Publishing failed: {0}")]
    Publish(#[from] PublishError),
}

/// What happened during one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub feeds_read: usize,
    pub feeds_failed: usize,
    /// Entries posted, or logged in dry-run mode, and recorded.
    pub published: usize,
    /// Entries whose reply chain broke; left unrecorded.
    pub partial: usize,
    pub pruned: u64,
    pub deleted: usize,
    /// Something failed that is worth backing off for.
    pub transient_failure: bool,
    /// Stopped early because shutdown was requested.
    pub interrupted: bool,
}

/// Runs one read → filter → plan → publish → record pass over every feed,
/// then prunes the feeds that were read and runs the moderation sweep.
pub async fn run_cycle(
    ctx: &Context,
    shutdown: &watch::Receiver<bool>,
) -> Result<CycleReport, CycleError> {
    let mut report = CycleReport::default();
    let mut live: Vec<(&FeedConfig, HashSet<String>)> = Vec::new();

    'feeds: for feed in &ctx.feeds {
        if *shutdown.borrow() {
            report.interrupted = true;
            break;
        }

        let Some(entries) = read_feed(ctx, feed, &mut report).await else {
            continue;
        };
        live.push((feed, entries.iter().map(|e| e.id.clone()).collect()));

        let log = ctx.db.story_log(&feed.name);
        let fresh = filter_new(&log, entries).await?;
        if !fresh.is_empty() {
            tracing::info!(feed = %feed.name, new = fresh.len(), "New entries");
        }

        for entry in fresh {
            if *shutdown.borrow() {
                report.interrupted = true;
                break 'feeds;
            }

            let plan = plan_for(ctx, feed, &entry);
            match publish(ctx, feed, &entry, &plan).await {
                Ok(()) => {
                    record(&log, &entry).await?;
                    report.published += 1;
                    if ctx.settings.submit
                        && super::sleep_or_shutdown(ctx.settings.post_delay, shutdown).await
                    {
                        report.interrupted = true;
                        break 'feeds;
                    }
                }
                Err(err @ PublishError::Partial { .. }) => {
                    tracing::error!(
                        feed = %feed.name,
                        entry = %entry.id,
                        error = %err,
                        "Publish chain broken; entry will be republished next cycle"
                    );
                    notify_partial(ctx, feed, &entry, &err).await;
                    report.partial += 1;
                    report.transient_failure |= err.is_transient();
                }
                Err(err) if err.is_transient() => {
                    tracing::debug!(
                        feed = %feed.name,
                        entry = %entry.id,
                        error = %err,
                        "Platform unavailable, deferring remaining entries"
                    );
                    report.transient_failure = true;
                    break 'feeds;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    report.pruned = prune(ctx, &live).await?;

    if let Some(threshold) = ctx.settings.downvote_threshold {
        if !report.interrupted {
            match sweep_downvoted(ctx.platform.as_ref(), threshold, ctx.settings.submit).await {
                Ok(deleted) => report.deleted = deleted,
                Err(e) => {
                    tracing::warn!(error = %e, "Moderation sweep failed");
                    report.transient_failure |= e.is_transient();
                }
            }
        }
    }

    Ok(report)
}

// ============================================================================
// Phases
// ============================================================================

/// Fetches one feed. A failed fetch yields `None` and never aborts the cycle.
async fn read_feed(
    ctx: &Context,
    feed: &FeedConfig,
    report: &mut CycleReport,
) -> Option<Vec<FeedEntry>> {
    match ctx.reader.fetch(&feed.url).await {
        Ok(entries) => {
            report.feeds_read += 1;
            Some(entries)
        }
        Err(e) if e.is_transient() => {
            tracing::debug!(feed = %feed.name, url = %feed.url, error = %e, "Feed unavailable");
            report.feeds_failed += 1;
            report.transient_failure = true;
            None
        }
        Err(e) => {
            tracing::warn!(feed = %feed.name, url = %feed.url, error = %e, "Skipping unreadable feed");
            report.feeds_failed += 1;
            None
        }
    }
}

/// Unseen entries, oldest first. Feeds list newest first; reversing makes a
/// batch land on the platform in chronological order.
async fn filter_new(
    log: &StoryLog,
    entries: Vec<FeedEntry>,
) -> Result<Vec<FeedEntry>, DatabaseError> {
    let mut queued = HashSet::new();
    let mut fresh = Vec::new();
    for entry in entries.into_iter().rev() {
        if queued.contains(&entry.id) {
            continue;
        }
        if log.is_new(&entry.id).await? {
            queued.insert(entry.id.clone());
            fresh.push(entry);
        }
    }
    Ok(fresh)
}

fn plan_for(ctx: &Context, feed: &FeedConfig, entry: &FeedEntry) -> PublishPlan {
    let style = EntryStyle {
        target: ctx.target_for(feed),
        post_type: &feed.post_type,
        raw: feed.raw,
        signature: &ctx.settings.signature,
        max_segment_length: ctx.settings.max_segment_length,
    };
    plan_entry(entry, &style)
}

async fn publish(
    ctx: &Context,
    feed: &FeedConfig,
    entry: &FeedEntry,
    plan: &PublishPlan,
) -> Result<(), PublishError> {
    if !ctx.settings.submit {
        tracing::info!(
            feed = %feed.name,
            entry = %entry.id,
            subreddit = %plan.target,
            title = %plan.title,
            segments = plan.segments.len(),
            "Dry run: not submitting"
        );
        for (index, segment) in plan.segments.segments().iter().enumerate() {
            tracing::debug!(index, length = segment.length, text = %segment.text, "Segment");
        }
        return Ok(());
    }

    let receipt = ctx.sequencer.publish(plan).await?;
    tracing::info!(
        feed = %feed.name,
        entry = %entry.id,
        post = %receipt.root().map(|h| h.as_str()).unwrap_or_default(),
        segments = receipt.handles.len(),
        "Published entry"
    );
    Ok(())
}

async fn record(log: &StoryLog, entry: &FeedEntry) -> Result<(), DatabaseError> {
    log.record_seen(&entry.id, Utc::now()).await
}

/// Prunes every feed that was read this cycle, protecting its live ids.
async fn prune(
    ctx: &Context,
    live: &[(&FeedConfig, HashSet<String>)],
) -> Result<u64, DatabaseError> {
    let mut removed = 0;
    for (feed, ids) in live {
        removed += ctx.db.story_log(&feed.name).prune(feed.retention(), ids).await?;
    }
    Ok(removed)
}

async fn notify_partial(ctx: &Context, feed: &FeedConfig, entry: &FeedEntry, err: &PublishError) {
    let Some(operator) = ctx.settings.notify.as_deref() else {
        return;
    };

    let subject = format!("feedpost: incomplete post for {}", feed.name);
    let body = format!(
        "Entry [{}]({}) from feed `{}` was only partially posted.\n\n{}\n\nIt will be posted again next cycle.",
        entry.title, entry.link, feed.name, err
    );
    if let Err(e) = ctx.platform.send_message(operator, &subject, &body).await {
        tracing::warn!(to = %operator, error = %e, "Failed to notify operator");
    }
}
