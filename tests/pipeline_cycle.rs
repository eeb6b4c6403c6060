//! End-to-end cycle tests: a wiremock feed server, an in-memory story store
//! and a recording platform.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use pretty_assertions::assert_eq;
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use feedpost::config::FeedConfig;
use feedpost::feed::FeedReader;
use feedpost::pipeline::{self, run_cycle, Backoff, Context, CycleError, RelaySettings};
use feedpost::publish::{Platform, PlatformError, PostHandle, Sequencer, Submission};
use feedpost::storage::Database;

// ============================================================================
// Recording platform
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Submit { target: String, title: String },
    Reply { parent: String },
    Message { to: String },
}

#[derive(Default)]
struct RecordingPlatform {
    calls: Mutex<Vec<Call>>,
    fail_next_submit: Mutex<Option<PlatformError>>,
    fail_next_reply: Mutex<Option<PlatformError>>,
    next_id: Mutex<u32>,
}

impl RecordingPlatform {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn submitted_titles(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Submit { title, .. } => Some(title),
                _ => None,
            })
            .collect()
    }

    fn fresh_handle(&self, prefix: &str) -> PostHandle {
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        PostHandle(format!("{prefix}_{}", *id))
    }
}

#[async_trait]
impl Platform for RecordingPlatform {
    async fn submit(
        &self,
        target: &str,
        title: &str,
        _body: &str,
    ) -> Result<PostHandle, PlatformError> {
        self.calls.lock().unwrap().push(Call::Submit {
            target: target.to_string(),
            title: title.to_string(),
        });
        if let Some(err) = self.fail_next_submit.lock().unwrap().take() {
            return Err(err);
        }
        Ok(self.fresh_handle("t3"))
    }

    async fn reply(&self, parent: &PostHandle, _body: &str) -> Result<PostHandle, PlatformError> {
        self.calls.lock().unwrap().push(Call::Reply {
            parent: parent.0.clone(),
        });
        if let Some(err) = self.fail_next_reply.lock().unwrap().take() {
            return Err(err);
        }
        Ok(self.fresh_handle("t1"))
    }

    async fn send_message(&self, to: &str, _subject: &str, _body: &str) -> Result<(), PlatformError> {
        self.calls.lock().unwrap().push(Call::Message { to: to.to_string() });
        Ok(())
    }

    async fn recent_submissions(&self, _limit: usize) -> Result<Vec<Submission>, PlatformError> {
        Ok(Vec::new())
    }

    async fn delete(&self, _handle: &PostHandle) -> Result<(), PlatformError> {
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Item<'a> {
    id: &'a str,
    title: &'a str,
    body: &'a str,
}

fn rss(items: &[Item<'_>]) -> String {
    let items: String = items
        .iter()
        .map(|item| {
            format!(
                "<item><guid>{id}</guid><title>{title}</title>\
                 <link>https://example.com/{id}</link>\
                 <description><![CDATA[{body}]]></description></item>",
                id = item.id,
                title = item.title,
                body = item.body
            )
        })
        .collect();
    format!(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>News</title>{items}</channel></rss>"#)
}

async fn serve_feed(server: &MockServer, body: String) {
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

fn feed_config(server: &MockServer) -> FeedConfig {
    FeedConfig {
        name: "news".to_string(),
        url: format!("{}/feed", server.uri()),
        target: None,
        post_type: "News".to_string(),
        raw: false,
        retention_days: 30,
    }
}

fn settings(submit: bool) -> RelaySettings {
    RelaySettings {
        default_target: "relaytest".to_string(),
        submit,
        signature: String::new(),
        max_segment_length: 200,
        notify: Some("operator".to_string()),
        post_delay: Duration::ZERO,
        downvote_threshold: None,
    }
}

async fn context(server: &MockServer, platform: Arc<RecordingPlatform>, submit: bool) -> Context {
    let db = Database::open(":memory:").await.unwrap();
    let reader =
        FeedReader::new(reqwest::Client::new()).with_retry_delay(Duration::from_millis(1));
    let sequencer =
        Sequencer::new(platform.clone(), Duration::ZERO).with_retry_delay(Duration::from_millis(1));

    Context::new(
        vec![feed_config(server)],
        settings(submit),
        reader,
        db,
        platform,
        Duration::ZERO,
    )
    .with_sequencer(sequencer)
}

fn no_shutdown() -> watch::Receiver<bool> {
    let (_tx, rx) = watch::channel(false);
    rx
}

fn long_body() -> String {
    let paragraph = "lorem ".repeat(25);
    format!("<p>{paragraph}</p><p>{paragraph}</p><p>{paragraph}</p>")
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_new_entries_are_published_oldest_first_and_recorded() {
    let server = MockServer::start().await;
    // Feeds list newest first.
    serve_feed(
        &server,
        rss(&[
            Item { id: "b", title: "Second", body: "<p>two</p>" },
            Item { id: "a", title: "First", body: "<p>one</p>" },
        ]),
    )
    .await;
    let platform = Arc::new(RecordingPlatform::default());
    let ctx = context(&server, platform.clone(), true).await;

    let report = run_cycle(&ctx, &no_shutdown()).await.unwrap();

    assert_eq!(report.published, 2);
    assert_eq!(report.feeds_read, 1);
    assert_eq!(
        platform.submitted_titles(),
        vec!["[News] First".to_string(), "[News] Second".to_string()]
    );
    assert_eq!(
        platform.calls()[0],
        Call::Submit {
            target: "relaytest".to_string(),
            title: "[News] First".to_string()
        }
    );

    let log = ctx.db.story_log("news");
    assert!(!log.is_new("a").await.unwrap());
    assert!(!log.is_new("b").await.unwrap());
}

#[tokio::test]
async fn test_seen_entries_are_not_republished() {
    let server = MockServer::start().await;
    serve_feed(&server, rss(&[Item { id: "a", title: "First", body: "<p>one</p>" }])).await;
    let platform = Arc::new(RecordingPlatform::default());
    let ctx = context(&server, platform.clone(), true).await;
    ctx.db
        .story_log("news")
        .record_seen("a", Utc::now())
        .await
        .unwrap();

    let report = run_cycle(&ctx, &no_shutdown()).await.unwrap();

    assert_eq!(report.published, 0);
    assert!(platform.calls().is_empty());
}

#[tokio::test]
async fn test_long_entry_becomes_reply_chain() {
    let server = MockServer::start().await;
    let body = long_body();
    serve_feed(&server, rss(&[Item { id: "long", title: "Long", body: &body }])).await;
    let platform = Arc::new(RecordingPlatform::default());
    let ctx = context(&server, platform.clone(), true).await;

    run_cycle(&ctx, &no_shutdown()).await.unwrap();

    let calls = platform.calls();
    assert!(calls.len() >= 2, "expected a chain, got {calls:?}");
    assert!(matches!(calls[0], Call::Submit { .. }));
    assert_eq!(calls[1], Call::Reply { parent: "t3_1".to_string() });
}

#[tokio::test]
async fn test_partial_publish_is_retried_whole_next_cycle() {
    let server = MockServer::start().await;
    let body = long_body();
    serve_feed(&server, rss(&[Item { id: "long", title: "Long", body: &body }])).await;
    let platform = Arc::new(RecordingPlatform::default());
    *platform.fail_next_reply.lock().unwrap() =
        Some(PlatformError::Api("THREAD_LOCKED: that thread is locked".to_string()));
    let ctx = context(&server, platform.clone(), true).await;

    let report = run_cycle(&ctx, &no_shutdown()).await.unwrap();

    assert_eq!(report.partial, 1);
    assert_eq!(report.published, 0);
    assert!(!report.transient_failure);
    assert!(ctx.db.story_log("news").is_new("long").await.unwrap());
    assert!(platform
        .calls()
        .contains(&Call::Message { to: "operator".to_string() }));

    let report = run_cycle(&ctx, &no_shutdown()).await.unwrap();

    assert_eq!(report.published, 1);
    assert_eq!(platform.submitted_titles().len(), 2);
    assert!(!ctx.db.story_log("news").is_new("long").await.unwrap());
}

#[tokio::test]
async fn test_fatal_root_failure_ends_cycle() {
    let server = MockServer::start().await;
    serve_feed(&server, rss(&[Item { id: "a", title: "First", body: "<p>one</p>" }])).await;
    let platform = Arc::new(RecordingPlatform::default());
    *platform.fail_next_submit.lock().unwrap() =
        Some(PlatformError::Auth("invalid_grant".to_string()));
    let ctx = context(&server, platform.clone(), true).await;

    let err = run_cycle(&ctx, &no_shutdown()).await.unwrap_err();

    assert!(matches!(err, CycleError::Publish(_)));
    assert!(ctx.db.story_log("news").is_new("a").await.unwrap());
}

#[tokio::test]
async fn test_transient_root_failure_defers_entry() {
    let server = MockServer::start().await;
    serve_feed(&server, rss(&[Item { id: "a", title: "First", body: "<p>one</p>" }])).await;
    let platform = Arc::new(RecordingPlatform::default());
    let ctx = context(&server, platform.clone(), true).await;
    // Four failures exhaust the sequencer's retries.
    let failing = Arc::new(AlwaysRateLimited);
    let ctx = ctx.with_sequencer(
        Sequencer::new(failing, Duration::ZERO).with_retry_delay(Duration::from_millis(1)),
    );

    let report = run_cycle(&ctx, &no_shutdown()).await.unwrap();

    assert!(report.transient_failure);
    assert_eq!(report.published, 0);
    assert!(ctx.db.story_log("news").is_new("a").await.unwrap());
}

struct AlwaysRateLimited;

#[async_trait]
impl Platform for AlwaysRateLimited {
    async fn submit(&self, _: &str, _: &str, _: &str) -> Result<PostHandle, PlatformError> {
        Err(PlatformError::RateLimited)
    }

    async fn reply(&self, _: &PostHandle, _: &str) -> Result<PostHandle, PlatformError> {
        Err(PlatformError::RateLimited)
    }

    async fn send_message(&self, _: &str, _: &str, _: &str) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn recent_submissions(&self, _: usize) -> Result<Vec<Submission>, PlatformError> {
        Ok(Vec::new())
    }

    async fn delete(&self, _: &PostHandle) -> Result<(), PlatformError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_dry_run_records_without_posting() {
    let server = MockServer::start().await;
    serve_feed(&server, rss(&[Item { id: "a", title: "First", body: "<p>one</p>" }])).await;
    let platform = Arc::new(RecordingPlatform::default());
    let ctx = context(&server, platform.clone(), false).await;

    let report = run_cycle(&ctx, &no_shutdown()).await.unwrap();

    assert_eq!(report.published, 1);
    assert!(platform.calls().is_empty());
    assert!(!ctx.db.story_log("news").is_new("a").await.unwrap());
}

#[tokio::test]
async fn test_failed_feed_is_skipped_and_not_pruned() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let platform = Arc::new(RecordingPlatform::default());
    let ctx = context(&server, platform.clone(), true).await;
    let log = ctx.db.story_log("news");
    log.record_seen("ancient", Utc::now() - chrono::Duration::days(365))
        .await
        .unwrap();

    let report = run_cycle(&ctx, &no_shutdown()).await.unwrap();

    assert_eq!(report.feeds_failed, 1);
    assert!(!report.transient_failure);
    assert_eq!(report.pruned, 0);
    assert!(!log.is_new("ancient").await.unwrap());
}

#[tokio::test]
async fn test_server_error_marks_cycle_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let platform = Arc::new(RecordingPlatform::default());
    let ctx = context(&server, platform, true).await;

    let report = run_cycle(&ctx, &no_shutdown()).await.unwrap();

    assert_eq!(report.feeds_failed, 1);
    assert!(report.transient_failure);
}

#[tokio::test]
async fn test_prune_keeps_live_entries() {
    let server = MockServer::start().await;
    serve_feed(&server, rss(&[Item { id: "live", title: "Live", body: "<p>x</p>" }])).await;
    let platform = Arc::new(RecordingPlatform::default());
    let ctx = context(&server, platform.clone(), true).await;
    let log = ctx.db.story_log("news");
    let long_ago = Utc::now() - chrono::Duration::days(90);
    log.record_seen("live", long_ago).await.unwrap();
    log.record_seen("gone", long_ago).await.unwrap();

    let report = run_cycle(&ctx, &no_shutdown()).await.unwrap();

    assert_eq!(report.pruned, 1);
    assert!(!log.is_new("live").await.unwrap());
    assert!(log.is_new("gone").await.unwrap());
    assert!(platform.calls().is_empty());
}

#[tokio::test]
async fn test_shutdown_before_cycle_publishes_nothing() {
    let server = MockServer::start().await;
    serve_feed(&server, rss(&[Item { id: "a", title: "First", body: "<p>one</p>" }])).await;
    let platform = Arc::new(RecordingPlatform::default());
    let ctx = context(&server, platform.clone(), true).await;
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let report = run_cycle(&ctx, &rx).await.unwrap();

    assert!(report.interrupted);
    assert_eq!(report.feeds_read, 0);
    assert!(platform.calls().is_empty());
}

#[tokio::test]
async fn test_run_once_completes_single_cycle() {
    let server = MockServer::start().await;
    serve_feed(&server, rss(&[Item { id: "a", title: "First", body: "<p>one</p>" }])).await;
    let platform = Arc::new(RecordingPlatform::default());
    let ctx = context(&server, platform.clone(), true).await;
    let backoff = Backoff::new(Duration::from_secs(300), Duration::from_secs(3600));

    pipeline::run(&ctx, backoff, no_shutdown(), true).await.unwrap();

    assert_eq!(platform.submitted_titles(), vec!["[News] First".to_string()]);
}
