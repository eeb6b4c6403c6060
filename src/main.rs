use anyhow::{Context as _, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;

use feedpost::config::{Config, Overrides};
use feedpost::feed::FeedReader;
use feedpost::pipeline::{self, Backoff, Context};
use feedpost::publish::RedditClient;
use feedpost::storage::{Database, DatabaseError};

#[derive(Parser, Debug)]
#[command(
    name = "feedpost",
    version,
    about = "Relays RSS/Atom feed entries to Reddit as markdown post chains"
)]
struct Args {
    /// Path to the TOML config file
    #[arg(long, short, value_name = "FILE", default_value = "feedpost.toml")]
    config: PathBuf,

    /// Reddit username (overrides the config file)
    #[arg(long)]
    username: Option<String>,

    /// Reddit password (overrides the config file)
    #[arg(long)]
    password: Option<String>,

    /// Default subreddit (overrides the config file)
    #[arg(long)]
    subreddit: Option<String>,

    /// Post for real (true) or only log what would be posted (false)
    #[arg(long, value_name = "BOOL")]
    submit: Option<bool>,

    /// User to message when a post chain breaks
    #[arg(long, value_name = "USER")]
    notify: Option<String>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Print the story records of FEED, newest first, and exit
    #[arg(long, value_name = "FEED")]
    history: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    config.apply(Overrides {
        username: args.username,
        password: args.password,
        subreddit: args.subreddit,
        submit: args.submit,
        notify: args.notify,
    });
    config.validate()?;

    let db_path = config
        .database
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: the story database is locked. Is another feedpost running?");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    if let Some(feed) = &args.history {
        let records = db
            .story_log(feed)
            .records()
            .await
            .context("Failed to read story records")?;
        for record in &records {
            println!("{}  {}", record.first_seen_at.to_rfc3339(), record.entry_id);
        }
        println!("{} records for feed {}", records.len(), feed);
        db.close().await;
        return Ok(());
    }

    let http = reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .pool_idle_timeout(std::time::Duration::from_secs(30))
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    let platform = Arc::new(RedditClient::new(http.clone(), config.credentials()?));
    let ctx = Context::new(
        config.feeds.clone(),
        config.relay_settings(),
        FeedReader::new(http),
        db,
        platform,
        config.segment_delay(),
    );
    let backoff = Backoff::new(config.sleep_time(), config.max_sleep());

    if !config.submit {
        tracing::info!("Submit disabled; entries will be logged and recorded, not posted");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let outcome = pipeline::run(&ctx, backoff, shutdown_rx, args.once).await;
    ctx.db.close().await;
    outcome?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, finishing the current entry");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM, finishing the current entry");
        },
    }
}
