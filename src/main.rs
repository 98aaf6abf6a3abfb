use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use gleaner::batch::{run_scheduler, BatchBuilder};
use gleaner::config::Config;
use gleaner::fetch::FetchClient;
use gleaner::filter::FilterEngine;
use gleaner::notify::{LogNotifier, NotifierSet};
use gleaner::pipeline::RefreshPipeline;
use gleaner::pool::WorkerPool;
use gleaner::storage::{Database, Feed};
use gleaner::tracker::FeedStateTracker;

#[derive(Parser, Debug)]
#[command(name = "gleaner", about = "Feed refresh daemon", version)]
struct Args {
    /// Config file (TOML). Missing file means built-in defaults.
    #[arg(long, value_name = "FILE", default_value = "gleaner.toml")]
    config: PathBuf,

    /// Database path, overriding the config file
    #[arg(long, value_name = "FILE")]
    database: Option<String>,

    /// Subscribe to a feed URL and exit
    #[arg(long, value_name = "URL")]
    add_feed: Option<String>,

    /// Refresh one feed immediately and exit. Bypasses the disabled flag.
    #[arg(long, value_name = "FEED_ID")]
    refresh_feed: Option<i64>,

    /// User scope for --add-feed / --refresh-feed
    #[arg(long, default_value_t = 1)]
    user: i64,

    /// Category for --add-feed
    #[arg(long, default_value_t = 1)]
    category: i64,
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

    let mut config = Config::load(&args.config).context("Failed to load config")?;
    if let Some(database) = args.database {
        config.database_path = database;
    }

    let db = Database::open(&config.database_path)
        .await
        .context("Failed to open database")?;

    if let Some(url) = &args.add_feed {
        let feed_id = db
            .create_feed(&Feed::new(args.user, args.category, url))
            .await
            .context("Failed to add feed")?;
        println!("Subscribed: {} (feed {})", url, feed_id);
        return Ok(());
    }

    let tracker = FeedStateTracker::new(&config);
    let fetch = FetchClient::new(&config);
    let filter = FilterEngine::new(&config.block_filter_rules, &config.keep_filter_rules);
    let mut notifiers = NotifierSet::new();
    notifiers.push(true, Arc::new(LogNotifier));

    let pipeline = Arc::new(RefreshPipeline::new(
        db.clone(),
        fetch,
        filter,
        tracker,
        notifiers,
    ));

    // One-shot manual refresh
    if let Some(feed_id) = args.refresh_feed {
        let report = pipeline
            .refresh(args.user, feed_id, true)
            .await
            .context("Refresh failed")?;
        if report.not_modified {
            println!("Feed {} not modified", feed_id);
        } else {
            println!(
                "Feed {}: {} new, {} updated",
                feed_id, report.created, report.updated
            );
        }
        return Ok(());
    }

    // Daemon mode: worker pool plus polling scheduler until ctrl-c
    let pool = WorkerPool::start(pipeline, config.worker_count);
    let builder = BatchBuilder::new(db, config.batch_size);
    let frequency = Duration::from_secs(config.polling_frequency_minutes * 60);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = tokio::spawn(run_scheduler(
        builder,
        pool.clone(),
        frequency,
        shutdown_rx,
    ));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    scheduler.await.context("Scheduler task failed")?;
    pool.shutdown().await;

    Ok(())
}
