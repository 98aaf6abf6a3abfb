//! Batch building and the polling scheduler.
//!
//! A batch is just the list of refresh jobs to hand to the worker pool. The
//! scheduler wakes on a fixed interval, asks storage for the feeds that are
//! due, and pushes them; it never waits for the jobs to finish, so a slow
//! batch overlaps the next tick without blocking it.

use std::time::Duration;

use tokio::sync::watch;

use crate::pool::WorkerPool;
use crate::storage::{Database, DatabaseError, Feed};

/// One unit of work for the pool: refresh this feed on behalf of this user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    pub user_id: i64,
    pub feed_id: i64,
}

impl Job {
    fn from_feed(feed: &Feed) -> Self {
        Self {
            user_id: feed.user_id,
            feed_id: feed.id,
        }
    }
}

#[derive(Clone)]
pub struct BatchBuilder {
    db: Database,
    batch_size: i64,
}

impl BatchBuilder {
    pub fn new(db: Database, batch_size: i64) -> Self {
        Self { db, batch_size }
    }

    /// Scheduler scope: every enabled feed whose `next_check_at` has passed,
    /// oldest due first, capped at the configured batch size.
    pub async fn build_global_due_batch(&self, now: i64) -> Result<Vec<Job>, DatabaseError> {
        let feeds = self.db.feeds_due_for_refresh(now, self.batch_size).await?;
        Ok(feeds.iter().map(Job::from_feed).collect())
    }

    /// Manual scope: all of one user's feeds, due or not.
    pub async fn build_user_batch(&self, user_id: i64) -> Result<Vec<Job>, DatabaseError> {
        let feeds = self.db.feeds_for_user(user_id).await?;
        Ok(feeds.iter().map(Job::from_feed).collect())
    }

    /// Manual scope: all feeds in one of the user's categories.
    pub async fn build_category_batch(
        &self,
        user_id: i64,
        category_id: i64,
    ) -> Result<Vec<Job>, DatabaseError> {
        let feeds = self.db.feeds_for_category(user_id, category_id).await?;
        Ok(feeds.iter().map(Job::from_feed).collect())
    }
}

/// Run the polling scheduler until `shutdown` flips to true.
///
/// Each tick builds the global due batch and pushes it; a storage error
/// skips the tick and the next one retries. The first tick fires after one
/// full interval so startup does not stampede every feed at once.
pub async fn run_scheduler(
    builder: BatchBuilder,
    pool: WorkerPool,
    frequency: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(frequency);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;

    tracing::info!(frequency_secs = frequency.as_secs(), "Scheduler started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                // A dropped sender counts as shutdown too
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("Scheduler stopping");
                    return;
                }
                continue;
            }
        }

        let now = chrono::Utc::now().timestamp();
        match builder.build_global_due_batch(now).await {
            Ok(jobs) => {
                if !jobs.is_empty() {
                    tracing::info!(jobs = jobs.len(), "Scheduling refresh batch");
                }
                for job in jobs {
                    pool.push(job);
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to build refresh batch, skipping tick");
            }
        }
    }
}
