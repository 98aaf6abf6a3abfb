//! Refresh pipeline: the full fetch-to-persist path for one feed.
//!
//! Stages run strictly in order: load, fetch, parse, filter, reconcile,
//! optional crawler enrichment, persist, notify. Every attempt ends by
//! writing the feed's bookkeeping row, so `next_check_at` always advances
//! even when a stage fails.

use chrono::Utc;
use thiserror::Error;

use crate::dedup::reconcile;
use crate::fetch::{FetchClient, FetchError, FetchOutcome};
use crate::filter::FilterEngine;
use crate::notify::NotifierSet;
use crate::parser::{self, ParseError};
use crate::scraper::scrape_article;
use crate::storage::{Database, DatabaseError, Feed};
use crate::tracker::FeedStateTracker;

/// Why a refresh did not complete.
///
/// `Fetch` and `Parse` are source-side: the feed's error counter advances
/// and the feed may be auto-disabled. The exception is a rate-limited
/// fetch, which only defers the next check. `FeedNotFound`, `FeedDisabled`
/// and `Storage` are engine-side or caller-side and never count against
/// the source.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("Feed {feed_id} not found for user {user_id}")]
    FeedNotFound { user_id: i64, feed_id: i64 },
    #[error("Feed {feed_id} is disabled")]
    FeedDisabled { feed_id: i64 },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Storage(#[from] DatabaseError),
}

/// What one completed refresh did.
#[derive(Debug, Default)]
pub struct RefreshReport {
    pub feed_id: i64,
    pub not_modified: bool,
    pub created: usize,
    pub updated: usize,
}

pub struct RefreshPipeline {
    db: Database,
    fetch: FetchClient,
    filter: FilterEngine,
    tracker: FeedStateTracker,
    notifiers: NotifierSet,
}

impl RefreshPipeline {
    pub fn new(
        db: Database,
        fetch: FetchClient,
        filter: FilterEngine,
        tracker: FeedStateTracker,
        notifiers: NotifierSet,
    ) -> Self {
        Self {
            db,
            fetch,
            filter,
            tracker,
            notifiers,
        }
    }

    /// Refresh one feed end to end.
    ///
    /// `force` is the manual-refresh path: it bypasses the disabled check,
    /// and a successful forced run re-enables an auto-disabled feed via the
    /// success bookkeeping.
    pub async fn refresh(
        &self,
        user_id: i64,
        feed_id: i64,
        force: bool,
    ) -> Result<RefreshReport, RefreshError> {
        let feed = self
            .db
            .feed_by_id(user_id, feed_id)
            .await?
            .ok_or(RefreshError::FeedNotFound { user_id, feed_id })?;

        if feed.disabled && !force {
            return Err(RefreshError::FeedDisabled { feed_id });
        }

        let now = Utc::now().timestamp();
        tracing::debug!(feed_id = feed.id, url = %feed.feed_url, force = force, "Refreshing feed");

        let outcome = match self.fetch.fetch(&feed).await {
            Ok(outcome) => outcome,
            Err(FetchError::RateLimited { retry_after }) => {
                self.record_rate_limited(&feed, retry_after, now).await;
                return Err(FetchError::RateLimited { retry_after }.into());
            }
            Err(e) => {
                self.record_source_failure(&feed, &e.to_string(), now).await;
                return Err(e.into());
            }
        };

        let (body, etag, last_modified) = match outcome {
            FetchOutcome::NotModified => {
                tracing::debug!(feed_id = feed.id, "Feed not modified");
                let state = self.tracker.on_not_modified(&feed, now);
                self.db.persist_feed_state(feed.id, &state).await?;
                return Ok(RefreshReport {
                    feed_id: feed.id,
                    not_modified: true,
                    ..Default::default()
                });
            }
            FetchOutcome::Fetched {
                body,
                etag,
                last_modified,
            } => (body, etag, last_modified),
        };

        let candidates = match parser::parse(&body, &feed, now) {
            Ok(candidates) => candidates,
            Err(e) => {
                self.record_source_failure(&feed, &e.to_string(), now).await;
                return Err(e.into());
            }
        };

        let candidates = self.filter.apply(&feed, candidates);

        let existing = match self.db.existing_hashes(feed.id).await {
            Ok(existing) => existing,
            Err(e) => {
                self.record_engine_failure(&feed, &e.to_string(), now).await;
                return Err(e.into());
            }
        };
        let mut reconciled = reconcile(candidates, &existing);

        if feed.crawler {
            self.enrich_new_entries(&feed, &mut reconciled.to_insert)
                .await;
        }

        let state = self.tracker.on_success(now, etag, last_modified);
        let created = match self
            .db
            .persist_refresh(
                user_id,
                feed.id,
                &reconciled.to_insert,
                &reconciled.to_update,
                &state,
                now,
            )
            .await
        {
            Ok(created) => created,
            Err(e) => {
                self.record_engine_failure(&feed, &e.to_string(), now).await;
                return Err(e.into());
            }
        };

        tracing::info!(
            feed_id = feed.id,
            created = created,
            updated = reconciled.to_update.len(),
            "Feed refreshed"
        );

        self.notifiers
            .dispatch(user_id, feed, reconciled.to_insert);

        Ok(RefreshReport {
            feed_id,
            not_modified: false,
            created,
            updated: reconciled.to_update.len(),
        })
    }

    /// Replace summary content of new entries with the scraped article body.
    /// Only entries that survived filtering and are about to be inserted get
    /// scraped; a scrape failure keeps the summary.
    async fn enrich_new_entries(
        &self,
        feed: &Feed,
        to_insert: &mut [crate::storage::CandidateEntry],
    ) {
        for candidate in to_insert {
            match scrape_article(&self.fetch, feed, &candidate.url).await {
                Ok(Some(content)) => candidate.content = content,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        feed_id = feed.id,
                        url = %candidate.url,
                        error = %e,
                        "Scrape failed, keeping feed content"
                    );
                }
            }
        }
    }

    /// Defer a rate-limited feed without touching its error bookkeeping.
    async fn record_rate_limited(&self, feed: &Feed, retry_after: Option<u64>, now: i64) {
        tracing::warn!(
            feed_id = feed.id,
            retry_after = ?retry_after,
            "Feed rate limited, deferring next check"
        );
        let state = self
            .tracker
            .on_rate_limited(feed, retry_after.map(|s| s as i64), now);
        if let Err(e) = self.db.persist_feed_state(feed.id, &state).await {
            tracing::error!(feed_id = feed.id, error = %e, "Failed to record rate limit deferral");
        }
    }

    /// Record a source-side failure (network, HTTP, parse). Best effort: if
    /// the bookkeeping write itself fails the original error still wins.
    async fn record_source_failure(&self, feed: &Feed, message: &str, now: i64) {
        tracing::warn!(feed_id = feed.id, error = %message, "Refresh failed");
        let state = self.tracker.on_failure(feed, message, now);
        if let Err(e) = self.db.persist_feed_state(feed.id, &state).await {
            tracing::error!(feed_id = feed.id, error = %e, "Failed to record refresh failure");
        }
    }

    /// Record an engine-side fault. The error counter and disabled flag are
    /// left alone; the next check still advances so the feed is not retried
    /// in a tight loop. Best effort: a storage outage that caused the fault
    /// can also swallow the record of it.
    async fn record_engine_failure(&self, feed: &Feed, message: &str, now: i64) {
        tracing::error!(feed_id = feed.id, error = %message, "Refresh hit an engine fault");
        let state = self.tracker.on_engine_failure(feed, message, now);
        if let Err(e) = self.db.persist_feed_state(feed.id, &state).await {
            tracing::error!(feed_id = feed.id, error = %e, "Failed to record engine fault");
        }
    }

    /// Engine-fault bookkeeping for a panicking worker task.
    pub async fn record_panic(&self, user_id: i64, feed_id: i64, message: &str) {
        let now = Utc::now().timestamp();
        match self.db.feed_by_id(user_id, feed_id).await {
            Ok(Some(feed)) => {
                self.record_engine_failure(&feed, message, now).await;
            }
            Ok(None) => {
                tracing::error!(feed_id = feed_id, "Worker fault for unknown feed");
            }
            Err(e) => {
                tracing::error!(feed_id = feed_id, error = %e, "Failed to load feed after worker fault");
            }
        }
    }
}
