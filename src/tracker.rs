//! Per-feed bookkeeping after every refresh attempt.
//!
//! Every attempt, success or failure, advances `checked_at` and
//! `next_check_at` — the monotonic advance is what prevents a broken feed
//! from being re-fetched in a tight loop. The interval policy (base
//! interval, failure backoff factor and cap, disable threshold) comes from
//! configuration, never from constants baked in here.

use crate::config::Config;
use crate::storage::{Feed, FeedState};

#[derive(Debug, Clone)]
pub struct FeedStateTracker {
    polling_interval_secs: i64,
    backoff_factor_secs: i64,
    backoff_cap_secs: i64,
    rate_limit_backoff_secs: i64,
    max_parsing_errors: i64,
}

impl FeedStateTracker {
    pub fn new(config: &Config) -> Self {
        Self {
            polling_interval_secs: config.polling_interval_minutes * 60,
            backoff_factor_secs: config.error_backoff_factor_minutes * 60,
            backoff_cap_secs: config.error_backoff_cap_minutes * 60,
            rate_limit_backoff_secs: config.rate_limit_backoff_minutes * 60,
            max_parsing_errors: config.max_parsing_errors,
        }
    }

    /// Successful refresh with a fresh document: store the new validators,
    /// clear the error counter, and re-enable the feed (a successful manual
    /// refresh of an auto-disabled feed brings it back).
    pub fn on_success(
        &self,
        now: i64,
        etag: Option<String>,
        last_modified: Option<String>,
    ) -> FeedState {
        FeedState {
            checked_at: now,
            next_check_at: now + self.polling_interval_secs,
            etag_header: etag,
            last_modified_header: last_modified,
            parsing_error_count: 0,
            parsing_error_msg: None,
            disabled: false,
        }
    }

    /// 304 short-circuit: the stored copy is current. Validators stay as
    /// they were; the attempt still counts as a successful contact, so the
    /// error counter resets and a forced refresh of an auto-disabled feed
    /// re-enables it here too.
    pub fn on_not_modified(&self, feed: &Feed, now: i64) -> FeedState {
        FeedState {
            checked_at: now,
            next_check_at: now + self.polling_interval_secs,
            etag_header: feed.etag_header.clone(),
            last_modified_header: feed.last_modified_header.clone(),
            parsing_error_count: 0,
            parsing_error_msg: None,
            disabled: false,
        }
    }

    /// Source-side failure (network, HTTP, parse): advance the counter,
    /// back off the next check, and disable the feed once the counter
    /// reaches the configured threshold.
    pub fn on_failure(&self, feed: &Feed, message: &str, now: i64) -> FeedState {
        let count = feed.parsing_error_count + 1;
        FeedState {
            checked_at: now,
            next_check_at: now + self.failure_interval(count),
            etag_header: feed.etag_header.clone(),
            last_modified_header: feed.last_modified_header.clone(),
            parsing_error_count: count,
            parsing_error_msg: Some(message.to_string()),
            disabled: feed.disabled || count >= self.max_parsing_errors,
        }
    }

    /// HTTP 429: the origin asked us to back off. Not a feed defect, so the
    /// error counter and disabled flag stay untouched; the next check is
    /// deferred by `Retry-After` when the origin sent one, else by the
    /// configured rate-limit backoff.
    pub fn on_rate_limited(
        &self,
        feed: &Feed,
        retry_after_secs: Option<i64>,
        now: i64,
    ) -> FeedState {
        FeedState {
            checked_at: now,
            next_check_at: now + retry_after_secs.unwrap_or(self.rate_limit_backoff_secs).max(1),
            etag_header: feed.etag_header.clone(),
            last_modified_header: feed.last_modified_header.clone(),
            parsing_error_count: feed.parsing_error_count,
            parsing_error_msg: feed.parsing_error_msg.clone(),
            disabled: feed.disabled,
        }
    }

    /// Engine-side failure (storage outage, internal bug): the feed is not
    /// at fault, so the error counter and disabled flag are left alone. The
    /// message is surfaced with an `internal:` prefix and the next check
    /// still advances.
    pub fn on_engine_failure(&self, feed: &Feed, message: &str, now: i64) -> FeedState {
        FeedState {
            checked_at: now,
            next_check_at: now + self.polling_interval_secs,
            etag_header: feed.etag_header.clone(),
            last_modified_header: feed.last_modified_header.clone(),
            parsing_error_count: feed.parsing_error_count,
            parsing_error_msg: Some(format!("internal: {message}")),
            disabled: feed.disabled,
        }
    }

    fn failure_interval(&self, error_count: i64) -> i64 {
        (self.polling_interval_secs + error_count * self.backoff_factor_secs)
            .min(self.backoff_cap_secs)
            .max(self.polling_interval_secs)
    }
}
