use super::schema::Database;
use super::types::{DatabaseError, Feed, FeedState};

const FEED_COLUMNS: &str = "id, user_id, category_id, feed_url, site_url, title, \
     etag_header, last_modified_header, checked_at, next_check_at, \
     parsing_error_count, parsing_error_msg, disabled, crawler, \
     blocklist_rules, keeplist_rules, rewrite_rules, url_rewrite_rules, \
     user_agent, cookie, username, password, proxy_url, \
     allow_self_signed_certificates, disable_http2";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Insert a feed row, returning its ID. On a `(user_id, feed_url)`
    /// conflict the descriptive fields are updated and the existing ID
    /// returned.
    pub async fn create_feed(&self, feed: &Feed) -> Result<i64, DatabaseError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feeds (
                user_id, category_id, feed_url, site_url, title,
                etag_header, last_modified_header, checked_at, next_check_at,
                parsing_error_count, parsing_error_msg, disabled, crawler,
                blocklist_rules, keeplist_rules, rewrite_rules, url_rewrite_rules,
                user_agent, cookie, username, password, proxy_url,
                allow_self_signed_certificates, disable_http2
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, feed_url) DO UPDATE SET
                title = excluded.title,
                site_url = excluded.site_url,
                category_id = excluded.category_id
            RETURNING id
        "#,
        )
        .bind(feed.user_id)
        .bind(feed.category_id)
        .bind(&feed.feed_url)
        .bind(&feed.site_url)
        .bind(&feed.title)
        .bind(&feed.etag_header)
        .bind(&feed.last_modified_header)
        .bind(feed.checked_at)
        .bind(feed.next_check_at)
        .bind(feed.parsing_error_count)
        .bind(&feed.parsing_error_msg)
        .bind(feed.disabled)
        .bind(feed.crawler)
        .bind(&feed.blocklist_rules)
        .bind(&feed.keeplist_rules)
        .bind(&feed.rewrite_rules)
        .bind(&feed.url_rewrite_rules)
        .bind(&feed.user_agent)
        .bind(&feed.cookie)
        .bind(&feed.username)
        .bind(&feed.password)
        .bind(&feed.proxy_url)
        .bind(feed.allow_self_signed_certificates)
        .bind(feed.disable_http2)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// Load one feed scoped to its owner. Returns `None` when the feed does
    /// not exist or belongs to another user.
    pub async fn feed_by_id(
        &self,
        user_id: i64,
        feed_id: i64,
    ) -> Result<Option<Feed>, DatabaseError> {
        let feed = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE user_id = ? AND id = ?"
        ))
        .bind(user_id)
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed)
    }

    /// Feeds eligible for the system-wide scheduled sweep: not disabled and
    /// due (`next_check_at` unset or in the past). Oldest due first so no
    /// feed starves when the batch is capped.
    pub async fn feeds_due_for_refresh(
        &self,
        now: i64,
        limit: i64,
    ) -> Result<Vec<Feed>, DatabaseError> {
        let feeds = sqlx::query_as::<_, Feed>(&format!(
            r#"
            SELECT {FEED_COLUMNS} FROM feeds
            WHERE disabled = 0 AND (next_check_at IS NULL OR next_check_at <= ?)
            ORDER BY next_check_at ASC
            LIMIT ?
        "#
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    /// One user's enabled feeds, regardless of due time (manual refresh
    /// scope). Disabled feeds are excluded: pool jobs run without force, so
    /// they could never refresh anyway.
    pub async fn feeds_for_user(&self, user_id: i64) -> Result<Vec<Feed>, DatabaseError> {
        let feeds = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE user_id = ? AND disabled = 0 ORDER BY id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    /// Enabled feeds in one of the user's categories (manual refresh scope).
    pub async fn feeds_for_category(
        &self,
        user_id: i64,
        category_id: i64,
    ) -> Result<Vec<Feed>, DatabaseError> {
        let feeds = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds \
             WHERE user_id = ? AND category_id = ? AND disabled = 0 ORDER BY id"
        ))
        .bind(user_id)
        .bind(category_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    /// Write refresh bookkeeping without touching entries. Used for the 304
    /// short-circuit and for failure paths.
    pub async fn persist_feed_state(
        &self,
        feed_id: i64,
        state: &FeedState,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE feeds SET
                checked_at = ?,
                next_check_at = ?,
                etag_header = ?,
                last_modified_header = ?,
                parsing_error_count = ?,
                parsing_error_msg = ?,
                disabled = ?
            WHERE id = ?
        "#,
        )
        .bind(state.checked_at)
        .bind(state.next_check_at)
        .bind(&state.etag_header)
        .bind(&state.last_modified_header)
        .bind(state.parsing_error_count)
        .bind(&state.parsing_error_msg)
        .bind(state.disabled)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Explicit user enable/disable, distinct from the auto-disable the
    /// tracker applies at the error threshold.
    pub async fn set_feed_disabled(
        &self,
        feed_id: i64,
        disabled: bool,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE feeds SET disabled = ? WHERE id = ?")
            .bind(disabled)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
