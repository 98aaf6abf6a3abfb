use std::collections::HashSet;

use super::schema::Database;
use super::types::{CandidateEntry, DatabaseError, Entry, EntryRow, EntryStatus, FeedState};

const ENTRY_COLUMNS: &str = "id, user_id, feed_id, hash, title, url, author, content, \
     published_at, created_at, changed_at, status, starred, tags, enclosures";

fn json_text<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "[]".to_string())
}

impl Database {
    // ========================================================================
    // Entry Operations
    // ========================================================================

    /// All hashes ever stored for a feed, including `removed` entries.
    ///
    /// Removed hashes stay in the set so a reappearing item is treated as
    /// already known and never resurrected by the pipeline.
    pub async fn existing_hashes(&self, feed_id: i64) -> Result<HashSet<String>, DatabaseError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT hash FROM entries WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(hash,)| hash).collect())
    }

    /// Persist one refresh outcome atomically: insert new entries as
    /// `unread`, refresh descriptive fields of known entries, and write the
    /// feed bookkeeping row — all in a single transaction so a crash cannot
    /// leave entries merged without `checked_at` advancing.
    ///
    /// Updates never touch `status` or `starred` (user-owned fields) and
    /// skip rows already marked `removed`.
    ///
    /// Returns the number of newly inserted entries.
    pub async fn persist_refresh(
        &self,
        user_id: i64,
        feed_id: i64,
        to_insert: &[CandidateEntry],
        to_update: &[CandidateEntry],
        state: &FeedState,
        now: i64,
    ) -> Result<usize, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for candidate in to_insert {
            let result = sqlx::query(
                r#"
                INSERT INTO entries (
                    user_id, feed_id, hash, title, url, author, content,
                    published_at, created_at, changed_at, status, starred, tags, enclosures
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
                ON CONFLICT(feed_id, hash) DO NOTHING
            "#,
            )
            .bind(user_id)
            .bind(feed_id)
            .bind(&candidate.hash)
            .bind(&candidate.title)
            .bind(&candidate.url)
            .bind(&candidate.author)
            .bind(&candidate.content)
            .bind(candidate.published_at)
            .bind(now)
            .bind(now)
            .bind(EntryStatus::Unread)
            .bind(json_text(&candidate.tags))
            .bind(json_text(&candidate.enclosures))
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                inserted += 1;
            }
        }

        for candidate in to_update {
            sqlx::query(
                r#"
                UPDATE entries SET
                    title = ?,
                    url = ?,
                    author = ?,
                    content = ?,
                    changed_at = ?,
                    tags = ?,
                    enclosures = ?
                WHERE feed_id = ? AND hash = ? AND status != 'removed'
            "#,
            )
            .bind(&candidate.title)
            .bind(&candidate.url)
            .bind(&candidate.author)
            .bind(&candidate.content)
            .bind(now)
            .bind(json_text(&candidate.tags))
            .bind(json_text(&candidate.enclosures))
            .bind(feed_id)
            .bind(&candidate.hash)
            .execute(&mut *tx)
            .await?;
        }

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
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(inserted)
    }

    /// All entries for a feed, newest first.
    pub async fn entries_for_feed(&self, feed_id: i64) -> Result<Vec<Entry>, DatabaseError> {
        let rows = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE feed_id = ? ORDER BY published_at DESC, id DESC"
        ))
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(EntryRow::into_entry).collect())
    }

    // ========================================================================
    // User-owned entry state (API-side operations)
    // ========================================================================

    /// Set an entry's status. `removed` is terminal: only this explicit call
    /// can set it, and the pipeline never changes it back.
    pub async fn set_entry_status(
        &self,
        entry_id: i64,
        status: EntryStatus,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE entries SET status = ? WHERE id = ?")
            .bind(status)
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_entry_starred(
        &self,
        entry_id: i64,
        starred: bool,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE entries SET starred = ? WHERE id = ?")
            .bind(starred)
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
