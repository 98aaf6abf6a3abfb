use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

// ============================================================================
// Data Structures
// ============================================================================

/// A subscribed feed, owned by exactly one user and one category.
///
/// Cache validators (`etag_header`, `last_modified_header`) are opaque strings
/// echoed back to the origin server on the next conditional fetch. All
/// timestamps are unix seconds.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub user_id: i64,
    pub category_id: i64,
    pub feed_url: String,
    pub site_url: String,
    pub title: String,
    pub etag_header: Option<String>,
    pub last_modified_header: Option<String>,
    /// Last refresh attempt, success or failure
    pub checked_at: Option<i64>,
    /// Earliest time the feed is eligible for the next scheduled sweep
    pub next_check_at: Option<i64>,
    pub parsing_error_count: i64,
    pub parsing_error_msg: Option<String>,
    pub disabled: bool,
    /// Fetch full article content for new entries
    pub crawler: bool,
    pub blocklist_rules: Option<String>,
    pub keeplist_rules: Option<String>,
    pub rewrite_rules: Option<String>,
    pub url_rewrite_rules: Option<String>,
    pub user_agent: Option<String>,
    pub cookie: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub proxy_url: Option<String>,
    pub allow_self_signed_certificates: bool,
    pub disable_http2: bool,
}

impl Feed {
    /// A feed with engine defaults, ready for `create_feed`. The `id` field
    /// is ignored on insert.
    pub fn new(user_id: i64, category_id: i64, feed_url: &str) -> Self {
        Self {
            id: 0,
            user_id,
            category_id,
            feed_url: feed_url.to_string(),
            site_url: feed_url.to_string(),
            title: feed_url.to_string(),
            etag_header: None,
            last_modified_header: None,
            checked_at: None,
            next_check_at: None,
            parsing_error_count: 0,
            parsing_error_msg: None,
            disabled: false,
            crawler: false,
            blocklist_rules: None,
            keeplist_rules: None,
            rewrite_rules: None,
            url_rewrite_rules: None,
            user_agent: None,
            cookie: None,
            username: None,
            password: None,
            proxy_url: None,
            allow_self_signed_certificates: false,
            disable_http2: false,
        }
    }
}

/// Entry lifecycle status. `Removed` is terminal and only ever set by
/// explicit user action, never by the refresh pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
pub enum EntryStatus {
    Unread,
    Read,
    Removed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Unread => "unread",
            EntryStatus::Read => "read",
            EntryStatus::Removed => "removed",
        }
    }
}

/// A media attachment on an entry (podcast audio, images, video).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enclosure {
    pub url: String,
    pub mime_type: String,
    pub length: i64,
}

/// A stored entry. `(feed_id, hash)` is unique; `status` and `starred` are
/// user-owned and never written by the refresh pipeline after creation.
#[derive(Debug, Clone)]
pub struct Entry {
    pub id: i64,
    pub user_id: i64,
    pub feed_id: i64,
    pub hash: String,
    pub title: String,
    pub url: String,
    pub author: String,
    pub content: String,
    pub published_at: i64,
    pub created_at: i64,
    pub changed_at: i64,
    pub status: EntryStatus,
    pub starred: bool,
    pub tags: Vec<String>,
    pub enclosures: Vec<Enclosure>,
}

/// Internal row type for entry queries. Tags and enclosures are stored as
/// JSON text columns and decoded in `into_entry`.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EntryRow {
    pub id: i64,
    pub user_id: i64,
    pub feed_id: i64,
    pub hash: String,
    pub title: String,
    pub url: String,
    pub author: String,
    pub content: String,
    pub published_at: i64,
    pub created_at: i64,
    pub changed_at: i64,
    pub status: EntryStatus,
    pub starred: bool,
    pub tags: String,
    pub enclosures: String,
}

impl EntryRow {
    pub(crate) fn into_entry(self) -> Entry {
        Entry {
            id: self.id,
            user_id: self.user_id,
            feed_id: self.feed_id,
            hash: self.hash,
            title: self.title,
            url: self.url,
            author: self.author,
            content: self.content,
            published_at: self.published_at,
            created_at: self.created_at,
            changed_at: self.changed_at,
            status: self.status,
            starred: self.starred,
            tags: serde_json::from_str(&self.tags).unwrap_or_default(),
            enclosures: serde_json::from_str(&self.enclosures).unwrap_or_default(),
        }
    }
}

/// A parsed-but-not-yet-reconciled item from a feed document.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateEntry {
    /// Stable identity hash derived from the source GUID or entry URL
    pub hash: String,
    pub title: String,
    pub url: String,
    pub author: String,
    pub content: String,
    pub published_at: i64,
    pub tags: Vec<String>,
    pub enclosures: Vec<Enclosure>,
}

/// Per-feed bookkeeping written after every refresh attempt, success or
/// failure. Computed by the state tracker, persisted in the same transaction
/// as any entry changes.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedState {
    pub checked_at: i64,
    pub next_check_at: i64,
    pub etag_header: Option<String>,
    pub last_modified_header: Option<String>,
    pub parsing_error_count: i64,
    pub parsing_error_msg: Option<String>,
    pub disabled: bool,
}
