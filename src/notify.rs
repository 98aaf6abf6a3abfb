//! Best-effort notification fan-out after a successful refresh.
//!
//! Integration backends (save-article services, chat webhooks, ...) all
//! implement the same single-send capability so the dispatch loop stays
//! uniform no matter how many backends exist. Dispatch runs in a spawned
//! task after the persist transaction commits; a failing sender is logged
//! and dropped, never retried, and never affects the refresh result.

use async_trait::async_trait;
use std::sync::Arc;

use crate::storage::{CandidateEntry, Feed};

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(
        &self,
        user_id: i64,
        feed: &Feed,
        new_entries: &[CandidateEntry],
    ) -> anyhow::Result<()>;
}

/// Tagged list of `(enabled, sender)` pairs.
#[derive(Clone, Default)]
pub struct NotifierSet {
    senders: Vec<(bool, Arc<dyn Notifier>)>,
}

impl NotifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, enabled: bool, sender: Arc<dyn Notifier>) {
        self.senders.push((enabled, sender));
    }

    /// Fire-and-forget fan-out. Returns immediately; each enabled sender
    /// runs in the spawned task and failures are logged and dropped.
    pub fn dispatch(&self, user_id: i64, feed: Feed, new_entries: Vec<CandidateEntry>) {
        if new_entries.is_empty() || self.senders.is_empty() {
            return;
        }
        let senders = self.senders.clone();
        tokio::spawn(async move {
            for (enabled, sender) in senders {
                if !enabled {
                    continue;
                }
                if let Err(e) = sender.send(user_id, &feed, &new_entries).await {
                    tracing::warn!(
                        notifier = sender.name(),
                        user_id = user_id,
                        feed_id = feed.id,
                        error = %e,
                        "Notification failed, dropping"
                    );
                }
            }
        });
    }
}

/// Built-in backend that just logs what would be delivered. Useful as a
/// deployment smoke test for the fan-out path.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(
        &self,
        user_id: i64,
        feed: &Feed,
        new_entries: &[CandidateEntry],
    ) -> anyhow::Result<()> {
        tracing::info!(
            user_id = user_id,
            feed_id = feed.id,
            feed_title = %feed.title,
            new_entries = new_entries.len(),
            "New entries"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct RecordingNotifier {
        tx: mpsc::UnboundedSender<usize>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send(
            &self,
            _user_id: i64,
            _feed: &Feed,
            new_entries: &[CandidateEntry],
        ) -> anyhow::Result<()> {
            self.tx.send(new_entries.len()).ok();
            if self.fail {
                anyhow::bail!("backend down");
            }
            Ok(())
        }
    }

    fn entry(hash: &str) -> CandidateEntry {
        CandidateEntry {
            hash: hash.to_string(),
            title: String::new(),
            url: String::new(),
            author: String::new(),
            content: String::new(),
            published_at: 0,
            tags: vec![],
            enclosures: vec![],
        }
    }

    #[tokio::test]
    async fn test_enabled_sender_receives_entries() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut set = NotifierSet::new();
        set.push(true, Arc::new(RecordingNotifier { tx, fail: false }));

        set.dispatch(1, Feed::new(1, 1, "https://example.org/f"), vec![entry("a")]);
        assert_eq!(rx.recv().await, Some(1));
    }

    #[tokio::test]
    async fn test_disabled_sender_skipped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut set = NotifierSet::new();
        set.push(false, Arc::new(RecordingNotifier { tx, fail: false }));

        set.dispatch(1, Feed::new(1, 1, "https://example.org/f"), vec![entry("a")]);
        // Channel closes without a message once the dispatch task and the
        // set's own sender handle are gone
        drop(set);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_failing_sender_does_not_stop_others() {
        let (tx_fail, mut rx_fail) = mpsc::unbounded_channel();
        let (tx_ok, mut rx_ok) = mpsc::unbounded_channel();
        let mut set = NotifierSet::new();
        set.push(true, Arc::new(RecordingNotifier { tx: tx_fail, fail: true }));
        set.push(true, Arc::new(RecordingNotifier { tx: tx_ok, fail: false }));

        set.dispatch(1, Feed::new(1, 1, "https://example.org/f"), vec![entry("a")]);
        assert_eq!(rx_fail.recv().await, Some(1));
        assert_eq!(rx_ok.recv().await, Some(1));
    }

    #[tokio::test]
    async fn test_no_new_entries_means_no_dispatch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut set = NotifierSet::new();
        set.push(true, Arc::new(RecordingNotifier { tx, fail: false }));

        set.dispatch(1, Feed::new(1, 1, "https://example.org/f"), vec![]);
        drop(set);
        assert_eq!(rx.recv().await, None);
    }
}
