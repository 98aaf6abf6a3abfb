//! Reconciliation of parsed candidates against stored entry hashes.
//!
//! Pure: the caller reads the existing hash set up front and persists the
//! result afterwards. The worker pool's single-flight guarantee makes that
//! read-then-write race-free without a database lock.

use std::collections::HashSet;

use crate::storage::CandidateEntry;

/// Split of one refresh batch into entries to create and entries whose
/// descriptive fields should be refreshed.
#[derive(Debug, Default)]
pub struct Reconciled {
    pub to_insert: Vec<CandidateEntry>,
    pub to_update: Vec<CandidateEntry>,
}

/// Reconcile candidates against previously stored hashes.
///
/// A hash appearing twice within one document keeps its first occurrence.
/// Unseen hashes become inserts; known hashes become updates. Re-running
/// over an identical document therefore yields zero inserts and identical
/// updates (idempotence).
pub fn reconcile(candidates: Vec<CandidateEntry>, existing: &HashSet<String>) -> Reconciled {
    let mut seen_in_batch = HashSet::new();
    let mut result = Reconciled::default();

    for candidate in candidates {
        if !seen_in_batch.insert(candidate.hash.clone()) {
            tracing::debug!(hash = %candidate.hash, "Duplicate hash within one document, keeping first");
            continue;
        }
        if existing.contains(&candidate.hash) {
            result.to_update.push(candidate);
        } else {
            result.to_insert.push(candidate);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(hash: &str) -> CandidateEntry {
        CandidateEntry {
            hash: hash.to_string(),
            title: format!("title-{hash}"),
            url: String::new(),
            author: String::new(),
            content: String::new(),
            published_at: 0,
            tags: vec![],
            enclosures: vec![],
        }
    }

    #[test]
    fn test_unseen_hashes_become_inserts() {
        let result = reconcile(vec![candidate("a"), candidate("b")], &HashSet::new());
        assert_eq!(result.to_insert.len(), 2);
        assert!(result.to_update.is_empty());
    }

    #[test]
    fn test_known_hashes_become_updates() {
        let existing: HashSet<String> = ["a".to_string()].into();
        let result = reconcile(vec![candidate("a"), candidate("b")], &existing);
        assert_eq!(result.to_insert.len(), 1);
        assert_eq!(result.to_insert[0].hash, "b");
        assert_eq!(result.to_update.len(), 1);
        assert_eq!(result.to_update[0].hash, "a");
    }

    #[test]
    fn test_in_batch_duplicate_keeps_first() {
        let mut first = candidate("a");
        first.title = "first".to_string();
        let mut second = candidate("a");
        second.title = "second".to_string();

        let result = reconcile(vec![first, second], &HashSet::new());
        assert_eq!(result.to_insert.len(), 1);
        assert_eq!(result.to_insert[0].title, "first");
    }

    #[test]
    fn test_second_run_is_all_updates() {
        let batch = vec![candidate("a"), candidate("b")];
        let first = reconcile(batch.clone(), &HashSet::new());
        assert_eq!(first.to_insert.len(), 2);

        // Simulate the state after persisting the first run
        let existing: HashSet<String> =
            first.to_insert.iter().map(|c| c.hash.clone()).collect();
        let second = reconcile(batch, &existing);
        assert!(second.to_insert.is_empty());
        assert_eq!(second.to_update.len(), 2);
    }
}
