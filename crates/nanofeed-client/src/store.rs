//! In-memory event store with deduplication.
//!
//! This module provides the [`EventStore`], the single owner of received
//! events. Relays deliver the same event many times and in any order; the
//! store's merge rules make the result independent of arrival order.
//!
//! # Merge Rules
//!
//! - Non-metadata events: first write wins. Once stored, an id is never
//!   replaced, whatever a later copy claims about `created_at`.
//! - Metadata (kind 0) events: one current record per author, replaced only
//!   by a strictly newer `created_at`. Older versions are kept as history so
//!   profiles can backfill fields the newest one leaves empty.
//!
//! # Indexes
//!
//! - id → event
//! - timeline ordered newest-first, ties broken by id
//! - author → ids
//! - parent id → reply ids

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet};

use metrics::{counter, gauge};
use nanofeed_core::{EventKind, FeedEvent};
use parking_lot::RwLock;
use tracing::debug;

#[derive(Default)]
struct Inner {
    events: HashMap<String, FeedEvent>,
    timeline: BTreeSet<(Reverse<u64>, String)>,
    by_author: HashMap<String, Vec<String>>,
    replies: HashMap<String, Vec<String>>,
    metadata: HashMap<String, FeedEvent>,
    metadata_history: HashMap<String, Vec<FeedEvent>>,
    metadata_ids: HashSet<String>,
}

/// Deduplicating, append-only index of received events.
///
/// Thread-safe: share via `Arc<EventStore>`.
#[derive(Default)]
pub struct EventStore {
    inner: RwLock<Inner>,
}

impl EventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an event. Returns true if it was new (or, for metadata, newer).
    pub fn put(&self, event: FeedEvent) -> bool {
        let mut inner = self.inner.write();

        if event.kind == EventKind::Metadata {
            return Self::put_metadata(&mut inner, event);
        }

        if inner.events.contains_key(&event.id) {
            counter!("store_events_duplicate_total").increment(1);
            return false;
        }

        let id = event.id.clone();
        inner.timeline.insert((Reverse(event.created_at), id.clone()));
        inner
            .by_author
            .entry(event.author.clone())
            .or_default()
            .push(id.clone());
        if let Some(parent) = event.parent_id() {
            inner
                .replies
                .entry(parent.to_string())
                .or_default()
                .push(id.clone());
        }
        inner.events.insert(id, event);

        counter!("store_events_inserted_total").increment(1);
        gauge!("store_events").set(inner.events.len() as f64);
        true
    }

    fn put_metadata(inner: &mut Inner, event: FeedEvent) -> bool {
        if !inner.metadata_ids.insert(event.id.clone()) {
            counter!("store_events_duplicate_total").increment(1);
            return false;
        }

        inner
            .metadata_history
            .entry(event.author.clone())
            .or_default()
            .push(event.clone());

        let newer = inner
            .metadata
            .get(&event.author)
            .is_none_or(|current| event.created_at > current.created_at);
        if newer {
            debug!("Metadata for {} now at {}", event.author, event.created_at);
            if inner.metadata.contains_key(&event.author) {
                counter!("store_metadata_replaced_total").increment(1);
            }
            inner.metadata.insert(event.author.clone(), event);
        }
        newer
    }

    /// Insert many events, returning the ones that were new.
    pub fn put_all<I: IntoIterator<Item = FeedEvent>>(&self, events: I) -> Vec<FeedEvent> {
        events
            .into_iter()
            .filter(|e| self.put(e.clone()))
            .collect()
    }

    /// Look up a non-metadata event by id.
    pub fn get(&self, id: &str) -> Option<FeedEvent> {
        self.inner.read().events.get(id).cloned()
    }

    /// Whether an event id has been stored (metadata included).
    pub fn contains(&self, id: &str) -> bool {
        let inner = self.inner.read();
        inner.events.contains_key(id) || inner.metadata_ids.contains(id)
    }

    /// Number of stored non-metadata events.
    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    /// Whether the store has no non-metadata events.
    pub fn is_empty(&self) -> bool {
        self.inner.read().events.is_empty()
    }

    /// Current (newest) metadata event for an author.
    pub fn latest_metadata(&self, author: &str) -> Option<FeedEvent> {
        self.inner.read().metadata.get(author).cloned()
    }

    /// Every metadata event seen for an author, in arrival order.
    pub fn metadata_history(&self, author: &str) -> Vec<FeedEvent> {
        self.inner
            .read()
            .metadata_history
            .get(author)
            .cloned()
            .unwrap_or_default()
    }

    /// Authors with at least one metadata event.
    pub fn metadata_authors(&self) -> Vec<String> {
        self.inner.read().metadata.keys().cloned().collect()
    }

    /// All non-metadata events matching `predicate`, newest first.
    pub fn get_all<F>(&self, predicate: F) -> Vec<FeedEvent>
    where
        F: Fn(&FeedEvent) -> bool,
    {
        self.newest_first(predicate, usize::MAX)
    }

    /// Up to `limit` events matching `predicate`, newest first.
    ///
    /// Events sharing a `created_at` are ordered by id.
    pub fn newest_first<F>(&self, predicate: F, limit: usize) -> Vec<FeedEvent>
    where
        F: Fn(&FeedEvent) -> bool,
    {
        let inner = self.inner.read();
        inner
            .timeline
            .iter()
            .filter_map(|(_, id)| inner.events.get(id))
            .filter(|e| predicate(e))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Events by `author`, newest first.
    pub fn by_author(&self, author: &str) -> Vec<FeedEvent> {
        let inner = self.inner.read();
        let mut events: Vec<FeedEvent> = inner
            .by_author
            .get(author)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.events.get(id))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        events
    }

    /// Direct replies to `parent_id`, oldest first.
    pub fn replies_to(&self, parent_id: &str) -> Vec<FeedEvent> {
        let inner = self.inner.read();
        let mut events: Vec<FeedEvent> = inner
            .replies
            .get(parent_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.events.get(id))
            .cloned()
            .collect();
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        events
    }

    /// Oldest `created_at` among events matching `predicate`.
    pub fn oldest<F>(&self, predicate: F) -> Option<u64>
    where
        F: Fn(&FeedEvent) -> bool,
    {
        let inner = self.inner.read();
        inner
            .timeline
            .iter()
            .rev()
            .filter_map(|(_, id)| inner.events.get(id))
            .find(|e| predicate(e))
            .map(|e| e.created_at)
    }

    /// Newest `created_at` among events matching `predicate`.
    pub fn newest<F>(&self, predicate: F) -> Option<u64>
    where
        F: Fn(&FeedEvent) -> bool,
    {
        self.newest_first(predicate, 1).first().map(|e| e.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{metadata, note, reply};

    #[test]
    fn test_first_write_wins_for_posts() {
        let store = EventStore::new();
        assert!(store.put(note("x", "alice", 100, "first")));
        assert!(!store.put(note("x", "alice", 999, "second")));

        let stored = store.get("x").unwrap();
        assert_eq!(stored.created_at, 100);
        assert_eq!(stored.content, "first");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_metadata_newest_wins_regardless_of_order() {
        let forward = EventStore::new();
        forward.put(metadata("m1", "alice", 10, r#"{"name":"old"}"#));
        assert!(forward.put(metadata("m2", "alice", 20, r#"{"name":"new"}"#)));

        let backward = EventStore::new();
        backward.put(metadata("m2", "alice", 20, r#"{"name":"new"}"#));
        assert!(!backward.put(metadata("m1", "alice", 10, r#"{"name":"old"}"#)));

        assert_eq!(forward.latest_metadata("alice").unwrap().id, "m2");
        assert_eq!(backward.latest_metadata("alice").unwrap().id, "m2");
        assert_eq!(backward.metadata_history("alice").len(), 2);
    }

    #[test]
    fn test_metadata_equal_timestamp_does_not_replace() {
        let store = EventStore::new();
        store.put(metadata("a", "alice", 10, "{}"));
        assert!(!store.put(metadata("b", "alice", 10, "{}")));
        assert_eq!(store.latest_metadata("alice").unwrap().id, "a");
        assert!(!store.put(metadata("a", "alice", 10, "{}")));
        assert_eq!(store.metadata_history("alice").len(), 2);
    }

    #[test]
    fn test_metadata_not_in_timeline() {
        let store = EventStore::new();
        store.put(metadata("m", "alice", 10, "{}"));
        assert!(store.is_empty());
        assert!(store.contains("m"));
        assert!(store.get_all(|_| true).is_empty());
    }

    #[test]
    fn test_newest_first_with_id_tiebreak() {
        let store = EventStore::new();
        store.put(note("b", "x", 5, ""));
        store.put(note("a", "x", 5, ""));
        store.put(note("c", "x", 9, ""));
        store.put(note("d", "x", 1, ""));

        let ids: Vec<_> = store.get_all(|_| true).into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["c", "a", "b", "d"]);

        let page: Vec<_> = store
            .newest_first(|e| e.id != "c", 2)
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(page, vec!["a", "b"]);
    }

    #[test]
    fn test_reply_index() {
        let store = EventStore::new();
        store.put(note("root", "x", 1, ""));
        store.put(reply("r2", "y", 30, "root"));
        store.put(reply("r1", "z", 20, "root"));

        let ids: Vec<_> = store.replies_to("root").into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["r1", "r2"]);
        assert!(store.replies_to("r1").is_empty());

        let top: Vec<_> = store.get_all(|e| !e.is_reply()).into_iter().map(|e| e.id).collect();
        assert_eq!(top, vec!["root"]);
    }

    #[test]
    fn test_by_author_and_bounds() {
        let store = EventStore::new();
        store.put(note("1", "alice", 10, ""));
        store.put(note("2", "bob", 20, ""));
        store.put(note("3", "alice", 30, ""));

        let ids: Vec<_> = store.by_author("alice").into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["3", "1"]);
        assert_eq!(store.oldest(|e| e.author == "alice"), Some(10));
        assert_eq!(store.newest(|e| e.author == "bob"), Some(20));
        assert_eq!(store.oldest(|e| e.author == "carol"), None);
    }

    #[test]
    fn test_put_all_returns_new_only() {
        let store = EventStore::new();
        store.put(note("a", "x", 1, ""));
        let fresh = store.put_all(vec![note("a", "x", 1, ""), note("b", "x", 2, "")]);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].id, "b");
    }
}
