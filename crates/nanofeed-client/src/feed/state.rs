//! Per-feed pagination bookkeeping.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;

/// Cursor state for one feed.
///
/// The rendered set only grows: an id, once shown, is never shown again in
/// this feed, even if the post later moves to the other feed.
#[derive(Debug)]
pub struct FeedState {
    batch_size: usize,
    update_interval: Duration,
    rendered: HashSet<String>,
    last_load: Option<Instant>,
    oldest_paged: Option<u64>,
}

impl FeedState {
    pub fn new(batch_size: usize, update_interval: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            update_interval,
            rendered: HashSet::new(),
            last_load: None,
            oldest_paged: None,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    pub fn is_rendered(&self, id: &str) -> bool {
        self.rendered.contains(id)
    }

    /// Record `id` as shown. Returns false if it already was.
    pub fn mark_rendered(&mut self, id: &str) -> bool {
        self.rendered.insert(id.to_string())
    }

    pub fn rendered_len(&self) -> usize {
        self.rendered.len()
    }

    /// Whether a load at `now` would come sooner than `throttle` after the last.
    pub fn throttled(&self, now: Instant, throttle: Duration) -> bool {
        self.last_load
            .is_some_and(|last| now.saturating_duration_since(last) < throttle)
    }

    pub fn record_load(&mut self, now: Instant) {
        self.last_load = Some(now);
    }

    pub fn last_load(&self) -> Option<Instant> {
        self.last_load
    }

    /// Note a post appended by pagination. Timestamps after `now` are
    /// author-supplied noise and never move the cursor.
    pub fn note_paged(&mut self, created_at: u64, now: u64) {
        if created_at > now {
            return;
        }
        self.oldest_paged = Some(self.oldest_paged.map_or(created_at, |t| t.min(created_at)));
    }

    /// Upper bound for the next older-posts query, if anything was paged in.
    pub fn page_cursor(&self) -> Option<u64> {
        self.oldest_paged
    }
}
