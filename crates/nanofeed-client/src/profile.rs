//! Profile resolution and caching.
//!
//! The resolver is the only owner of [`Profile`] records. A profile is built
//! from every metadata event the store has seen for an author (newest wins,
//! older ones backfill empty fields) and cached for the session. Resolution
//! never fails: any network or parse problem yields an empty profile, which
//! is not cached so a later call can try again.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use nanofeed_core::{EventKind, FeedEvent, FeedFilter, Profile};
use parking_lot::RwLock;

use crate::relay::RelayPool;
use crate::store::EventStore;

/// Fetches, merges, and caches per-author profiles.
pub struct ProfileResolver {
    pool: Arc<RelayPool>,
    store: Arc<EventStore>,
    cache: RwLock<HashMap<String, Profile>>,
}

impl ProfileResolver {
    /// Create a resolver over a pool and store.
    pub fn new(pool: Arc<RelayPool>, store: Arc<EventStore>) -> Self {
        Self {
            pool,
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Cached profile, without touching the network.
    pub fn cached(&self, author: &str) -> Option<Profile> {
        self.cache.read().get(author).cloned()
    }

    /// Number of cached profiles.
    pub fn cache_len(&self) -> usize {
        self.cache.read().len()
    }

    /// Profile for `author`, from cache or a fan-out query.
    pub async fn resolve(&self, author: &str) -> Profile {
        if let Some(profile) = self.cached(author) {
            return profile;
        }

        let filter = FeedFilter::new().kind(EventKind::Metadata).author(author);
        counter!("profile_fetch_total").increment(1);
        match self.pool.query(&filter).await {
            Ok(events) => {
                self.store.put_all(events);
            }
            Err(e) => {
                counter!("profile_fetch_failures_total").increment(1);
                tracing::warn!("Profile lookup for {} failed: {}", author, e);
                return Profile::empty(author);
            }
        }

        self.rebuild(author)
            .unwrap_or_else(|| Profile::empty(author))
    }

    /// Resolve many authors with one fan-out query for the uncached ones.
    pub async fn resolve_many(&self, authors: &[String]) -> HashMap<String, Profile> {
        let missing: Vec<String> = {
            let cache = self.cache.read();
            let mut missing: Vec<String> = authors
                .iter()
                .filter(|a| !cache.contains_key(a.as_str()))
                .cloned()
                .collect();
            missing.sort();
            missing.dedup();
            missing
        };

        if !missing.is_empty() {
            counter!("profile_fetch_total").increment(1);
            let filter = FeedFilter::new()
                .kind(EventKind::Metadata)
                .authors(missing.iter().cloned());
            match self.pool.query(&filter).await {
                Ok(events) => {
                    self.store.put_all(events);
                    for author in &missing {
                        self.rebuild(author);
                    }
                }
                Err(e) => {
                    counter!("profile_fetch_failures_total").increment(1);
                    tracing::warn!("Batch profile lookup for {} authors failed: {}", missing.len(), e);
                }
            }
        }

        let cache = self.cache.read();
        authors
            .iter()
            .map(|a| {
                let profile = cache.get(a).cloned().unwrap_or_else(|| Profile::empty(a.as_str()));
                (a.clone(), profile)
            })
            .collect()
    }

    /// Feed a metadata event seen elsewhere (live subscription, discovery, a
    /// profile update we published). Returns the refreshed profile if the
    /// event was new.
    pub fn observe(&self, event: &FeedEvent) -> Option<Profile> {
        if event.kind != EventKind::Metadata {
            return None;
        }
        if self.store.contains(&event.id) {
            return None;
        }
        // Older versions still matter: they may backfill empty fields.
        self.store.put(event.clone());
        self.rebuild(&event.author)
    }

    /// Rebuild and cache an author's profile from stored metadata.
    fn rebuild(&self, author: &str) -> Option<Profile> {
        let history = self.store.metadata_history(author);
        if history.is_empty() {
            return None;
        }
        let profile = Profile::from_metadata_events(author, &history);
        self.cache.write().insert(author.to_string(), profile.clone());
        Some(profile)
    }
}
