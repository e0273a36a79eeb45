//! Background discovery of currency authors.
//!
//! Classification of incoming posts only confirms authors who happen to post
//! while we watch. Discovery pushes the other way: it scans recent profiles
//! and posts for currency markers, confirms the authors it finds, and pulls
//! their older posts into the store so the currency feed can show them.
//!
//! Discovery shares nothing with feed loads except the confirmed-author set
//! and the store, both of which merge idempotently, so it runs concurrently
//! with them.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::counter;
use nanofeed_core::address::find_labeled_currency_address;
use nanofeed_core::event::since_ago;
use nanofeed_core::{EventKind, FeedFilter};
use tokio::time::Instant;

use crate::classify::Classifier;
use crate::profile::ProfileResolver;
use crate::relay::RelayPool;
use crate::store::EventStore;

/// Profiles examined per wide scan.
const SCAN_PROFILE_LIMIT: usize = 1000;

/// Recent posts examined per wide scan.
const SCAN_POST_LIMIT: usize = 200;

/// Older posts pulled per newly confirmed author.
const BACKFILL_LIMIT: usize = 100;

/// Recent posts checked per author during a graph walk.
const WALK_POST_LIMIT: usize = 20;

/// Interactions examined per confirmed author during a graph walk.
const WALK_INTERACTION_LIMIT: usize = 100;

/// Authors visited per confirmed author wanted, bounding a graph walk.
const WALK_VISIT_FACTOR: usize = 20;

/// Outcome of one wide scan.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Metadata events examined.
    pub profiles_seen: usize,
    /// Authors confirmed by this scan.
    pub promoted: Vec<String>,
    /// Older posts stored for the promoted authors.
    pub backfilled: usize,
    pub duration: Duration,
}

pub struct Discovery {
    pool: Arc<RelayPool>,
    store: Arc<EventStore>,
    resolver: Arc<ProfileResolver>,
    classifier: Arc<Classifier>,
    topic: String,
    interval: Duration,
    lookback: Duration,
    running: Arc<AtomicBool>,
}

impl Discovery {
    pub fn new(
        pool: Arc<RelayPool>,
        store: Arc<EventStore>,
        resolver: Arc<ProfileResolver>,
        classifier: Arc<Classifier>,
        topic: &str,
        interval: Duration,
        lookback: Duration,
    ) -> Self {
        Self {
            pool,
            store,
            resolver,
            classifier,
            topic: topic.to_lowercase(),
            interval,
            lookback,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check if the periodic scan is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signal the periodic scan to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Run one wide scan.
    ///
    /// Network failures end the affected step early; whatever was confirmed
    /// before that stays confirmed.
    pub async fn scan(&self) -> ScanReport {
        let start = Instant::now();
        let mut report = ScanReport::default();
        let since = since_ago(self.lookback);

        // Profiles carrying an address
        let profiles = FeedFilter::new()
            .kind(EventKind::Metadata)
            .since(since)
            .limit(SCAN_PROFILE_LIMIT);
        match self.pool.query(&profiles).await {
            Ok(events) => {
                report.profiles_seen = events.len();
                for event in &events {
                    if let Some(profile) = self.resolver.observe(event)
                        && self.classifier.consider_profile(&profile)
                    {
                        report.promoted.push(profile.author.clone());
                    }
                }
            }
            Err(e) => tracing::warn!("Discovery profile scan failed: {}", e),
        }

        // Posts where the author labels an address as their own
        let posts = [
            FeedFilter::new()
                .kind(EventKind::TextNote)
                .since(since)
                .limit(SCAN_POST_LIMIT),
            FeedFilter::new()
                .kind(EventKind::TextNote)
                .topic(self.topic.clone())
                .since(since)
                .limit(SCAN_POST_LIMIT),
        ];
        for filter in &posts {
            match self.pool.query(filter).await {
                Ok(events) => {
                    for event in events {
                        if find_labeled_currency_address(&event.content).is_some()
                            && self.classifier.known().insert(&event.author)
                        {
                            report.promoted.push(event.author.clone());
                        }
                        self.store.put(event);
                    }
                }
                Err(e) => tracing::warn!("Discovery post scan failed: {}", e),
            }
        }

        report.backfilled = self.backfill(&report.promoted).await;
        report.duration = start.elapsed();
        counter!("discovery_scans_total").increment(1);
        report
    }

    /// Pull older posts of `authors` into the store.
    pub async fn backfill(&self, authors: &[String]) -> usize {
        if authors.is_empty() {
            return 0;
        }
        let filter = FeedFilter::new()
            .kind(EventKind::TextNote)
            .authors(authors.iter().cloned())
            .since(since_ago(self.lookback))
            .limit(BACKFILL_LIMIT * authors.len());
        match self.pool.query(&filter).await {
            Ok(events) => self.store.put_all(events).len(),
            Err(e) => {
                tracing::warn!("Backfill for {} authors failed: {}", authors.len(), e);
                0
            }
        }
    }

    /// Walk the social graph outward from `seed`, confirming up to `limit`
    /// new authors.
    ///
    /// Every visited author's follow list is expanded; confirmed authors
    /// also expand to the authors they mention, react to, repost, or pay.
    /// An author is confirmed by a profile marker or by a post labeling an
    /// address as theirs.
    pub async fn discover_from(&self, seed: &str, limit: usize) -> Vec<String> {
        let max_visits = limit.saturating_mul(WALK_VISIT_FACTOR).max(1);
        let mut queue = VecDeque::from([seed.to_string()]);
        let mut visited = HashSet::new();
        let mut promoted = Vec::new();

        while let Some(author) = queue.pop_front() {
            if promoted.len() >= limit || visited.len() >= max_visits {
                break;
            }
            if !visited.insert(author.clone()) {
                continue;
            }

            let was_known = self.classifier.known().contains(&author);
            let confirmed = was_known || self.check_author(&author).await;
            if confirmed && !was_known {
                promoted.push(author.clone());
            }

            if author == seed || confirmed {
                for next in self.follows(&author).await {
                    if !visited.contains(&next) {
                        queue.push_back(next);
                    }
                }
            }
            if confirmed {
                for next in self.interactions(&author).await {
                    if !visited.contains(&next) {
                        queue.push_back(next);
                    }
                }
            }
        }

        let backfilled = self.backfill(&promoted).await;
        tracing::info!(
            "Graph walk from {} visited {} authors, confirmed {} ({} posts backfilled)",
            seed,
            visited.len(),
            promoted.len(),
            backfilled
        );
        promoted
    }

    /// Confirm `author` from their profile or recent posts.
    async fn check_author(&self, author: &str) -> bool {
        let profile = self.resolver.resolve(author).await;
        if self.classifier.consider_profile(&profile) {
            return true;
        }

        let filter = FeedFilter::new()
            .kind(EventKind::TextNote)
            .author(author)
            .limit(WALK_POST_LIMIT);
        let Ok(posts) = self.pool.query(&filter).await else {
            return false;
        };
        let labeled = posts
            .iter()
            .any(|e| find_labeled_currency_address(&e.content).is_some());
        self.store.put_all(posts);
        labeled && self.classifier.known().insert(author)
    }

    /// Authors on `author`'s newest follow list.
    async fn follows(&self, author: &str) -> Vec<String> {
        let filter = FeedFilter::new().kind(EventKind::Contacts).author(author);
        match self.pool.query(&filter).await {
            Ok(lists) => lists
                .into_iter()
                .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| b.id.cmp(&a.id)))
                .map(|list| list.mentioned_authors().map(str::to_string).collect())
                .unwrap_or_default(),
            Err(e) => {
                tracing::debug!("Follow list for {} unavailable: {}", author, e);
                Vec::new()
            }
        }
    }

    /// Authors `author` mentioned, reacted to, reposted, or paid.
    async fn interactions(&self, author: &str) -> Vec<String> {
        let filter = FeedFilter::new()
            .kinds([
                EventKind::TextNote,
                EventKind::Repost,
                EventKind::Reaction,
                EventKind::ZapReceipt,
            ])
            .author(author)
            .limit(WALK_INTERACTION_LIMIT);
        match self.pool.query(&filter).await {
            Ok(events) => {
                let mut seen = HashSet::new();
                events
                    .iter()
                    .flat_map(|e| e.mentioned_authors())
                    .filter(|p| *p != author && seen.insert(p.to_string()))
                    .map(str::to_string)
                    .collect()
            }
            Err(e) => {
                tracing::debug!("Interactions for {} unavailable: {}", author, e);
                Vec::new()
            }
        }
    }

    /// Scan every interval until [`stop`](Self::stop), passing each scan's
    /// newly confirmed authors to `on_promoted`.
    pub async fn run_periodic<F>(&self, mut on_promoted: F)
    where
        F: FnMut(&[String]) + Send,
    {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(
            "Starting periodic discovery (interval: {}s, lookback: {}s)",
            self.interval.as_secs(),
            self.lookback.as_secs()
        );

        while self.running.load(Ordering::SeqCst) {
            let report = self.scan().await;
            tracing::info!(
                "Discovery scan: {} profiles, {} authors confirmed, {} posts backfilled in {:?}",
                report.profiles_seen,
                report.promoted.len(),
                report.backfilled,
                report.duration
            );
            if !report.promoted.is_empty() {
                on_promoted(&report.promoted);
            }

            // Wait for the next interval (or until stopped)
            let start = Instant::now();
            while start.elapsed() < self.interval && self.running.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }

        tracing::info!("Discovery stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::KnownCurrencyUsers;
    use crate::relay::PoolTimeouts;
    use crate::testing::{ADDR, MockTransport, event_with, metadata, note};
    use nanofeed_core::event::unix_now;
    use parking_lot::Mutex;

    async fn setup() -> (Arc<MockTransport>, Arc<Discovery>, Arc<EventStore>) {
        let transport = Arc::new(MockTransport::default());
        let pool = Arc::new(RelayPool::new(transport.clone(), PoolTimeouts::default()));
        pool.connect(&["wss://a.test".to_string()]).await;
        let store = Arc::new(EventStore::new());
        let resolver = Arc::new(ProfileResolver::new(pool.clone(), store.clone()));
        let classifier = Arc::new(Classifier::new(
            Arc::new(KnownCurrencyUsers::new()),
            resolver.clone(),
            "nanocurrency",
        ));
        let discovery = Discovery::new(
            pool,
            store.clone(),
            resolver,
            classifier,
            "nanocurrency",
            Duration::from_secs(300),
            Duration::from_secs(30 * 24 * 60 * 60),
        );
        (transport, Arc::new(discovery), store)
    }

    fn bio() -> String {
        format!(r#"{{"about":"hello world\nNano: {ADDR}"}}"#)
    }

    #[tokio::test(start_paused = true)]
    async fn scan_promotes_and_backfills() {
        let (transport, discovery, store) = setup().await;
        let relay = transport.relay("wss://a.test");
        let now = unix_now();
        relay.add_event(metadata("m1", "alice", now - 60, &bio()));
        relay.add_event(metadata("m2", "bob", now - 60, r#"{"name":"bob"}"#));
        relay.add_event(note("p1", "carol", now - 10, &format!("my wallet\nNano: {ADDR}")));
        relay.add_event(note("p2", "dave", now - 10, &format!("send to {ADDR}")));
        relay.add_event(note("old", "alice", now - 20 * 24 * 60 * 60, "old post"));

        let report = discovery.scan().await;
        assert_eq!(report.profiles_seen, 2);
        let mut promoted = report.promoted.clone();
        promoted.sort();
        assert_eq!(promoted, vec!["alice", "carol"]);
        assert!(store.get("old").is_some());
        assert!(!discovery.classifier.known().contains("dave"));

        // a second scan confirms nobody new
        assert!(discovery.scan().await.promoted.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn graph_walk_follows_contacts_and_interactions() {
        let (transport, discovery, _) = setup().await;
        let relay = transport.relay("wss://a.test");
        relay.add_event(event_with("c", "seed", EventKind::Contacts, "", &[&["p", "alice"], &["p", "bob"]]));
        relay.add_event(metadata("ma", "alice", 1, &bio()));
        relay.add_event(metadata("mb", "bob", 1, r#"{"name":"bob"}"#));
        // alice reacted to carol, carol labels an address in a post
        relay.add_event(event_with("r", "alice", EventKind::Reaction, "+", &[&["e", "x"], &["p", "carol"]]));
        relay.add_event(note("cp", "carol", 5, &format!("Nano: {ADDR}")));

        let found = discovery.discover_from("seed", 10).await;
        assert_eq!(found, vec!["alice", "carol"]);
        assert!(!discovery.classifier.known().contains("bob"));
    }

    #[tokio::test(start_paused = true)]
    async fn graph_walk_stops_at_limit() {
        let (transport, discovery, _) = setup().await;
        let relay = transport.relay("wss://a.test");
        relay.add_event(event_with("c", "seed", EventKind::Contacts, "", &[&["p", "a1"], &["p", "a2"]]));
        relay.add_event(metadata("m1", "a1", 1, &bio()));
        relay.add_event(metadata("m2", "a2", 1, &bio()));

        assert_eq!(discovery.discover_from("seed", 1).await, vec!["a1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_scan_reports_and_stops() {
        let (transport, discovery, _) = setup().await;
        transport
            .relay("wss://a.test")
            .add_event(metadata("m1", "alice", unix_now() - 60, &bio()));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let task = {
            let discovery = discovery.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                discovery
                    .run_periodic(|authors| seen.lock().extend_from_slice(authors))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(discovery.is_running());
        assert_eq!(seen.lock().clone(), vec!["alice"]);

        discovery.stop();
        task.await.unwrap();
        assert!(!discovery.is_running());
    }
}
