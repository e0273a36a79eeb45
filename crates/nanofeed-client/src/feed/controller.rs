//! Feed orchestration.
//!
//! The controller owns both feeds. It pulls candidates from the
//! [`EventStore`], classifies them, and places each post in exactly one feed
//! through the [`FeedRenderer`].
//!
//! # Placement
//!
//! Every placed id is recorded with its feed. A post placed in the general
//! feed may later move up to the currency feed when its author is confirmed;
//! nothing ever moves down. Both feeds' rendered sets only grow, so a moved
//! post is never shown again in the general feed.
//!
//! # Loads
//!
//! Initial load, pagination, and refresh share one in-flight flag. A load
//! requested while another is running is dropped, not queued. Each feed also
//! enforces a minimum interval between loads, checked before any network call
//! whatever triggered the load. A refresh touches both feeds, so it counts as
//! a load of each.
//!
//! Query cursors never trust author timestamps blindly: the refresh lower
//! bound ignores posts dated in the future and never reaches further back
//! than the live window, and the pagination upper bound follows the oldest
//! post this feed actually paged in.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::counter;
use nanofeed_core::event::{since_ago, unix_now};
use nanofeed_core::{EventKind, FeedEvent, FeedFilter};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::classify::{Classification, Classifier};
use crate::config::Config;
use crate::error::Result;
use crate::feed::FeedKind;
use crate::feed::replies::ReplyLoader;
use crate::feed::state::FeedState;
use crate::profile::ProfileResolver;
use crate::relay::RelayPool;
use crate::render::{FeedRenderer, Placement, RenderedPost, ReplyNode};
use crate::store::EventStore;

/// Candidates examined per requested post before asking relays for more.
const SCAN_FACTOR: usize = 5;

/// Cap on posts fetched by the live-window query.
const LIVE_QUERY_LIMIT: usize = 200;

/// Cap on posts fetched by the backfill queries.
const BACKFILL_QUERY_LIMIT: usize = 500;

/// Feed tuning, usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub topic: String,
    pub general_batch: usize,
    pub currency_batch: usize,
    pub throttle: Duration,
    pub update_interval: Duration,
    pub live_window: Duration,
    pub backfill_window: Duration,
}

impl From<&Config> for FeedSettings {
    fn from(config: &Config) -> Self {
        Self {
            topic: config.topic.clone(),
            general_batch: config.general_batch,
            currency_batch: config.currency_batch,
            throttle: config.throttle,
            update_interval: config.update_interval,
            live_window: config.live_window,
            backfill_window: config.backfill_window,
        }
    }
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            topic: nanofeed_core::DEFAULT_TOPIC.to_string(),
            general_batch: 20,
            currency_batch: 10,
            throttle: Duration::from_millis(1500),
            update_interval: Duration::from_secs(30),
            live_window: Duration::from_secs(24 * 60 * 60),
            backfill_window: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// Result of a pagination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The load ran and placed this many posts.
    Loaded(usize),
    /// Another load was running; this one was dropped.
    InFlight,
    /// Too soon after the previous load of this feed.
    Throttled,
}

/// Summary of the initial load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitialLoad {
    /// New events stored from all initial queries.
    pub fetched: usize,
    pub general: usize,
    pub currency: usize,
}

/// Releases the in-flight flag on drop.
struct LoadGuard<'a>(&'a AtomicBool);

impl<'a> LoadGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives both feeds.
pub struct FeedController {
    settings: FeedSettings,
    pool: Arc<RelayPool>,
    store: Arc<EventStore>,
    resolver: Arc<ProfileResolver>,
    classifier: Arc<Classifier>,
    renderer: Arc<dyn FeedRenderer>,
    replies: ReplyLoader,
    general: Mutex<FeedState>,
    currency: Mutex<FeedState>,
    placed: Mutex<HashMap<String, FeedKind>>,
    classified: Mutex<HashMap<String, Classification>>,
    loading: AtomicBool,
    running: Arc<AtomicBool>,
}

impl FeedController {
    pub fn new(
        settings: FeedSettings,
        pool: Arc<RelayPool>,
        store: Arc<EventStore>,
        resolver: Arc<ProfileResolver>,
        classifier: Arc<Classifier>,
        renderer: Arc<dyn FeedRenderer>,
    ) -> Self {
        let replies = ReplyLoader::new(pool.clone(), store.clone(), resolver.clone());
        Self {
            general: Mutex::new(FeedState::new(settings.general_batch, settings.update_interval)),
            currency: Mutex::new(FeedState::new(settings.currency_batch, settings.update_interval)),
            settings,
            pool,
            store,
            resolver,
            classifier,
            renderer,
            replies,
            placed: Mutex::new(HashMap::new()),
            classified: Mutex::new(HashMap::new()),
            loading: AtomicBool::new(false),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    fn state(&self, feed: FeedKind) -> &Mutex<FeedState> {
        match feed {
            FeedKind::General => &self.general,
            FeedKind::Currency => &self.currency,
        }
    }

    /// Whether the live loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signal the live loop to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether a load is in flight.
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    /// Feed an id is placed in, if any.
    pub fn placement(&self, id: &str) -> Option<FeedKind> {
        self.placed.lock().get(id).copied()
    }

    /// Number of ids ever rendered into `feed`.
    pub fn rendered(&self, feed: FeedKind) -> usize {
        self.state(feed).lock().rendered_len()
    }

    // =========================================================================
    // Classification and placement
    // =========================================================================

    /// Classify a post, reusing earlier answers.
    ///
    /// A cached general answer is rechecked against the confirmed set, since
    /// the author may have been confirmed since.
    async fn classify(&self, event: &FeedEvent) -> Classification {
        let cached = self.classified.lock().get(&event.id).copied();
        match cached {
            Some(c) if c.is_currency() => return c,
            Some(_) => {
                if self.classifier.known().contains(&event.author) {
                    return Classification::KnownAuthor;
                }
                return Classification::General;
            }
            None => {}
        }

        let result = self.classifier.classify(event).await;
        self.classified.lock().insert(event.id.clone(), result);
        if matches!(result, Classification::ContentAddress | Classification::Profile) {
            self.reconcile_promotions(&event.author).await;
        }
        result
    }

    /// Render `event` into `feed` unless it is already shown there or in the
    /// currency feed. A general post moving to the currency feed is removed
    /// from the general feed first. Returns true if rendered.
    async fn place(&self, feed: FeedKind, event: &FeedEvent, placement: Placement) -> bool {
        let moving = {
            let placed = self.placed.lock();
            match placed.get(&event.id) {
                None => false,
                Some(FeedKind::General) if feed == FeedKind::Currency => true,
                Some(_) => return false,
            }
        };

        let profile = self.resolver.resolve(&event.author).await;

        {
            let mut placed = self.placed.lock();
            // recheck: another task may have placed it while we resolved
            match placed.get(&event.id) {
                None if !moving => {}
                Some(FeedKind::General) if moving => {}
                _ => return false,
            }
            let mut state = self.state(feed).lock();
            if !state.mark_rendered(&event.id) {
                return false;
            }
            if placement == Placement::Append {
                state.note_paged(event.created_at, unix_now());
            }
            placed.insert(event.id.clone(), feed);
        }

        if moving {
            self.renderer.remove(FeedKind::General, &event.id);
            counter!("feed_posts_moved_total").increment(1);
            tracing::debug!("Moved {} to the {} feed", event.id, feed);
        }
        self.renderer
            .render(feed, &RenderedPost::new(event.clone(), profile), placement);
        counter!("feed_posts_rendered_total", "feed" => feed.label()).increment(1);
        true
    }

    /// Move every general-placed post by `author` to the currency feed.
    pub async fn reconcile_promotions(&self, author: &str) -> usize {
        if !self.classifier.known().contains(author) {
            return 0;
        }
        let to_move: Vec<String> = self
            .placed
            .lock()
            .iter()
            .filter(|(_, feed)| **feed == FeedKind::General)
            .map(|(id, _)| id.clone())
            .collect();

        let mut moved = 0;
        for id in to_move {
            let Some(event) = self.store.get(&id) else {
                continue;
            };
            if event.author != author {
                continue;
            }
            self.classified
                .lock()
                .insert(id.clone(), Classification::KnownAuthor);
            if self.place(FeedKind::Currency, &event, Placement::Prepend).await {
                moved += 1;
            }
        }
        if moved > 0 {
            tracing::info!("Moved {} posts by {} to the currency feed", moved, author);
        }
        moved
    }

    /// Reconcile several newly confirmed authors.
    pub async fn reconcile_all(&self, authors: &[String]) -> usize {
        let mut moved = 0;
        for author in authors {
            moved += self.reconcile_promotions(author).await;
        }
        moved
    }

    /// Place up to `budget` unplaced top-level posts from the store into
    /// `feed`, newest first. Posts that belong to the other feed are
    /// classified and left for it.
    async fn fill(&self, feed: FeedKind, budget: usize) -> usize {
        let scan = budget.saturating_mul(SCAN_FACTOR);
        let candidates = {
            let placed = self.placed.lock();
            self.store.newest_first(
                |e| e.is_top_level_post() && !placed.contains_key(&e.id),
                scan,
            )
        };

        let mut rendered = 0;
        for event in candidates {
            if rendered >= budget {
                break;
            }
            let class = self.classify(&event).await;
            let target = if class.is_currency() {
                FeedKind::Currency
            } else {
                FeedKind::General
            };
            if target == feed && self.place(feed, &event, Placement::Append).await {
                rendered += 1;
            }
        }
        rendered
    }

    /// Ask relays for posts older than anything paged into `feed`.
    async fn fetch_older(&self, feed: FeedKind, want: usize) -> usize {
        let until = self.state(feed).lock().page_cursor().unwrap_or_else(unix_now);
        let limit = want.saturating_mul(SCAN_FACTOR);

        let filters = match feed {
            FeedKind::General => vec![
                FeedFilter::new()
                    .kind(EventKind::TextNote)
                    .until(until)
                    .limit(limit),
            ],
            FeedKind::Currency => {
                let mut filters = vec![
                    FeedFilter::new()
                        .kind(EventKind::TextNote)
                        .topic(self.settings.topic.clone())
                        .until(until)
                        .limit(limit),
                ];
                let known = self.classifier.known().snapshot();
                if !known.is_empty() {
                    filters.push(
                        FeedFilter::new()
                            .kind(EventKind::TextNote)
                            .authors(known)
                            .until(until)
                            .limit(limit),
                    );
                }
                filters
            }
        };

        let mut fetched = 0;
        for filter in filters {
            fetched += self.query_into_store(&filter).await;
        }
        fetched
    }

    /// Run a query and store the results. Failures degrade to nothing.
    async fn query_into_store(&self, filter: &FeedFilter) -> usize {
        match self.pool.query(filter).await {
            Ok(events) => self.store.put_all(events).len(),
            Err(e) => {
                tracing::warn!("Feed query failed: {}", e);
                0
            }
        }
    }

    // =========================================================================
    // Loads
    // =========================================================================

    /// Fetch the live window and the currency backfill, then render the first
    /// batch of each feed.
    pub async fn initial_load(&self) -> InitialLoad {
        let Some(_guard) = LoadGuard::acquire(&self.loading) else {
            tracing::debug!("Initial load skipped: a load is in flight");
            return InitialLoad::default();
        };

        let live = FeedFilter::new()
            .kind(EventKind::TextNote)
            .since(since_ago(self.settings.live_window))
            .limit(LIVE_QUERY_LIMIT);
        let topic = FeedFilter::new()
            .kind(EventKind::TextNote)
            .topic(self.settings.topic.clone())
            .since(since_ago(self.settings.backfill_window))
            .limit(BACKFILL_QUERY_LIMIT);

        let (live_count, topic_count) =
            tokio::join!(self.query_into_store(&live), self.query_into_store(&topic));
        let mut fetched = live_count + topic_count;

        let known = self.classifier.known().snapshot();
        if !known.is_empty() {
            let backfill = FeedFilter::new()
                .kind(EventKind::TextNote)
                .authors(known)
                .since(since_ago(self.settings.backfill_window))
                .limit(BACKFILL_QUERY_LIMIT);
            fetched += self.query_into_store(&backfill).await;
        }

        let now = Instant::now();
        let currency_batch = self.currency.lock().batch_size();
        let general_batch = self.general.lock().batch_size();
        // currency first so the general pass does not claim its posts
        let currency = self.fill(FeedKind::Currency, currency_batch).await;
        let general = self.fill(FeedKind::General, general_batch).await;
        self.currency.lock().record_load(now);
        self.general.lock().record_load(now);

        tracing::info!(
            "Initial load: {} events fetched, {} general and {} currency posts shown",
            fetched,
            general,
            currency
        );
        InitialLoad {
            fetched,
            general,
            currency,
        }
    }

    /// Render the next batch of `feed`.
    pub async fn load_more(&self, feed: FeedKind) -> LoadOutcome {
        let Some(_guard) = LoadGuard::acquire(&self.loading) else {
            counter!("feed_loads_skipped_total", "reason" => "in_flight").increment(1);
            return LoadOutcome::InFlight;
        };

        let now = Instant::now();
        let batch = {
            let mut state = self.state(feed).lock();
            if state.throttled(now, self.settings.throttle) {
                counter!("feed_loads_skipped_total", "reason" => "throttled").increment(1);
                return LoadOutcome::Throttled;
            }
            state.record_load(now);
            state.batch_size()
        };

        let mut rendered = self.fill(feed, batch).await;
        if rendered < batch && self.fetch_older(feed, batch - rendered).await > 0 {
            rendered += self.fill(feed, batch - rendered).await;
        }

        tracing::debug!("Loaded {} more posts into the {} feed", rendered, feed);
        LoadOutcome::Loaded(rendered)
    }

    /// Pull posts newer than anything stored and prepend them.
    pub async fn refresh(&self) -> LoadOutcome {
        let Some(_guard) = LoadGuard::acquire(&self.loading) else {
            counter!("feed_loads_skipped_total", "reason" => "in_flight").increment(1);
            return LoadOutcome::InFlight;
        };

        let now = Instant::now();
        let throttled = [FeedKind::General, FeedKind::Currency]
            .into_iter()
            .any(|feed| self.state(feed).lock().throttled(now, self.settings.throttle));
        if throttled {
            counter!("feed_loads_skipped_total", "reason" => "throttled").increment(1);
            return LoadOutcome::Throttled;
        }
        self.general.lock().record_load(now);
        self.currency.lock().record_load(now);

        let now_secs = unix_now();
        let floor = since_ago(self.settings.live_window);
        let since = self
            .store
            .newest(|e| e.is_top_level_post() && e.created_at <= now_secs)
            .map_or(floor, |newest| newest.max(floor));
        let filter = FeedFilter::new()
            .kind(EventKind::TextNote)
            .since(since)
            .limit(LIVE_QUERY_LIMIT);

        let fresh = match self.pool.query(&filter).await {
            Ok(events) => self.store.put_all(events),
            Err(e) => {
                tracing::warn!("Refresh failed: {}", e);
                return LoadOutcome::Loaded(0);
            }
        };

        let mut rendered = 0;
        let mut fresh: Vec<FeedEvent> = fresh.into_iter().filter(|e| e.is_top_level_post()).collect();
        // oldest first so the newest ends up on top
        fresh.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| b.id.cmp(&a.id)));
        for event in fresh {
            if self.route(&event, Placement::Prepend).await {
                rendered += 1;
            }
        }
        LoadOutcome::Loaded(rendered)
    }

    /// Classify and place one post in whichever feed it belongs to.
    async fn route(&self, event: &FeedEvent, placement: Placement) -> bool {
        let feed = if self.classify(event).await.is_currency() {
            FeedKind::Currency
        } else {
            FeedKind::General
        };
        self.place(feed, event, placement).await
    }

    // =========================================================================
    // Live subscription
    // =========================================================================

    /// Handle one event from the live subscription.
    pub async fn handle_live(&self, event: FeedEvent) {
        match event.kind {
            EventKind::Metadata => {
                if let Some(profile) = self.resolver.observe(&event)
                    && self.classifier.consider_profile(&profile)
                {
                    self.reconcile_promotions(&profile.author).await;
                }
            }
            EventKind::TextNote => {
                if !self.store.put(event.clone()) || !event.is_top_level_post() {
                    return;
                }
                self.route(&event, Placement::Prepend).await;
            }
            _ => {
                self.store.put(event);
            }
        }
    }

    /// Follow new posts and profile edits until [`stop`](Self::stop).
    ///
    /// Also refreshes every update interval, so posts from relays that drop
    /// the subscription still arrive.
    pub async fn run_live(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        let now = unix_now();
        let filters = vec![
            FeedFilter::new().kind(EventKind::TextNote).since(now),
            FeedFilter::new().kind(EventKind::Metadata).since(now),
        ];
        let mut rx = match self.pool.subscribe(filters).await {
            Ok(rx) => rx,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        tracing::info!(
            "Live feed started (refresh every {}s)",
            self.settings.update_interval.as_secs()
        );

        let mut last_refresh = Instant::now();
        while self.running.load(Ordering::SeqCst) {
            match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
                Ok(Some(delivered)) => self.handle_live(delivered.event).await,
                Ok(None) => {
                    tracing::warn!("All live subscriptions closed");
                    break;
                }
                Err(_) => {}
            }

            if last_refresh.elapsed() >= self.settings.update_interval {
                last_refresh = Instant::now();
                self.refresh().await;
            }
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!("Live feed stopped");
        Ok(())
    }

    // =========================================================================
    // Replies
    // =========================================================================

    /// Fetch and render the reply thread under `parent_id`.
    pub async fn expand_replies(&self, parent_id: &str) -> Vec<ReplyNode> {
        let tree = self.replies.load(parent_id).await;
        self.renderer.render_replies(parent_id, &tree);
        tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::KnownCurrencyUsers;
    use crate::relay::PoolTimeouts;
    use crate::testing::{ADDR, MockTransport, RecordingRenderer, event_with, metadata, note, reply};

    struct Harness {
        transport: Arc<MockTransport>,
        store: Arc<EventStore>,
        renderer: Arc<RecordingRenderer>,
        controller: Arc<FeedController>,
    }

    impl Harness {
        fn relay(&self) -> Arc<crate::testing::MockRelay> {
            self.transport.relay("wss://a.test")
        }
    }

    fn settings() -> FeedSettings {
        FeedSettings {
            general_batch: 2,
            currency_batch: 2,
            ..FeedSettings::default()
        }
    }

    async fn harness(settings: FeedSettings) -> Harness {
        let transport = Arc::new(MockTransport::default());
        let pool = Arc::new(RelayPool::new(transport.clone(), PoolTimeouts::default()));
        pool.connect(&["wss://a.test".to_string()]).await;
        let store = Arc::new(EventStore::new());
        let resolver = Arc::new(ProfileResolver::new(pool.clone(), store.clone()));
        let classifier = Arc::new(Classifier::new(
            Arc::new(KnownCurrencyUsers::new()),
            resolver.clone(),
            &settings.topic,
        ));
        let renderer = Arc::new(RecordingRenderer::default());
        let controller = Arc::new(FeedController::new(
            settings,
            pool,
            store.clone(),
            resolver,
            classifier,
            renderer.clone(),
        ));
        Harness {
            transport,
            store,
            renderer,
            controller,
        }
    }

    fn recent(offset: u64) -> u64 {
        unix_now() - offset
    }

    #[tokio::test(start_paused = true)]
    async fn initial_load_routes_each_post_once() {
        let h = harness(settings()).await;
        let relay = h.relay();
        relay.add_event(note("g1", "gen", recent(10), "hello"));
        relay.add_event(note("c1", "tipper", recent(20), &format!("Nano: {ADDR}")));
        let mut topical = event_with("t1", "topical", EventKind::TextNote, "gm", &[&["t", "nanocurrency"]]);
        topical.created_at = recent(30);
        relay.add_event(topical);
        relay.add_event(reply("r1", "gen", recent(5), "g1"));

        let report = h.controller.initial_load().await;
        assert_eq!(report.currency, 2);
        assert_eq!(report.general, 1);

        let general = h.renderer.ids(FeedKind::General);
        let currency = h.renderer.ids(FeedKind::Currency);
        assert_eq!(general, vec!["g1"]);
        assert!(currency.contains(&"c1".to_string()));
        assert!(currency.contains(&"t1".to_string()));
        assert!(!general.contains(&"r1".to_string()));
        assert!(!currency.contains(&"r1".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn load_more_pages_newest_first_without_repeats() {
        let h = harness(settings()).await;
        for i in 0..5 {
            h.store.put(note(&format!("p{i}"), "gen", 100 + i, "post"));
        }

        assert_eq!(h.controller.load_more(FeedKind::General).await, LoadOutcome::Loaded(2));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(h.controller.load_more(FeedKind::General).await, LoadOutcome::Loaded(2));
        tokio::time::advance(Duration::from_secs(2)).await;
        h.controller.load_more(FeedKind::General).await;

        let ids = h.renderer.ids(FeedKind::General);
        assert_eq!(ids, vec!["p4", "p3", "p2", "p1", "p0"]);
    }

    #[tokio::test(start_paused = true)]
    async fn second_load_within_throttle_is_a_noop() {
        let h = harness(settings()).await;
        for i in 0..6 {
            h.store.put(note(&format!("p{i}"), "gen", 100 + i, "post"));
        }
        h.controller.load_more(FeedKind::General).await;
        let rendered = h.renderer.rendered.lock().len();
        let fetches = h.transport.total_fetches();

        assert_eq!(h.controller.load_more(FeedKind::General).await, LoadOutcome::Throttled);
        assert_eq!(h.renderer.rendered.lock().len(), rendered);
        assert_eq!(h.transport.total_fetches(), fetches);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_right_after_load_more_is_throttled() {
        let h = harness(settings()).await;
        h.store.put(note("p0", "gen", recent(60), "post"));
        h.controller.load_more(FeedKind::General).await;
        let fetches = h.transport.total_fetches();

        assert_eq!(h.controller.refresh().await, LoadOutcome::Throttled);
        assert_eq!(h.transport.total_fetches(), fetches);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(h.controller.refresh().await, LoadOutcome::Loaded(0));
        assert_eq!(h.transport.total_fetches(), fetches + 1);

        // and the refresh throttles the next page
        assert_eq!(h.controller.load_more(FeedKind::General).await, LoadOutcome::Throttled);
    }

    #[tokio::test(start_paused = true)]
    async fn future_dated_post_does_not_stall_refresh() {
        let h = harness(settings()).await;
        let ten_years = 10 * 365 * 24 * 60 * 60;
        h.store.put(note("future", "gen", unix_now() + ten_years, "from the future"));
        h.relay().add_event(note("fresh", "gen", recent(5), "now"));

        assert_eq!(h.controller.refresh().await, LoadOutcome::Loaded(1));
        assert!(h.store.contains("fresh"));
        assert_eq!(h.renderer.ids(FeedKind::General), vec!["fresh"]);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_dated_post_does_not_stall_pagination() {
        let h = harness(settings()).await;
        h.controller.handle_live(note("epoch", "gen", 0, "very old")).await;
        h.store.put(note("new", "gen", 1000, "post"));
        h.relay().add_event(note("older", "gen", 900, "post"));

        assert_eq!(h.controller.load_more(FeedKind::General).await, LoadOutcome::Loaded(2));
        assert_eq!(h.renderer.ids(FeedKind::General), vec!["epoch", "new", "older"]);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_load_is_dropped() {
        let h = harness(settings()).await;
        h.relay().set_delay(Duration::from_secs(1));
        h.relay().add_event(note("old", "gen", 50, "post"));

        let first = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.load_more(FeedKind::General).await })
        };
        while !h.controller.is_loading() {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.controller.load_more(FeedKind::Currency).await, LoadOutcome::InFlight);

        assert_eq!(first.await.unwrap(), LoadOutcome::Loaded(1));
        assert!(!h.controller.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn load_more_fetches_older_posts() {
        let h = harness(settings()).await;
        h.store.put(note("new", "gen", 1000, "post"));
        h.relay().add_event(note("older", "gen", 900, "post"));

        assert_eq!(h.controller.load_more(FeedKind::General).await, LoadOutcome::Loaded(2));
        assert_eq!(h.renderer.ids(FeedKind::General), vec!["new", "older"]);
    }

    #[tokio::test(start_paused = true)]
    async fn promotion_moves_post_up_never_down() {
        let h = harness(settings()).await;
        h.store.put(note("p1", "dave", 100, "just a post"));
        h.controller.load_more(FeedKind::General).await;
        assert_eq!(h.controller.placement("p1"), Some(FeedKind::General));

        let bio = format!(r#"{{"about":"Nano: {ADDR}"}}"#);
        h.controller.handle_live(metadata("m", "dave", 200, &bio)).await;

        assert_eq!(h.controller.placement("p1"), Some(FeedKind::Currency));
        assert_eq!(
            h.renderer.removed.lock().clone(),
            vec![(FeedKind::General, "p1".to_string())]
        );
        assert_eq!(h.renderer.ids(FeedKind::Currency), vec!["p1"]);

        // general never shows it again
        tokio::time::advance(Duration::from_secs(2)).await;
        h.controller.load_more(FeedKind::General).await;
        assert_eq!(h.renderer.ids(FeedKind::General), vec!["p1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn live_posts_are_deduplicated_and_prepended() {
        let h = harness(settings()).await;
        let post = note("live", "gen", unix_now(), "hi");
        h.controller.handle_live(post.clone()).await;
        h.controller.handle_live(post).await;
        h.controller.handle_live(reply("re", "gen", unix_now(), "live")).await;

        let rendered = h.renderer.rendered.lock().clone();
        assert_eq!(rendered, vec![(FeedKind::General, "live".to_string(), Placement::Prepend)]);
        assert_eq!(h.store.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_live_follows_relay_until_stopped() {
        let h = harness(settings()).await;
        let task = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.run_live().await })
        };
        while !h.controller.is_running() {
            tokio::task::yield_now().await;
        }
        // let the subscription register
        tokio::time::sleep(Duration::from_millis(10)).await;

        h.relay().push_live(note("fresh", "gen", unix_now() + 1, "new"));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.renderer.ids(FeedKind::General), vec!["fresh"]);

        h.controller.stop();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(task.await.unwrap().is_ok());
        assert!(!h.controller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn offline_load_degrades_to_local_results() {
        let h = harness(settings()).await;
        h.store.put(note("local", "gen", 10, "post"));
        h.relay().kill();

        assert_eq!(h.controller.load_more(FeedKind::General).await, LoadOutcome::Loaded(1));
        assert_eq!(h.controller.initial_load().await.fetched, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expand_replies_renders_thread() {
        let h = harness(settings()).await;
        h.relay().add_event(reply("r1", "b", 2, "root"));
        h.relay().add_event(reply("r2", "c", 3, "r1"));

        let tree = h.controller.expand_replies("root").await;
        assert_eq!(tree.len(), 1);
        assert_eq!(h.renderer.replies.lock().clone(), vec![("root".to_string(), 1)]);
    }
}
