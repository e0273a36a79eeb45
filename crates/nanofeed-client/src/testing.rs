//! In-memory relays and fixtures for tests.
//!
//! A [`MockRelay`] holds stored events and can be scripted to answer late,
//! stall past any deadline, reject publishes, refuse connections, or die.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use nanofeed_core::{EventKind, FeedEvent, FeedFilter};
use nostr_sdk::prelude::{Event, EventBuilder, Keys, Kind};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::feed::FeedKind;
use crate::relay::nostr::to_feed_event;
use crate::relay::transport::{RelayHandle, RelayStream, RelayTransport, StreamItem};
use crate::render::{FeedRenderer, Placement, RenderedPost, ReplyNode};

/// A scripted relay.
pub struct MockRelay {
    url: String,
    stored: Mutex<Vec<FeedEvent>>,
    published: Mutex<Vec<Event>>,
    subscribers: Mutex<Vec<(Vec<FeedFilter>, mpsc::Sender<StreamItem>)>>,
    reachable: AtomicBool,
    alive: AtomicBool,
    stall: AtomicBool,
    reject_publish: AtomicBool,
    delay: Mutex<Duration>,
    fetches: AtomicUsize,
}

impl MockRelay {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            stored: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            reachable: AtomicBool::new(true),
            alive: AtomicBool::new(false),
            stall: AtomicBool::new(false),
            reject_publish: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Store an event this relay will return from queries.
    pub fn add_event(&self, event: FeedEvent) {
        self.stored.lock().push(event);
    }

    /// Store an event and push it to matching live subscriptions.
    pub fn push_live(&self, event: FeedEvent) {
        self.add_event(event.clone());
        for (filters, tx) in self.subscribers.lock().iter() {
            if filters.iter().any(|f| f.matches(&event)) {
                let _ = tx.try_send(StreamItem::Event(event.clone()));
            }
        }
    }

    /// Refuse connections.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Never finish queries (no EOSE), never answer subscription requests,
    /// and never answer publishes.
    pub fn set_stall(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }

    /// Reject every publish.
    pub fn set_reject_publish(&self, reject: bool) {
        self.reject_publish.store(reject, Ordering::SeqCst);
    }

    /// Answer queries after `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Mark the connection dead.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Number of queries received.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Events published to this relay.
    pub fn published(&self) -> Vec<Event> {
        self.published.lock().clone()
    }

    fn matching(&self, filter: &FeedFilter) -> Vec<FeedEvent> {
        let mut events: Vec<FeedEvent> = self
            .stored
            .lock()
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            events.truncate(limit);
        }
        events
    }
}

#[async_trait]
impl RelayHandle for MockRelay {
    fn url(&self) -> &str {
        &self.url
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn fetch(&self, filter: &FeedFilter, _timeout: Duration) -> Result<RelayStream> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.is_alive() {
            return Err(Error::transport(&self.url, "connection closed"));
        }

        let events = self.matching(filter);
        let delay = *self.delay.lock();
        let stall = self.stall.load(Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(events.len() + 1);

        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            for event in events {
                if tx.send(StreamItem::Event(event)).await.is_err() {
                    return;
                }
            }
            if stall {
                tx.closed().await;
                return;
            }
            let _ = tx.send(StreamItem::EndOfStoredEvents).await;
        });

        Ok(rx)
    }

    async fn subscribe(&self, filters: &[FeedFilter]) -> Result<RelayStream> {
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let (tx, rx) = mpsc::channel(256);
        for filter in filters {
            for event in self.matching(filter) {
                let _ = tx.try_send(StreamItem::Event(event));
            }
        }
        let _ = tx.try_send(StreamItem::EndOfStoredEvents);
        self.subscribers.lock().push((filters.to_vec(), tx));
        Ok(rx)
    }

    async fn publish(&self, event: &Event) -> Result<()> {
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.reject_publish.load(Ordering::SeqCst) {
            return Err(Error::transport(&self.url, "blocked: not allowed"));
        }
        self.published.lock().push(event.clone());
        self.push_live(to_feed_event(event));
        Ok(())
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.subscribers.lock().clear();
    }
}

/// Transport whose relays are [`MockRelay`]s, created on first mention.
#[derive(Default)]
pub struct MockTransport {
    relays: Mutex<HashMap<String, Arc<MockRelay>>>,
}

impl MockTransport {
    /// The relay at `url`, created reachable if unknown.
    pub fn relay(&self, url: &str) -> Arc<MockRelay> {
        self.relays
            .lock()
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(MockRelay::new(url)))
            .clone()
    }

    /// Total queries across all relays.
    pub fn total_fetches(&self) -> usize {
        self.relays.lock().values().map(|r| r.fetch_count()).sum()
    }
}

#[async_trait]
impl RelayTransport for MockTransport {
    async fn connect(&self, url: &str, _timeout: Duration) -> Result<Arc<dyn RelayHandle>> {
        let relay = self.relay(url);
        if !relay.reachable.load(Ordering::SeqCst) {
            return Err(Error::transport(url, "connection refused"));
        }
        relay.alive.store(true, Ordering::SeqCst);
        Ok(relay)
    }
}

/// Renderer that records every call.
#[derive(Default)]
pub struct RecordingRenderer {
    /// `(feed, event id, placement)` per render call.
    pub rendered: Mutex<Vec<(FeedKind, String, Placement)>>,
    /// `(feed, event id)` per remove call.
    pub removed: Mutex<Vec<(FeedKind, String)>>,
    /// `(parent id, reply count)` per reply render.
    pub replies: Mutex<Vec<(String, usize)>>,
}

impl RecordingRenderer {
    /// Ids rendered into `feed`, in call order.
    pub fn ids(&self, feed: FeedKind) -> Vec<String> {
        self.rendered
            .lock()
            .iter()
            .filter(|(f, _, _)| *f == feed)
            .map(|(_, id, _)| id.clone())
            .collect()
    }
}

impl FeedRenderer for RecordingRenderer {
    fn render(&self, feed: FeedKind, post: &RenderedPost, placement: Placement) {
        self.rendered
            .lock()
            .push((feed, post.event.id.clone(), placement));
    }

    fn remove(&self, feed: FeedKind, event_id: &str) {
        self.removed.lock().push((feed, event_id.to_string()));
    }

    fn render_replies(&self, parent_id: &str, replies: &[ReplyNode]) {
        self.replies.lock().push((parent_id.to_string(), replies.len()));
    }
}

/// A kind 1 event.
pub fn note(id: &str, author: &str, created_at: u64, content: &str) -> FeedEvent {
    FeedEvent {
        id: id.to_string(),
        author: author.to_string(),
        created_at,
        kind: EventKind::TextNote,
        content: content.to_string(),
        tags: Vec::new(),
    }
}

/// A kind 1 event replying to `parent`.
pub fn reply(id: &str, author: &str, created_at: u64, parent: &str) -> FeedEvent {
    let mut event = note(id, author, created_at, "reply");
    event.tags.push(vec!["e".to_string(), parent.to_string()]);
    event
}

/// A kind 0 event with `json` content.
pub fn metadata(id: &str, author: &str, created_at: u64, json: &str) -> FeedEvent {
    FeedEvent {
        kind: EventKind::Metadata,
        ..note(id, author, created_at, json)
    }
}

/// Any event with explicit kind and tags.
pub fn event_with(id: &str, author: &str, kind: EventKind, content: &str, tags: &[&[&str]]) -> FeedEvent {
    FeedEvent {
        kind,
        tags: tags
            .iter()
            .map(|t| t.iter().map(|s| s.to_string()).collect())
            .collect(),
        ..note(id, author, 1, content)
    }
}

/// A really signed kind 1 event from a throwaway key.
pub fn signed_note(content: &str) -> Event {
    EventBuilder::new(Kind::TextNote, content)
        .sign_with_keys(&Keys::generate())
        .expect("signing with fresh keys")
}

/// A valid currency address for fixtures.
pub const ADDR: &str = "nano_1111111111111111111111111111111111111111111111111111hifc8npp";
