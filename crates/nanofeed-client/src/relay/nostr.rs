//! nostr-sdk implementation of the transport boundary.
//!
//! Each relay gets its own nostr-sdk [`Client`], so a relay can be queried,
//! subscribed, and closed independently of the others. nostr-sdk verifies
//! event ids and signatures before events reach us.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use nanofeed_core::{EventKind, FeedEvent, FeedFilter};
use nostr_sdk::prelude::*;
use tokio::sync::mpsc;

use super::transport::{RelayHandle, RelayStream, RelayTransport, StreamItem};
use crate::error::{Error, Result};

/// Capacity of a per-relay subscription stream.
const STREAM_CHANNEL_SIZE: usize = 512;

/// How often connection status is polled while connecting.
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Convert a verified nostr event into the engine's event record.
pub fn to_feed_event(event: &Event) -> FeedEvent {
    FeedEvent {
        id: event.id.to_hex(),
        author: event.pubkey.to_hex(),
        created_at: event.created_at.as_u64(),
        kind: EventKind::from(event.kind.as_u16()),
        content: event.content.clone(),
        tags: event.tags.iter().map(|tag| tag.as_slice().to_vec()).collect(),
    }
}

/// Convert an engine filter into a nostr-sdk filter.
///
/// Ids and keys that are not valid hex are dropped. Returns `None` when a
/// constraint list was given but none of its entries survive, since such a
/// filter can match nothing.
pub fn to_nostr_filter(filter: &FeedFilter) -> Option<Filter> {
    let mut out = Filter::new();
    if !filter.kinds.is_empty() {
        out = out.kinds(filter.kinds.iter().map(|k| Kind::from(*k)));
    }
    let authors: Vec<PublicKey> = filter
        .authors
        .iter()
        .filter_map(|a| PublicKey::from_hex(a).ok())
        .collect();
    if authors.is_empty() != filter.authors.is_empty() {
        return None;
    }
    if !authors.is_empty() {
        out = out.authors(authors);
    }
    let events: Vec<EventId> = filter
        .events
        .iter()
        .filter_map(|id| EventId::from_hex(id).ok())
        .collect();
    if events.is_empty() != filter.events.is_empty() {
        return None;
    }
    if !events.is_empty() {
        out = out.events(events);
    }
    let pubkeys: Vec<PublicKey> = filter
        .pubkeys
        .iter()
        .filter_map(|p| PublicKey::from_hex(p).ok())
        .collect();
    if pubkeys.is_empty() != filter.pubkeys.is_empty() {
        return None;
    }
    if !pubkeys.is_empty() {
        out = out.pubkeys(pubkeys);
    }
    if !filter.topics.is_empty() {
        out = out.hashtags(filter.topics.iter().cloned());
    }
    if let Some(since) = filter.since {
        out = out.since(Timestamp::from(since));
    }
    if let Some(until) = filter.until {
        out = out.until(Timestamp::from(until));
    }
    if let Some(limit) = filter.limit {
        out = out.limit(limit);
    }
    Some(out)
}

/// Opens one nostr-sdk client per relay.
#[derive(Debug, Default, Clone)]
pub struct NostrSdkTransport;

impl NostrSdkTransport {
    /// Create the transport.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RelayTransport for NostrSdkTransport {
    async fn connect(&self, url: &str, timeout: Duration) -> Result<Arc<dyn RelayHandle>> {
        let relay_url = RelayUrl::parse(url).map_err(|e| Error::transport(url, e))?;
        let client = Client::builder().build();

        client
            .add_relay(relay_url.clone())
            .await
            .map_err(|e| Error::transport(url, e))?;
        client
            .connect_relay(relay_url.clone())
            .await
            .map_err(|e| Error::transport(url, e))?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let relay = client
                .relay(relay_url.clone())
                .await
                .map_err(|e| Error::transport(url, e))?;
            if relay.status() == RelayStatus::Connected {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                client.disconnect().await;
                return Err(Error::transport(url, "connect timed out"));
            }
            tokio::time::sleep(CONNECT_POLL_INTERVAL).await;
        }

        tracing::debug!("nostr-sdk client connected to {}", url);
        Ok(Arc::new(NostrSdkRelay {
            url: url.to_string(),
            client,
            alive: Arc::new(AtomicBool::new(true)),
        }))
    }
}

/// A single-relay nostr-sdk client.
pub struct NostrSdkRelay {
    url: String,
    client: Client,
    alive: Arc<AtomicBool>,
}

impl NostrSdkRelay {
    fn fail(&self, reason: impl ToString) -> Error {
        Error::transport(&self.url, reason)
    }

    async fn check_status(&self) {
        let connected = match self.client.relay(self.url.as_str()).await {
            Ok(relay) => relay.status() == RelayStatus::Connected,
            Err(_) => false,
        };
        if !connected {
            self.alive.store(false, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl RelayHandle for NostrSdkRelay {
    fn url(&self) -> &str {
        &self.url
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn fetch(&self, filter: &FeedFilter, timeout: Duration) -> Result<RelayStream> {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_SIZE);
        let Some(filter) = to_nostr_filter(filter) else {
            let _ = tx.send(StreamItem::EndOfStoredEvents).await;
            return Ok(rx);
        };
        let client = self.client.clone();
        let url = self.url.clone();
        let alive = self.alive.clone();

        tokio::spawn(async move {
            match client.fetch_events(filter, timeout).await {
                Ok(events) => {
                    for event in events.into_iter() {
                        if tx.send(StreamItem::Event(to_feed_event(&event))).await.is_err() {
                            return;
                        }
                    }
                    let _ = tx.send(StreamItem::EndOfStoredEvents).await;
                }
                Err(e) => {
                    tracing::debug!("fetch_events failed on {}: {}", url, e);
                    if let Ok(relay) = client.relay(url.as_str()).await
                        && relay.status() != RelayStatus::Connected
                    {
                        alive.store(false, Ordering::SeqCst);
                    }
                    let _ = tx.send(StreamItem::Closed(e.to_string())).await;
                }
            }
        });

        Ok(rx)
    }

    async fn subscribe(&self, filters: &[FeedFilter]) -> Result<RelayStream> {
        // Take the receiver before subscribing so nothing is missed.
        let mut notifications = self.client.notifications();

        let mut ids = HashSet::new();
        for filter in filters.iter().filter_map(to_nostr_filter) {
            let output = match self.client.subscribe(filter, None).await {
                Ok(output) => output,
                Err(e) => {
                    self.check_status().await;
                    return Err(self.fail(e));
                }
            };
            ids.insert(output.val.to_string());
        }

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_SIZE);
        if ids.is_empty() {
            let _ = tx.send(StreamItem::EndOfStoredEvents).await;
            return Ok(rx);
        }
        let client = self.client.clone();
        let url = self.url.clone();
        let alive = self.alive.clone();

        tokio::spawn(async move {
            loop {
                let notification = match notifications.recv().await {
                    Ok(n) => n,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(count)) => {
                        metrics::counter!("relay_notifications_lagged_total").increment(count);
                        tracing::warn!("Subscription on {} lagged, dropped {}", url, count);
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        let _ = tx.send(StreamItem::Closed("client closed".into())).await;
                        break;
                    }
                };

                let item = match notification {
                    RelayPoolNotification::Event {
                        subscription_id,
                        event,
                        ..
                    } if ids.contains(&subscription_id.to_string()) => {
                        StreamItem::Event(to_feed_event(&event))
                    }
                    RelayPoolNotification::Message { message, .. } => match message {
                        RelayMessage::EndOfStoredEvents(subscription_id)
                            if ids.contains(&subscription_id.to_string()) =>
                        {
                            StreamItem::EndOfStoredEvents
                        }
                        RelayMessage::Closed {
                            subscription_id,
                            message,
                        } if ids.contains(&subscription_id.to_string()) => {
                            StreamItem::Closed(message.to_string())
                        }
                        _ => continue,
                    },
                    RelayPoolNotification::Shutdown => {
                        alive.store(false, Ordering::SeqCst);
                        StreamItem::Closed("relay shut down".into())
                    }
                    _ => continue,
                };

                let closing = matches!(item, StreamItem::Closed(_));
                if tx.send(item).await.is_err() || closing {
                    break;
                }
            }

            for id in ids {
                client.unsubscribe(&SubscriptionId::new(id)).await;
            }
        });

        Ok(rx)
    }

    async fn publish(&self, event: &Event) -> Result<()> {
        let output = match self.client.send_event(event).await {
            Ok(output) => output,
            Err(e) => {
                self.check_status().await;
                return Err(self.fail(e));
            }
        };
        if output.success.is_empty() {
            let reason = output
                .failed
                .values()
                .next()
                .cloned()
                .unwrap_or_else(|| "not acknowledged".to_string());
            return Err(self.fail(reason));
        }
        Ok(())
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.client.disconnect().await;
    }
}
