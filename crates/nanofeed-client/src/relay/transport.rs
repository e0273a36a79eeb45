//! The transport boundary: how the pool talks to one relay.
//!
//! Each relay connection is a [`RelayHandle`]; every query or subscription
//! produces a [`RelayStream`] of [`StreamItem`]s that the pool merges. The
//! pool, not the handle, owns deadlines and deduplication.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nanofeed_core::{FeedEvent, FeedFilter};
use nostr_sdk::Event;
use tokio::sync::mpsc;

use crate::error::Result;

/// One item delivered by a relay stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    /// A (verified) event.
    Event(FeedEvent),
    /// The relay has sent everything it had stored for this request.
    EndOfStoredEvents,
    /// The relay closed the request.
    Closed(String),
}

/// Per-relay stream of events for one request.
pub type RelayStream = mpsc::Receiver<StreamItem>;

/// Opens relay connections.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Connect to `url`, failing if the relay is not reachable within `timeout`.
    async fn connect(&self, url: &str, timeout: Duration) -> Result<Arc<dyn RelayHandle>>;
}

/// A live connection to one relay.
#[async_trait]
pub trait RelayHandle: Send + Sync {
    /// The normalized relay URL.
    fn url(&self) -> &str;

    /// Whether the connection is still usable.
    fn is_alive(&self) -> bool;

    /// One-shot query: stored events, then [`StreamItem::EndOfStoredEvents`].
    ///
    /// `timeout` is a hint for the relay side; the pool enforces its own deadline.
    async fn fetch(&self, filter: &FeedFilter, timeout: Duration) -> Result<RelayStream>;

    /// Long-lived subscription. Stored events, EOSE, then live events until
    /// the receiver is dropped.
    async fn subscribe(&self, filters: &[FeedFilter]) -> Result<RelayStream>;

    /// Publish a signed event. `Ok` means the relay acknowledged it.
    async fn publish(&self, event: &Event) -> Result<()>;

    /// Close the connection.
    async fn close(&self);
}
