//! Fan-out over the set of live relay connections.
//!
//! Every call carries a per-relay deadline. A slow relay is cut off
//! individually and whatever it delivered before its deadline is final for
//! that call; it never delays results from the others. Relays that error and
//! report themselves dead are dropped from the live set.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::future::join_all;
use futures::stream::FuturesUnordered;
use metrics::{counter, gauge, histogram};
use nanofeed_core::{FeedEvent, FeedFilter};
use nostr_sdk::Event;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use super::transport::{RelayHandle, RelayTransport, StreamItem};
use crate::error::{Error, Result};

/// Capacity of the merged subscription channel.
const SUBSCRIPTION_CHANNEL_SIZE: usize = 1024;

/// Per-call deadlines.
#[derive(Debug, Clone, Copy)]
pub struct PoolTimeouts {
    /// Query deadline per relay.
    pub query: Duration,
    /// Publish deadline per relay.
    pub publish: Duration,
    /// Connect deadline per relay.
    pub connect: Duration,
}

impl Default for PoolTimeouts {
    fn default() -> Self {
        Self {
            query: Duration::from_secs(3),
            publish: Duration::from_secs(5),
            connect: Duration::from_secs(5),
        }
    }
}

/// An event tagged with the relay that delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEvent {
    /// Source relay URL.
    pub relay: String,
    /// The event.
    pub event: FeedEvent,
}

/// Outcome of a fan-out publish that at least one relay accepted.
#[derive(Debug, Clone, Default)]
pub struct PublishReport {
    /// Relays that acknowledged.
    pub accepted: Vec<String>,
    /// Relays that rejected or timed out, with the reason.
    pub rejected: Vec<(String, String)>,
}

/// Events one relay produced for one query.
struct Collected {
    events: Vec<FeedEvent>,
    timed_out: bool,
}

/// Owns the live relay connections. The only component that opens or closes them.
pub struct RelayPool {
    transport: Arc<dyn RelayTransport>,
    relays: RwLock<Vec<Arc<dyn RelayHandle>>>,
    timeouts: PoolTimeouts,
}

impl RelayPool {
    /// Create an empty pool.
    pub fn new(transport: Arc<dyn RelayTransport>, timeouts: PoolTimeouts) -> Self {
        Self {
            transport,
            relays: RwLock::new(Vec::new()),
            timeouts,
        }
    }

    /// Configured deadlines.
    pub fn timeouts(&self) -> PoolTimeouts {
        self.timeouts
    }

    /// URLs of the live relays, in connection order.
    pub fn urls(&self) -> Vec<String> {
        self.relays.read().iter().map(|r| r.url().to_string()).collect()
    }

    /// Number of relays in the live set.
    pub fn len(&self) -> usize {
        self.relays.read().len()
    }

    /// Whether the live set is empty.
    pub fn is_empty(&self) -> bool {
        self.relays.read().is_empty()
    }

    /// Whether `url` is in the live set.
    pub fn contains(&self, url: &str) -> bool {
        self.relays.read().iter().any(|r| r.url() == url)
    }

    async fn open(&self, url: &str) -> Result<Arc<dyn RelayHandle>> {
        let connect = self.timeouts.connect;
        match tokio::time::timeout(connect, self.transport.connect(url, connect)).await {
            Ok(result) => result,
            Err(_) => Err(Error::transport(url, "connect timed out")),
        }
    }

    fn insert(&self, handle: Arc<dyn RelayHandle>) {
        let mut relays = self.relays.write();
        if !relays.iter().any(|r| r.url() == handle.url()) {
            relays.push(handle);
        }
        gauge!("relay_connections").set(relays.len() as f64);
    }

    /// Connect to every URL in parallel. Failures are logged and skipped.
    ///
    /// Returns the size of the live set afterwards.
    pub async fn connect(&self, urls: &[String]) -> usize {
        let attempts = urls
            .iter()
            .filter(|url| !self.contains(url))
            .map(|url| async move { (url, self.open(url).await) });

        for (url, result) in join_all(attempts).await {
            match result {
                Ok(handle) => {
                    tracing::debug!("Connected to {}", url);
                    counter!("relay_connect_total").increment(1);
                    self.insert(handle);
                }
                Err(e) => {
                    tracing::warn!("Failed to connect to {}: {}", url, e);
                    counter!("relay_connect_failures_total").increment(1);
                }
            }
        }

        let live = self.len();
        tracing::info!("Connected to {} of {} relays", live, urls.len());
        live
    }

    /// Connect to a single relay, propagating the failure.
    pub async fn connect_one(&self, url: &str) -> Result<()> {
        match self.open(url).await {
            Ok(handle) => {
                counter!("relay_connect_total").increment(1);
                self.insert(handle);
                Ok(())
            }
            Err(e) => {
                counter!("relay_connect_failures_total").increment(1);
                Err(e)
            }
        }
    }

    /// Close and remove a relay. Returns false if it was not connected.
    pub async fn disconnect(&self, url: &str) -> bool {
        let removed = {
            let mut relays = self.relays.write();
            let pos = relays.iter().position(|r| r.url() == url);
            let removed = pos.map(|i| relays.remove(i));
            gauge!("relay_connections").set(relays.len() as f64);
            removed
        };
        match removed {
            Some(handle) => {
                handle.close().await;
                tracing::info!("Disconnected from {}", url);
                true
            }
            None => false,
        }
    }

    fn drop_relay(&self, url: &str, reason: &str) {
        let mut relays = self.relays.write();
        let before = relays.len();
        relays.retain(|r| r.url() != url);
        if relays.len() < before {
            tracing::warn!("Dropping relay {}: {}", url, reason);
            counter!("relay_dropped_total").increment(1);
            gauge!("relay_connections").set(relays.len() as f64);
        }
    }

    /// Snapshot of the live set, pruning relays that report themselves dead.
    fn live(&self) -> Result<Vec<Arc<dyn RelayHandle>>> {
        let dead: Vec<String> = self
            .relays
            .read()
            .iter()
            .filter(|r| !r.is_alive())
            .map(|r| r.url().to_string())
            .collect();
        for url in &dead {
            self.drop_relay(url, "connection lost");
        }

        let relays = self.relays.read().clone();
        if relays.is_empty() {
            return Err(Error::NoRelaysAvailable);
        }
        Ok(relays)
    }

    /// Query every live relay with the default deadline.
    pub async fn query(&self, filter: &FeedFilter) -> Result<Vec<FeedEvent>> {
        self.query_with_timeout(filter, self.timeouts.query).await
    }

    /// Query every live relay, merging results by id.
    ///
    /// The first copy of an id to arrive is kept. Relays that fail or miss
    /// their deadline contribute what they had; only an empty live set is an
    /// error.
    pub async fn query_with_timeout(
        &self,
        filter: &FeedFilter,
        timeout: Duration,
    ) -> Result<Vec<FeedEvent>> {
        let relays = self.live()?;
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;

        let mut pending: FuturesUnordered<_> = relays
            .into_iter()
            .map(|relay| async move {
                let outcome = collect(relay.as_ref(), filter, timeout, deadline).await;
                (relay, outcome)
            })
            .collect();

        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        while let Some((relay, outcome)) = pending.next().await {
            match outcome {
                Ok(collected) => {
                    if collected.timed_out {
                        counter!("relay_query_timeouts_total").increment(1);
                        tracing::debug!(
                            "Relay {} hit its deadline with {} events",
                            relay.url(),
                            collected.events.len()
                        );
                    }
                    counter!("relay_events_received_total")
                        .increment(collected.events.len() as u64);
                    for event in collected.events {
                        if seen.insert(event.id.clone()) {
                            merged.push(event);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Query failed on {}: {}", relay.url(), e);
                    if !relay.is_alive() {
                        self.drop_relay(relay.url(), "query failed");
                    }
                }
            }
        }

        histogram!("relay_query_duration_seconds").record(started.elapsed().as_secs_f64());
        Ok(merged)
    }

    /// Number of distinct events matching `filter` across all live relays.
    pub async fn count(&self, filter: &FeedFilter) -> Result<usize> {
        Ok(self.query(filter).await?.len())
    }

    /// Open a long-lived subscription on every live relay.
    ///
    /// Relays are asked in parallel, each under the query deadline; one that
    /// does not answer in time is skipped for this subscription. The returned
    /// channel yields each matching event once per relay that delivers it;
    /// callers deduplicate.
    pub async fn subscribe(&self, filters: Vec<FeedFilter>) -> Result<mpsc::Receiver<RelayEvent>> {
        let relays = self.live()?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CHANNEL_SIZE);
        let deadline = self.timeouts.query;
        let filters = &filters;

        let attempts = relays.into_iter().map(|relay| async move {
            let outcome = tokio::time::timeout(deadline, relay.subscribe(filters)).await;
            (relay, outcome)
        });

        for (relay, outcome) in join_all(attempts).await {
            let mut stream = match outcome {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    tracing::warn!("Subscribe failed on {}: {}", relay.url(), e);
                    if !relay.is_alive() {
                        self.drop_relay(relay.url(), "subscribe failed");
                    }
                    continue;
                }
                Err(_) => {
                    counter!("relay_subscribe_timeouts_total").increment(1);
                    tracing::warn!("Subscribe timed out on {}, skipping", relay.url());
                    continue;
                }
            };

            let tx = tx.clone();
            let url = relay.url().to_string();
            tokio::spawn(async move {
                while let Some(item) = stream.recv().await {
                    match item {
                        StreamItem::Event(event) => {
                            counter!("relay_events_received_total").increment(1);
                            let delivered = RelayEvent {
                                relay: url.clone(),
                                event,
                            };
                            if tx.send(delivered).await.is_err() {
                                break;
                            }
                        }
                        StreamItem::EndOfStoredEvents => {
                            tracing::debug!("Subscription caught up on {}", url);
                        }
                        StreamItem::Closed(reason) => {
                            tracing::warn!("Relay {} closed subscription: {}", url, reason);
                            break;
                        }
                    }
                }
            });
        }

        Ok(rx)
    }

    /// Publish to every live relay.
    ///
    /// Succeeds if any relay acknowledges; fails only if all reject or time out.
    pub async fn publish(&self, event: &Event) -> Result<PublishReport> {
        let relays = self.live()?;
        let deadline = self.timeouts.publish;

        let attempts = relays.iter().map(|relay| async move {
            let outcome = match tokio::time::timeout(deadline, relay.publish(event)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err("publish timed out".to_string()),
            };
            (relay.url().to_string(), outcome)
        });

        let mut report = PublishReport::default();
        for (url, outcome) in join_all(attempts).await {
            match outcome {
                Ok(()) => report.accepted.push(url),
                Err(reason) => {
                    tracing::debug!("Publish rejected by {}: {}", url, reason);
                    report.rejected.push((url, reason));
                }
            }
        }

        if report.accepted.is_empty() {
            counter!("relay_publish_total", "outcome" => "failed").increment(1);
            let reasons = report
                .rejected
                .into_iter()
                .map(|(url, reason)| format!("{url}: {reason}"))
                .collect();
            return Err(Error::PublishFailed(reasons));
        }

        counter!("relay_publish_total", "outcome" => "ok").increment(1);
        tracing::info!(
            "Published {} to {}/{} relays",
            event.id,
            report.accepted.len(),
            report.accepted.len() + report.rejected.len()
        );
        Ok(report)
    }
}

/// Drain one relay's answer to `filter` until EOSE, close, or `deadline`.
async fn collect(
    relay: &dyn RelayHandle,
    filter: &FeedFilter,
    timeout: Duration,
    deadline: tokio::time::Instant,
) -> Result<Collected> {
    let mut stream = match tokio::time::timeout_at(deadline, relay.fetch(filter, timeout)).await {
        Ok(result) => result?,
        Err(_) => {
            return Ok(Collected {
                events: Vec::new(),
                timed_out: true,
            });
        }
    };

    let mut events = Vec::new();
    loop {
        match tokio::time::timeout_at(deadline, stream.recv()).await {
            Ok(Some(StreamItem::Event(event))) => events.push(event),
            Ok(Some(StreamItem::EndOfStoredEvents)) | Ok(None) => {
                return Ok(Collected {
                    events,
                    timed_out: false,
                });
            }
            Ok(Some(StreamItem::Closed(reason))) => {
                tracing::debug!("Relay {} closed query: {}", relay.url(), reason);
                return Ok(Collected {
                    events,
                    timed_out: false,
                });
            }
            Err(_) => {
                return Ok(Collected {
                    events,
                    timed_out: true,
                });
            }
        }
    }
}
