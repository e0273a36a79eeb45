//! Prometheus metrics helpers for nanofeed.
//!
//! # Usage
//!
//! ```rust,ignore
//! use nanofeed_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = init_metrics().unwrap();
//!     start_metrics_server(9091, handle).await.unwrap();
//!
//!     metrics::counter!("relay_events_received_total").increment(1);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: component name (`relay_`, `store_`, `classifier_`, `feed_`, `payment_`)
//! - Suffix: unit or type (`_total`, `_seconds`)
//! - Labels: used sparingly (`feed`, `flow`, `outcome`)

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Install the Prometheus recorder and register metric descriptions.
///
/// Fails if a recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_common_metrics();
    Ok(handle)
}

/// Like [`init_metrics`] but returns `None` when a recorder is already installed.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    init_metrics().ok()
}

/// Serve `/metrics` on `port` in a background task.
///
/// The listener is bound before returning so that port conflicts surface to
/// the caller.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server stopped: {}", e);
        }
    });

    Ok(())
}

fn register_common_metrics() {
    describe_gauge!("client_running", "1 while the client is connected");

    // =========================================================================
    // Relay Pool
    // =========================================================================

    describe_gauge!("relay_connections", "Number of live relay connections");
    describe_counter!("relay_connect_total", "Successful relay connections");
    describe_counter!(
        "relay_connect_failures_total",
        "Relay connection attempts that failed or timed out"
    );
    describe_counter!(
        "relay_dropped_total",
        "Relays removed from the live set after an error or disconnect"
    );
    describe_counter!(
        "relay_query_timeouts_total",
        "Per-relay queries cut off at their deadline"
    );
    describe_counter!(
        "relay_subscribe_timeouts_total",
        "Per-relay subscription requests skipped at their deadline"
    );
    describe_counter!(
        "relay_events_received_total",
        "Events received from relays (before dedup)"
    );
    describe_counter!(
        "relay_publish_total",
        "Publish attempts (label: outcome=ok|failed)"
    );
    describe_counter!(
        "relay_notifications_lagged_total",
        "Live notifications lost because a subscriber fell behind"
    );
    describe_histogram!(
        "relay_query_duration_seconds",
        "Wall time of a fan-out query"
    );

    // =========================================================================
    // Event Store
    // =========================================================================

    describe_counter!("store_events_inserted_total", "Events newly stored");
    describe_counter!(
        "store_events_duplicate_total",
        "Events skipped because their id was already stored"
    );
    describe_counter!(
        "store_metadata_replaced_total",
        "Metadata events replaced by a strictly newer version"
    );
    describe_gauge!("store_events", "Events currently held in the store");

    // =========================================================================
    // Profiles & Classification
    // =========================================================================

    describe_counter!("profile_fetch_total", "Profile lookups that hit the network");
    describe_counter!(
        "profile_fetch_failures_total",
        "Profile lookups that degraded to an empty profile"
    );
    describe_counter!(
        "classifier_promotions_total",
        "Authors promoted to the known currency set"
    );
    describe_gauge!("classifier_known_users", "Size of the known currency set");
    describe_counter!(
        "discovery_scans_total",
        "Completed background discovery scans"
    );

    // =========================================================================
    // Feeds
    // =========================================================================

    describe_counter!("feed_posts_rendered_total", "Posts rendered (label: feed)");
    describe_counter!(
        "feed_posts_moved_total",
        "Posts moved from the general feed to the currency feed"
    );
    describe_counter!(
        "feed_loads_skipped_total",
        "Load requests dropped while in flight or throttled"
    );

    // =========================================================================
    // Payments
    // =========================================================================

    describe_counter!(
        "payment_attempts_total",
        "Payment attempts (labels: flow=tip|zap, outcome)"
    );
}

// =============================================================================
// Metric Recording Helpers
// =============================================================================

/// Increment a counter by `count`.
#[inline]
pub fn increment(name: &'static str, count: u64) {
    metrics::counter!(name).increment(count);
}

/// Set a gauge value.
#[inline]
pub fn set_gauge(name: &'static str, value: f64) {
    metrics::gauge!(name).set(value);
}

/// Record a payment attempt outcome for `flow` (`tip` or `zap`).
pub fn record_payment(flow: &'static str, outcome: &'static str) {
    metrics::counter!("payment_attempts_total", "flow" => flow, "outcome" => outcome)
        .increment(1);
}
