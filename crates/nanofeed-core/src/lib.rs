//! Core types and shared utilities for the nanofeed client.
//!
//! This crate provides:
//! - Event and filter types with reply/topic helpers
//! - The currency address grammar and unit conversion
//! - Profile metadata parsing and merging
//! - Prometheus metrics helpers
//! - Shared error types

pub mod address;
mod error;
pub mod event;
pub mod metrics;
pub mod profile;

// ═══════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════

/// Default reserved topic label for currency posts.
pub const DEFAULT_TOPIC: &str = "nanocurrency";

pub use address::{
    find_currency_address, find_labeled_currency_address, nano_to_raw, raw_to_nano,
    validate_nano_address,
};
pub use error::{Error, Result};
pub use event::{EventKind, FeedEvent, FeedFilter};
pub use profile::{Profile, ProfileMetadata};
