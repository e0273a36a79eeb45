//! Nanofeed feed client engine.
//!
//! This crate connects to a set of independent relays, merges their event
//! streams, and splits posts into a general feed and a currency feed based on
//! whether the author or the content carries a currency address.
//!
//! # Modules
//!
//! - [`relay`] - Transport boundary, fan-out pool, persisted relay list
//! - [`store`] - Deduplicating in-memory event store
//! - [`profile`] - Cached profile resolution
//! - [`classify`] - Known currency users and post classification
//! - [`feed`] - Feed controller, reply trees, background discovery
//! - [`actions`] - Posting, reactions, profile updates, engagement counts
//! - [`payment`] - Currency tips and lightning zaps
//! - [`context`] - The application context that wires it together
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │    RelayPool    │  fan-out with per-relay deadlines
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   EventStore    │  dedupe by id, metadata history
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   Classifier    │  known users, addresses, topic label
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ FeedController  │  general / currency placement, paging, live updates
//! └─────────────────┘
//! ```
//!
//! A post is placed in exactly one feed and can only move from the general
//! feed to the currency feed, never back.

pub mod actions;
pub mod classify;
pub mod config;
pub mod context;
pub mod error;
pub mod feed;
pub mod identity;
pub mod payment;
pub mod profile;
pub mod relay;
pub mod render;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types at crate root
pub use error::{Error, IdentityError, PaymentError, Result};

pub use actions::{Engagement, ProfileUpdate, Publisher, Reactions};
pub use classify::{Classification, Classifier, KnownCurrencyUsers};
pub use config::Config;
pub use context::AppContext;
pub use feed::{Discovery, FeedController, FeedKind, FeedSettings, LoadOutcome};
pub use identity::Identity;
pub use payment::{PaymentCoordinator, TipOutcome, ZapOutcome};
pub use profile::ProfileResolver;
pub use relay::{RelayListStore, RelayPool};
pub use render::{FeedRenderer, Placement, RenderedPost, TerminalRenderer};
pub use store::EventStore;
