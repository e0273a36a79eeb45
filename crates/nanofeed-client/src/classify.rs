//! Currency classification of authors and posts.
//!
//! Classification is per author: an author moves from unknown to confirmed
//! once and never back. For a post the decision is, in order:
//!
//! 1. Known currency author: currency post, no network call.
//! 2. Content carries an address or the reserved topic label: currency post.
//!    An address the author labels as their own also confirms the author.
//! 3. Author profile carries an address: confirm the author, currency post.
//! 4. Otherwise a general post.
//!
//! The first currency answer for a post is remembered, so asking again after
//! its author was confirmed still reports the original reason.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use metrics::{counter, gauge};
use nanofeed_core::address::{find_currency_address, find_labeled_currency_address};
use nanofeed_core::FeedEvent;
use parking_lot::RwLock;

use crate::profile::ProfileResolver;

/// Authors confirmed as currency users. Grows only.
#[derive(Default)]
pub struct KnownCurrencyUsers {
    inner: RwLock<HashSet<String>>,
}

impl KnownCurrencyUsers {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `author` is confirmed.
    pub fn contains(&self, author: &str) -> bool {
        self.inner.read().contains(author)
    }

    /// Confirm `author`. Returns true only the first time.
    pub fn insert(&self, author: &str) -> bool {
        let mut inner = self.inner.write();
        let added = inner.insert(author.to_string());
        if added {
            counter!("classifier_promotions_total").increment(1);
            gauge!("classifier_known_users").set(inner.len() as f64);
            tracing::debug!("Confirmed currency author {}", author);
        }
        added
    }

    /// Number of confirmed authors.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether no author is confirmed yet.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Snapshot of all confirmed authors, sorted.
    pub fn snapshot(&self) -> Vec<String> {
        let mut authors: Vec<String> = self.inner.read().iter().cloned().collect();
        authors.sort();
        authors
    }
}

/// Why a post landed where it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Author was already confirmed.
    KnownAuthor,
    /// Content carries a currency address.
    ContentAddress,
    /// Content carries the reserved topic label.
    Topic,
    /// Author profile carries a currency address.
    Profile,
    /// Not currency related.
    General,
}

impl Classification {
    /// Whether this places the post in the currency feed.
    pub fn is_currency(self) -> bool {
        !matches!(self, Self::General)
    }
}

/// Applies the classification procedure.
pub struct Classifier {
    known: Arc<KnownCurrencyUsers>,
    resolver: Arc<ProfileResolver>,
    topic: String,
    decided: RwLock<HashMap<String, Classification>>,
}

impl Classifier {
    /// Create a classifier for the reserved `topic` label.
    pub fn new(known: Arc<KnownCurrencyUsers>, resolver: Arc<ProfileResolver>, topic: &str) -> Self {
        Self {
            known,
            resolver,
            topic: topic.to_lowercase(),
            decided: RwLock::new(HashMap::new()),
        }
    }

    /// The shared confirmed-author set.
    pub fn known(&self) -> &Arc<KnownCurrencyUsers> {
        &self.known
    }

    /// Steps 1 and 2 only. `None` means a profile lookup is needed.
    pub fn classify_local(&self, event: &FeedEvent) -> Option<Classification> {
        if let Some(decided) = self.decided.read().get(&event.id) {
            return Some(*decided);
        }
        let result = self.local_rules(event)?;
        Some(self.remember(event, result))
    }

    fn local_rules(&self, event: &FeedEvent) -> Option<Classification> {
        if self.known.contains(&event.author) {
            return Some(Classification::KnownAuthor);
        }

        if find_currency_address(&event.content).is_some() {
            if find_labeled_currency_address(&event.content).is_some() {
                self.known.insert(&event.author);
            }
            return Some(Classification::ContentAddress);
        }

        if event.has_topic(&self.topic) {
            return Some(Classification::Topic);
        }

        None
    }

    /// Record a currency answer unless one is already held. Returns the
    /// answer on record.
    fn remember(&self, event: &FeedEvent, result: Classification) -> Classification {
        if !result.is_currency() {
            return result;
        }
        *self.decided.write().entry(event.id.clone()).or_insert(result)
    }

    /// Full procedure, consulting the author profile when needed.
    ///
    /// A currency answer is final: later calls for the same post return it
    /// unchanged and confirm nobody new. A general answer is re-evaluated,
    /// since the author may have been confirmed in the meantime.
    pub async fn classify(&self, event: &FeedEvent) -> Classification {
        if let Some(local) = self.classify_local(event) {
            return local;
        }

        let profile = self.resolver.resolve(&event.author).await;
        if profile.has_currency_marker() {
            self.known.insert(&event.author);
            return self.remember(event, Classification::Profile);
        }

        Classification::General
    }

    /// Confirm an author from a profile alone. Returns true if newly confirmed.
    pub fn consider_profile(&self, profile: &nanofeed_core::Profile) -> bool {
        profile.has_currency_marker() && self.known.insert(&profile.author)
    }
}
