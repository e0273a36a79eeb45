//! Event records and filters as the feed engine sees them.
//!
//! A [`FeedEvent`] is the protocol-agnostic projection of a signed relay
//! event. Signature and id verification happen at the transport boundary;
//! by the time an event is a `FeedEvent` it is trusted to be what it claims,
//! except for `created_at`, which is author-supplied.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Tag name marking a referenced (parent) event.
pub const EVENT_TAG: &str = "e";

/// Tag name marking a referenced author.
pub const PUBKEY_TAG: &str = "p";

/// Tag name marking a topic label.
pub const TOPIC_TAG: &str = "t";

/// Event kinds the feed engine distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum EventKind {
    /// Profile metadata (kind 0).
    Metadata,
    /// Short text post (kind 1).
    TextNote,
    /// Follow list (kind 3).
    Contacts,
    /// Repost (kind 6).
    Repost,
    /// Reaction (kind 7).
    Reaction,
    /// Lightning zap request (kind 9734).
    ZapRequest,
    /// Lightning payment receipt (kind 9735).
    ZapReceipt,
    /// Anything else.
    Other(u16),
}

impl EventKind {
    /// Numeric kind as used on the wire.
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Metadata => 0,
            Self::TextNote => 1,
            Self::Contacts => 3,
            Self::Repost => 6,
            Self::Reaction => 7,
            Self::ZapRequest => 9734,
            Self::ZapReceipt => 9735,
            Self::Other(k) => k,
        }
    }
}

impl From<u16> for EventKind {
    fn from(kind: u16) -> Self {
        match kind {
            0 => Self::Metadata,
            1 => Self::TextNote,
            3 => Self::Contacts,
            6 => Self::Repost,
            7 => Self::Reaction,
            9734 => Self::ZapRequest,
            9735 => Self::ZapReceipt,
            k => Self::Other(k),
        }
    }
}

impl From<EventKind> for u16 {
    fn from(kind: EventKind) -> Self {
        kind.as_u16()
    }
}

/// An immutable event as received from a relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEvent {
    /// Event ID (hex), content-derived.
    pub id: String,
    /// Author public key (hex).
    #[serde(rename = "pubkey")]
    pub author: String,
    /// Unix timestamp claimed by the author.
    pub created_at: u64,
    /// Event kind.
    pub kind: EventKind,
    /// Event content; interpretation depends on `kind`.
    pub content: String,
    /// Ordered tags, each a sequence whose first element names the tag.
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
}

impl FeedEvent {
    /// Iterate over the values of every tag named `name` that carries a value.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.first().map(String::as_str) == Some(name))
            .filter_map(|tag| tag.get(1).map(String::as_str))
    }

    /// The parent event this event replies to.
    ///
    /// Only the first `e` tag counts. If that tag has no (or an empty) value
    /// the event is malformed and treated as a non-reply.
    pub fn parent_id(&self) -> Option<&str> {
        let first = self
            .tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(EVENT_TAG))?;
        match first.get(1) {
            Some(value) if !value.is_empty() => Some(value.as_str()),
            _ => None,
        }
    }

    /// Whether this event is a reply (has a well-formed parent reference).
    pub fn is_reply(&self) -> bool {
        self.parent_id().is_some()
    }

    /// Whether any `e` tag of this event points at `event_id`.
    pub fn references(&self, event_id: &str) -> bool {
        self.tag_values(EVENT_TAG).any(|v| v == event_id)
    }

    /// Whether the event carries the topic label `topic` (case-insensitive).
    pub fn has_topic(&self, topic: &str) -> bool {
        self.tag_values(TOPIC_TAG)
            .any(|v| v.eq_ignore_ascii_case(topic))
    }

    /// Authors referenced through `p` tags.
    pub fn mentioned_authors(&self) -> impl Iterator<Item = &str> {
        self.tag_values(PUBKEY_TAG)
    }

    /// Whether this is a top-level text post (kind 1, not a reply).
    pub fn is_top_level_post(&self) -> bool {
        self.kind == EventKind::TextNote && !self.is_reply()
    }
}

/// A relay query filter.
///
/// Serializes to the relay wire shape:
/// `{"kinds":[1],"authors":[..],"#e":[..],"#p":[..],"#t":[..],"since":..,"until":..,"limit":..}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedFilter {
    /// Event kinds to match (empty = any).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<u16>,
    /// Author public keys (hex).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    /// Referenced event IDs (`#e`).
    #[serde(rename = "#e", skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<String>,
    /// Referenced authors (`#p`).
    #[serde(rename = "#p", skip_serializing_if = "Vec::is_empty")]
    pub pubkeys: Vec<String>,
    /// Topic labels (`#t`).
    #[serde(rename = "#t", skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
    /// Only events created at or after this Unix timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    /// Only events created at or before this Unix timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    /// Maximum number of stored events a relay should return.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl FeedFilter {
    /// Create an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to a single kind (appends).
    pub fn kind(mut self, kind: EventKind) -> Self {
        self.kinds.push(kind.as_u16());
        self
    }

    /// Restrict to several kinds (appends).
    pub fn kinds<I: IntoIterator<Item = EventKind>>(mut self, kinds: I) -> Self {
        self.kinds.extend(kinds.into_iter().map(EventKind::as_u16));
        self
    }

    /// Restrict to one author (appends).
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    /// Restrict to several authors (appends).
    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors.extend(authors.into_iter().map(Into::into));
        self
    }

    /// Match events referencing `event_id` through an `e` tag.
    pub fn event(mut self, event_id: impl Into<String>) -> Self {
        self.events.push(event_id.into());
        self
    }

    /// Match events referencing `pubkey` through a `p` tag.
    pub fn pubkey(mut self, pubkey: impl Into<String>) -> Self {
        self.pubkeys.push(pubkey.into());
        self
    }

    /// Match events carrying topic label `topic`.
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.push(topic.into());
        self
    }

    /// Lower bound on `created_at`.
    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    /// Upper bound on `created_at`.
    pub fn until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    /// Cap on the number of stored events returned.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `event` satisfies every constraint except `limit`.
    pub fn matches(&self, event: &FeedEvent) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind.as_u16()) {
            return false;
        }
        if !self.authors.is_empty() && !self.authors.iter().any(|a| a == &event.author) {
            return false;
        }
        if !self.events.is_empty()
            && !event
                .tag_values(EVENT_TAG)
                .any(|v| self.events.iter().any(|e| e == v))
        {
            return false;
        }
        if !self.pubkeys.is_empty()
            && !event
                .tag_values(PUBKEY_TAG)
                .any(|v| self.pubkeys.iter().any(|p| p == v))
        {
            return false;
        }
        if !self.topics.is_empty()
            && !self.topics.iter().any(|t| event.has_topic(t))
        {
            return false;
        }
        if let Some(since) = self.since
            && event.created_at < since
        {
            return false;
        }
        if let Some(until) = self.until
            && event.created_at > until
        {
            return false;
        }
        true
    }
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Unix timestamp `window` before now (saturating at zero).
pub fn since_ago(window: Duration) -> u64 {
    unix_now().saturating_sub(window.as_secs())
}
