//! User-initiated social actions and engagement counts.
//!
//! Everything in [`Publisher`] is a direct user action: errors propagate so
//! the caller can show them, and input is validated before any relay is
//! contacted. [`Engagement`] is read-only and degrades to zero.

use std::collections::HashSet;
use std::sync::Arc;

use nanofeed_core::address::{find_currency_address, parse_nano_address, strip_labeled_addresses};
use nanofeed_core::{EventKind, FeedFilter, Profile, ProfileMetadata};
use nostr_sdk::prelude::*;

use crate::error::{Error, Result};
use crate::identity::{Identity, require};
use crate::profile::ProfileResolver;
use crate::relay::{RelayPool, to_feed_event};

/// Reaction content counted as a like.
pub const LIKE: &str = "+";

/// Fields a user edits on their profile. `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub about: String,
    pub nano_address: Option<String>,
    pub lud16: Option<String>,
}

/// Signs and publishes the user's events.
pub struct Publisher {
    pool: Arc<RelayPool>,
    resolver: Arc<ProfileResolver>,
    identity: Option<Identity>,
    topic: String,
}

fn parse_event_id(id: &str) -> Result<EventId> {
    EventId::from_hex(id).map_err(|_| Error::Validation(format!("invalid event id: {id}")))
}

fn parse_public_key(key: &str) -> Result<PublicKey> {
    PublicKey::from_hex(key).map_err(|_| Error::Validation(format!("invalid public key: {key}")))
}

fn non_empty(content: &str, what: &str) -> Result<()> {
    if content.trim().is_empty() {
        return Err(Error::Validation(format!("{what} cannot be empty")));
    }
    Ok(())
}

impl Publisher {
    pub fn new(pool: Arc<RelayPool>, resolver: Arc<ProfileResolver>, identity: Option<Identity>, topic: &str) -> Self {
        Self {
            pool,
            resolver,
            identity,
            topic: topic.to_lowercase(),
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    async fn sign_and_publish(&self, builder: EventBuilder) -> Result<Event> {
        let identity = require(self.identity.as_ref())?;
        let event = identity.sign_builder(builder).await?;
        let report = self.pool.publish(&event).await?;
        tracing::info!(
            "Published {} (kind {}) to {} relays, {} rejected",
            event.id.to_hex(),
            event.kind.as_u16(),
            report.accepted.len(),
            report.rejected.len()
        );
        Ok(event)
    }

    /// Topic tag for content that is currency related.
    fn topic_tags(&self, content: &str) -> Vec<Tag> {
        let hashtag = format!("#{}", self.topic);
        if content.to_lowercase().contains(&hashtag) || find_currency_address(content).is_some() {
            vec![Tag::hashtag(self.topic.clone())]
        } else {
            Vec::new()
        }
    }

    /// Publish a text post.
    pub async fn post(&self, content: &str) -> Result<Event> {
        non_empty(content, "post")?;
        require(self.identity.as_ref())?;
        let builder = EventBuilder::new(Kind::TextNote, content).tags(self.topic_tags(content));
        self.sign_and_publish(builder).await
    }

    /// Publish a reply to `parent_id`.
    pub async fn reply(&self, parent_id: &str, content: &str) -> Result<Event> {
        non_empty(content, "reply")?;
        let parent = parse_event_id(parent_id)?;
        require(self.identity.as_ref())?;
        let mut tags = vec![Tag::event(parent)];
        tags.extend(self.topic_tags(content));
        let builder = EventBuilder::new(Kind::TextNote, content).tags(tags);
        self.sign_and_publish(builder).await
    }

    /// Repost `event_id`.
    pub async fn repost(&self, event_id: &str) -> Result<Event> {
        let target = parse_event_id(event_id)?;
        require(self.identity.as_ref())?;
        let builder = EventBuilder::new(Kind::Repost, "").tags([Tag::event(target)]);
        self.sign_and_publish(builder).await
    }

    /// React to `event_id`; `None` means a like.
    pub async fn react(&self, event_id: &str, reaction: Option<&str>) -> Result<Event> {
        let target = parse_event_id(event_id)?;
        require(self.identity.as_ref())?;
        let content = reaction.filter(|r| !r.is_empty()).unwrap_or(LIKE);
        let builder = EventBuilder::new(Kind::Reaction, content).tags([Tag::event(target)]);
        self.sign_and_publish(builder).await
    }

    /// Publish new profile metadata and refresh the cached profile.
    ///
    /// The currency address goes on its own labeled line at the end of the
    /// bio; any earlier labeled address line is dropped. Picture, banner, and
    /// verified handle carry over from the current profile.
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<Profile> {
        let address = match update.nano_address.as_deref().map(str::trim) {
            Some(addr) if !addr.is_empty() => Some(parse_nano_address(addr)?),
            _ => None,
        };
        let identity = require(self.identity.as_ref())?;
        let author = identity.public_key().await?;
        let current = self.resolver.resolve(&author).await;

        let mut about = strip_labeled_addresses(&update.about);
        if let Some(addr) = &address {
            if !about.is_empty() {
                about.push('\n');
            }
            about.push_str(&format!("Nano: {addr}"));
        }

        let keep = |s: &String| (!s.is_empty()).then(|| s.clone());
        let pick = |new: Option<String>, old: &String| {
            new.map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .or_else(|| keep(old))
        };
        let metadata = ProfileMetadata {
            name: pick(update.name, &current.name),
            display_name: keep(&current.display_name),
            about: (!about.is_empty()).then_some(about),
            picture: keep(&current.picture),
            banner: keep(&current.banner),
            nip05: keep(&current.nip05),
            lud16: pick(update.lud16, &current.lud16),
            website: keep(&current.website),
            nano: address,
            ..ProfileMetadata::default()
        };

        let builder = EventBuilder::new(Kind::Metadata, metadata.to_json());
        let event = self.sign_and_publish(builder).await?;
        let feed_event = to_feed_event(&event);
        Ok(self
            .resolver
            .observe(&feed_event)
            .unwrap_or_else(|| Profile::from_metadata(author, feed_event.created_at, &metadata)))
    }

    /// Sign and publish a zap request for `sats` to `recipient`.
    pub async fn zap_request(&self, recipient: &str, sats: u64, event_id: Option<&str>) -> Result<Event> {
        if sats == 0 {
            return Err(Error::Validation("zap amount must be positive".to_string()));
        }
        let recipient = parse_public_key(recipient)?;
        let target = event_id.map(parse_event_id).transpose()?;
        require(self.identity.as_ref())?;

        let msats = sats
            .checked_mul(1000)
            .ok_or_else(|| Error::Validation("zap amount too large".to_string()))?;
        let mut tags = vec![
            Tag::public_key(recipient),
            Tag::custom(TagKind::custom("amount"), [msats.to_string()]),
            Tag::custom(TagKind::custom("relays"), self.pool.urls()),
        ];
        if let Some(target) = target {
            tags.push(Tag::event(target));
        }
        let builder = EventBuilder::new(Kind::ZapRequest, "").tags(tags);
        self.sign_and_publish(builder).await
    }
}

/// Like and repost state of one post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reactions {
    pub likes: usize,
    /// The viewer liked it.
    pub liked: bool,
    /// The viewer reposted it.
    pub reposted: bool,
}

/// Engagement lookups, live from relays.
pub struct Engagement {
    pool: Arc<RelayPool>,
}

impl Engagement {
    pub fn new(pool: Arc<RelayPool>) -> Self {
        Self { pool }
    }

    /// Likes and the viewer's own like/repost for `event_id`.
    ///
    /// A reaction counts once per `(kind, author, content)`, however many
    /// distinct events carry it.
    pub async fn reactions(&self, event_id: &str, viewer: Option<&str>) -> Reactions {
        let filter = FeedFilter::new()
            .kinds([EventKind::Reaction, EventKind::Repost])
            .event(event_id);
        let events = match self.pool.query(&filter).await {
            Ok(events) => events,
            Err(e) => {
                tracing::debug!("Reactions for {} unavailable: {}", event_id, e);
                return Reactions::default();
            }
        };

        let mut seen = HashSet::new();
        let mut reactions = Reactions::default();
        for event in events {
            if !seen.insert((event.kind, event.author.clone(), event.content.clone())) {
                continue;
            }
            let mine = viewer.is_some_and(|v| v == event.author);
            match event.kind {
                EventKind::Reaction if event.content == LIKE => {
                    reactions.likes += 1;
                    reactions.liked |= mine;
                }
                EventKind::Repost => reactions.reposted |= mine,
                _ => {}
            }
        }
        reactions
    }

    /// Replies referencing `event_id`, counted on relays.
    pub async fn reply_count(&self, event_id: &str) -> usize {
        self.count(EventKind::TextNote, event_id).await
    }

    /// Reposts of `event_id`, counted on relays.
    pub async fn repost_count(&self, event_id: &str) -> usize {
        self.count(EventKind::Repost, event_id).await
    }

    async fn count(&self, kind: EventKind, event_id: &str) -> usize {
        let filter = FeedFilter::new().kind(kind).event(event_id);
        self.pool.count(&filter).await.unwrap_or_else(|e| {
            tracing::debug!("Count for {} unavailable: {}", event_id, e);
            0
        })
    }
}
