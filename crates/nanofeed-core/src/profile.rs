//! Author profiles derived from metadata (kind 0) events.

use serde::{Deserialize, Serialize};

use crate::address::{find_currency_address, validate_nano_address};
use crate::event::{EventKind, FeedEvent};

/// Parsed profile metadata from kind 0 JSON content.
///
/// Every field is optional on the wire; unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProfileMetadata {
    /// Short name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// User-facing display name (takes priority over name).
    #[serde(default, alias = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Short biography.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    /// Alternate biography field some clients write instead of `about`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Profile picture URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    /// Banner image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    /// Verified handle (e.g., "user@domain.com").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nip05: Option<String>,
    /// Lightning address for zaps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lud16: Option<String>,
    /// Website URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    /// Dedicated currency address field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nano: Option<String>,
    /// Older spelling of the dedicated currency address field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nano_address: Option<String>,
}

impl ProfileMetadata {
    /// Parse from kind 0 JSON content. Malformed content yields an empty record.
    pub fn from_json(content: &str) -> Self {
        serde_json::from_str(content).unwrap_or_default()
    }

    /// Serialize to kind 0 JSON content.
    pub fn to_json(&self) -> String {
        // A struct of optional strings always serializes.
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Per-author profile projection. Every field has a defined default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Profile {
    /// Author public key (hex).
    pub author: String,
    /// Short name.
    pub name: String,
    /// Display name.
    pub display_name: String,
    /// Biography text.
    pub about: String,
    /// Avatar URL.
    pub picture: String,
    /// Banner URL.
    pub banner: String,
    /// Website URL.
    pub website: String,
    /// Verified handle.
    pub nip05: String,
    /// Lightning address (`name@domain`).
    pub lud16: String,
    /// Dedicated currency field as published (may be malformed).
    pub nano: String,
    /// Derived currency address, if any field yields a valid one.
    pub currency_address: Option<String>,
    /// `created_at` of the metadata event this profile was built from.
    pub created_at: u64,
}

/// Take `value` if it is present and non-blank.
fn present(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Fill `slot` from `value` only if `slot` is still empty.
fn backfill(slot: &mut String, value: Option<&String>) {
    if slot.is_empty()
        && let Some(v) = present(value)
    {
        *slot = v.to_string();
    }
}

impl Profile {
    /// A neutral profile with no data.
    pub fn empty(author: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            ..Self::default()
        }
    }

    /// Build a profile from one metadata record.
    pub fn from_metadata(author: impl Into<String>, created_at: u64, meta: &ProfileMetadata) -> Self {
        let mut profile = Self::empty(author);
        profile.created_at = created_at;
        profile.fill_from(meta);
        profile.currency_address = profile.derive_currency_address();
        profile
    }

    /// Merge metadata events for one author.
    ///
    /// The event with the greatest `created_at` is authoritative; on a tie the
    /// one that comes first in `events` wins, so pass them in arrival order.
    /// Fields it leaves empty are backfilled from older events, newest first;
    /// a present field is never overwritten by an older value. Non-metadata
    /// events and other authors are ignored.
    pub fn from_metadata_events<'a, I>(author: &str, events: I) -> Self
    where
        I: IntoIterator<Item = &'a FeedEvent>,
    {
        let mut candidates: Vec<&FeedEvent> = events
            .into_iter()
            .filter(|e| e.kind == EventKind::Metadata && e.author == author)
            .collect();
        // stable, so equal timestamps keep arrival order
        candidates.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut profile = Self::empty(author);
        if let Some(newest) = candidates.first() {
            profile.created_at = newest.created_at;
        }
        for event in candidates {
            profile.fill_from(&ProfileMetadata::from_json(&event.content));
        }
        profile.currency_address = profile.derive_currency_address();
        profile
    }

    fn fill_from(&mut self, meta: &ProfileMetadata) {
        backfill(&mut self.name, meta.name.as_ref());
        backfill(&mut self.display_name, meta.display_name.as_ref());
        backfill(&mut self.about, meta.about.as_ref());
        backfill(&mut self.about, meta.description.as_ref());
        backfill(&mut self.picture, meta.picture.as_ref());
        backfill(&mut self.banner, meta.banner.as_ref());
        backfill(&mut self.website, meta.website.as_ref());
        backfill(&mut self.nip05, meta.nip05.as_ref());
        backfill(&mut self.lud16, meta.lud16.as_ref());
        backfill(&mut self.nano, meta.nano.as_ref());
        backfill(&mut self.nano, meta.nano_address.as_ref());
    }

    /// Resolve a currency address from, in order: the dedicated field (format
    /// checked), bio, website, display name, short name.
    fn derive_currency_address(&self) -> Option<String> {
        let dedicated = self.nano.trim();
        if validate_nano_address(dedicated) {
            return Some(dedicated.to_ascii_lowercase());
        }
        [&self.about, &self.website, &self.display_name, &self.name]
            .into_iter()
            .find_map(|field| find_currency_address(field))
    }

    /// Whether any profile field yields a currency address.
    pub fn has_currency_marker(&self) -> bool {
        self.currency_address.is_some()
    }

    /// Whether the profile carries no data at all.
    pub fn is_empty(&self) -> bool {
        self.created_at == 0 && self.name.is_empty() && self.display_name.is_empty()
    }

    /// Best label for display: display name, then name, then a short author id.
    pub fn label(&self) -> String {
        if !self.display_name.is_empty() {
            self.display_name.clone()
        } else if !self.name.is_empty() {
            self.name.clone()
        } else {
            let short: String = self.author.chars().take(8).collect();
            format!("{short}...")
        }
    }

    /// Project back to metadata for republishing.
    pub fn to_metadata(&self) -> ProfileMetadata {
        let opt = |s: &String| (!s.is_empty()).then(|| s.clone());
        ProfileMetadata {
            name: opt(&self.name),
            display_name: opt(&self.display_name),
            about: opt(&self.about),
            description: None,
            picture: opt(&self.picture),
            banner: opt(&self.banner),
            nip05: opt(&self.nip05),
            lud16: opt(&self.lud16),
            website: opt(&self.website),
            nano: self.currency_address.clone(),
            nano_address: None,
        }
    }
}
