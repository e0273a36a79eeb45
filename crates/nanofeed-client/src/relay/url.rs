//! Relay URL normalization and validation.
//!
//! # Normalization Rules
//!
//! - Trim whitespace
//! - Require the `wss://` scheme
//! - Lowercase the scheme and host
//! - Remove trailing slashes
//! - Preserve port numbers and paths

use nostr_sdk::RelayUrl;

/// Result of URL normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeResult {
    /// URL is valid and normalized.
    Ok(String),
    /// URL is syntactically invalid or uses the wrong scheme.
    Invalid(String),
}

impl NormalizeResult {
    /// Returns the normalized URL if valid.
    pub fn ok(self) -> Option<String> {
        match self {
            Self::Ok(url) => Some(url),
            Self::Invalid(_) => None,
        }
    }

    /// Returns true if the URL is valid.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

/// Normalize a relay URL a user wants to add.
///
/// ```ignore
/// use nanofeed_client::relay::url::normalize_relay_url;
///
/// assert_eq!(
///     normalize_relay_url("wss://Relay.Example.COM/").ok(),
///     Some("wss://relay.example.com".to_string())
/// );
/// assert!(!normalize_relay_url("ws://relay.example.com").is_ok());
/// ```
pub fn normalize_relay_url(url: &str) -> NormalizeResult {
    let url = url.trim();

    if !url.get(..6).is_some_and(|s| s.eq_ignore_ascii_case("wss://")) {
        return NormalizeResult::Invalid("URL must start with wss://".to_string());
    }

    let parsed = match RelayUrl::parse(url) {
        Ok(u) => u,
        Err(e) => return NormalizeResult::Invalid(format!("Invalid relay URL: {}", e)),
    };

    let mut normalized = parsed.to_string();
    while normalized.ends_with('/') {
        normalized.pop();
    }

    if extract_host(&normalized).is_empty() {
        return NormalizeResult::Invalid("empty host".to_string());
    }

    NormalizeResult::Ok(normalized)
}

/// Extract the host portion from a websocket URL.
fn extract_host(url: &str) -> &str {
    let without_scheme = url
        .strip_prefix("wss://")
        .or_else(|| url.strip_prefix("ws://"))
        .unwrap_or(url);
    without_scheme.split('/').next().unwrap_or(without_scheme)
}
