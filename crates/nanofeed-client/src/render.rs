//! Rendering boundary.
//!
//! The engine decides what goes where; a [`FeedRenderer`] only draws. The
//! binary uses [`TerminalRenderer`]; tests record calls instead.

use std::io::Write;

use chrono::{DateTime, Utc};
use nanofeed_core::{FeedEvent, Profile};
use parking_lot::Mutex;

use crate::feed::FeedKind;

/// Where a post goes relative to what is already shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Below existing posts (pagination).
    Append,
    /// Above existing posts (live arrivals).
    Prepend,
}

/// Payment options shown next to a post.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentOptions {
    pub nano_address: Option<String>,
    pub lightning_address: Option<String>,
}

impl PaymentOptions {
    /// Options offered for `profile`.
    pub fn for_profile(profile: &Profile) -> Self {
        Self {
            nano_address: profile.currency_address.clone(),
            lightning_address: (!profile.lud16.is_empty()).then(|| profile.lud16.clone()),
        }
    }

    /// Whether any payment is possible.
    pub fn any(&self) -> bool {
        self.nano_address.is_some() || self.lightning_address.is_some()
    }
}

/// A post ready to draw.
#[derive(Debug, Clone)]
pub struct RenderedPost {
    pub event: FeedEvent,
    pub profile: Profile,
    pub payment: PaymentOptions,
}

impl RenderedPost {
    pub fn new(event: FeedEvent, profile: Profile) -> Self {
        let payment = PaymentOptions::for_profile(&profile);
        Self {
            event,
            profile,
            payment,
        }
    }
}

/// A reply and its own nested replies.
#[derive(Debug, Clone)]
pub struct ReplyNode {
    pub event: FeedEvent,
    pub profile: Profile,
    pub children: Vec<ReplyNode>,
}

impl ReplyNode {
    /// This reply plus every descendant.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(ReplyNode::count).sum::<usize>()
    }
}

/// Draws feeds. Implementations must be cheap; the engine calls them inline.
pub trait FeedRenderer: Send + Sync {
    fn render(&self, feed: FeedKind, post: &RenderedPost, placement: Placement);

    fn remove(&self, feed: FeedKind, event_id: &str);

    fn render_replies(&self, parent_id: &str, replies: &[ReplyNode]);
}

/// Prints one block per post.
pub struct TerminalRenderer<W: Write + Send> {
    out: Mutex<W>,
}

impl TerminalRenderer<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    fn write_block(&self, block: &str) {
        let mut out = self.out.lock();
        if let Err(e) = out.write_all(block.as_bytes()).and_then(|_| out.flush()) {
            tracing::warn!("Failed to write to terminal: {}", e);
        }
    }
}

fn timestamp(created_at: u64) -> String {
    i64::try_from(created_at)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn format_post(feed: FeedKind, post: &RenderedPost) -> String {
    let mut block = format!(
        "[{}] {} · {}\n",
        feed.label(),
        post.profile.label(),
        timestamp(post.event.created_at)
    );
    for line in post.event.content.lines() {
        block.push_str("  ");
        block.push_str(line);
        block.push('\n');
    }
    if let Some(addr) = &post.payment.nano_address {
        block.push_str(&format!("  tip: {addr}\n"));
    }
    if let Some(ln) = &post.payment.lightning_address {
        block.push_str(&format!("  zap: {ln}\n"));
    }
    block.push_str(&format!("  id: {}\n\n", post.event.id));
    block
}

fn format_replies(nodes: &[ReplyNode], depth: usize, block: &mut String) {
    let indent = "  ".repeat(depth + 1);
    for node in nodes {
        block.push_str(&format!("{indent}↳ {}: ", node.profile.label()));
        block.push_str(&node.event.content.replace('\n', " "));
        block.push('\n');
        format_replies(&node.children, depth + 1, block);
    }
}

impl<W: Write + Send> FeedRenderer for TerminalRenderer<W> {
    fn render(&self, feed: FeedKind, post: &RenderedPost, _placement: Placement) {
        self.write_block(&format_post(feed, post));
    }

    fn remove(&self, feed: FeedKind, event_id: &str) {
        tracing::debug!("Post {} moved out of the {} feed", event_id, feed.label());
    }

    fn render_replies(&self, parent_id: &str, replies: &[ReplyNode]) {
        let mut block = format!("replies to {parent_id}:\n");
        format_replies(replies, 0, &mut block);
        block.push('\n');
        self.write_block(&block);
    }
}
