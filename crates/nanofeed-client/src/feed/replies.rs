//! On-demand reply threads.
//!
//! Replies are fetched level by level: the replies to the root, then the
//! replies to those, down to [`MAX_REPLY_DEPTH`]. Every expand re-fetches, so
//! a thread picks up replies that arrived since the last look. If the network
//! fails the thread is built from whatever the store already holds.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use nanofeed_core::{EventKind, FeedEvent, FeedFilter, Profile};

use crate::profile::ProfileResolver;
use crate::relay::RelayPool;
use crate::render::ReplyNode;
use crate::store::EventStore;

/// Nesting levels fetched below a post.
pub const MAX_REPLY_DEPTH: usize = 4;

/// Per-parent fetch limit.
const REPLIES_PER_PARENT: usize = 50;

pub struct ReplyLoader {
    pool: Arc<RelayPool>,
    store: Arc<EventStore>,
    resolver: Arc<ProfileResolver>,
    max_depth: usize,
}

impl ReplyLoader {
    pub fn new(pool: Arc<RelayPool>, store: Arc<EventStore>, resolver: Arc<ProfileResolver>) -> Self {
        Self {
            pool,
            store,
            resolver,
            max_depth: MAX_REPLY_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.max(1);
        self
    }

    /// Fetch and assemble the reply tree under `parent_id`.
    pub async fn load(&self, parent_id: &str) -> Vec<ReplyNode> {
        let mut frontier = vec![parent_id.to_string()];

        for depth in 0..self.max_depth {
            if frontier.is_empty() {
                break;
            }
            let filter = FeedFilter::new()
                .kind(EventKind::TextNote)
                .limit(REPLIES_PER_PARENT * frontier.len());
            let filter = frontier.iter().fold(filter, |f, id| f.event(id.clone()));

            match self.pool.query(&filter).await {
                Ok(events) => {
                    self.store.put_all(events);
                }
                Err(e) => {
                    tracing::debug!("Reply fetch at depth {} for {} failed: {}", depth, parent_id, e);
                    break;
                }
            }

            frontier = frontier
                .iter()
                .flat_map(|id| self.store.replies_to(id))
                .map(|e| e.id)
                .collect();
        }

        self.assemble(parent_id).await
    }

    /// Build the tree from the store alone.
    pub async fn assemble(&self, parent_id: &str) -> Vec<ReplyNode> {
        let mut levels: Vec<FeedEvent> = Vec::new();
        let mut seen = HashSet::from([parent_id.to_string()]);
        let mut frontier = vec![parent_id.to_string()];
        for _ in 0..self.max_depth {
            let mut next = Vec::new();
            for id in &frontier {
                for event in self.store.replies_to(id) {
                    if seen.insert(event.id.clone()) {
                        next.push(event.id.clone());
                        levels.push(event);
                    }
                }
            }
            frontier = next;
        }

        let authors: Vec<String> = levels.iter().map(|e| e.author.clone()).collect();
        let profiles = if authors.is_empty() {
            HashMap::new()
        } else {
            self.resolver.resolve_many(&authors).await
        };

        let mut children: HashMap<String, Vec<FeedEvent>> = HashMap::new();
        for event in levels {
            if let Some(parent) = event.parent_id() {
                children.entry(parent.to_string()).or_default().push(event);
            }
        }
        build(parent_id, &mut children, &profiles)
    }
}

fn build(
    parent_id: &str,
    children: &mut HashMap<String, Vec<FeedEvent>>,
    profiles: &HashMap<String, Profile>,
) -> Vec<ReplyNode> {
    let Some(direct) = children.remove(parent_id) else {
        return Vec::new();
    };
    direct
        .into_iter()
        .map(|event| {
            let nested = build(&event.id, children, profiles);
            let profile = profiles
                .get(&event.author)
                .cloned()
                .unwrap_or_else(|| Profile::empty(event.author.as_str()));
            ReplyNode {
                event,
                profile,
                children: nested,
            }
        })
        .collect()
}

/// Total replies in a tree.
pub fn count(nodes: &[ReplyNode]) -> usize {
    nodes.iter().map(ReplyNode::count).sum()
}
