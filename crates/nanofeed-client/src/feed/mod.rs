//! Feed orchestration: the two named feeds, their pagination state, reply
//! threads, and background author discovery.

pub mod controller;
pub mod discovery;
pub mod replies;
pub mod state;

pub use controller::{FeedController, FeedSettings, InitialLoad, LoadOutcome};
pub use discovery::{Discovery, ScanReport};
pub use replies::ReplyLoader;
pub use state::FeedState;

/// The two feeds a post can be placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    /// Everything not currency related.
    General,
    /// Posts by confirmed currency authors or carrying an address or the topic.
    Currency,
}

impl FeedKind {
    /// Short label for logs and terminal output.
    pub fn label(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Currency => "nano",
        }
    }
}

impl std::fmt::Display for FeedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
