//! Relay connectivity: the transport boundary, the fan-out pool, and the
//! persisted relay list.

pub mod nostr;
pub mod pool;
pub mod settings;
pub mod transport;
pub mod url;

pub use nostr::{NostrSdkTransport, to_feed_event, to_nostr_filter};
pub use pool::{PoolTimeouts, PublishReport, RelayEvent, RelayPool};
pub use settings::{RELAYS_KEY, RelayListStore};
pub use transport::{RelayHandle, RelayStream, RelayTransport, StreamItem};
pub use url::{NormalizeResult, normalize_relay_url};
