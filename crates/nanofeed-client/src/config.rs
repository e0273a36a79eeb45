//! Client configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use nanofeed_core::DEFAULT_TOPIC;

/// Relays used when neither the environment nor the saved list names any.
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.nostr.band",
    "wss://relay.snort.social",
];

/// Client configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Seed relays, used when no saved relay list exists.
    pub relays: Vec<String>,

    /// SQLite file holding the saved relay list.
    pub db_path: PathBuf,

    /// Reserved topic label marking currency posts.
    pub topic: String,

    /// Posts rendered per page in the general feed.
    pub general_batch: usize,

    /// Posts rendered per page in the currency feed.
    pub currency_batch: usize,

    /// Minimum time between two loads of the same feed.
    pub throttle: Duration,

    /// How often the live feed re-checks for new posts.
    pub update_interval: Duration,

    /// How often background discovery rescans.
    pub discovery_interval: Duration,

    /// Lookback for the general live feed.
    pub live_window: Duration,

    /// Lookback for currency-author backfill and discovery.
    pub backfill_window: Duration,

    /// Per-relay deadline for queries.
    pub query_timeout: Duration,

    /// Per-relay deadline for publishes.
    pub publish_timeout: Duration,

    /// Per-relay deadline for connecting.
    pub connect_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relays: DEFAULT_RELAYS.iter().map(|s| s.to_string()).collect(),
            db_path: PathBuf::from("./data/nanofeed.db"),
            topic: DEFAULT_TOPIC.to_string(),
            general_batch: 20,
            currency_batch: 10,
            throttle: Duration::from_millis(1500),
            update_interval: Duration::from_secs(30),
            discovery_interval: Duration::from_secs(300),
            live_window: Duration::from_secs(24 * 3600),
            backfill_window: Duration::from_secs(30 * 24 * 3600),
            query_timeout: Duration::from_millis(3000),
            publish_timeout: Duration::from_millis(5000),
            connect_timeout: Duration::from_millis(5000),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> anyhow::Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{key} has an invalid value: {raw}")),
        _ => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// All variables are optional:
    /// - `NANOFEED_RELAYS`: comma-separated seed relays
    /// - `NANOFEED_DB_PATH`: relay list database (default: "./data/nanofeed.db")
    /// - `NANOFEED_TOPIC`: reserved topic label (default: "nanocurrency")
    /// - `NANOFEED_GENERAL_BATCH` (20), `NANOFEED_CURRENCY_BATCH` (10)
    /// - `NANOFEED_THROTTLE_MS` (1500)
    /// - `NANOFEED_UPDATE_INTERVAL_SECS` (30), `NANOFEED_DISCOVERY_INTERVAL_SECS` (300)
    /// - `NANOFEED_LIVE_WINDOW_HOURS` (24), `NANOFEED_BACKFILL_DAYS` (30)
    /// - `NANOFEED_QUERY_TIMEOUT_MS` (3000), `NANOFEED_PUBLISH_TIMEOUT_MS` (5000),
    ///   `NANOFEED_CONNECT_TIMEOUT_MS` (5000)
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(relays) = std::env::var("NANOFEED_RELAYS") {
            let relays: Vec<String> = relays
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !relays.is_empty() {
                config.relays = relays;
            }
        }
        if let Ok(path) = std::env::var("NANOFEED_DB_PATH")
            && !path.trim().is_empty()
        {
            config.db_path = PathBuf::from(path.trim());
        }
        if let Ok(topic) = std::env::var("NANOFEED_TOPIC")
            && !topic.trim().is_empty()
        {
            config.topic = topic.trim().to_lowercase();
        }
        if let Some(n) = env_parse::<usize>("NANOFEED_GENERAL_BATCH")? {
            config.general_batch = n.max(1);
        }
        if let Some(n) = env_parse::<usize>("NANOFEED_CURRENCY_BATCH")? {
            config.currency_batch = n.max(1);
        }
        if let Some(ms) = env_parse::<u64>("NANOFEED_THROTTLE_MS")? {
            config.throttle = Duration::from_millis(ms);
        }
        if let Some(s) = env_parse::<u64>("NANOFEED_UPDATE_INTERVAL_SECS")? {
            config.update_interval = Duration::from_secs(s);
        }
        if let Some(s) = env_parse::<u64>("NANOFEED_DISCOVERY_INTERVAL_SECS")? {
            config.discovery_interval = Duration::from_secs(s);
        }
        if let Some(h) = env_parse::<u64>("NANOFEED_LIVE_WINDOW_HOURS")? {
            config.live_window = Duration::from_secs(h * 3600);
        }
        if let Some(d) = env_parse::<u64>("NANOFEED_BACKFILL_DAYS")? {
            config.backfill_window = Duration::from_secs(d * 24 * 3600);
        }
        if let Some(ms) = env_parse::<u64>("NANOFEED_QUERY_TIMEOUT_MS")? {
            config.query_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("NANOFEED_PUBLISH_TIMEOUT_MS")? {
            config.publish_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("NANOFEED_CONNECT_TIMEOUT_MS")? {
            config.connect_timeout = Duration::from_millis(ms);
        }

        tracing::info!(
            relays = config.relays.len(),
            db_path = %config.db_path.display(),
            topic = %config.topic,
            general_batch = config.general_batch,
            currency_batch = config.currency_batch,
            throttle_ms = config.throttle.as_millis() as u64,
            "nanofeed configuration loaded"
        );

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize config tests that manipulate env vars.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "NANOFEED_RELAYS",
        "NANOFEED_DB_PATH",
        "NANOFEED_TOPIC",
        "NANOFEED_GENERAL_BATCH",
        "NANOFEED_CURRENCY_BATCH",
        "NANOFEED_THROTTLE_MS",
        "NANOFEED_UPDATE_INTERVAL_SECS",
        "NANOFEED_DISCOVERY_INTERVAL_SECS",
        "NANOFEED_LIVE_WINDOW_HOURS",
        "NANOFEED_BACKFILL_DAYS",
        "NANOFEED_QUERY_TIMEOUT_MS",
        "NANOFEED_PUBLISH_TIMEOUT_MS",
        "NANOFEED_CONNECT_TIMEOUT_MS",
    ];

    fn with_env_vars<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
        let _guard = ENV_MUTEX.lock().unwrap();

        let saved: Vec<_> = ENV_KEYS
            .iter()
            .map(|k| (*k, std::env::var(k).ok()))
            .collect();

        // SAFETY: Serialized by mutex; only test code touches these vars.
        unsafe {
            for k in ENV_KEYS {
                std::env::remove_var(k);
            }
            for (k, v) in vars {
                std::env::set_var(k, v);
            }
        }

        f();

        // SAFETY: Restoring original env state.
        unsafe {
            for (k, v) in &saved {
                match v {
                    Some(val) => std::env::set_var(k, val),
                    None => std::env::remove_var(k),
                }
            }
        }
    }

    #[test]
    fn config_defaults() {
        with_env_vars(&[], || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.relays.len(), 4);
            assert_eq!(config.relays[0], "wss://relay.damus.io");
            assert_eq!(config.topic, "nanocurrency");
            assert_eq!(config.general_batch, 20);
            assert_eq!(config.currency_batch, 10);
            assert_eq!(config.throttle, Duration::from_millis(1500));
            assert_eq!(config.update_interval, Duration::from_secs(30));
            assert_eq!(config.live_window, Duration::from_secs(86_400));
            assert_eq!(config.backfill_window, Duration::from_secs(30 * 86_400));
            assert_eq!(config.query_timeout, Duration::from_secs(3));
        });
    }

    #[test]
    fn config_overrides() {
        with_env_vars(
            &[
                ("NANOFEED_RELAYS", "wss://a.example, wss://b.example,"),
                ("NANOFEED_TOPIC", " XNO "),
                ("NANOFEED_GENERAL_BATCH", "50"),
                ("NANOFEED_BACKFILL_DAYS", "7"),
                ("NANOFEED_QUERY_TIMEOUT_MS", "800"),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.relays, vec!["wss://a.example", "wss://b.example"]);
                assert_eq!(config.topic, "xno");
                assert_eq!(config.general_batch, 50);
                assert_eq!(config.backfill_window, Duration::from_secs(7 * 86_400));
                assert_eq!(config.query_timeout, Duration::from_millis(800));
            },
        );
    }

    #[test]
    fn config_rejects_garbage_numbers() {
        with_env_vars(&[("NANOFEED_THROTTLE_MS", "soon")], || {
            let err = Config::from_env().unwrap_err();
            assert!(err.to_string().contains("NANOFEED_THROTTLE_MS"));
        });
    }

    #[test]
    fn config_zero_batch_is_clamped() {
        with_env_vars(&[("NANOFEED_CURRENCY_BATCH", "0")], || {
            assert_eq!(Config::from_env().unwrap().currency_batch, 1);
        });
    }
}
