//! The explicit application context.
//!
//! One `AppContext` owns the relay pool, caches, and known-user set, and
//! hands shared pieces to every component it builds. Nothing is global.

use std::sync::Arc;

use crate::actions::{Engagement, Publisher};
use crate::classify::{Classifier, KnownCurrencyUsers};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::feed::{Discovery, FeedController, FeedSettings};
use crate::identity::Identity;
use crate::payment::{LnurlHttp, PaymentCoordinator};
use crate::profile::ProfileResolver;
use crate::relay::{NormalizeResult, PoolTimeouts, RelayListStore, RelayPool, RelayTransport, normalize_relay_url};
use crate::render::FeedRenderer;
use crate::store::EventStore;

/// Shared state for one client session.
pub struct AppContext {
    pub config: Config,
    pub pool: Arc<RelayPool>,
    pub store: Arc<EventStore>,
    pub resolver: Arc<ProfileResolver>,
    pub known: Arc<KnownCurrencyUsers>,
    pub classifier: Arc<Classifier>,
    relay_list: RelayListStore,
}

impl AppContext {
    pub fn new(config: Config, transport: Arc<dyn RelayTransport>, relay_list: RelayListStore) -> Self {
        let timeouts = PoolTimeouts {
            query: config.query_timeout,
            publish: config.publish_timeout,
            connect: config.connect_timeout,
        };
        let pool = Arc::new(RelayPool::new(transport, timeouts));
        let store = Arc::new(EventStore::new());
        let resolver = Arc::new(ProfileResolver::new(pool.clone(), store.clone()));
        let known = Arc::new(KnownCurrencyUsers::new());
        let classifier = Arc::new(Classifier::new(known.clone(), resolver.clone(), &config.topic));
        Self {
            config,
            pool,
            store,
            resolver,
            known,
            classifier,
            relay_list,
        }
    }

    /// The relays to connect at startup: the saved list when one exists,
    /// otherwise the configured seeds.
    pub fn startup_relays(&self) -> Vec<String> {
        let saved = match self.relay_list.load() {
            Ok(saved) => saved,
            Err(e) => {
                tracing::warn!("Failed to read saved relay list, using seeds: {}", e);
                None
            }
        };
        let candidates = match saved {
            Some(list) if !list.is_empty() => {
                tracing::info!("Using {} saved relays", list.len());
                list
            }
            _ => self.config.relays.clone(),
        };

        let mut relays = Vec::with_capacity(candidates.len());
        for url in candidates {
            match normalize_relay_url(&url) {
                NormalizeResult::Ok(normalized) => {
                    if !relays.contains(&normalized) {
                        relays.push(normalized);
                    }
                }
                NormalizeResult::Invalid(reason) => {
                    tracing::warn!("Skipping relay {}: {}", url, reason);
                }
            }
        }
        relays
    }

    /// Connect to the startup relays. Returns the number now live.
    pub async fn start(&self) -> Result<usize> {
        let relays = self.startup_relays();
        let live = self.pool.connect(&relays).await;
        if live == 0 {
            return Err(Error::NoRelaysAvailable);
        }
        Ok(live)
    }

    /// Live relay URLs.
    pub fn relays(&self) -> Vec<String> {
        self.pool.urls()
    }

    /// Validate, connect, and persist a new relay. Returns the normalized URL.
    ///
    /// Like [`remove_relay`](Self::remove_relay), this saves the live set.
    pub async fn add_relay(&self, url: &str) -> Result<String> {
        let url = match normalize_relay_url(url) {
            NormalizeResult::Ok(url) => url,
            NormalizeResult::Invalid(reason) => return Err(Error::Validation(reason)),
        };
        if self.pool.contains(&url) {
            return Err(Error::Validation("relay already exists".to_string()));
        }

        self.pool.connect_one(&url).await?;
        self.persist();
        tracing::info!("Added relay {}", url);
        Ok(url)
    }

    /// Disconnect and forget a relay. Returns false if it was neither
    /// connected nor saved.
    ///
    /// The saved list is rewritten from the live set, so call this after
    /// [`start`](Self::start).
    pub async fn remove_relay(&self, url: &str) -> bool {
        let url = match normalize_relay_url(url) {
            NormalizeResult::Ok(url) => url,
            NormalizeResult::Invalid(_) => url.trim().to_string(),
        };
        let connected = self.pool.disconnect(&url).await;
        let saved = self
            .relay_list
            .load()
            .ok()
            .flatten()
            .is_some_and(|list| list.contains(&url));
        if connected || saved {
            self.persist();
            tracing::info!("Removed relay {}", url);
        }
        connected || saved
    }

    fn persist(&self) {
        if let Err(e) = self.relay_list.save(&self.pool.urls()) {
            tracing::warn!("Failed to save relay list: {}", e);
        }
    }

    pub fn feed_controller(&self, renderer: Arc<dyn FeedRenderer>) -> FeedController {
        FeedController::new(
            FeedSettings::from(&self.config),
            self.pool.clone(),
            self.store.clone(),
            self.resolver.clone(),
            self.classifier.clone(),
            renderer,
        )
    }

    pub fn discovery(&self) -> Discovery {
        Discovery::new(
            self.pool.clone(),
            self.store.clone(),
            self.resolver.clone(),
            self.classifier.clone(),
            &self.config.topic,
            self.config.discovery_interval,
            self.config.backfill_window,
        )
    }

    pub fn publisher(&self, identity: Option<Identity>) -> Publisher {
        Publisher::new(self.pool.clone(), self.resolver.clone(), identity, &self.config.topic)
    }

    pub fn engagement(&self) -> Engagement {
        Engagement::new(self.pool.clone())
    }

    pub fn payments(&self, publisher: Arc<Publisher>, http: Arc<dyn LnurlHttp>) -> PaymentCoordinator {
        PaymentCoordinator::new(publisher, http)
    }
}
