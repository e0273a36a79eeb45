//! Tips and zaps.
//!
//! Two flows: a direct currency transfer through a [`CurrencyWidget`], and a
//! lightning zap through LNURL-pay. Inputs are validated before anything
//! external is touched, and a post is marked tipped or zapped only when the
//! payment is confirmed.

pub mod lnurl;
pub mod nano;

use std::collections::HashSet;
use std::sync::Arc;

use nanofeed_core::metrics::record_payment;
use nanofeed_core::{Profile, nano_to_raw, validate_nano_address};
use nostr_sdk::prelude::JsonUtil;
use parking_lot::RwLock;

use crate::actions::Publisher;
use crate::error::{Error, PaymentError, Result};

pub use lnurl::{LightningAddress, LightningWallet, LnurlHttp, ManualPay, ReqwestLnurl, fetch_invoice};
pub use nano::{CurrencyWidget, TipOutcome, TipRequest};

/// How a zap finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZapOutcome {
    /// Paid; the preimage when a wallet reported one.
    Paid { preimage: Option<String> },
    /// The invoice was handed to the user, who did not confirm payment.
    Unconfirmed { invoice: String },
}

/// Runs payment flows and remembers which posts were paid.
pub struct PaymentCoordinator {
    publisher: Arc<Publisher>,
    http: Arc<dyn LnurlHttp>,
    widget: Option<Arc<dyn CurrencyWidget>>,
    wallet: Option<Arc<dyn LightningWallet>>,
    manual: Option<Arc<dyn ManualPay>>,
    tipped: RwLock<HashSet<String>>,
    zapped: RwLock<HashSet<String>>,
}

impl PaymentCoordinator {
    pub fn new(publisher: Arc<Publisher>, http: Arc<dyn LnurlHttp>) -> Self {
        Self {
            publisher,
            http,
            widget: None,
            wallet: None,
            manual: None,
            tipped: RwLock::new(HashSet::new()),
            zapped: RwLock::new(HashSet::new()),
        }
    }

    pub fn with_widget(mut self, widget: Arc<dyn CurrencyWidget>) -> Self {
        self.widget = Some(widget);
        self
    }

    pub fn with_wallet(mut self, wallet: Arc<dyn LightningWallet>) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn with_manual_pay(mut self, manual: Arc<dyn ManualPay>) -> Self {
        self.manual = Some(manual);
        self
    }

    pub fn is_tipped(&self, post_id: &str) -> bool {
        self.tipped.read().contains(post_id)
    }

    pub fn is_zapped(&self, post_id: &str) -> bool {
        self.zapped.read().contains(post_id)
    }

    /// Tip `amount_nano` (decimal, e.g. `"0.133"`) to the profile's address.
    pub async fn tip(&self, profile: &Profile, amount_nano: &str, post: Option<&str>) -> Result<TipOutcome> {
        let address = profile
            .currency_address
            .clone()
            .filter(|a| validate_nano_address(a))
            .ok_or_else(|| Error::Validation(format!("{} has no currency address", profile.label())))?;
        let amount_raw = nano_to_raw(amount_nano)?;
        if amount_raw == 0 {
            return Err(Error::Validation("tip amount must be positive".to_string()));
        }
        let widget = self
            .widget
            .as_ref()
            .ok_or_else(|| PaymentError::ProviderUnavailable("no currency widget".to_string()))?;

        let request = TipRequest {
            address,
            amount_raw,
            title: format!("Tip {}", profile.label()),
        };
        let outcome = match widget.open(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                record_payment("tip", "failed");
                return Err(e.into());
            }
        };

        match &outcome {
            TipOutcome::Paid { block } => {
                record_payment("tip", "paid");
                tracing::info!("Tip of {} NANO to {} sent in block {}", amount_nano, profile.label(), block);
                if let Some(post) = post {
                    self.tipped.write().insert(post.to_string());
                }
            }
            TipOutcome::Cancelled => record_payment("tip", "cancelled"),
        }
        Ok(outcome)
    }

    /// Zap `sats` to the profile's lightning address.
    ///
    /// Publishes the zap request, resolves an invoice, then pays through the
    /// wallet or hands the invoice to the user.
    pub async fn zap(&self, profile: &Profile, sats: u64, post: Option<&str>) -> Result<ZapOutcome> {
        let address = LightningAddress::parse(&profile.lud16)?;
        if sats == 0 {
            return Err(Error::Validation("zap amount must be positive".to_string()));
        }
        if self.wallet.is_none() && self.manual.is_none() {
            return Err(PaymentError::ProviderUnavailable("no lightning wallet".to_string()).into());
        }

        let outcome = self.zap_inner(profile, &address, sats, post).await;
        match &outcome {
            Ok(ZapOutcome::Paid { .. }) => {
                record_payment("zap", "paid");
                if let Some(post) = post {
                    self.zapped.write().insert(post.to_string());
                }
            }
            Ok(ZapOutcome::Unconfirmed { .. }) => record_payment("zap", "unconfirmed"),
            Err(e) => {
                record_payment("zap", "failed");
                tracing::warn!("Zap to {} failed: {}", address, e);
            }
        }
        outcome
    }

    async fn zap_inner(
        &self,
        profile: &Profile,
        address: &LightningAddress,
        sats: u64,
        post: Option<&str>,
    ) -> Result<ZapOutcome> {
        let request = self.publisher.zap_request(&profile.author, sats, post).await?;
        let invoice = fetch_invoice(self.http.as_ref(), address, sats * 1000, &request.as_json()).await?;

        if let Some(wallet) = &self.wallet {
            let preimage = wallet.pay_invoice(&invoice).await?;
            return Ok(ZapOutcome::Paid {
                preimage: Some(preimage),
            });
        }
        let manual = self
            .manual
            .as_ref()
            .ok_or_else(|| PaymentError::ProviderUnavailable("no lightning wallet".to_string()))?;
        if manual.hand_off(&invoice).await? {
            Ok(ZapOutcome::Paid { preimage: None })
        } else {
            Ok(ZapOutcome::Unconfirmed { invoice })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use crate::profile::ProfileResolver;
    use crate::relay::{PoolTimeouts, RelayPool};
    use crate::store::EventStore;
    use crate::testing::{ADDR, MockTransport};
    use super::lnurl::tests::MockHttp;
    use async_trait::async_trait;
    use nostr_sdk::prelude::{EventId, Keys};
    use parking_lot::Mutex;
    use serde_json::json;

    struct Widget(Mutex<Vec<TipRequest>>, std::result::Result<TipOutcome, PaymentError>);

    #[async_trait]
    impl CurrencyWidget for Widget {
        async fn open(&self, request: TipRequest) -> std::result::Result<TipOutcome, PaymentError> {
            self.0.lock().push(request);
            self.1.clone()
        }
    }

    struct Wallet(std::result::Result<String, PaymentError>, Mutex<Vec<String>>);

    impl Wallet {
        fn answering(result: std::result::Result<String, PaymentError>) -> Arc<Self> {
            Arc::new(Self(result, Mutex::new(Vec::new())))
        }
    }

    #[async_trait]
    impl LightningWallet for Wallet {
        async fn pay_invoice(&self, invoice: &str) -> std::result::Result<String, PaymentError> {
            self.1.lock().push(invoice.to_string());
            self.0.clone()
        }
    }

    struct Manual(bool, Mutex<Vec<String>>);

    #[async_trait]
    impl ManualPay for Manual {
        async fn hand_off(&self, invoice: &str) -> std::result::Result<bool, PaymentError> {
            self.1.lock().push(invoice.to_string());
            Ok(self.0)
        }
    }

    async fn setup(http: MockHttp) -> (Arc<MockTransport>, PaymentCoordinator) {
        let transport = Arc::new(MockTransport::default());
        let pool = Arc::new(RelayPool::new(transport.clone(), PoolTimeouts::default()));
        pool.connect(&["wss://a.test".to_string()]).await;
        let resolver = Arc::new(ProfileResolver::new(pool.clone(), Arc::new(EventStore::new())));
        let publisher = Arc::new(Publisher::new(pool, resolver, Some(Identity::generate()), "nanocurrency"));
        (transport, PaymentCoordinator::new(publisher, Arc::new(http)))
    }

    fn recipient() -> Profile {
        Profile {
            name: "alice".to_string(),
            lud16: "alice@wallet.example".to_string(),
            currency_address: Some(ADDR.to_string()),
            ..Profile::empty(Keys::generate().public_key().to_hex())
        }
    }

    fn post_id() -> String {
        EventId::all_zeros().to_hex()
    }

    fn lnurl_ok() -> MockHttp {
        MockHttp::answering(vec![
            Ok(json!({"callback": "https://wallet.example/cb"})),
            Ok(json!({"pr": "lnbc1invoice"})),
        ])
    }

    #[tokio::test(start_paused = true)]
    async fn paid_tip_marks_post() {
        let widget = Arc::new(Widget(
            Mutex::new(Vec::new()),
            Ok(TipOutcome::Paid { block: "B".to_string() }),
        ));
        let (_, coordinator) = setup(MockHttp::default()).await;
        let coordinator = coordinator.with_widget(widget.clone());

        let outcome = coordinator.tip(&recipient(), "0.133", Some("post1")).await.unwrap();
        assert_eq!(outcome, TipOutcome::Paid { block: "B".to_string() });
        assert!(coordinator.is_tipped("post1"));

        let request = widget.0.lock()[0].clone();
        assert_eq!(request.address, ADDR);
        assert_eq!(request.amount_raw, 133 * 10u128.pow(27));
        assert_eq!(request.title, "Tip alice");
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_or_failed_tip_marks_nothing() {
        let cancel = Arc::new(Widget(Mutex::new(Vec::new()), Ok(TipOutcome::Cancelled)));
        let (_, coordinator) = setup(MockHttp::default()).await;
        let coordinator = coordinator.with_widget(cancel);
        assert_eq!(
            coordinator.tip(&recipient(), "1", Some("p")).await.unwrap(),
            TipOutcome::Cancelled
        );
        assert!(!coordinator.is_tipped("p"));

        let failing = Arc::new(Widget(
            Mutex::new(Vec::new()),
            Err(PaymentError::ProviderUnavailable("offline".to_string())),
        ));
        let (_, coordinator) = coordinator_with(failing).await;
        assert!(coordinator.tip(&recipient(), "1", Some("p")).await.is_err());
        assert!(!coordinator.is_tipped("p"));
    }

    async fn coordinator_with(widget: Arc<Widget>) -> (Arc<MockTransport>, PaymentCoordinator) {
        let (transport, coordinator) = setup(MockHttp::default()).await;
        (transport, coordinator.with_widget(widget))
    }

    #[tokio::test(start_paused = true)]
    async fn tip_validates_before_widget() {
        let widget = Arc::new(Widget(Mutex::new(Vec::new()), Ok(TipOutcome::Cancelled)));
        let (_, coordinator) = coordinator_with(widget.clone()).await;

        for amount in ["0", "-1", "abc", "0.0000000000000000000000000000001"] {
            assert!(
                matches!(coordinator.tip(&recipient(), amount, None).await, Err(Error::Validation(_))),
                "{amount}"
            );
        }
        let no_address = Profile::empty("x");
        assert!(matches!(
            coordinator.tip(&no_address, "1", None).await,
            Err(Error::Validation(_))
        ));
        assert!(widget.0.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn zap_through_wallet() {
        let (transport, coordinator) = setup(lnurl_ok()).await;
        let coordinator = coordinator.with_wallet(Wallet::answering(Ok("pre".to_string())));

        let post = post_id();
        let outcome = coordinator.zap(&recipient(), 21, Some(&post)).await.unwrap();
        assert_eq!(outcome, ZapOutcome::Paid { preimage: Some("pre".to_string()) });
        assert!(coordinator.is_zapped(&post));

        let published = transport.relay("wss://a.test").published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].kind.as_u16(), 9734);
    }

    #[tokio::test(start_paused = true)]
    async fn zap_falls_back_to_manual_pay() {
        let manual = Arc::new(Manual(false, Mutex::new(Vec::new())));
        let (_, coordinator) = setup(lnurl_ok()).await;
        let coordinator = coordinator.with_manual_pay(manual.clone());

        let post = post_id();
        let outcome = coordinator.zap(&recipient(), 21, Some(&post)).await.unwrap();
        assert_eq!(
            outcome,
            ZapOutcome::Unconfirmed {
                invoice: "lnbc1invoice".to_string()
            }
        );
        assert_eq!(manual.1.lock().clone(), vec!["lnbc1invoice"]);
        assert!(!coordinator.is_zapped(&post));
    }

    #[tokio::test(start_paused = true)]
    async fn zap_requires_lightning_address_and_wallet() {
        let (transport, coordinator) = setup(lnurl_ok()).await;
        let no_wallet = coordinator.zap(&recipient(), 21, None).await;
        assert!(matches!(
            no_wallet,
            Err(Error::Payment(PaymentError::ProviderUnavailable(_)))
        ));

        let coordinator = coordinator.with_wallet(Wallet::answering(Ok("pre".to_string())));
        let mut profile = recipient();
        profile.lud16 = "not-an-address".to_string();
        assert!(matches!(
            coordinator.zap(&profile, 21, None).await,
            Err(Error::Payment(PaymentError::InvalidLightningAddress(_)))
        ));
        assert!(transport.relay("wss://a.test").published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_wallet_payment_marks_nothing() {
        let (transport, coordinator) = setup(lnurl_ok()).await;
        let wallet = Wallet::answering(Err(PaymentError::Http("route not found".to_string())));
        let coordinator = coordinator.with_wallet(wallet.clone());

        let post = post_id();
        assert!(matches!(
            coordinator.zap(&recipient(), 21, Some(&post)).await,
            Err(Error::Payment(PaymentError::Http(_)))
        ));
        assert_eq!(wallet.1.lock().clone(), vec!["lnbc1invoice"]);
        assert_eq!(transport.relay("wss://a.test").published().len(), 1);
        assert!(!coordinator.is_zapped(&post));
    }
}
