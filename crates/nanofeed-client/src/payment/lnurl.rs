//! Lightning address resolution (LNURL-pay) and wallet boundaries.
//!
//! A lightning address `name@domain` resolves through
//! `https://{domain}/.well-known/lnurlp/{name}`, which names a callback. The
//! callback, given an amount in millisats and the signed zap request, answers
//! with a payable invoice.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::PaymentError;

/// HTTP timeout for LNURL requests.
const LNURL_TIMEOUT: Duration = Duration::from_secs(10);

/// A parsed `name@domain` lightning address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightningAddress {
    pub name: String,
    pub domain: String,
}

impl LightningAddress {
    pub fn parse(input: &str) -> Result<Self, PaymentError> {
        let invalid = || PaymentError::InvalidLightningAddress(input.to_string());
        let (name, domain) = input.trim().split_once('@').ok_or_else(invalid)?;
        let bad = |s: &str| s.is_empty() || s.contains(['/', '@', '?', '#']) || s.contains(char::is_whitespace);
        if bad(name) || bad(domain) || !domain.contains('.') {
            return Err(invalid());
        }
        Ok(Self {
            name: name.to_lowercase(),
            domain: domain.to_lowercase(),
        })
    }

    /// LNURL-pay discovery endpoint.
    pub fn well_known_url(&self) -> String {
        format!("https://{}/.well-known/lnurlp/{}", self.domain, self.name)
    }
}

impl std::fmt::Display for LightningAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.domain)
    }
}

/// GET returning JSON.
#[async_trait]
pub trait LnurlHttp: Send + Sync {
    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, PaymentError>;
}

/// [`LnurlHttp`] over reqwest.
pub struct ReqwestLnurl {
    client: reqwest::Client,
}

impl ReqwestLnurl {
    pub fn new() -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .timeout(LNURL_TIMEOUT)
            .build()
            .map_err(|e| PaymentError::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LnurlHttp for ReqwestLnurl {
    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, PaymentError> {
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PaymentError::Http(format!("{url} answered {status}")));
        }
        Ok(response.json::<Value>().await?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayParams {
    callback: Option<String>,
    min_sendable: Option<u64>,
    max_sendable: Option<u64>,
    status: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InvoiceResponse {
    pr: Option<String>,
    status: Option<String>,
    reason: Option<String>,
}

fn check_status(status: Option<&str>, reason: Option<&str>) -> Result<(), PaymentError> {
    if status.is_some_and(|s| s.eq_ignore_ascii_case("ERROR")) {
        return Err(PaymentError::BadLnurlResponse(
            reason.unwrap_or("server reported an error").to_string(),
        ));
    }
    Ok(())
}

/// Resolve `address` and request an invoice for `msats` carrying
/// `zap_request` (signed event JSON).
pub async fn fetch_invoice(
    http: &dyn LnurlHttp,
    address: &LightningAddress,
    msats: u64,
    zap_request: &str,
) -> Result<String, PaymentError> {
    let params: PayParams = serde_json::from_value(http.get_json(&address.well_known_url(), &[]).await?)
        .map_err(|e| PaymentError::BadLnurlResponse(e.to_string()))?;
    check_status(params.status.as_deref(), params.reason.as_deref())?;

    let callback = params
        .callback
        .filter(|c| !c.is_empty())
        .ok_or_else(|| PaymentError::BadLnurlResponse("missing callback".to_string()))?;
    if let Some(min) = params.min_sendable
        && msats < min
    {
        return Err(PaymentError::BadLnurlResponse(format!(
            "amount below minimum of {} sats",
            min.div_ceil(1000)
        )));
    }
    if let Some(max) = params.max_sendable
        && msats > max
    {
        return Err(PaymentError::BadLnurlResponse(format!(
            "amount above maximum of {} sats",
            max / 1000
        )));
    }

    tracing::debug!("Requesting {} msat invoice from {}", msats, address);
    let query = [("amount", msats.to_string()), ("nostr", zap_request.to_string())];
    let invoice: InvoiceResponse = serde_json::from_value(http.get_json(&callback, &query).await?)
        .map_err(|e| PaymentError::BadLnurlResponse(e.to_string()))?;
    check_status(invoice.status.as_deref(), invoice.reason.as_deref())?;

    invoice
        .pr
        .filter(|pr| !pr.is_empty())
        .ok_or(PaymentError::MissingInvoice)
}

/// A wallet that can pay invoices directly.
#[async_trait]
pub trait LightningWallet: Send + Sync {
    /// Pay `invoice`, returning the preimage.
    async fn pay_invoice(&self, invoice: &str) -> Result<String, PaymentError>;
}

/// Fallback when no wallet is available: hand the invoice to the user.
#[async_trait]
pub trait ManualPay: Send + Sync {
    /// Show or copy `invoice`. Returns true if the user confirms payment.
    async fn hand_off(&self, invoice: &str) -> Result<bool, PaymentError>;
}
