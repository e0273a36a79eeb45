//! Direct currency transfers through an external widget.

use async_trait::async_trait;
use nanofeed_core::address::format_raw;

use crate::error::PaymentError;

/// What the widget is asked to pay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TipRequest {
    pub address: String,
    pub amount_raw: u128,
    pub title: String,
}

impl TipRequest {
    /// `nano:` payment URI understood by wallets.
    pub fn payment_uri(&self) -> String {
        format!("nano:{}?amount={}", self.address, self.amount_raw)
    }

    /// Amount in whole-unit decimal form.
    pub fn amount_display(&self) -> String {
        format_raw(self.amount_raw)
    }
}

/// How the widget finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TipOutcome {
    /// Sent; `block` is the send block hash.
    Paid { block: String },
    Cancelled,
}

impl TipOutcome {
    /// Interpret a user's reply to "paste the block hash": blank cancels.
    pub fn from_reply(reply: &str) -> Self {
        let block = reply.trim();
        if block.is_empty() {
            Self::Cancelled
        } else {
            Self::Paid {
                block: block.to_string(),
            }
        }
    }
}

/// External transfer widget.
#[async_trait]
pub trait CurrencyWidget: Send + Sync {
    async fn open(&self, request: TipRequest) -> Result<TipOutcome, PaymentError>;
}
