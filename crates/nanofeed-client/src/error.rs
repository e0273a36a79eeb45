//! Error types for the feed client.
//!
//! Internal classification and caching paths swallow and log errors; these
//! variants surface from user-initiated actions (connect, post, tip, zap,
//! profile update) and from the relay pool when nothing can be reached.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the feed client.
#[derive(Error, Debug)]
pub enum Error {
    /// No relay is connected.
    #[error("no relays available")]
    NoRelaysAvailable,

    /// A single relay failed to connect, query, or publish.
    #[error("relay {relay}: {reason}")]
    Transport {
        /// Relay URL.
        relay: String,
        /// Failure description.
        reason: String,
    },

    /// An operation ran past its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Every relay rejected or timed out on a publish.
    #[error("publish failed on every relay: {}", .0.join("; "))]
    PublishFailed(Vec<String>),

    /// Signer or key problem.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Bad user input, caught before any network call.
    #[error("validation error: {0}")]
    Validation(String),

    /// Payment flow failure.
    #[error(transparent)]
    Payment(#[from] PaymentError),

    /// Relay list database error.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Identity errors are surfaced to the user immediately.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// No signer configured.
    #[error("no signer available: log in first")]
    MissingSigner,

    /// A secret key string without the expected `nsec1` prefix.
    #[error("secret key must start with nsec1")]
    WrongPrefix,

    /// A secret key string that does not decode.
    #[error("malformed secret key: {0}")]
    MalformedSecretKey(String),

    /// The signer refused or failed.
    #[error("signer error: {0}")]
    Signer(String),
}

/// Payment errors carry the underlying reason; a failed payment never marks
/// a post as tipped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    /// Lightning address is not of the form `name@domain`.
    #[error("invalid lightning address: {0}")]
    InvalidLightningAddress(String),

    /// LNURL endpoint answered with something unusable.
    #[error("bad LNURL response: {0}")]
    BadLnurlResponse(String),

    /// Invoice callback answered without a payable invoice.
    #[error("no invoice in callback response")]
    MissingInvoice,

    /// No wallet or widget to complete the payment.
    #[error("payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// HTTP failure talking to the LNURL server.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The user cancelled.
    #[error("payment cancelled")]
    Cancelled,
}

impl From<nanofeed_core::Error> for Error {
    fn from(err: nanofeed_core::Error) -> Self {
        match err {
            nanofeed_core::Error::Json(e) => Self::Json(e),
            nanofeed_core::Error::Io(e) => Self::Io(e),
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<reqwest::Error> for PaymentError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl Error {
    /// Convenience constructor for transport failures.
    pub fn transport(relay: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transport {
            relay: relay.into(),
            reason: reason.to_string(),
        }
    }
}
