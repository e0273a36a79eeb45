//! Error types shared by the nanofeed crates.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while interpreting events, profiles, and amounts.
#[derive(Error, Debug)]
pub enum Error {
    /// A currency address did not match the address grammar.
    #[error("invalid currency address: {0}")]
    InvalidAddress(String),

    /// An amount could not be parsed or was out of range.
    #[error("invalid amount '{input}': {reason}")]
    InvalidAmount {
        /// The input as supplied by the caller.
        input: String,
        /// Description of what's wrong.
        reason: String,
    },

    /// Event has an invalid field format (e.g., a tag without a value).
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// The name of the invalid field.
        field: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
