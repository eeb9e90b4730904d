//! Error types for genledger core types.

use crate::ids::IdError;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while validating or parsing core types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// A credit amount was zero or negative.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// A job specification failed validation.
    #[error("invalid job spec: {0}")]
    InvalidSpec(String),

    /// A storage key does not follow the `user_{owner}/{kind}/{resource}/{name}` layout.
    #[error("invalid storage key: {0}")]
    InvalidStorageKey(String),

    /// An enumerated value was not recognized.
    #[error("unknown {kind}: {value}")]
    UnknownVariant {
        /// The enum being parsed.
        kind: &'static str,
        /// The offending input.
        value: String,
    },
}
