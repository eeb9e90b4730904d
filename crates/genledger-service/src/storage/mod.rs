//! Object storage for generated files.
//!
//! Objects live under structured `StorageKey`s
//! (`user_{owner}/{kind}/{resource}/{file}`). Backends never check
//! ownership themselves: callers compare the parsed owner before any read,
//! write or delete.

pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

pub use memory::MemoryObjectStore;
#[cfg(feature = "s3")]
pub use s3::S3ObjectStore;

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use genledger_core::StorageKey;

use crate::error::ApiError;

/// Error type for object storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No object under the key.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The backend failed.
    #[error("object storage error: {0}")]
    Backend(String),
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => Self::NotFound(format!("object not found: {key}")),
            StorageError::Backend(msg) => Self::UpstreamUnavailable {
                message: msg,
                details: None,
            },
        }
    }
}

/// Key-addressed blob store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object, replacing any previous one.
    async fn put(&self, key: &StorageKey, body: Bytes, content_type: &str)
        -> Result<(), StorageError>;

    /// Read an object.
    async fn get(&self, key: &StorageKey) -> Result<Bytes, StorageError>;

    /// A time-limited download URL.
    async fn presign_get(&self, key: &StorageKey, ttl: Duration) -> Result<String, StorageError>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, key: &StorageKey) -> Result<(), StorageError>;

    /// Raw keys under `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}
