//! In-memory object store.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::RwLock;

use genledger_core::StorageKey;

use super::{ObjectStore, StorageError};

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    content_type: String,
}

/// Object store held in process memory.
///
/// Presigned URLs use the `memory://` scheme and are only meaningful to
/// tests.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Content type recorded for `key`, if present.
    pub async fn content_type(&self, key: &StorageKey) -> Option<String> {
        self.objects
            .read()
            .await
            .get(&key.to_string())
            .map(|object| object.content_type.clone())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        key: &StorageKey,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &StorageKey) -> Result<Bytes, StorageError> {
        self.objects
            .read()
            .await
            .get(&key.to_string())
            .map(|object| object.body.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn presign_get(&self, key: &StorageKey, ttl: Duration) -> Result<String, StorageError> {
        if !self.objects.read().await.contains_key(&key.to_string()) {
            return Err(StorageError::NotFound(key.to_string()));
        }
        let expires = Utc::now().timestamp().saturating_add_unsigned(ttl.as_secs());
        Ok(format!("memory://{key}?expires={expires}"))
    }

    async fn delete(&self, key: &StorageKey) -> Result<(), StorageError> {
        self.objects.write().await.remove(&key.to_string());
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .objects
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}
