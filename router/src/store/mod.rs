//! Persistence port for the fleet registry.
//!
//! The registry and policy live in memory; a key-value store mirrors them so a
//! restarted router can rebuild its state. The store is never a second writer.
//!
//! Key layout:
//! - `head:<id>` -> JSON `HeadRecord`
//! - `model:<type>:heads` -> set of head ids
//! - `region:<region>:heads` -> set of head ids
//! - `routing:policy` -> JSON `RoutingPolicy`

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleet_common::{HeadRecord, RoutingPolicy};

/// Prefix of head record keys.
pub const HEAD_KEY_PREFIX: &str = "head:";
/// Key of the routing policy singleton.
pub const POLICY_KEY: &str = "routing:policy";

pub fn head_key(head_id: &str) -> String {
    format!("{}{}", HEAD_KEY_PREFIX, head_id)
}

pub fn model_index_key(model_type: &str) -> String {
    format!("model:{}:heads", model_type)
}

pub fn region_index_key(region: &str) -> String {
    format!("region:{}:heads", region)
}

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Store call timed out")]
    Timeout,
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Minimal key-value/set store contract.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Add a member to a set. Adding an existing member is a no-op.
    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// Remove a member from a set. Removing a missing member is a no-op.
    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// List plain keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Typed access to the fleet's keys, with a deadline on every call.
#[derive(Clone)]
pub struct FleetStore {
    backend: Arc<dyn KeyValueStore>,
    timeout: Duration,
}

impl FleetStore {
    pub fn new(backend: Arc<dyn KeyValueStore>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Write a head record and move it into its model and region indexes.
    ///
    /// Callers serialize writes per head; the stored record is read back to
    /// find index entries left behind by a model or region change.
    pub async fn save_head(&self, head: &HeadRecord) -> Result<(), StoreError> {
        if let Some(stored) = self.load_head(&head.head_id).await? {
            if stored.model_type != head.model_type {
                self.call(
                    self.backend
                        .srem(&model_index_key(&stored.model_type), &head.head_id),
                )
                .await?;
            }
            if stored.region != head.region && !stored.region.is_empty() {
                self.call(
                    self.backend
                        .srem(&region_index_key(&stored.region), &head.head_id),
                )
                .await?;
            }
        }

        let json = serde_json::to_string(head)?;
        self.call(self.backend.set(&head_key(&head.head_id), &json))
            .await?;
        self.call(
            self.backend
                .sadd(&model_index_key(&head.model_type), &head.head_id),
        )
        .await?;
        if !head.region.is_empty() {
            self.call(self.backend.sadd(&region_index_key(&head.region), &head.head_id))
                .await?;
        }
        Ok(())
    }

    pub async fn load_head(&self, head_id: &str) -> Result<Option<HeadRecord>, StoreError> {
        match self.call(self.backend.get(&head_key(head_id))).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Load every persisted head. Unreadable records are skipped.
    pub async fn load_heads(&self) -> Result<Vec<HeadRecord>, StoreError> {
        let keys = self.call(self.backend.keys(HEAD_KEY_PREFIX)).await?;
        let mut heads = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(json) = self.call(self.backend.get(&key)).await? else {
                continue;
            };
            match serde_json::from_str::<HeadRecord>(&json) {
                Ok(head) => heads.push(head),
                Err(e) => tracing::warn!(key = %key, error = %e, "Skipping unreadable head record"),
            }
        }
        Ok(heads)
    }

    pub async fn heads_for_model(&self, model_type: &str) -> Result<Vec<String>, StoreError> {
        self.call(self.backend.smembers(&model_index_key(model_type)))
            .await
    }

    pub async fn heads_in_region(&self, region: &str) -> Result<Vec<String>, StoreError> {
        self.call(self.backend.smembers(&region_index_key(region)))
            .await
    }

    pub async fn save_policy(&self, policy: &RoutingPolicy) -> Result<(), StoreError> {
        let json = serde_json::to_string(policy)?;
        self.call(self.backend.set(POLICY_KEY, &json)).await
    }

    pub async fn load_policy(&self) -> Result<Option<RoutingPolicy>, StoreError> {
        match self.call(self.backend.get(POLICY_KEY)).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn call<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout)?
    }
}
