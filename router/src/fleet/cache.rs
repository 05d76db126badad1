//! Memoized routing outcomes.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use fleet_common::{parse_size, RoutingCriteria};

/// Cache key derived from the request criteria.
///
/// The strategy is the raw requested name (empty when the policy default
/// applies), so a policy change must clear the cache. The model hints are
/// every criteria field a scoring strategy reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub model_type: String,
    pub region_preference: String,
    pub strategy: String,
    pub model_hint: String,
    pub size_hint: String,
    pub capability: String,
}

impl CacheKey {
    pub fn from_criteria(criteria: &RoutingCriteria) -> Self {
        let size_hint = criteria
            .model_size()
            .map(|raw| match parse_size(raw) {
                Some(size) => size.to_string(),
                None => raw.to_ascii_lowercase(),
            })
            .unwrap_or_default();
        Self {
            model_type: criteria.model_type.clone(),
            region_preference: criteria.region_preference.clone(),
            strategy: criteria.requested_strategy().unwrap_or_default().to_string(),
            model_hint: criteria.model_version().unwrap_or_default().to_string(),
            size_hint,
            capability: criteria
                .capability()
                .map(str::to_ascii_lowercase)
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    head_id: String,
    inserted_at: Instant,
}

#[derive(Debug, Default)]
pub struct DecisionCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    ttl: Option<Duration>,
}

impl DecisionCache {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Head id cached for `key`, unless the entry has expired.
    pub async fn get(&self, key: &CacheKey) -> Option<String> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        match self.ttl {
            Some(ttl) if entry.inserted_at.elapsed() >= ttl => None,
            _ => Some(entry.head_id.clone()),
        }
    }

    pub async fn insert(&self, key: CacheKey, head_id: String) {
        self.entries.write().await.insert(
            key,
            CacheEntry {
                head_id,
                inserted_at: Instant::now(),
            },
        );
    }

    pub async fn remove(&self, key: &CacheKey) {
        self.entries.write().await.remove(key);
    }

    /// Drop every entry pointing at `head_id`. Returns how many were removed.
    pub async fn invalidate_head(&self, head_id: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.head_id != head_id);
        before - entries.len()
    }

    /// Drop every entry for `model_type`.
    pub async fn invalidate_model(&self, model_type: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| key.model_type != model_type);
        before - entries.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
