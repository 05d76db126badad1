//! Helpers shared by unit and integration tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use fleet_common::RegisterHeadRequest;

use crate::config::{Config, LoggingConfig};
use crate::store::{FleetStore, KeyValueStore, MemoryStore, StoreError};
use crate::{ApiKeyAuth, AppState, CircuitBreaker, EventBus, FleetMetrics, FleetService, RateLimiter};

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.logging = LoggingConfig {
        level: "debug".to_string(),
    };
    config.store.timeout_ms = 200;
    config
}

/// Build app state from `config` over the given store backend.
pub fn create_state_with(config: Config, backend: Arc<dyn KeyValueStore>) -> AppState {
    let metrics = Arc::new(FleetMetrics::new());
    let breaker = Arc::new(CircuitBreaker::from_config(&config.circuit_breaker));
    let store = FleetStore::new(backend, config.store.timeout());
    let fleet = FleetService::new(
        store,
        breaker,
        metrics,
        EventBus::new(),
        config.routing.cache_ttl(),
    );
    let rate_limiter = RateLimiter::from_config(&config.rate_limit);
    let auth = match ApiKeyAuth::from_config(&config.auth) {
        Ok(auth) => auth,
        Err(e) => panic!("invalid test auth config: {}", e),
    };

    AppState {
        config,
        fleet: Arc::new(fleet),
        rate_limiter,
        auth,
    }
}

pub fn create_test_state() -> AppState {
    create_state_with(test_config(), Arc::new(MemoryStore::new()))
}

pub fn register_request(head_id: &str, model_type: &str, region: &str, load: u32) -> RegisterHeadRequest {
    RegisterHeadRequest {
        head_id: head_id.to_string(),
        endpoint: format!("http://{}:8080", head_id),
        model_type: model_type.to_string(),
        region: region.to_string(),
        version: "1.0".to_string(),
        metadata: HashMap::new(),
        current_load: load,
    }
}

/// A store whose every call fails.
#[derive(Debug, Default)]
pub struct FailingStore;

#[async_trait]
impl KeyValueStore for FailingStore {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
        Err(StoreError::Backend("store unavailable".to_string()))
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Backend("store unavailable".to_string()))
    }

    async fn sadd(&self, _key: &str, _member: &str) -> Result<(), StoreError> {
        Err(StoreError::Backend("store unavailable".to_string()))
    }

    async fn srem(&self, _key: &str, _member: &str) -> Result<(), StoreError> {
        Err(StoreError::Backend("store unavailable".to_string()))
    }

    async fn smembers(&self, _key: &str) -> Result<Vec<String>, StoreError> {
        Err(StoreError::Backend("store unavailable".to_string()))
    }

    async fn keys(&self, _prefix: &str) -> Result<Vec<String>, StoreError> {
        Err(StoreError::Backend("store unavailable".to_string()))
    }
}

/// An in-memory store that sleeps before every call.
#[derive(Debug)]
pub struct SlowStore {
    delay: Duration,
    inner: MemoryStore,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: MemoryStore::new(),
        }
    }
}

#[async_trait]
impl KeyValueStore for SlowStore {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.set(key, value).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(key).await
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.sadd(key, member).await
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.srem(key, member).await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.smembers(key).await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.keys(prefix).await
    }
}
