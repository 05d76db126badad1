//! The fleet service: one object owning the registry, policy, cache and
//! decision engine, mirroring every change to the store.
//!
//! Mutations are applied in memory first. The store write happens afterwards
//! on a cloned snapshot, outside any registry lock, and is guarded by the
//! `store` circuit breaker. A failed write is reported to the caller but the
//! in-memory change stands.
//!
//! Snapshot writes for one head are serialized and carry the record's
//! revision, so a slower write of an older snapshot never lands last.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use fleet_common::{
    FleetEvent, HeadRecord, RegisterHeadRequest, RoutingCriteria, RoutingDecision, RoutingPolicy,
    UpdateHeadStatusRequest,
};

use super::cache::DecisionCache;
use super::engine::DecisionEngine;
use super::policy::PolicyStore;
use super::registry::HeadRegistry;
use crate::error::{FleetError, Result};
use crate::events::EventBus;
use crate::metrics::FleetMetrics;
use crate::resilience::CircuitBreaker;
use crate::store::{FleetStore, StoreError};

/// Breaker service name guarding store writes.
pub const STORE_SERVICE: &str = "store";

/// What bootstrap recovered from the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub heads_restored: usize,
    pub policy_restored: bool,
}

pub struct FleetService {
    registry: Arc<HeadRegistry>,
    policy: Arc<PolicyStore>,
    cache: Arc<DecisionCache>,
    engine: DecisionEngine,
    store: FleetStore,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<FleetMetrics>,
    events: EventBus,
    /// Last revision written to the store, one gate per head.
    written: RwLock<HashMap<String, Arc<Mutex<u64>>>>,
}

impl FleetService {
    pub fn new(
        store: FleetStore,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<FleetMetrics>,
        events: EventBus,
        cache_ttl: Option<Duration>,
    ) -> Self {
        let registry = Arc::new(HeadRegistry::new());
        let policy = Arc::new(PolicyStore::default());
        let cache = Arc::new(DecisionCache::new(cache_ttl));
        let engine = DecisionEngine::new(
            registry.clone(),
            policy.clone(),
            cache.clone(),
            metrics.clone(),
        );
        Self {
            registry,
            policy,
            cache,
            engine,
            store,
            breaker,
            metrics,
            events,
            written: RwLock::new(HashMap::new()),
        }
    }

    pub fn metrics(&self) -> &Arc<FleetMetrics> {
        &self.metrics
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn cache(&self) -> &DecisionCache {
        &self.cache
    }

    /// Rebuild the in-memory state from the store.
    ///
    /// Store errors are logged and the service starts with what it has.
    pub async fn bootstrap(&self) -> BootstrapReport {
        let mut report = BootstrapReport::default();

        match self.store.load_heads().await {
            Ok(heads) => {
                report.heads_restored = self.registry.restore(heads).await;
            }
            Err(e) => tracing::warn!(error = %e, "Could not load heads from store"),
        }

        match self.store.load_policy().await {
            Ok(Some(policy)) => {
                self.policy.set(policy).await;
                report.policy_restored = true;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Could not load routing policy from store"),
        }

        tracing::info!(
            backend = self.store.backend_name(),
            heads = report.heads_restored,
            policy = report.policy_restored,
            "Fleet state restored"
        );
        report
    }

    /// Register or re-register a head.
    pub async fn register_head(&self, request: RegisterHeadRequest) -> Result<HeadRecord> {
        validate_id("head_id", &request.head_id)?;
        validate_id("endpoint", &request.endpoint)?;
        validate_id("model_type", &request.model_type)?;

        let previous_model = self
            .registry
            .get(&request.head_id)
            .await
            .map(|h| h.model_type);

        let record = self.registry.register(request).await;

        // A new or changed head may now win for its model type.
        self.cache.invalidate_model(&record.model_type).await;
        if let Some(model) = previous_model.filter(|m| *m != record.model_type) {
            self.cache.invalidate_model(&model).await;
        }
        self.metrics.inc_registrations();

        tracing::info!(
            head_id = %record.head_id,
            endpoint = %record.endpoint,
            model_type = %record.model_type,
            region = %record.region,
            "Head registered"
        );

        let persisted = self.save_snapshot(&record).await;

        self.events.publish(FleetEvent::HeadRegistered {
            head_id: record.head_id.clone(),
            endpoint: record.endpoint.clone(),
            model_type: record.model_type.clone(),
            region: record.region.clone(),
            timestamp: record.last_heartbeat,
        });

        persisted.map(|_| record)
    }

    /// Apply a heartbeat or status transition.
    pub async fn update_head_status(&self, request: UpdateHeadStatusRequest) -> Result<HeadRecord> {
        validate_id("head_id", &request.head_id)?;

        let change = self
            .registry
            .update_status(
                &request.head_id,
                request.status,
                request.current_load,
                request.reported_at(),
            )
            .await?;

        // Any head's load or availability can change every model_type answer.
        if change.status_changed() || change.load_changed() {
            self.cache.invalidate_model(&change.current.model_type).await;
        } else if !change.current.is_active() {
            self.cache.invalidate_head(&change.current.head_id).await;
        }
        self.metrics.inc_status_updates();

        if change.status_changed() {
            tracing::info!(
                head_id = %change.current.head_id,
                from = %change.previous.status,
                to = %change.current.status,
                "Head status changed"
            );
        } else {
            tracing::debug!(
                head_id = %change.current.head_id,
                load = change.current.current_load,
                "Head heartbeat"
            );
        }

        self.finish_status_change(change.current).await
    }

    /// Take a head out of rotation. Heads are never removed outright.
    pub async fn deregister_head(&self, head_id: &str) -> Result<HeadRecord> {
        validate_id("head_id", head_id)?;

        let change = self.registry.deactivate(head_id).await?;
        self.cache.invalidate_head(head_id).await;
        tracing::info!(head_id = %head_id, "Head deregistered");

        self.finish_status_change(change.current).await
    }

    async fn finish_status_change(&self, record: HeadRecord) -> Result<HeadRecord> {
        let persisted = self.save_snapshot(&record).await;

        self.events.publish(FleetEvent::HeadStatusChanged {
            head_id: record.head_id.clone(),
            status: record.status,
            current_load: record.current_load,
            timestamp: record.last_heartbeat,
        });

        persisted.map(|_| record)
    }

    /// Choose a head for a request. Never fails.
    pub async fn get_routing_decision(&self, criteria: &RoutingCriteria) -> RoutingDecision {
        let decision = self.engine.decide(criteria).await;

        if !decision.is_empty() {
            self.events.publish(FleetEvent::RoutingDecided {
                decision_id: Uuid::new_v4(),
                model_type: criteria.model_type.clone(),
                head_id: decision.head_id.clone(),
                strategy_used: decision.strategy_used.clone(),
                timestamp: Utc::now(),
            });
        }
        decision
    }

    /// Registered and active head counts.
    pub async fn head_counts(&self) -> (usize, usize) {
        (
            self.registry.count().await,
            self.registry.active_count().await,
        )
    }

    pub async fn get_all_heads(&self) -> Vec<HeadRecord> {
        self.registry.get_all().await
    }

    pub async fn get_head(&self, head_id: &str) -> Option<HeadRecord> {
        self.registry.get(head_id).await
    }

    pub async fn get_routing_policy(&self) -> RoutingPolicy {
        self.policy.get().await
    }

    /// Replace the routing policy and drop every cached decision.
    pub async fn update_routing_policy(&self, policy: RoutingPolicy) -> Result<()> {
        let default_strategy = policy.default_strategy;
        self.policy.set(policy.clone()).await;
        self.cache.clear().await;

        tracing::info!(default_strategy = %default_strategy, "Routing policy updated");

        let persisted = self.guarded(|| self.store.save_policy(&policy)).await;

        self.events.publish(FleetEvent::PolicyUpdated {
            default_strategy,
            timestamp: Utc::now(),
        });

        persisted
    }

    /// Mark heads with no heartbeat within `timeout` inactive.
    ///
    /// Returns the number of heads taken out of rotation.
    pub async fn sweep_stale(&self, timeout: Duration) -> usize {
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        let stale = self.registry.mark_stale(timeout).await;

        for record in &stale {
            self.cache.invalidate_head(&record.head_id).await;
            if let Err(e) = self.finish_status_change(record.clone()).await {
                tracing::warn!(head_id = %record.head_id, error = %e, "Could not persist stale head");
            }
        }
        stale.len()
    }

    /// Persist a head snapshot unless a newer one was already written.
    async fn save_snapshot(&self, record: &HeadRecord) -> Result<()> {
        let gate = self.write_gate(&record.head_id).await;
        let mut written = gate.lock().await;
        if *written > record.revision {
            tracing::debug!(
                head_id = %record.head_id,
                revision = record.revision,
                stored = *written,
                "Skipping superseded head snapshot"
            );
            return Ok(());
        }

        self.guarded(|| self.store.save_head(record)).await?;
        *written = record.revision;
        Ok(())
    }

    async fn write_gate(&self, head_id: &str) -> Arc<Mutex<u64>> {
        if let Some(gate) = self.written.read().await.get(head_id) {
            return gate.clone();
        }
        self.written
            .write()
            .await
            .entry(head_id.to_string())
            .or_default()
            .clone()
    }

    /// Run a store write under the `store` breaker.
    async fn guarded<F, Fut>(&self, write: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<(), StoreError>>,
    {
        if !self.breaker.allow(STORE_SERVICE).await {
            self.metrics.inc_breaker_rejections();
            self.metrics.inc_persistence_failures();
            tracing::warn!("Store circuit open, write skipped");
            return Err(FleetError::CircuitOpen(STORE_SERVICE.to_string()));
        }

        match write().await {
            Ok(()) => {
                self.breaker.success(STORE_SERVICE).await;
                Ok(())
            }
            Err(e) => {
                self.breaker.fail(STORE_SERVICE).await;
                self.metrics.inc_persistence_failures();
                tracing::warn!(error = %e, "Store write failed");
                Err(FleetError::Persistence(e))
            }
        }
    }
}

fn validate_id(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(FleetError::InvalidRequest(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// Periodically mark silent heads inactive.
///
/// Returns `None` when the heartbeat timeout or interval is zero.
pub fn spawn_stale_sweeper(
    service: Arc<FleetService>,
    interval: Duration,
    heartbeat_timeout: Duration,
) -> Option<JoinHandle<()>> {
    if interval.is_zero() || heartbeat_timeout.is_zero() {
        tracing::info!("Stale head sweep disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let swept = service.sweep_stale(heartbeat_timeout).await;
            if swept > 0 {
                tracing::info!(count = swept, "Marked stale heads inactive");
            }
        }
    }))
}
