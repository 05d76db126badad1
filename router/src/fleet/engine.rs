//! Routing decisions over the registry, cache first.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use fleet_common::{HeadRecord, RoutingCriteria, RoutingDecision};

use super::cache::{CacheKey, DecisionCache};
use super::policy::PolicyStore;
use super::registry::HeadRegistry;
use super::strategy::{self, SelectionContext, StrategyTuning};
use crate::metrics::FleetMetrics;

pub const STRATEGY_CACHED: &str = "cached";
pub const STRATEGY_NONE: &str = "none";
pub const REASON_NO_HEADS: &str = "no available heads for model type";
pub const REASON_NO_SELECTION: &str = "no suitable head found";

/// Picks a head for each request. Never fails; an empty decision is a result.
pub struct DecisionEngine {
    registry: Arc<HeadRegistry>,
    policy: Arc<PolicyStore>,
    cache: Arc<DecisionCache>,
    metrics: Arc<FleetMetrics>,
    /// Round-robin cursors, one per model type.
    cursors: RwLock<HashMap<String, Arc<AtomicUsize>>>,
}

impl DecisionEngine {
    pub fn new(
        registry: Arc<HeadRegistry>,
        policy: Arc<PolicyStore>,
        cache: Arc<DecisionCache>,
        metrics: Arc<FleetMetrics>,
    ) -> Self {
        Self {
            registry,
            policy,
            cache,
            metrics,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub async fn decide(&self, criteria: &RoutingCriteria) -> RoutingDecision {
        let key = CacheKey::from_criteria(criteria);

        if let Some(decision) = self.cached(&key, criteria).await {
            return decision;
        }
        self.metrics.inc_cache_misses();

        let candidates = self.registry.list_active(&criteria.model_type).await;
        if candidates.is_empty() {
            tracing::debug!(model_type = %criteria.model_type, "No active heads for model type");
            return RoutingDecision::empty(STRATEGY_NONE, REASON_NO_HEADS);
        }

        let policy = self.policy.get().await;
        let strategy = criteria.effective_strategy(policy.default_strategy);
        let ctx = SelectionContext {
            criteria,
            policy: &policy,
            tuning: StrategyTuning::from_policy(&policy),
        };
        let cursor = self.cursor(&criteria.model_type).await;
        let mut next_turn = || cursor.fetch_add(1, Ordering::Relaxed);

        let Some(selection) = strategy::select(strategy, &candidates, &ctx, &mut next_turn) else {
            return RoutingDecision::empty(strategy.as_str(), REASON_NO_SELECTION);
        };

        let head = selection.head;
        if selection.cacheable {
            self.cache.insert(key, head.head_id.clone()).await;
            // The head may have gone inactive while we were choosing.
            let still_active = self
                .registry
                .get(&head.head_id)
                .await
                .map(|h| h.is_active())
                .unwrap_or(false);
            if !still_active {
                self.cache.invalidate_head(&head.head_id).await;
            }
        }

        self.metrics
            .record_decision(
                strategy.as_str(),
                &criteria.model_type,
                &criteria.region_preference,
            )
            .await;

        tracing::debug!(
            head_id = %head.head_id,
            model_type = %criteria.model_type,
            strategy = %strategy,
            reason = %selection.reason,
            "Routing decision"
        );

        decision_for(head, strategy.as_str(), selection.reason)
    }

    async fn cached(&self, key: &CacheKey, criteria: &RoutingCriteria) -> Option<RoutingDecision> {
        let head_id = self.cache.get(key).await?;

        match self.registry.get(&head_id).await {
            Some(head) if head.is_active() && head.model_type == criteria.model_type => {
                self.metrics.inc_cache_hits();
                Some(decision_for(&head, STRATEGY_CACHED, "cached decision"))
            }
            _ => {
                tracing::debug!(head_id = %head_id, "Dropping stale cache entry");
                self.cache.remove(key).await;
                None
            }
        }
    }

    async fn cursor(&self, model_type: &str) -> Arc<AtomicUsize> {
        if let Some(cursor) = self.cursors.read().await.get(model_type) {
            return cursor.clone();
        }
        self.cursors
            .write()
            .await
            .entry(model_type.to_string())
            .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
            .clone()
    }
}

fn decision_for(
    head: &HeadRecord,
    strategy_used: &str,
    reason: impl Into<String>,
) -> RoutingDecision {
    let metadata = HashMap::from([
        ("region".to_string(), head.region.clone()),
        ("model_type".to_string(), head.model_type.clone()),
        ("version".to_string(), head.version.clone()),
        ("current_load".to_string(), head.current_load.to_string()),
    ]);
    RoutingDecision {
        head_id: head.head_id.clone(),
        endpoint: head.endpoint.clone(),
        strategy_used: strategy_used.to_string(),
        reason: reason.into(),
        metadata,
    }
}
