//! Routing policy singleton.

use tokio::sync::RwLock;

use fleet_common::RoutingPolicy;

#[derive(Debug, Default)]
pub struct PolicyStore {
    policy: RwLock<RoutingPolicy>,
}

impl PolicyStore {
    pub async fn get(&self) -> RoutingPolicy {
        self.policy.read().await.clone()
    }

    /// Replace the policy, returning the previous one.
    pub async fn set(&self, policy: RoutingPolicy) -> RoutingPolicy {
        std::mem::replace(&mut *self.policy.write().await, policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_common::Strategy;

    #[tokio::test]
    async fn test_replace_wholesale() {
        let store = PolicyStore::default();
        assert_eq!(store.get().await.default_strategy, Strategy::LeastLoaded);

        let mut next = RoutingPolicy {
            default_strategy: Strategy::Hybrid,
            enable_geo_routing: false,
            ..Default::default()
        };
        next.strategy_config
            .insert("growth_factor".to_string(), "1.3".to_string());

        let previous = store.set(next.clone()).await;
        assert_eq!(previous, RoutingPolicy::default());
        assert_eq!(store.get().await, next);
    }
}
