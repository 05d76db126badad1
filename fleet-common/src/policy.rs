//! Routing policy and strategy names.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Algorithm used to pick a head for a request.
///
/// Unknown or empty names resolve to [`Strategy::RoundRobin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Strategy {
    #[default]
    RoundRobin,
    LeastLoaded,
    GeoPreferred,
    ModelSpecific,
    Hybrid,
    Predictive,
    Adaptive,
}

impl Strategy {
    /// All strategies, for iteration.
    pub const ALL: [Strategy; 7] = [
        Strategy::RoundRobin,
        Strategy::LeastLoaded,
        Strategy::GeoPreferred,
        Strategy::ModelSpecific,
        Strategy::Hybrid,
        Strategy::Predictive,
        Strategy::Adaptive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::RoundRobin => "round_robin",
            Strategy::LeastLoaded => "least_loaded",
            Strategy::GeoPreferred => "geo_preferred",
            Strategy::ModelSpecific => "model_specific",
            Strategy::Hybrid => "hybrid",
            Strategy::Predictive => "predictive",
            Strategy::Adaptive => "adaptive",
        }
    }

    /// Resolve a strategy name, falling back to round-robin.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "least_loaded" => Strategy::LeastLoaded,
            "geo_preferred" => Strategy::GeoPreferred,
            "model_specific" => Strategy::ModelSpecific,
            "hybrid" => Strategy::Hybrid,
            "predictive" => Strategy::Predictive,
            "adaptive" => Strategy::Adaptive,
            _ => Strategy::RoundRobin,
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Strategy {
    fn from(name: String) -> Self {
        Strategy::parse(&name)
    }
}

impl From<Strategy> for String {
    fn from(strategy: Strategy) -> Self {
        strategy.as_str().to_string()
    }
}

/// Process-wide routing configuration. Replaced wholesale on update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingPolicy {
    /// Strategy used when a request does not name one.
    pub default_strategy: Strategy,
    #[serde(default = "default_true")]
    pub enable_geo_routing: bool,
    #[serde(default = "default_true")]
    pub enable_load_balancing: bool,
    #[serde(default = "default_true")]
    pub enable_model_specific: bool,
    /// Strategy-specific tuning, e.g. `capacity_threshold` or `growth_factor`.
    #[serde(default)]
    pub strategy_config: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            default_strategy: Strategy::LeastLoaded,
            enable_geo_routing: true,
            enable_load_balancing: true,
            enable_model_specific: true,
            strategy_config: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_names() {
        for strategy in Strategy::ALL {
            assert_eq!(Strategy::parse(strategy.as_str()), strategy);
        }
        assert_eq!(Strategy::parse(""), Strategy::RoundRobin);
        assert_eq!(Strategy::parse("fastest"), Strategy::RoundRobin);
        assert_eq!(Strategy::parse(" Least_Loaded "), Strategy::LeastLoaded);
    }

    #[test]
    fn test_strategy_serialization() {
        let json = serde_json::to_string(&Strategy::GeoPreferred).unwrap();
        assert_eq!(json, r#""geo_preferred""#);
        let parsed: Strategy = serde_json::from_str(r#""something_else""#).unwrap();
        assert_eq!(parsed, Strategy::RoundRobin);
    }

    #[test]
    fn test_policy_defaults_from_partial_json() {
        let policy: RoutingPolicy =
            serde_json::from_str(r#"{"default_strategy": "predictive"}"#).unwrap();
        assert_eq!(policy.default_strategy, Strategy::Predictive);
        assert!(policy.enable_geo_routing);
        assert!(policy.enable_load_balancing);
        assert!(policy.enable_model_specific);
        assert!(policy.strategy_config.is_empty());
    }
}
