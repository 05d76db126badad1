//! Request, response and event types for the fleet router operations.
//!
//! These are the payloads every transport adapter serializes. The core
//! exposes five logical operations:
//!
//! 1. Register a head (`RegisterHeadRequest` -> `OperationResponse`)
//! 2. Update a head's status (`UpdateHeadStatusRequest` -> `OperationResponse`)
//! 3. Get a routing decision (`RoutingCriteria` -> `RoutingDecision`)
//! 4. List all heads
//! 5. Get or replace the routing policy
//!
//! State changes are also published as `FleetEvent`s, JSON-encoded with a
//! `type` field.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{HeadStatus, Strategy};

/// Criteria metadata key carrying the requested model version.
///
/// Also used as the model hint in the decision cache key.
pub const MODEL_VERSION_KEY: &str = "model_version";
/// Criteria metadata key carrying the requested model size.
pub const MODEL_SIZE_KEY: &str = "model_size";
/// Criteria metadata key carrying the required capability.
pub const CAPABILITY_KEY: &str = "capability";

/// Registration (or re-registration) of a head.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterHeadRequest {
    pub head_id: String,
    pub endpoint: String,
    pub model_type: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Load reported at registration time.
    #[serde(default)]
    pub current_load: u32,
}

/// Heartbeat / status transition for a known head.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateHeadStatusRequest {
    pub head_id: String,
    pub status: HeadStatus,
    #[serde(default)]
    pub current_load: u32,
    /// Unix timestamp (seconds) of the report; defaults to receipt time.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl UpdateHeadStatusRequest {
    /// Reported time, falling back to now for missing or out-of-range values.
    pub fn reported_at(&self) -> DateTime<Utc> {
        self.timestamp
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
            .unwrap_or_else(Utc::now)
    }
}

/// Criteria for a routing decision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingCriteria {
    pub model_type: String,
    #[serde(default)]
    pub region_preference: String,
    /// Strategy override; the policy default applies when absent or empty.
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl RoutingCriteria {
    pub fn new(model_type: impl Into<String>) -> Self {
        Self {
            model_type: model_type.into(),
            ..Default::default()
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region_preference = region.into();
        self
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The explicitly requested strategy name, if any.
    pub fn requested_strategy(&self) -> Option<&str> {
        self.strategy
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Resolve the strategy to apply, given the policy default.
    pub fn effective_strategy(&self, default: Strategy) -> Strategy {
        self.requested_strategy()
            .map(Strategy::parse)
            .unwrap_or(default)
    }

    pub fn model_version(&self) -> Option<&str> {
        self.metadata_value(MODEL_VERSION_KEY)
    }

    pub fn model_size(&self) -> Option<&str> {
        self.metadata_value(MODEL_SIZE_KEY)
    }

    pub fn capability(&self) -> Option<&str> {
        self.metadata_value(CAPABILITY_KEY)
    }

    fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Outcome of a routing request. An empty `head_id` means no head was found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub head_id: String,
    pub endpoint: String,
    pub strategy_used: String,
    pub reason: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl RoutingDecision {
    /// A decision that selected no head.
    pub fn empty(strategy_used: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            head_id: String::new(),
            endpoint: String::new(),
            strategy_used: strategy_used.into(),
            reason: reason.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head_id.is_empty()
    }
}

/// Generic result of a mutating operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResponse {
    pub success: bool,
    pub message: String,
}

impl OperationResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// State change published to event subscribers and webhooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    HeadRegistered {
        head_id: String,
        endpoint: String,
        model_type: String,
        region: String,
        timestamp: DateTime<Utc>,
    },
    HeadStatusChanged {
        head_id: String,
        status: HeadStatus,
        current_load: u32,
        timestamp: DateTime<Utc>,
    },
    RoutingDecided {
        decision_id: Uuid,
        model_type: String,
        head_id: String,
        strategy_used: String,
        timestamp: DateTime<Utc>,
    },
    PolicyUpdated {
        default_strategy: Strategy,
        timestamp: DateTime<Utc>,
    },
}

impl FleetEvent {
    /// Short event name, matching the serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            FleetEvent::HeadRegistered { .. } => "head_registered",
            FleetEvent::HeadStatusChanged { .. } => "head_status_changed",
            FleetEvent::RoutingDecided { .. } => "routing_decided",
            FleetEvent::PolicyUpdated { .. } => "policy_updated",
        }
    }
}
