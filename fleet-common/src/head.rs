//! Head records: the backend inference instances tracked by the registry.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of load samples kept per head for load projection.
pub const LOAD_HISTORY_WINDOW: usize = 5;

/// Metadata key holding the head's load capacity.
pub const CAPACITY_KEY: &str = "capacity";
/// Metadata key holding the largest model size the head can serve.
pub const MAX_MODEL_SIZE_KEY: &str = "max_model_size";
/// Metadata key holding comma-separated capability tags.
pub const CAPABILITIES_KEY: &str = "capabilities";

/// Lifecycle status of a head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadStatus {
    Active,
    Inactive,
}

impl HeadStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, HeadStatus::Active)
    }
}

impl std::fmt::Display for HeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeadStatus::Active => write!(f, "active"),
            HeadStatus::Inactive => write!(f, "inactive"),
        }
    }
}

impl std::str::FromStr for HeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(HeadStatus::Active),
            "inactive" => Ok(HeadStatus::Inactive),
            other => Err(format!("unknown head status '{}'", other)),
        }
    }
}

/// A registered backend instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadRecord {
    /// Unique head identifier.
    pub head_id: String,
    /// Network address requests are sent to.
    pub endpoint: String,
    pub status: HeadStatus,
    /// Instance-reported utilization.
    pub current_load: u32,
    /// Past load samples, newest last.
    #[serde(default)]
    pub load_history: VecDeque<u32>,
    pub region: String,
    pub model_type: String,
    pub version: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub last_heartbeat: DateTime<Utc>,
    /// When the head was first registered. Survives re-registration.
    pub registered_at: DateTime<Utc>,
    /// Registration order within this process. Survives re-registration.
    #[serde(default)]
    pub sequence: u64,
    /// Bumped on every in-memory change; orders snapshots written to the store.
    #[serde(default)]
    pub revision: u64,
}

impl HeadRecord {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Append a load sample, evicting the oldest beyond the window.
    pub fn record_load(&mut self, load: u32) {
        self.load_history.push_back(load);
        while self.load_history.len() > LOAD_HISTORY_WINDOW {
            self.load_history.pop_front();
        }
    }

    /// Mean of the retained load samples, if any.
    pub fn average_load(&self) -> Option<f64> {
        if self.load_history.is_empty() {
            return None;
        }
        let sum: u64 = self.load_history.iter().map(|l| *l as u64).sum();
        Some(sum as f64 / self.load_history.len() as f64)
    }

    /// Declared capacity, if the metadata carries a positive number.
    pub fn capacity(&self) -> Option<f64> {
        self.metadata
            .get(CAPACITY_KEY)
            .and_then(|c| c.trim().parse::<f64>().ok())
            .filter(|c| *c > 0.0)
    }

    /// True if the head has headroom below `threshold` (a fraction of capacity).
    ///
    /// Heads without a declared capacity always pass.
    pub fn has_headroom(&self, threshold: f64) -> bool {
        match self.capacity() {
            Some(capacity) => (self.current_load as f64 / capacity) < threshold,
            None => true,
        }
    }

    /// Largest model size this head accepts, parsed from metadata.
    pub fn max_model_size(&self) -> Option<f64> {
        self.metadata.get(MAX_MODEL_SIZE_KEY).and_then(|s| parse_size(s))
    }

    /// Check the capability tags for an exact (case-insensitive) match.
    pub fn has_capability(&self, capability: &str) -> bool {
        let wanted = capability.trim();
        if wanted.is_empty() {
            return false;
        }
        self.metadata
            .get(CAPABILITIES_KEY)
            .map(|tags| {
                tags.split(',')
                    .any(|tag| tag.trim().eq_ignore_ascii_case(wanted))
            })
            .unwrap_or(false)
    }
}

/// Parse a model size such as `"7000000000"`, `"7b"` or `"1.5T"`.
///
/// Accepts an optional single-letter suffix: k, m, b (billion) or t.
pub fn parse_size(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let (number, multiplier) = match raw.chars().last().map(|c| c.to_ascii_lowercase()) {
        Some('k') => (&raw[..raw.len() - 1], 1e3),
        Some('m') => (&raw[..raw.len() - 1], 1e6),
        Some('b') => (&raw[..raw.len() - 1], 1e9),
        Some('t') => (&raw[..raw.len() - 1], 1e12),
        _ => (raw, 1.0),
    };
    number
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map(|n| n * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(metadata: &[(&str, &str)]) -> HeadRecord {
        let now = Utc::now();
        HeadRecord {
            head_id: "h1".to_string(),
            endpoint: "http://10.0.0.1:8080".to_string(),
            status: HeadStatus::Active,
            current_load: 0,
            load_history: VecDeque::new(),
            region: "us-east-1".to_string(),
            model_type: "llama-3".to_string(),
            version: "1.0".to_string(),
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            last_heartbeat: now,
            registered_at: now,
            sequence: 0,
            revision: 0,
        }
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&HeadStatus::Active).unwrap(), r#""active""#);
        let parsed: HeadStatus = serde_json::from_str(r#""inactive""#).unwrap();
        assert_eq!(parsed, HeadStatus::Inactive);
        assert_eq!("ACTIVE".parse::<HeadStatus>().unwrap(), HeadStatus::Active);
        assert!("draining".parse::<HeadStatus>().is_err());
    }

    #[test]
    fn test_load_history_is_bounded() {
        let mut h = head(&[]);
        for load in 1..=8 {
            h.record_load(load);
        }
        assert_eq!(h.load_history.len(), LOAD_HISTORY_WINDOW);
        assert_eq!(h.load_history.front(), Some(&4));
        assert_eq!(h.load_history.back(), Some(&8));
        assert_eq!(h.average_load(), Some(6.0));
    }

    #[test]
    fn test_headroom() {
        let mut h = head(&[("capacity", "100")]);
        h.current_load = 79;
        assert!(h.has_headroom(0.8));
        h.current_load = 80;
        assert!(!h.has_headroom(0.8));

        let mut unbounded = head(&[]);
        unbounded.current_load = 10_000;
        assert!(unbounded.has_headroom(0.8));

        let bogus = head(&[("capacity", "lots")]);
        assert!(bogus.capacity().is_none());
    }

    #[test]
    fn test_capabilities() {
        let h = head(&[("capabilities", "chat, Embeddings,vision")]);
        assert!(h.has_capability("embeddings"));
        assert!(h.has_capability("vision"));
        assert!(!h.has_capability("audio"));
        assert!(!h.has_capability(""));
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("70b"), Some(70e9));
        assert_eq!(parse_size("1.5T"), Some(1.5e12));
        assert_eq!(parse_size("512"), Some(512.0));
        assert_eq!(parse_size("abc"), None);
        assert_eq!(parse_size(""), None);
        assert_eq!(head(&[("max_model_size", "13B")]).max_model_size(), Some(13e9));
    }
}
