//! Operational counters, rendered in Prometheus text format at `/metrics`.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DecisionLabels {
    strategy: String,
    model_type: String,
    region: String,
}

/// Counters shared by the fleet service and the HTTP layer.
#[derive(Debug, Default)]
pub struct FleetMetrics {
    registrations: AtomicU64,
    status_updates: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    rate_limited: AtomicU64,
    breaker_rejections: AtomicU64,
    persistence_failures: AtomicU64,
    decisions: RwLock<HashMap<DecisionLabels, u64>>,
}

impl FleetMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_registrations(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_status_updates(&self) {
        self.status_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_misses(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_breaker_rejections(&self) {
        self.breaker_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_persistence_failures(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn registrations(&self) -> u64 {
        self.registrations.load(Ordering::Relaxed)
    }

    pub fn status_updates(&self) -> u64 {
        self.status_updates.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn rate_limited(&self) -> u64 {
        self.rate_limited.load(Ordering::Relaxed)
    }

    pub fn persistence_failures(&self) -> u64 {
        self.persistence_failures.load(Ordering::Relaxed)
    }

    /// Count a computed decision for (strategy, model_type, region).
    pub async fn record_decision(&self, strategy: &str, model_type: &str, region: &str) {
        let labels = DecisionLabels {
            strategy: strategy.to_string(),
            model_type: model_type.to_string(),
            region: region.to_string(),
        };
        *self.decisions.write().await.entry(labels).or_insert(0) += 1;
    }

    pub async fn decision_count(&self, strategy: &str, model_type: &str, region: &str) -> u64 {
        let labels = DecisionLabels {
            strategy: strategy.to_string(),
            model_type: model_type.to_string(),
            region: region.to_string(),
        };
        self.decisions
            .read()
            .await
            .get(&labels)
            .copied()
            .unwrap_or(0)
    }

    /// Render all counters in Prometheus exposition format.
    pub async fn render(&self) -> String {
        let mut out = String::new();
        let counters = [
            ("fleet_registrations_total", "Head registrations", self.registrations()),
            ("fleet_status_updates_total", "Head status updates", self.status_updates()),
            ("fleet_cache_hits_total", "Decision cache hits", self.cache_hits()),
            ("fleet_cache_misses_total", "Decision cache misses", self.cache_misses()),
            ("fleet_rate_limited_total", "Requests rejected by the rate limiter", self.rate_limited()),
            (
                "fleet_breaker_rejections_total",
                "Outbound calls rejected by an open circuit",
                self.breaker_rejections.load(Ordering::Relaxed),
            ),
            (
                "fleet_persistence_failures_total",
                "Failed store writes",
                self.persistence_failures(),
            ),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, value);
        }

        let decisions = self.decisions.read().await;
        let mut rows: Vec<_> = decisions.iter().collect();
        rows.sort_by(|a, b| {
            (&a.0.strategy, &a.0.model_type, &a.0.region)
                .cmp(&(&b.0.strategy, &b.0.model_type, &b.0.region))
        });
        let _ = writeln!(out, "# HELP fleet_decisions_total Routing decisions computed");
        let _ = writeln!(out, "# TYPE fleet_decisions_total counter");
        for (labels, count) in rows {
            let _ = writeln!(
                out,
                "fleet_decisions_total{{strategy=\"{}\",model_type=\"{}\",region=\"{}\"}} {}",
                escape_label(&labels.strategy),
                escape_label(&labels.model_type),
                escape_label(&labels.region),
                count
            );
        }
        out
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
