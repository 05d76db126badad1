//! Per-service circuit breaker.
//!
//! ```text
//! Closed -> Open:      failure_count reaches threshold
//! Open -> Half-Open:   reset_timeout elapsed since the last failure; one probe allowed
//! Half-Open -> Closed: probe succeeds
//! Half-Open -> Open:   probe fails
//! ```
//!
//! The breaker guards the router's own outbound calls: store writes (service
//! name `store`) and webhook deliveries (service name = webhook URL).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::CircuitBreakerConfig;

/// Logical state of a service's breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Threshold and timeout for one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    pub threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Default)]
struct ServiceCircuit {
    failure_count: u32,
    success_count: u64,
    last_failure: Option<Instant>,
    /// Set while the single half-open probe is outstanding.
    probe_started: Option<Instant>,
}

impl ServiceCircuit {
    fn state(&self, settings: &BreakerSettings) -> CircuitState {
        if self.probe_started.is_some() {
            CircuitState::HalfOpen
        } else if self.failure_count >= settings.threshold {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }
}

/// Circuit breakers keyed by service name.
pub struct CircuitBreaker {
    defaults: BreakerSettings,
    overrides: HashMap<String, BreakerSettings>,
    circuits: RwLock<HashMap<String, ServiceCircuit>>,
}

impl CircuitBreaker {
    pub fn new(defaults: BreakerSettings) -> Self {
        Self {
            defaults,
            overrides: HashMap::new(),
            circuits: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        let defaults = BreakerSettings {
            threshold: config.threshold.max(1),
            reset_timeout: Duration::from_millis(config.reset_timeout_ms),
        };
        let mut breaker = Self::new(defaults);
        for (service, o) in &config.overrides {
            let settings = BreakerSettings {
                threshold: o.threshold.unwrap_or(defaults.threshold).max(1),
                reset_timeout: o
                    .reset_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.reset_timeout),
            };
            breaker.overrides.insert(service.clone(), settings);
        }
        breaker
    }

    pub fn settings_for(&self, service: &str) -> BreakerSettings {
        self.overrides.get(service).copied().unwrap_or(self.defaults)
    }

    /// Whether a call to `service` may proceed.
    ///
    /// Once the reset timeout has elapsed exactly one caller gets the half-open
    /// probe; everyone else keeps being rejected until the probe reports back.
    pub async fn allow(&self, service: &str) -> bool {
        let settings = self.settings_for(service);

        {
            let circuits = self.circuits.read().await;
            match circuits.get(service) {
                None => return true,
                Some(c) if c.state(&settings) == CircuitState::Closed => return true,
                Some(_) => {}
            }
        }

        let mut circuits = self.circuits.write().await;
        let Some(circuit) = circuits.get_mut(service) else {
            return true;
        };

        let now = Instant::now();
        match circuit.state(&settings) {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                // A probe that never reported back does not wedge the breaker forever.
                let stuck = circuit
                    .probe_started
                    .map(|t| now.duration_since(t) >= settings.reset_timeout)
                    .unwrap_or(false);
                if stuck {
                    circuit.probe_started = Some(now);
                    tracing::warn!(service = %service, "Half-open probe timed out, granting a new probe");
                }
                stuck
            }
            CircuitState::Open => {
                let elapsed = circuit
                    .last_failure
                    .map(|t| now.duration_since(t))
                    .unwrap_or(Duration::MAX);
                if elapsed >= settings.reset_timeout {
                    circuit.probe_started = Some(now);
                    tracing::info!(service = %service, "Circuit breaker half-open, allowing probe");
                    true
                } else {
                    tracing::debug!(
                        service = %service,
                        remaining_ms = (settings.reset_timeout - elapsed).as_millis() as u64,
                        "Circuit breaker open"
                    );
                    false
                }
            }
        }
    }

    /// Record a failed call.
    pub async fn fail(&self, service: &str) {
        let settings = self.settings_for(service);
        let mut circuits = self.circuits.write().await;
        let circuit = circuits.entry(service.to_string()).or_default();

        let was_probe = circuit.probe_started.take().is_some();
        circuit.failure_count = circuit.failure_count.saturating_add(1);
        circuit.last_failure = Some(Instant::now());

        if was_probe {
            tracing::warn!(service = %service, "Half-open probe failed, circuit re-opened");
        } else if circuit.failure_count == settings.threshold {
            tracing::warn!(
                service = %service,
                failures = circuit.failure_count,
                "Circuit breaker opened"
            );
        }
    }

    /// Record a successful call.
    pub async fn success(&self, service: &str) {
        let settings = self.settings_for(service);
        let mut circuits = self.circuits.write().await;
        let circuit = circuits.entry(service.to_string()).or_default();

        if circuit.state(&settings) != CircuitState::Closed {
            tracing::info!(service = %service, "Circuit breaker closed");
        }
        circuit.failure_count = 0;
        circuit.success_count += 1;
        circuit.probe_started = None;
    }

    pub async fn state(&self, service: &str) -> CircuitState {
        let settings = self.settings_for(service);
        self.circuits
            .read()
            .await
            .get(service)
            .map(|c| c.state(&settings))
            .unwrap_or(CircuitState::Closed)
    }

    pub async fn failure_count(&self, service: &str) -> u32 {
        self.circuits
            .read()
            .await
            .get(service)
            .map(|c| c.failure_count)
            .unwrap_or(0)
    }

    pub async fn success_count(&self, service: &str) -> u64 {
        self.circuits
            .read()
            .await
            .get(service)
            .map(|c| c.success_count)
            .unwrap_or(0)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerSettings::default())
    }
}
