//! Per-client rate limiting.
//!
//! Each client key (normally the caller's IP) gets two fixed windows: a
//! sustained window (`threshold` requests per `window`) and a tighter burst
//! window (`burst_limit` requests per `burst_duration`). A request must fit in
//! both. Rejected requests do not count against either window.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::config::RateLimitConfig;

/// Limits applied to one client key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    pub threshold: u32,
    pub window: Duration,
    pub burst_limit: u32,
    pub burst_duration: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            threshold: 100,
            window: Duration::from_secs(60),
            burst_limit: 20,
            burst_duration: Duration::from_secs(1),
        }
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    Allowed,
    RateLimited {
        /// Time until the blocking window resets.
        retry_after: Duration,
    },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Allowed => None,
            Self::RateLimited { retry_after } => Some(*retry_after),
        }
    }
}

/// Window counters for one client key.
#[derive(Debug)]
struct ClientWindows {
    request_count: u32,
    window_start: Instant,
    burst_count: u32,
    burst_start: Instant,
}

impl ClientWindows {
    fn new(now: Instant) -> Self {
        Self {
            request_count: 0,
            window_start: now,
            burst_count: 0,
            burst_start: now,
        }
    }

    fn try_acquire(&mut self, settings: &RateLimitSettings, now: Instant) -> RateLimitResult {
        if now.duration_since(self.window_start) >= settings.window {
            self.request_count = 0;
            self.window_start = now;
        }
        if now.duration_since(self.burst_start) >= settings.burst_duration {
            self.burst_count = 0;
            self.burst_start = now;
        }

        if self.request_count >= settings.threshold {
            let retry_after = settings
                .window
                .saturating_sub(now.duration_since(self.window_start));
            return RateLimitResult::RateLimited { retry_after };
        }
        if self.burst_count >= settings.burst_limit {
            let retry_after = settings
                .burst_duration
                .saturating_sub(now.duration_since(self.burst_start));
            return RateLimitResult::RateLimited { retry_after };
        }

        self.request_count += 1;
        self.burst_count += 1;
        RateLimitResult::Allowed
    }

    /// True once both windows have run out, i.e. the entry carries no state.
    fn is_expired(&self, settings: &RateLimitSettings, now: Instant) -> bool {
        now.duration_since(self.window_start) >= settings.window
            && now.duration_since(self.burst_start) >= settings.burst_duration
    }
}

/// Fixed-window rate limiter keyed by client.
pub struct RateLimiter {
    enabled: bool,
    defaults: RateLimitSettings,
    overrides: HashMap<String, RateLimitSettings>,
    clients: RwLock<HashMap<String, ClientWindows>>,
    last_cleanup: RwLock<Instant>,
    cleanup_interval: Duration,
}

impl RateLimiter {
    pub fn new(defaults: RateLimitSettings) -> Self {
        Self {
            enabled: true,
            defaults,
            overrides: HashMap::new(),
            clients: RwLock::new(HashMap::new()),
            last_cleanup: RwLock::new(Instant::now()),
            cleanup_interval: Duration::from_secs(60),
        }
    }

    /// A limiter that admits everything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(RateLimitSettings::default())
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        let defaults = RateLimitSettings {
            threshold: config.threshold,
            window: Duration::from_secs(config.window_secs),
            burst_limit: config.burst_limit,
            burst_duration: Duration::from_millis(config.burst_duration_ms),
        };
        let mut limiter = Self::new(defaults);
        limiter.enabled = config.enabled;
        for (key, o) in &config.overrides {
            let settings = RateLimitSettings {
                threshold: o.threshold.unwrap_or(defaults.threshold),
                window: o
                    .window_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.window),
                burst_limit: o.burst_limit.unwrap_or(defaults.burst_limit),
                burst_duration: o
                    .burst_duration_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.burst_duration),
            };
            limiter.overrides.insert(key.clone(), settings);
        }
        limiter
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn settings_for(&self, key: &str) -> RateLimitSettings {
        self.overrides.get(key).copied().unwrap_or(self.defaults)
    }

    /// Check and count a request from `key`.
    pub async fn check(&self, key: &str) -> RateLimitResult {
        if !self.enabled {
            return RateLimitResult::Allowed;
        }

        let now = Instant::now();

        {
            let mut last_cleanup = self.last_cleanup.write().await;
            if now.duration_since(*last_cleanup) >= self.cleanup_interval {
                self.cleanup_expired(now).await;
                *last_cleanup = now;
            }
        }

        let settings = self.settings_for(key);
        let mut clients = self.clients.write().await;
        let windows = clients
            .entry(key.to_string())
            .or_insert_with(|| ClientWindows::new(now));
        let result = windows.try_acquire(&settings, now);
        if !result.is_allowed() {
            tracing::debug!(client = %key, "Request rate limited");
        }
        result
    }

    /// Shorthand for `check(key).is_allowed()`.
    pub async fn allow(&self, key: &str) -> bool {
        self.check(key).await.is_allowed()
    }

    async fn cleanup_expired(&self, now: Instant) {
        let mut clients = self.clients.write().await;
        clients.retain(|key, windows| !windows.is_expired(&self.settings_for(key), now));
    }

    /// Number of client keys currently tracked.
    pub async fn tracked_clients(&self) -> usize {
        self.clients.read().await.len()
    }
}
