//! Failure isolation and admission control.
//!
//! - Circuit breaker guarding outbound calls (store, webhooks)
//! - Per-client rate limiter for inbound routing requests

pub mod circuit_breaker;
pub mod rate_limit;

pub use circuit_breaker::{BreakerSettings, CircuitBreaker, CircuitState};
pub use rate_limit::{RateLimitResult, RateLimitSettings, RateLimiter};
