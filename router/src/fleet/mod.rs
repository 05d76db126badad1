//! Fleet core: head registry, routing policy, decision cache and engine.
//!
//! [`FleetService`] is the single entry point the adapters use. It is built
//! once at startup and shared behind an `Arc`.

mod cache;
mod engine;
mod policy;
mod registry;
pub mod service;
pub mod strategy;

pub use cache::{CacheKey, DecisionCache};
pub use engine::{DecisionEngine, REASON_NO_HEADS, REASON_NO_SELECTION, STRATEGY_CACHED, STRATEGY_NONE};
pub use policy::PolicyStore;
pub use registry::{HeadRegistry, StatusChange};
pub use service::{spawn_stale_sweeper, BootstrapReport, FleetService, STORE_SERVICE};
pub use strategy::StrategyTuning;
