// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod cache;
pub mod config;
pub mod detect;
pub mod dispatch;
pub mod fetch;
pub mod handlers;
pub mod model;
pub mod monitor;
pub mod rate_limit;
pub mod storage;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::cache::{spawn_cache_sweeper, CacheStats, TtlCache};
pub use crate::config::{load_config_default, load_config_from, MonitorConfig};
pub use crate::dispatch::{Dispatcher, EventHandler, EventKind, MonitorEvent, PostRevision};
pub use crate::fetch::{Fetcher, FixtureFetcher, GuardedFetcher};
pub use crate::monitor::{Monitor, MonitorStats};
pub use crate::rate_limit::RateLimiter;
pub use crate::storage::{JsonStore, Store};
