// =====================================================================================
// PERFORMANCE CELL - CACHING & KEY-VALUE STORE
// =====================================================================================

pub mod models;
pub mod handlers;
pub mod router;
pub mod services;
pub mod store;

pub use models::*;
pub use router::create_performance_router;
pub use services::{CacheManager, CacheMetricsSink, Memoized};
pub use store::{KeyValueStore, MemoryStore, RedisStore, StoreError, UnavailableStore};
