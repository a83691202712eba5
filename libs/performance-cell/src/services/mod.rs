pub mod cache;

pub use cache::{build_key, CacheManager, CacheMetricsSink, Memoized};
