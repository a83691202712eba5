use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers::{get_cache_stats, invalidate_cache, PerformanceHandlers};
use crate::services::CacheManager;
use shared_utils::jwt::TokenDecoder;

pub fn create_performance_router(cache: Arc<CacheManager>, decoder: Arc<dyn TokenDecoder>) -> Router {
    let handlers = Arc::new(PerformanceHandlers::new(cache, decoder));

    Router::new()
        .route("/cache/stats", get(get_cache_stats))
        .route("/admin/cache/invalidate", post(invalidate_cache))
        .with_state(handlers)
}
