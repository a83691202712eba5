use axum::{extract::State, http::HeaderMap, Json};
use std::sync::Arc;
use tracing::info;

use crate::models::{CacheStats, InvalidateRequest, InvalidateResponse};
use crate::services::CacheManager;
use shared_models::error::AppError;
use shared_utils::extractor::require_admin;
use shared_utils::jwt::TokenDecoder;
use shared_utils::validation::InputValidator;

const MAX_PATTERN_LENGTH: usize = 200;

pub struct PerformanceHandlers {
    cache: Arc<CacheManager>,
    decoder: Arc<dyn TokenDecoder>,
    validator: InputValidator,
}

impl PerformanceHandlers {
    pub fn new(cache: Arc<CacheManager>, decoder: Arc<dyn TokenDecoder>) -> Self {
        Self {
            cache,
            decoder,
            validator: InputValidator::new(),
        }
    }
}

pub async fn get_cache_stats(
    State(handlers): State<Arc<PerformanceHandlers>>,
) -> Json<CacheStats> {
    Json(handlers.cache.stats().await)
}

pub async fn invalidate_cache(
    State(handlers): State<Arc<PerformanceHandlers>>,
    headers: HeaderMap,
    Json(request): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>, AppError> {
    let admin = require_admin(&headers, handlers.decoder.as_ref())?;

    let pattern = handlers
        .validator
        .check_field("pattern", &request.pattern, MAX_PATTERN_LENGTH)?;
    let pattern = handlers.cache.scoped_pattern(&pattern);

    let invalidated = handlers.cache.invalidate_pattern(&pattern).await;
    info!(user_id = admin.key(), "Admin invalidated {} entries for {}", invalidated, pattern);

    Ok(Json(InvalidateResponse { pattern, invalidated }))
}
