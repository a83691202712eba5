use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;

use crate::models::RateLimitError;
use crate::services::RateLimiter;
use shared_models::auth::Identity;
use shared_utils::extractor::identity_from_headers;
use shared_utils::jwt::TokenDecoder;

/// Operational endpoints never counted against a quota.
pub const BYPASS_PATHS: &[&str] = &["/health", "/metrics", "/docs", "/redoc", "/openapi.json"];

pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
    pub decoder: Arc<dyn TokenDecoder>,
}

impl RateLimitState {
    pub fn new(limiter: Arc<RateLimiter>, decoder: Arc<dyn TokenDecoder>) -> Self {
        Self { limiter, decoder }
    }
}

pub async fn rate_limit_middleware(
    State(state): State<Arc<RateLimitState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if BYPASS_PATHS.contains(&path.as_str()) {
        return next.run(request).await;
    }

    // An outer layer may already have decoded the caller.
    let identity = match request.extensions().get::<Identity>() {
        Some(identity) => identity.clone(),
        None => identity_from_headers(request.headers(), state.decoder.as_ref()),
    };
    let decision = state
        .limiter
        .check(identity.key(), &identity.role, &path)
        .await;

    if !decision.allowed {
        return RateLimitError::Exceeded(decision.info).into_response();
    }

    debug!(remaining = decision.info.remaining, "Rate limit check passed for {}", path);

    // Downstream layers reuse the decoded caller.
    request.extensions_mut().insert::<Identity>(identity);

    let mut response = next.run(request).await;
    decision.info.apply_headers(response.headers_mut());
    response
}
