use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tower_http::catch_panic::CatchPanicLayer;

use monitoring_cell::{create_monitoring_router, request_metrics_middleware, MonitoringHandlers, RequestMetricsState};
use performance_cell::create_performance_router;
use security_cell::{error_boundary_middleware, panic_response, rate_limit_middleware, RateLimitState};

use crate::state::AppState;

/// Layers run outermost first: error boundary, panic catcher, request
/// metrics, rate limiter. Tracing and CORS are added in `main`.
pub fn create_router(state: &AppState) -> Router {
    let monitoring = Arc::new(MonitoringHandlers::new(
        state.health.clone(),
        state.metrics.clone(),
        state.alerts.clone(),
        state.dashboard.clone(),
        state.decoder.clone(),
    ));

    let rate_limit = Arc::new(RateLimitState::new(state.rate_limiter.clone(), state.decoder.clone()));
    let request_metrics = Arc::new(RequestMetricsState::new(state.metrics.clone(), state.decoder.clone()));

    Router::new()
        .route("/", get(|| async { "FairPlay NIL API is running!" }))
        .merge(create_monitoring_router(monitoring))
        .merge(create_performance_router(state.cache.clone(), state.decoder.clone()))
        .layer(middleware::from_fn_with_state(rate_limit, rate_limit_middleware))
        .layer(middleware::from_fn_with_state(request_metrics, request_metrics_middleware))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn_with_state(state.boundary.clone(), error_boundary_middleware))
}
