use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};

use crate::services::MetricsCollector;
use shared_models::auth::Identity;
use shared_utils::extractor::identity_from_headers;
use shared_utils::jwt::TokenDecoder;

pub struct RequestMetricsState {
    pub metrics: Arc<MetricsCollector>,
    pub decoder: Arc<dyn TokenDecoder>,
}

impl RequestMetricsState {
    pub fn new(metrics: Arc<MetricsCollector>, decoder: Arc<dyn TokenDecoder>) -> Self {
        Self { metrics, decoder }
    }
}

/// Label used for requests that matched no route, so stray paths share one series.
pub const UNMATCHED_ENDPOINT: &str = "unmatched";

/// Times every request and records its outcome against the route template.
/// Requests without a matched route are recorded under [`UNMATCHED_ENDPOINT`].
/// The decoded caller is left in the request extensions for inner layers.
pub async fn request_metrics_middleware(
    State(state): State<Arc<RequestMetricsState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ENDPOINT.to_string());

    let identity = identity_from_headers(request.headers(), state.decoder.as_ref());
    request.extensions_mut().insert::<Identity>(identity.clone());

    let response = next.run(request).await;
    let status = response.status().as_u16();

    let metrics = &state.metrics;
    metrics
        .record_request_duration(&endpoint, &method, status, started.elapsed(), &identity.role)
        .await;

    if status >= 400 {
        let error_type = if status >= 500 { "server_error" } else { "client_error" };
        metrics.record_error_rate(&endpoint, error_type, &identity.role).await;
    }

    if let Some(user_id) = &identity.user_id {
        metrics
            .record_user_activity(user_id, &identity.role, &method.to_lowercase())
            .await;
    }

    response
}
