// =====================================================================================
// MONITORING CELL HANDLERS
// =====================================================================================

use axum::{
    extract::{Query, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::models::{
    AcknowledgeRequest, AcknowledgeResponse, Alert, AlertSummary, ComponentQuery, DashboardQuery,
    DashboardSnapshot, HealthReport, HealthResult, HealthStatus, HistoryQuery, LivenessResponse,
    MetricsJson, MonitoringError, PerformanceMetrics, SERVICE_NAME, SERVICE_VERSION,
};
use crate::services::health::DEFAULT_HISTORY_LIMIT;
use crate::services::{
    AlertManager, MetricsCollector, MonitoringDashboard, PrometheusExporter, SystemHealthMonitor,
};
use shared_utils::extractor::require_admin;
use shared_utils::jwt::TokenDecoder;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub struct MonitoringHandlers {
    health: Arc<SystemHealthMonitor>,
    metrics: Arc<MetricsCollector>,
    exporter: PrometheusExporter,
    alerts: Arc<AlertManager>,
    dashboard: Arc<MonitoringDashboard>,
    decoder: Arc<dyn TokenDecoder>,
}

impl MonitoringHandlers {
    pub fn new(
        health: Arc<SystemHealthMonitor>,
        metrics: Arc<MetricsCollector>,
        alerts: Arc<AlertManager>,
        dashboard: Arc<MonitoringDashboard>,
        decoder: Arc<dyn TokenDecoder>,
    ) -> Self {
        Self {
            exporter: PrometheusExporter::new(metrics.clone()),
            health,
            metrics,
            alerts,
            dashboard,
            decoder,
        }
    }
}

// =====================================================================================
// HEALTH ENDPOINTS
// =====================================================================================

pub async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "healthy",
        service: SERVICE_NAME,
        version: SERVICE_VERSION,
        timestamp: Utc::now(),
    })
}

/// 503 when any component is unhealthy or critical so load balancers can
/// act on the status code alone.
#[instrument(skip(handlers))]
pub async fn comprehensive_health(
    State(handlers): State<Arc<MonitoringHandlers>>,
) -> (StatusCode, Json<HealthReport>) {
    let report = handlers.health.comprehensive_health().await;
    let status = match report.overall_status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy | HealthStatus::Critical => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report))
}

#[instrument(skip(handlers))]
pub async fn component_health(
    State(handlers): State<Arc<MonitoringHandlers>>,
    Query(query): Query<ComponentQuery>,
) -> Result<Json<HealthResult>, MonitoringError> {
    let component = query
        .component
        .filter(|c| !c.trim().is_empty())
        .ok_or(MonitoringError::ComponentRequired)?;

    let result = handlers.health.component_health(&component).await?;
    Ok(Json(result))
}

pub async fn health_history(
    State(handlers): State<Arc<MonitoringHandlers>>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<HealthReport>> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Json(handlers.health.history(limit).await)
}

pub async fn health_trends(State(handlers): State<Arc<MonitoringHandlers>>) -> Response {
    match handlers.health.trends().await {
        Some(trends) => Json(trends).into_response(),
        None => Json(json!({ "message": "No health history available" })).into_response(),
    }
}

// =====================================================================================
// METRICS ENDPOINTS
// =====================================================================================

pub async fn current_metrics(
    State(handlers): State<Arc<MonitoringHandlers>>,
) -> Json<PerformanceMetrics> {
    Json(handlers.metrics.performance_metrics().await)
}

pub async fn prometheus_metrics(State(handlers): State<Arc<MonitoringHandlers>>) -> Response {
    let body = handlers.exporter.render().await;
    ([(CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body).into_response()
}

pub async fn json_metrics(State(handlers): State<Arc<MonitoringHandlers>>) -> Json<MetricsJson> {
    Json(handlers.exporter.json_snapshot().await)
}

// =====================================================================================
// DASHBOARD & ALERT ENDPOINTS
// =====================================================================================

#[instrument(skip(handlers))]
pub async fn dashboard(
    State(handlers): State<Arc<MonitoringHandlers>>,
    Query(query): Query<DashboardQuery>,
) -> Json<DashboardSnapshot> {
    let force_refresh = query.force_refresh.unwrap_or(false);
    Json(handlers.dashboard.snapshot(force_refresh).await)
}

pub async fn active_alerts(State(handlers): State<Arc<MonitoringHandlers>>) -> Json<Vec<Alert>> {
    Json(handlers.alerts.active_alerts().await)
}

pub async fn alert_summary(State(handlers): State<Arc<MonitoringHandlers>>) -> Json<AlertSummary> {
    Json(handlers.alerts.summary().await)
}

pub async fn alert_history(
    State(handlers): State<Arc<MonitoringHandlers>>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<Alert>> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Json(handlers.alerts.history(limit).await)
}

// =====================================================================================
// ADMIN ENDPOINTS
// =====================================================================================

#[instrument(skip(handlers, headers))]
pub async fn acknowledge_alert(
    State(handlers): State<Arc<MonitoringHandlers>>,
    headers: HeaderMap,
    Json(request): Json<AcknowledgeRequest>,
) -> Result<Json<AcknowledgeResponse>, MonitoringError> {
    let admin = require_admin(&headers, handlers.decoder.as_ref())?;

    if !handlers.alerts.acknowledge(&request.alert_id).await {
        return Err(MonitoringError::AlertNotFound(request.alert_id));
    }

    info!(user_id = admin.key(), "Admin acknowledged alert {}", request.alert_id);
    Ok(Json(AcknowledgeResponse {
        alert_id: request.alert_id,
        acknowledged: true,
    }))
}

#[instrument(skip(handlers, headers))]
pub async fn clear_all_alerts(
    State(handlers): State<Arc<MonitoringHandlers>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, MonitoringError> {
    let admin = require_admin(&headers, handlers.decoder.as_ref())?;
    let cleared = handlers.alerts.clear_all().await;

    info!(user_id = admin.key(), "Admin cleared {} active alerts", cleared);
    Ok(Json(json!({ "cleared": cleared })))
}
