// =====================================================================================
// MONITORING CELL ROUTER
// =====================================================================================

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers::{
    acknowledge_alert, active_alerts, alert_history, alert_summary, clear_all_alerts,
    component_health, comprehensive_health, current_metrics, dashboard, health_history,
    health_trends, json_metrics, liveness, prometheus_metrics, MonitoringHandlers,
};

pub fn create_monitoring_router(handlers: Arc<MonitoringHandlers>) -> Router {
    // Operational routes (no authentication required)
    let health_routes = Router::new()
        .route("/health", get(liveness))
        .route("/health/comprehensive", get(comprehensive_health))
        .route("/health/component", get(component_health))
        .route("/health/history", get(health_history))
        .route("/health/trends", get(health_trends))
        .route("/metrics", get(current_metrics))
        .route("/metrics/prometheus", get(prometheus_metrics))
        .route("/metrics/json", get(json_metrics))
        .with_state(handlers.clone());

    let monitoring_routes = Router::new()
        .route("/monitoring/dashboard", get(dashboard))
        .route("/monitoring/alerts", get(active_alerts))
        .route("/monitoring/alerts/summary", get(alert_summary))
        .route("/monitoring/alerts/history", get(alert_history))
        .with_state(handlers.clone());

    // Admin only routes
    let admin_routes = Router::new()
        .route("/monitoring/alerts/acknowledge", post(acknowledge_alert))
        .route("/admin/alerts/clear", post(clear_all_alerts))
        .with_state(handlers);

    Router::new()
        .merge(health_routes)
        .merge(monitoring_routes)
        .merge(admin_routes)
}
