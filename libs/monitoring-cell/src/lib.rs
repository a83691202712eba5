// =====================================================================================
// MONITORING CELL - HEALTH, METRICS, ALERTS & DASHBOARD
// =====================================================================================
//
// This cell provides the operational view of the API:
// - Concurrent health checks over the database, cache store and host
// - In-process request, user, cache and query metrics with Prometheus export
// - Threshold alerts with stable ids and auto-resolution
// - A cached dashboard snapshot with a health score
//
// =====================================================================================

pub mod handlers;
pub mod middleware;
pub mod models;
pub mod router;
pub mod services;

// Re-export commonly used types
pub use models::{
    Alert, AlertLevel, AlertSubject, HealthReport, HealthResult, HealthStatus, MonitoringError,
    PerformanceMetrics,
};

pub use services::{
    AlertManager, MetricsCollector, MonitoringDashboard, PrometheusExporter, SystemHealthMonitor,
};

pub use handlers::MonitoringHandlers;
pub use middleware::{request_metrics_middleware, RequestMetricsState, UNMATCHED_ENDPOINT};
pub use router::create_monitoring_router;
