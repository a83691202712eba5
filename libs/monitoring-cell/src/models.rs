// =====================================================================================
// MONITORING CELL MODELS
// =====================================================================================

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use shared_models::error::AppError;

pub const SERVICE_NAME: &str = "fairplay-nil-api";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

// =====================================================================================
// HEALTH
// =====================================================================================

/// Ordered from best to worst so `max()` yields the aggregate status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Critical => "critical",
        }
    }

    pub fn worst<I: IntoIterator<Item = HealthStatus>>(statuses: I) -> HealthStatus {
        statuses.into_iter().max().unwrap_or(HealthStatus::Healthy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResult {
    pub service: String,
    pub status: HealthStatus,
    pub response_time_ms: f64,
    pub message: String,
    #[serde(default)]
    pub details: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl HealthResult {
    pub fn new(
        service: impl Into<String>,
        status: HealthStatus,
        response_time_ms: f64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            status,
            response_time_ms,
            message: message.into(),
            details: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn detail_f64(&self, key: &str) -> Option<f64> {
        self.details.get(key).and_then(Value::as_f64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub overall_status: HealthStatus,
    pub services: BTreeMap<String, HealthResult>,
    pub total_checks: usize,
    pub health_check_duration_ms: f64,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceTrend {
    pub healthy_count: usize,
    pub degraded_count: usize,
    pub unhealthy_count: usize,
    pub critical_count: usize,
    pub avg_response_time: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityBreakdown {
    pub total_checks: usize,
    pub healthy_checks: usize,
    pub degraded_checks: usize,
    pub unhealthy_checks: usize,
    pub critical_checks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthTrends {
    pub analysis_period: String,
    pub service_trends: BTreeMap<String, ServiceTrend>,
    pub overall_reliability: ReliabilityBreakdown,
}

#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
}

// =====================================================================================
// METRICS
// =====================================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestMetrics {
    pub requests_per_minute: BTreeMap<String, u64>,
    pub requests_per_hour: BTreeMap<String, u64>,
    /// Milliseconds, per endpoint.
    pub average_response_time: BTreeMap<String, f64>,
    /// Percent of responses with status >= 400, per endpoint.
    pub error_rates: BTreeMap<String, f64>,
    pub status_code_distribution: BTreeMap<u16, u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserMetrics {
    pub active_users_count: usize,
    /// Keyed `{role}_{action}`.
    pub user_activities: BTreeMap<String, u64>,
    pub activity_distribution: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hit_rate: f64,
    pub total_hits: u64,
    pub total_misses: u64,
    pub total_operations: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryStats {
    pub total: u64,
    pub errors: u64,
    pub avg_duration_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResponseTimePercentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub request_metrics: RequestMetrics,
    pub user_metrics: UserMetrics,
    /// `None` until the first request is recorded.
    pub response_time_percentiles: Option<ResponseTimePercentiles>,
    pub total_errors: u64,
    pub total_requests: u64,
    pub cache_metrics: CacheMetrics,
    pub database_metrics: BTreeMap<String, QueryStats>,
}

#[derive(Debug, Serialize)]
pub struct MetricsJson {
    pub timestamp: DateTime<Utc>,
    pub service: &'static str,
    pub version: &'static str,
    pub metrics: PerformanceMetrics,
}

// =====================================================================================
// ALERTS
// =====================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
    Emergency,
}

impl AlertLevel {
    pub const ALL: [AlertLevel; 4] = [
        AlertLevel::Info,
        AlertLevel::Warning,
        AlertLevel::Critical,
        AlertLevel::Emergency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
            AlertLevel::Emergency => "emergency",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Cpu,
    Memory,
    Disk,
}

impl Resource {
    pub const ALL: [Resource; 3] = [Resource::Cpu, Resource::Memory, Resource::Disk];

    /// Detail key reported by the system resources check.
    pub fn detail_key(&self) -> &'static str {
        match self {
            Resource::Cpu => "cpu_percent",
            Resource::Memory => "memory_percent",
            Resource::Disk => "disk_percent",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Resource::Cpu => "CPU Usage",
            Resource::Memory => "Memory Usage",
            Resource::Disk => "Disk Usage",
        }
    }
}

/// What an alert is about. Resolution and id derivation dispatch on this,
/// never on the id string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertSubject {
    ServiceHealth { service: String },
    ResponseTime { service: String },
    SystemResource { resource: Resource },
    ErrorRate { endpoint: String },
    CacheHitRate,
}

impl AlertSubject {
    pub fn alert_id(&self, level: AlertLevel) -> String {
        match self {
            AlertSubject::ServiceHealth { service } => format!("health_{}_{}", service, level.as_str()),
            AlertSubject::ResponseTime { service } => format!("response_{}_{}", service, level.as_str()),
            AlertSubject::SystemResource { resource } => {
                format!("system_{}_{}", resource.detail_key(), level.as_str())
            }
            AlertSubject::ErrorRate { endpoint } => format!("error_rate_{}_{}", endpoint, level.as_str()),
            AlertSubject::CacheHitRate => format!("cache_hit_rate_{}", level.as_str()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub level: AlertLevel,
    pub title: String,
    pub description: String,
    pub service: String,
    pub subject: AlertSubject,
    pub metric_value: Option<f64>,
    pub threshold: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub warning: f64,
    pub critical: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    /// Cache store round trip, ms.
    pub response_time: Threshold,
    pub database_response: Threshold,
    pub error_rate: Threshold,
    pub cpu: Threshold,
    pub memory: Threshold,
    pub disk: Threshold,
    /// Lower is worse.
    pub cache_hit_rate: Threshold,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            response_time: Threshold { warning: 1000.0, critical: 3000.0 },
            database_response: Threshold { warning: 500.0, critical: 2000.0 },
            error_rate: Threshold { warning: 5.0, critical: 10.0 },
            cpu: Threshold { warning: 80.0, critical: 95.0 },
            memory: Threshold { warning: 85.0, critical: 95.0 },
            disk: Threshold { warning: 85.0, critical: 95.0 },
            cache_hit_rate: Threshold { warning: 70.0, critical: 50.0 },
        }
    }
}

impl AlertThresholds {
    pub fn for_resource(&self, resource: Resource) -> Threshold {
        match resource {
            Resource::Cpu => self.cpu,
            Resource::Memory => self.memory,
            Resource::Disk => self.disk,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertSummary {
    pub total_active: usize,
    pub by_level: BTreeMap<String, usize>,
    pub by_service: BTreeMap<String, usize>,
    /// Unresolved entries among the last 20 history records.
    pub recent_alerts: usize,
}

#[derive(Debug, Deserialize)]
pub struct AcknowledgeRequest {
    pub alert_id: String,
}

#[derive(Debug, Serialize)]
pub struct AcknowledgeResponse {
    pub alert_id: String,
    pub acknowledged: bool,
}

// =====================================================================================
// DASHBOARD
// =====================================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealthView {
    pub overall_score: u8,
    pub status: HealthStatus,
    pub services: BTreeMap<String, HealthResult>,
    pub trends: Option<HealthTrends>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertsView {
    pub active: Vec<Alert>,
    pub new: Vec<Alert>,
    pub summary: AlertSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuickStats {
    pub services_healthy: usize,
    pub total_services: usize,
    pub active_users: usize,
    pub requests_last_minute: u64,
    pub average_response_time: f64,
    pub cache_hit_rate: f64,
    pub total_errors: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub timestamp: DateTime<Utc>,
    pub system_health: SystemHealthView,
    pub performance_metrics: PerformanceMetrics,
    pub alerts: AlertsView,
    pub quick_stats: QuickStats,
    pub recommendations: Vec<String>,
}

// =====================================================================================
// QUERY PARAMETERS
// =====================================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ComponentQuery {
    pub component: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DashboardQuery {
    pub force_refresh: Option<bool>,
}

// =====================================================================================
// ERRORS
// =====================================================================================

#[derive(Debug, thiserror::Error)]
pub enum MonitoringError {
    #[error("Component name required")]
    ComponentRequired,
    #[error("Unknown component: {0}")]
    UnknownComponent(String),
    #[error("Alert not found: {0}")]
    AlertNotFound(String),
    #[error("Health check failed: {0}")]
    CheckFailed(String),
    #[error("Health check timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Access(#[from] AppError),
}

impl IntoResponse for MonitoringError {
    fn into_response(self) -> Response {
        let status = match self {
            MonitoringError::Access(inner) => return inner.into_response(),
            MonitoringError::ComponentRequired => StatusCode::BAD_REQUEST,
            MonitoringError::UnknownComponent(_) | MonitoringError::AlertNotFound(_) => StatusCode::NOT_FOUND,
            MonitoringError::CheckFailed(_) | MonitoringError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = Json(json!({
            "error": self.to_string(),
            "timestamp": Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_status_wins() {
        use HealthStatus::*;
        assert_eq!(HealthStatus::worst([Healthy, Degraded, Healthy]), Degraded);
        assert_eq!(HealthStatus::worst([Unhealthy, Critical, Degraded]), Critical);
        assert_eq!(HealthStatus::worst([]), Healthy);
    }

    #[test]
    fn alert_ids_are_deterministic() {
        assert_eq!(
            AlertSubject::ServiceHealth { service: "database".into() }.alert_id(AlertLevel::Critical),
            "health_database_critical"
        );
        assert_eq!(
            AlertSubject::SystemResource { resource: Resource::Memory }.alert_id(AlertLevel::Warning),
            "system_memory_percent_warning"
        );
        assert_eq!(
            AlertSubject::ErrorRate { endpoint: "/api/deals".into() }.alert_id(AlertLevel::Critical),
            "error_rate_/api/deals_critical"
        );
        assert_eq!(AlertSubject::CacheHitRate.alert_id(AlertLevel::Warning), "cache_hit_rate_warning");
    }

    #[test]
    fn statuses_serialize_lowercase() {
        assert_eq!(serde_json::to_value(HealthStatus::Degraded).unwrap(), "degraded");
        assert_eq!(serde_json::to_value(AlertLevel::Emergency).unwrap(), "emergency");
    }
}
