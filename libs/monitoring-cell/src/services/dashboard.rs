// =====================================================================================
// MONITORING DASHBOARD - CACHED COMPOSITE SNAPSHOT
// =====================================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::models::{
    Alert, AlertLevel, AlertSummary, AlertsView, DashboardSnapshot, HealthReport, HealthStatus,
    PerformanceMetrics, QuickStats, SystemHealthView,
};
use crate::services::alerts::AlertManager;
use crate::services::health::{SystemHealthMonitor, SYSTEM};
use crate::services::metrics::MetricsCollector;

pub const DEFAULT_DASHBOARD_TTL: Duration = Duration::from_secs(30);

const ALL_CLEAR: &str = "System is performing well - no immediate actions needed";

pub struct MonitoringDashboard {
    health: Arc<SystemHealthMonitor>,
    metrics: Arc<MetricsCollector>,
    alerts: Arc<AlertManager>,
    ttl: Duration,
    cached: RwLock<Option<(Instant, DashboardSnapshot)>>,
}

impl MonitoringDashboard {
    pub fn new(
        health: Arc<SystemHealthMonitor>,
        metrics: Arc<MetricsCollector>,
        alerts: Arc<AlertManager>,
    ) -> Self {
        Self {
            health,
            metrics,
            alerts,
            ttl: DEFAULT_DASHBOARD_TTL,
            cached: RwLock::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn fresh(&self, cached: &Option<(Instant, DashboardSnapshot)>) -> Option<DashboardSnapshot> {
        cached
            .as_ref()
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, snapshot)| snapshot.clone())
    }

    /// Returns the cached snapshot while it is younger than the TTL, unless
    /// `force_refresh` is set. A rebuild runs the health checks and an alert
    /// evaluation.
    #[instrument(skip(self))]
    pub async fn snapshot(&self, force_refresh: bool) -> DashboardSnapshot {
        if !force_refresh {
            if let Some(snapshot) = self.fresh(&*self.cached.read().await) {
                return snapshot;
            }
        }

        let mut cached = self.cached.write().await;
        if !force_refresh {
            // Another caller may have rebuilt while we waited for the lock.
            if let Some(snapshot) = self.fresh(&cached) {
                return snapshot;
            }
        }

        let snapshot = self.build().await;
        *cached = Some((Instant::now(), snapshot.clone()));
        debug!("Dashboard snapshot rebuilt");
        snapshot
    }

    async fn build(&self) -> DashboardSnapshot {
        let report = self.health.comprehensive_health().await;
        let metrics = self.metrics.performance_metrics().await;

        let new = self.alerts.evaluate(&report, &metrics).await;
        let active = self.alerts.active_alerts().await;
        let summary = self.alerts.summary().await;

        let overall_score = health_score(&report, &metrics, &summary);
        let quick_stats = quick_stats(&report, &metrics);
        let recommendations = recommendations(&report, &metrics, &active);

        DashboardSnapshot {
            timestamp: Utc::now(),
            system_health: SystemHealthView {
                overall_score,
                status: report.overall_status,
                services: report.services,
                trends: self.health.trends().await,
            },
            performance_metrics: metrics,
            alerts: AlertsView { active, new, summary },
            quick_stats,
            recommendations,
        }
    }
}

/// 100 minus deductions for unhealthy services, active alerts, slow
/// endpoints and failing endpoints; clamped to `0..=100`.
pub fn health_score(report: &HealthReport, metrics: &PerformanceMetrics, alerts: &AlertSummary) -> u8 {
    let mut score: i64 = 100;

    for result in report.services.values() {
        score -= match result.status {
            HealthStatus::Critical => 30,
            HealthStatus::Unhealthy => 20,
            HealthStatus::Degraded => 10,
            HealthStatus::Healthy => 0,
        };
    }

    let level = |l: AlertLevel| alerts.by_level.get(l.as_str()).copied().unwrap_or(0) as i64;
    score -= level(AlertLevel::Critical) * 15;
    score -= level(AlertLevel::Warning) * 5;

    for avg in metrics.request_metrics.average_response_time.values() {
        if *avg > 2000.0 {
            score -= 10;
        } else if *avg > 1000.0 {
            score -= 5;
        }
    }

    for rate in metrics.request_metrics.error_rates.values() {
        if *rate > 10.0 {
            score -= 10;
        } else if *rate > 5.0 {
            score -= 5;
        }
    }

    score.clamp(0, 100) as u8
}

pub fn quick_stats(report: &HealthReport, metrics: &PerformanceMetrics) -> QuickStats {
    let averages = &metrics.request_metrics.average_response_time;
    let average_response_time = if averages.is_empty() {
        0.0
    } else {
        let mean = averages.values().sum::<f64>() / averages.len() as f64;
        (mean * 100.0).round() / 100.0
    };

    QuickStats {
        services_healthy: report
            .services
            .values()
            .filter(|r| r.status == HealthStatus::Healthy)
            .count(),
        total_services: report.services.len(),
        active_users: metrics.user_metrics.active_users_count,
        requests_last_minute: metrics.request_metrics.requests_per_minute.values().sum(),
        average_response_time,
        cache_hit_rate: metrics.cache_metrics.hit_rate,
        total_errors: metrics.total_errors,
    }
}

pub fn recommendations(report: &HealthReport, metrics: &PerformanceMetrics, active: &[Alert]) -> Vec<String> {
    let mut out = Vec::new();
    let requests = &metrics.request_metrics;

    let failing: Vec<&str> = requests
        .error_rates
        .iter()
        .filter(|(_, rate)| **rate > 5.0)
        .map(|(endpoint, _)| endpoint.as_str())
        .collect();
    if !failing.is_empty() {
        out.push(format!("Investigate high error rates on: {}", failing.join(", ")));
    }

    let slow: Vec<&str> = requests
        .average_response_time
        .iter()
        .filter(|(_, avg)| **avg > 1000.0)
        .map(|(endpoint, _)| endpoint.as_str())
        .collect();
    if !slow.is_empty() {
        out.push(format!("Optimize slow endpoints: {}", slow.join(", ")));
    }

    if metrics.cache_metrics.total_operations > 0 && metrics.cache_metrics.hit_rate < 70.0 {
        out.push("Consider improving cache strategy - hit rate below optimal".to_string());
    }

    if let Some(system) = report.services.get(SYSTEM) {
        if system.detail_f64("memory_percent").unwrap_or(0.0) > 80.0 {
            out.push("Consider scaling up memory resources".to_string());
        }
        if system.detail_f64("cpu_percent").unwrap_or(0.0) > 80.0 {
            out.push("Consider scaling up CPU resources".to_string());
        }
    }

    if active.iter().any(|a| a.level == AlertLevel::Critical) {
        out.push("Address critical alerts immediately".to_string());
    }

    if out.is_empty() {
        out.push(ALL_CLEAR.to_string());
    }
    out
}
