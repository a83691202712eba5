// =====================================================================================
// HEALTH MONITORING SERVICE
// =====================================================================================

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde_json::json;
use sysinfo::{Disks, System, MINIMUM_CPU_UPDATE_INTERVAL};
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::models::{
    HealthReport, HealthResult, HealthStatus, HealthTrends, MonitoringError, ReliabilityBreakdown,
    ServiceTrend, SERVICE_VERSION,
};
use crate::services::metrics::MetricsCollector;
use performance_cell::models::{CacheCategory, CachedValue};
use performance_cell::services::CacheManager;
use shared_database::SupabaseClient;

pub const DATABASE: &str = "database";
pub const CACHE_STORE: &str = "cache_store";
pub const SYSTEM: &str = "system";
pub const APPLICATION: &str = "application";

pub const MAX_HISTORY: usize = 100;
pub const TREND_WINDOW: usize = 20;
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self) -> Result<HealthResult, MonitoringError>;
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

// =====================================================================================
// DATABASE
// =====================================================================================

#[async_trait]
pub trait DatabasePing: Send + Sync {
    /// Round-trip latency of a trivial request.
    async fn ping(&self) -> anyhow::Result<Duration>;
}

#[async_trait]
impl DatabasePing for SupabaseClient {
    async fn ping(&self) -> anyhow::Result<Duration> {
        SupabaseClient::ping(self).await
    }
}

pub struct DatabaseCheck {
    database: Arc<dyn DatabasePing>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl DatabaseCheck {
    pub fn new(database: Arc<dyn DatabasePing>) -> Self {
        Self { database, metrics: None }
    }

    /// Pings are also recorded as `health_ping` queries.
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

#[async_trait]
impl HealthCheck for DatabaseCheck {
    fn name(&self) -> &str {
        DATABASE
    }

    async fn check(&self) -> Result<HealthResult, MonitoringError> {
        let started = Instant::now();
        let outcome = self.database.ping().await;

        if let Some(metrics) = &self.metrics {
            metrics
                .record_database_query("health_ping", started.elapsed(), outcome.is_ok())
                .await;
        }

        let result = match outcome {
            Ok(latency) => {
                let ms = latency.as_secs_f64() * 1000.0;
                let (status, message) = if ms > 1000.0 {
                    (HealthStatus::Degraded, format!("Database responding slowly: {:.2}ms", ms))
                } else if ms > 500.0 {
                    (HealthStatus::Degraded, format!("Database response time elevated: {:.2}ms", ms))
                } else {
                    (HealthStatus::Healthy, "Database connection healthy".to_string())
                };
                HealthResult::new(DATABASE, status, ms, message)
                    .with_detail("query_response_time", ms)
            }
            Err(e) => HealthResult::new(
                DATABASE,
                HealthStatus::Unhealthy,
                elapsed_ms(started),
                format!("Database connection failed: {}", e),
            ),
        };

        Ok(result)
    }
}

// =====================================================================================
// CACHE STORE
// =====================================================================================

const HEALTH_KEY: &str = "health_check";

pub struct CacheStoreCheck {
    cache: Arc<CacheManager>,
}

impl CacheStoreCheck {
    pub fn new(cache: Arc<CacheManager>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl HealthCheck for CacheStoreCheck {
    fn name(&self) -> &str {
        CACHE_STORE
    }

    async fn check(&self) -> Result<HealthResult, MonitoringError> {
        let started = Instant::now();

        if self.cache.is_fallback() {
            return Ok(HealthResult::new(
                CACHE_STORE,
                HealthStatus::Degraded,
                elapsed_ms(started),
                "Cache store unavailable - using fallback mode",
            )
            .with_detail("fallback_mode", true));
        }

        let marker = CachedValue::Json(json!({ "timestamp": Utc::now().to_rfc3339() }));
        let written = self
            .cache
            .set(CacheCategory::Health, marker, HEALTH_KEY, Some(Duration::from_secs(60)))
            .await;
        let read = self.cache.get(CacheCategory::Health, HEALTH_KEY).await;
        let ms = elapsed_ms(started);

        let round_trip_ok = written && read.is_some();
        let (status, message) = if round_trip_ok && ms < 100.0 {
            (HealthStatus::Healthy, "Cache store connection healthy".to_string())
        } else if round_trip_ok && ms < 500.0 {
            (HealthStatus::Degraded, format!("Cache store responding slowly: {:.2}ms", ms))
        } else if round_trip_ok {
            (HealthStatus::Unhealthy, format!("Cache store round trip took {:.2}ms", ms))
        } else {
            (HealthStatus::Unhealthy, "Cache store read/write operations failed".to_string())
        };

        let stats = serde_json::to_value(self.cache.stats().await).unwrap_or_default();

        Ok(HealthResult::new(CACHE_STORE, status, ms, message)
            .with_detail("cache_stats", stats)
            .with_detail("operations_tested", json!(["set", "get"])))
    }
}

// =====================================================================================
// SYSTEM RESOURCES
// =====================================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_available_mb: u64,
    pub disk_percent: f64,
    pub disk_free_gb: u64,
    pub load_average: Option<[f64; 3]>,
    /// Open TCP sockets, when the platform exposes them.
    pub network_connections: Option<u64>,
}

const CONNECTION_WARNING: u64 = 1000;

#[async_trait]
pub trait ResourceSampler: Send + Sync {
    async fn sample(&self) -> Result<ResourceUsage, MonitoringError>;
}

/// Host figures from `sysinfo`, sampled on the blocking pool since CPU usage
/// needs two refreshes separated by the minimum update interval.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoSampler;

impl SysinfoSampler {
    /// Socket rows from the kernel's TCP tables, header lines excluded.
    fn count_connections() -> Option<u64> {
        let mut total = None;
        for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
            if let Ok(contents) = std::fs::read_to_string(table) {
                let rows = contents.lines().skip(1).filter(|l| !l.trim().is_empty()).count() as u64;
                total = Some(total.unwrap_or(0) + rows);
            }
        }
        total
    }

    fn sample_blocking() -> ResourceUsage {
        let mut sys = System::new();
        sys.refresh_cpu();
        std::thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_cpu();
        sys.refresh_memory();

        let total_memory = sys.total_memory();
        let available_memory = sys.available_memory();
        let memory_percent = if total_memory > 0 {
            (total_memory - available_memory.min(total_memory)) as f64 / total_memory as f64 * 100.0
        } else {
            0.0
        };

        let disks = Disks::new_with_refreshed_list();
        let (disk_total, disk_free) = disks
            .list()
            .iter()
            .find(|d| d.mount_point() == std::path::Path::new("/"))
            .map(|d| (d.total_space(), d.available_space()))
            .unwrap_or_else(|| {
                disks.list().iter().fold((0, 0), |(total, free), d| {
                    (total + d.total_space(), free + d.available_space())
                })
            });
        let disk_percent = if disk_total > 0 {
            (disk_total - disk_free.min(disk_total)) as f64 / disk_total as f64 * 100.0
        } else {
            0.0
        };

        let load = System::load_average();
        let load_average = if load.one == 0.0 && load.five == 0.0 && load.fifteen == 0.0 {
            None
        } else {
            Some([load.one, load.five, load.fifteen])
        };

        ResourceUsage {
            cpu_percent: sys.global_cpu_info().cpu_usage() as f64,
            memory_percent,
            memory_available_mb: available_memory / 1024 / 1024,
            disk_percent,
            disk_free_gb: disk_free / 1024 / 1024 / 1024,
            load_average,
            network_connections: Self::count_connections(),
        }
    }
}

#[async_trait]
impl ResourceSampler for SysinfoSampler {
    async fn sample(&self) -> Result<ResourceUsage, MonitoringError> {
        tokio::task::spawn_blocking(Self::sample_blocking)
            .await
            .map_err(|e| MonitoringError::CheckFailed(format!("resource sampling aborted: {}", e)))
    }
}

pub struct SystemResourcesCheck {
    sampler: Arc<dyn ResourceSampler>,
}

impl SystemResourcesCheck {
    pub fn new(sampler: Arc<dyn ResourceSampler>) -> Self {
        Self { sampler }
    }
}

#[async_trait]
impl HealthCheck for SystemResourcesCheck {
    fn name(&self) -> &str {
        SYSTEM
    }

    async fn check(&self) -> Result<HealthResult, MonitoringError> {
        let started = Instant::now();
        let usage = self.sampler.sample().await?;

        let mut warnings = Vec::new();
        if usage.cpu_percent > 85.0 {
            warnings.push(format!("High CPU usage: {:.1}%", usage.cpu_percent));
        }
        if usage.memory_percent > 85.0 {
            warnings.push(format!("High memory usage: {:.1}%", usage.memory_percent));
        }
        if usage.disk_percent > 85.0 {
            warnings.push(format!("High disk usage: {:.1}%", usage.disk_percent));
        }
        if let Some(connections) = usage.network_connections.filter(|c| *c > CONNECTION_WARNING) {
            warnings.push(format!("High connection count: {}", connections));
        }

        let (status, message) = if warnings.is_empty() {
            (HealthStatus::Healthy, "System resources healthy".to_string())
        } else if usage.cpu_percent > 95.0 || usage.memory_percent > 95.0 {
            (HealthStatus::Critical, format!("Critical resource usage: {}", warnings.join("; ")))
        } else {
            (HealthStatus::Degraded, format!("Resource usage elevated: {}", warnings.join("; ")))
        };

        Ok(HealthResult::new(SYSTEM, status, elapsed_ms(started), message)
            .with_detail("cpu_percent", usage.cpu_percent)
            .with_detail("memory_percent", usage.memory_percent)
            .with_detail("memory_available_mb", usage.memory_available_mb)
            .with_detail("disk_percent", usage.disk_percent)
            .with_detail("disk_free_gb", usage.disk_free_gb)
            .with_detail("load_average", json!(usage.load_average))
            .with_detail("network_connections", json!(usage.network_connections)))
    }
}

// =====================================================================================
// APPLICATION
// =====================================================================================

pub struct ApplicationCheck {
    metrics: Arc<MetricsCollector>,
}

impl ApplicationCheck {
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl HealthCheck for ApplicationCheck {
    fn name(&self) -> &str {
        APPLICATION
    }

    async fn check(&self) -> Result<HealthResult, MonitoringError> {
        let started = Instant::now();
        let queries = self.metrics.database_metrics().await;
        let cache = self.metrics.cache_metrics().await;

        let mut critical = Vec::new();
        let mut warnings = Vec::new();

        for (query_type, stats) in &queries {
            if stats.errors > 10 {
                critical.push(format!("High error rate in {}: {} errors", query_type, stats.errors));
            } else if stats.errors > 0 {
                warnings.push(format!("Errors detected in {}: {} errors", query_type, stats.errors));
            }
            if stats.avg_duration_ms > 2000.0 {
                warnings.push(format!(
                    "Slow queries in {}: {:.2}s average",
                    query_type,
                    stats.avg_duration_ms / 1000.0
                ));
            }
        }

        if cache.total_operations > 0 && cache.hit_rate < 50.0 {
            warnings.push(format!("Low cache hit rate: {:.1}%", cache.hit_rate));
        }

        let (status, message) = if !critical.is_empty() {
            (HealthStatus::Critical, format!("Critical application issues: {}", critical.join("; ")))
        } else if !warnings.is_empty() {
            (HealthStatus::Degraded, format!("Application performance issues: {}", warnings.join("; ")))
        } else {
            (HealthStatus::Healthy, "Application health optimal".to_string())
        };

        Ok(HealthResult::new(APPLICATION, status, elapsed_ms(started), message)
            .with_detail("query_performance", json!(queries))
            .with_detail("cache_performance", json!(cache)))
    }
}

// =====================================================================================
// SYSTEM HEALTH MONITOR
// =====================================================================================

/// Runs `check` under `limit`; errors and timeouts become critical results.
pub async fn run_check(check: &dyn HealthCheck, limit: Duration) -> HealthResult {
    let started = Instant::now();
    let name = check.name().to_string();

    match tokio::time::timeout(limit, check.check()).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            warn!("Health check {} failed: {}", name, e);
            HealthResult::new(
                name.clone(),
                HealthStatus::Critical,
                elapsed_ms(started),
                format!("{} health check failed: {}", name, e),
            )
        }
        Err(_) => {
            let e = MonitoringError::Timeout(limit);
            warn!("Health check {} timed out", name);
            HealthResult::new(
                name.clone(),
                HealthStatus::Critical,
                elapsed_ms(started),
                format!("{} health check failed: {}", name, e),
            )
        }
    }
}

pub struct SystemHealthMonitor {
    checks: Vec<Arc<dyn HealthCheck>>,
    timeout: Duration,
    history: RwLock<VecDeque<HealthReport>>,
}

impl SystemHealthMonitor {
    pub fn new(checks: Vec<Arc<dyn HealthCheck>>, timeout: Duration) -> Self {
        Self {
            checks,
            timeout,
            history: RwLock::new(VecDeque::with_capacity(MAX_HISTORY)),
        }
    }

    pub fn component_names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Runs every check concurrently and appends the report to history.
    #[instrument(skip(self))]
    pub async fn comprehensive_health(&self) -> HealthReport {
        let started = Instant::now();

        let results = join_all(
            self.checks
                .iter()
                .map(|check| run_check(check.as_ref(), self.timeout)),
        )
        .await;

        let overall_status = HealthStatus::worst(results.iter().map(|r| r.status));
        let services: BTreeMap<String, HealthResult> = results
            .into_iter()
            .map(|r| (r.service.clone(), r))
            .collect();

        let report = HealthReport {
            overall_status,
            total_checks: self.checks.len(),
            services,
            health_check_duration_ms: (elapsed_ms(started) * 100.0).round() / 100.0,
            timestamp: Utc::now(),
            version: SERVICE_VERSION.to_string(),
        };

        match overall_status {
            HealthStatus::Healthy => debug!("Health check complete: healthy"),
            HealthStatus::Degraded => info!("Health check complete: degraded"),
            HealthStatus::Unhealthy | HealthStatus::Critical => {
                error!("Health check complete: {}", overall_status.as_str())
            }
        }

        let mut history = self.history.write().await;
        history.push_back(report.clone());
        while history.len() > MAX_HISTORY {
            history.pop_front();
        }

        report
    }

    pub async fn component_health(&self, name: &str) -> Result<HealthResult, MonitoringError> {
        let check = self
            .checks
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| MonitoringError::UnknownComponent(name.to_string()))?;

        Ok(run_check(check.as_ref(), self.timeout).await)
    }

    /// Most recent `limit` reports, oldest first.
    pub async fn history(&self, limit: usize) -> Vec<HealthReport> {
        let history = self.history.read().await;
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Status counts and mean response time over the last 20 reports.
    pub async fn trends(&self) -> Option<HealthTrends> {
        let recent = self.history(TREND_WINDOW).await;
        if recent.is_empty() {
            return None;
        }

        let mut service_trends: BTreeMap<String, ServiceTrend> = BTreeMap::new();
        let mut response_totals: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        let mut reliability = ReliabilityBreakdown {
            total_checks: recent.len(),
            ..ReliabilityBreakdown::default()
        };

        for report in &recent {
            match report.overall_status {
                HealthStatus::Healthy => reliability.healthy_checks += 1,
                HealthStatus::Degraded => reliability.degraded_checks += 1,
                HealthStatus::Unhealthy => reliability.unhealthy_checks += 1,
                HealthStatus::Critical => reliability.critical_checks += 1,
            }

            for (service, result) in &report.services {
                let trend = service_trends.entry(service.clone()).or_default();
                match result.status {
                    HealthStatus::Healthy => trend.healthy_count += 1,
                    HealthStatus::Degraded => trend.degraded_count += 1,
                    HealthStatus::Unhealthy => trend.unhealthy_count += 1,
                    HealthStatus::Critical => trend.critical_count += 1,
                }
                let totals = response_totals.entry(service.clone()).or_insert((0.0, 0));
                totals.0 += result.response_time_ms;
                totals.1 += 1;
            }
        }

        for (service, (sum, count)) in response_totals {
            if let Some(trend) = service_trends.get_mut(&service) {
                trend.avg_response_time = sum / count as f64;
            }
        }

        Some(HealthTrends {
            analysis_period: format!("Last {} checks", recent.len()),
            service_trends,
            overall_reliability: reliability,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedResources(ResourceUsage);

    #[async_trait]
    impl ResourceSampler for FixedResources {
        async fn sample(&self) -> Result<ResourceUsage, MonitoringError> {
            Ok(self.0)
        }
    }

    fn usage(cpu: f64, memory: f64, disk: f64) -> ResourceUsage {
        ResourceUsage {
            cpu_percent: cpu,
            memory_percent: memory,
            memory_available_mb: 2048,
            disk_percent: disk,
            disk_free_gb: 40,
            load_average: None,
            network_connections: Some(120),
        }
    }

    async fn system_status(cpu: f64, memory: f64, disk: f64) -> HealthStatus {
        SystemResourcesCheck::new(Arc::new(FixedResources(usage(cpu, memory, disk))))
            .check()
            .await
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn resource_thresholds() {
        assert_eq!(system_status(20.0, 40.0, 50.0).await, HealthStatus::Healthy);
        assert_eq!(system_status(90.0, 40.0, 50.0).await, HealthStatus::Degraded);
        assert_eq!(system_status(20.0, 40.0, 99.0).await, HealthStatus::Degraded);
        assert_eq!(system_status(96.0, 40.0, 50.0).await, HealthStatus::Critical);
        assert_eq!(system_status(20.0, 97.0, 50.0).await, HealthStatus::Critical);
    }

    #[tokio::test]
    async fn resource_details_feed_alerting() {
        let result = SystemResourcesCheck::new(Arc::new(FixedResources(usage(12.5, 88.0, 30.0))))
            .check()
            .await
            .unwrap();
        assert_eq!(result.detail_f64("memory_percent"), Some(88.0));
        assert_eq!(result.detail_f64("cpu_percent"), Some(12.5));
        assert!(result.message.contains("High memory usage: 88.0%"));
    }

    #[tokio::test]
    async fn connection_count_above_limit_degrades() {
        let busy = ResourceUsage { network_connections: Some(1001), ..usage(20.0, 40.0, 50.0) };
        let result = SystemResourcesCheck::new(Arc::new(FixedResources(busy)))
            .check()
            .await
            .unwrap();
        assert_eq!(result.status, HealthStatus::Degraded);
        assert!(result.message.contains("High connection count: 1001"));
        assert_eq!(result.detail_f64("network_connections"), Some(1001.0));

        let at_limit = ResourceUsage { network_connections: Some(1000), ..usage(20.0, 40.0, 50.0) };
        let result = SystemResourcesCheck::new(Arc::new(FixedResources(at_limit)))
            .check()
            .await
            .unwrap();
        assert_eq!(result.status, HealthStatus::Healthy);

        let unknown = ResourceUsage { network_connections: None, ..usage(20.0, 40.0, 50.0) };
        let result = SystemResourcesCheck::new(Arc::new(FixedResources(unknown)))
            .check()
            .await
            .unwrap();
        assert_eq!(result.status, HealthStatus::Healthy);
    }
}
