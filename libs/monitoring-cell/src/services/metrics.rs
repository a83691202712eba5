// =====================================================================================
// METRICS COLLECTOR SERVICE
// =====================================================================================

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::models::{
    CacheMetrics, PerformanceMetrics, QueryStats, RequestMetrics, ResponseTimePercentiles,
    UserMetrics,
};
use performance_cell::CacheMetricsSink;
use shared_utils::clock::{Clock, SystemClock};

/// Request samples retained per endpoint.
pub const MAX_SAMPLES_PER_ENDPOINT: usize = 1000;

#[derive(Debug, Clone)]
struct RequestSample {
    duration_ms: f64,
    status: u16,
    at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RequestLabels {
    pub method: String,
    pub endpoint: String,
    pub status: u16,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ErrorLabels {
    pub endpoint: String,
    pub error_type: String,
    pub role: String,
}

/// Name plus sorted label pairs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MetricKey {
    pub name: String,
    pub labels: Vec<(String, String)>,
}

impl MetricKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        labels.sort();
        Self { name: name.to_string(), labels }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct QueryAccumulator {
    total: u64,
    errors: u64,
    total_duration_ms: f64,
}

#[derive(Debug, Default)]
struct MetricsState {
    request_samples: HashMap<String, VecDeque<RequestSample>>,
    request_counts: BTreeMap<RequestLabels, u64>,
    error_counts: BTreeMap<ErrorLabels, u64>,
    active_users: HashSet<String>,
    /// (role, action)
    user_activities: BTreeMap<(String, String), u64>,
    queries: BTreeMap<String, QueryAccumulator>,
    /// (operation, hit)
    cache_operations: BTreeMap<(String, bool), u64>,
    cache_duration_ms: f64,
    counters: BTreeMap<MetricKey, f64>,
    gauges: BTreeMap<MetricKey, f64>,
}

/// Raw totals handed to the Prometheus exporter.
#[derive(Debug, Clone, Default)]
pub struct CounterSnapshot {
    pub requests: BTreeMap<RequestLabels, u64>,
    pub errors: BTreeMap<ErrorLabels, u64>,
    pub queries: BTreeMap<String, QueryStats>,
    /// (operation, hit)
    pub cache_operations: BTreeMap<(String, bool), u64>,
    pub cache_duration_ms: f64,
    pub counters: BTreeMap<MetricKey, f64>,
    pub gauges: BTreeMap<MetricKey, f64>,
}

/// In-process aggregator. Every write goes through one lock; reads derive
/// their figures from the retained samples at call time.
#[derive(Debug)]
pub struct MetricsCollector {
    state: RwLock<MetricsState>,
    clock: Arc<dyn Clock>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(MetricsState::default()),
            clock,
        }
    }

    // =====================================================================================
    // RECORDING
    // =====================================================================================

    #[instrument(skip(self))]
    pub async fn record_request_duration(
        &self,
        endpoint: &str,
        method: &str,
        status: u16,
        duration: Duration,
        role: &str,
    ) {
        let sample = RequestSample {
            duration_ms: duration.as_secs_f64() * 1000.0,
            status,
            at: self.clock.now(),
        };
        let labels = RequestLabels {
            method: method.to_string(),
            endpoint: endpoint.to_string(),
            status,
            role: role.to_string(),
        };

        let mut state = self.state.write().await;
        *state.request_counts.entry(labels).or_insert(0) += 1;

        let samples = state.request_samples.entry(endpoint.to_string()).or_default();
        samples.push_back(sample);
        while samples.len() > MAX_SAMPLES_PER_ENDPOINT {
            samples.pop_front();
        }
    }

    pub async fn record_error_rate(&self, endpoint: &str, error_type: &str, role: &str) {
        let labels = ErrorLabels {
            endpoint: endpoint.to_string(),
            error_type: error_type.to_string(),
            role: role.to_string(),
        };
        let mut state = self.state.write().await;
        *state.error_counts.entry(labels).or_insert(0) += 1;
    }

    pub async fn record_user_activity(&self, user_id: &str, role: &str, action: &str) {
        let mut state = self.state.write().await;
        state.active_users.insert(user_id.to_string());
        *state
            .user_activities
            .entry((role.to_string(), action.to_string()))
            .or_insert(0) += 1;
    }

    pub async fn record_database_query(&self, query_type: &str, duration: Duration, success: bool) {
        let mut state = self.state.write().await;
        let entry = state.queries.entry(query_type.to_string()).or_default();
        entry.total += 1;
        entry.total_duration_ms += duration.as_secs_f64() * 1000.0;
        if !success {
            entry.errors += 1;
        }
    }

    pub async fn record_cache_operation(&self, operation: &str, hit: bool, duration: Duration) {
        let mut state = self.state.write().await;
        *state
            .cache_operations
            .entry((operation.to_string(), hit))
            .or_insert(0) += 1;
        state.cache_duration_ms += duration.as_secs_f64() * 1000.0;
    }

    pub async fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let mut state = self.state.write().await;
        state.gauges.insert(MetricKey::new(name, labels), value);
    }

    pub async fn increment_counter(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let mut state = self.state.write().await;
        *state.counters.entry(MetricKey::new(name, labels)).or_insert(0.0) += value;
    }

    // =====================================================================================
    // DERIVED READS
    // =====================================================================================

    pub async fn request_metrics(&self) -> RequestMetrics {
        let state = self.state.read().await;
        Self::derive_request_metrics(&state, self.clock.now())
    }

    fn derive_request_metrics(state: &MetricsState, now: DateTime<Utc>) -> RequestMetrics {
        let last_hour = now - chrono::Duration::hours(1);
        let last_minute = now - chrono::Duration::minutes(1);
        let mut metrics = RequestMetrics::default();

        for (endpoint, samples) in &state.request_samples {
            let recent: Vec<&RequestSample> = samples.iter().filter(|s| s.at > last_hour).collect();
            if recent.is_empty() {
                continue;
            }

            let per_minute = recent.iter().filter(|s| s.at > last_minute).count() as u64;
            let total_ms: f64 = recent.iter().map(|s| s.duration_ms).sum();
            let errors = recent.iter().filter(|s| s.status >= 400).count();

            for sample in &recent {
                *metrics.status_code_distribution.entry(sample.status).or_insert(0) += 1;
            }

            metrics.requests_per_hour.insert(endpoint.clone(), recent.len() as u64);
            metrics.requests_per_minute.insert(endpoint.clone(), per_minute);
            metrics
                .average_response_time
                .insert(endpoint.clone(), round2(total_ms / recent.len() as f64));
            metrics
                .error_rates
                .insert(endpoint.clone(), round2(errors as f64 / recent.len() as f64 * 100.0));
        }

        metrics
    }

    pub async fn user_metrics(&self) -> UserMetrics {
        let state = self.state.read().await;
        Self::derive_user_metrics(&state)
    }

    fn derive_user_metrics(state: &MetricsState) -> UserMetrics {
        let mut metrics = UserMetrics {
            active_users_count: state.active_users.len(),
            ..UserMetrics::default()
        };

        for ((role, action), count) in &state.user_activities {
            metrics.user_activities.insert(format!("{}_{}", role, action), *count);
            *metrics.activity_distribution.entry(role.clone()).or_insert(0) += count;
        }

        metrics
    }

    pub async fn cache_metrics(&self) -> CacheMetrics {
        let state = self.state.read().await;
        Self::derive_cache_metrics(&state)
    }

    fn derive_cache_metrics(state: &MetricsState) -> CacheMetrics {
        let (hits, misses) = state
            .cache_operations
            .iter()
            .fold((0u64, 0u64), |(hits, misses), ((_, hit), count)| {
                if *hit {
                    (hits + count, misses)
                } else {
                    (hits, misses + count)
                }
            });
        let total = hits + misses;

        CacheMetrics {
            hit_rate: if total > 0 { round2(hits as f64 / total as f64 * 100.0) } else { 0.0 },
            total_hits: hits,
            total_misses: misses,
            total_operations: total,
        }
    }

    pub async fn database_metrics(&self) -> BTreeMap<String, QueryStats> {
        let state = self.state.read().await;
        Self::derive_database_metrics(&state)
    }

    fn derive_database_metrics(state: &MetricsState) -> BTreeMap<String, QueryStats> {
        state
            .queries
            .iter()
            .map(|(query_type, acc)| {
                let avg = if acc.total > 0 { acc.total_duration_ms / acc.total as f64 } else { 0.0 };
                (
                    query_type.clone(),
                    QueryStats {
                        total: acc.total,
                        errors: acc.errors,
                        avg_duration_ms: round2(avg),
                    },
                )
            })
            .collect()
    }

    pub async fn performance_metrics(&self) -> PerformanceMetrics {
        let state = self.state.read().await;
        let now = self.clock.now();

        let mut durations: Vec<f64> = state
            .request_samples
            .values()
            .flat_map(|samples| samples.iter().map(|s| s.duration_ms))
            .collect();
        durations.sort_by(f64::total_cmp);

        let response_time_percentiles = if durations.is_empty() {
            None
        } else {
            Some(ResponseTimePercentiles {
                p50: round2(nearest_rank(&durations, 50.0)),
                p95: round2(nearest_rank(&durations, 95.0)),
                p99: round2(nearest_rank(&durations, 99.0)),
            })
        };

        PerformanceMetrics {
            request_metrics: Self::derive_request_metrics(&state, now),
            user_metrics: Self::derive_user_metrics(&state),
            response_time_percentiles,
            total_errors: state.error_counts.values().sum(),
            total_requests: state.request_counts.values().sum(),
            cache_metrics: Self::derive_cache_metrics(&state),
            database_metrics: Self::derive_database_metrics(&state),
        }
    }

    pub async fn counter_snapshot(&self) -> CounterSnapshot {
        let state = self.state.read().await;
        CounterSnapshot {
            requests: state.request_counts.clone(),
            errors: state.error_counts.clone(),
            queries: Self::derive_database_metrics(&state),
            cache_operations: state.cache_operations.clone(),
            cache_duration_ms: state.cache_duration_ms,
            counters: state.counters.clone(),
            gauges: state.gauges.clone(),
        }
    }

    /// Drops request samples older than `older_than` and forgets the active
    /// user set. Counters are kept.
    pub async fn reset_metrics(&self, older_than: chrono::Duration) {
        let cutoff = self.clock.now() - older_than;
        let mut state = self.state.write().await;

        state.request_samples.retain(|_, samples| {
            samples.retain(|s| s.at > cutoff);
            !samples.is_empty()
        });
        state.active_users.clear();

        debug!("Purged request samples older than {}", cutoff);
    }
}

#[async_trait]
impl CacheMetricsSink for MetricsCollector {
    async fn record_cache_operation(&self, operation: &str, hit: bool, duration: Duration) {
        MetricsCollector::record_cache_operation(self, operation, hit, duration).await;
    }
}

/// Nearest-rank percentile over ascending `sorted`: the value at rank
/// `ceil(p/100 * n)`, clamped to `1..=n`.
pub fn nearest_rank(sorted: &[f64], percentile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    let rank = ((percentile / 100.0) * n as f64).ceil() as usize;
    sorted[rank.clamp(1, n) - 1]
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_rank_percentiles() {
        let values: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_eq!(nearest_rank(&values, 50.0), 50.0);
        assert_eq!(nearest_rank(&values, 95.0), 95.0);
        assert_eq!(nearest_rank(&values, 99.0), 99.0);

        let small = [10.0, 20.0, 30.0];
        assert_eq!(nearest_rank(&small, 50.0), 20.0);
        assert_eq!(nearest_rank(&small, 99.0), 30.0);
        assert_eq!(nearest_rank(&small, 0.0), 10.0);
        assert_eq!(nearest_rank(&[], 50.0), 0.0);
    }

    #[test]
    fn metric_keys_sort_labels() {
        let a = MetricKey::new("deals_created", &[("role", "brand"), ("tier", "gold")]);
        let b = MetricKey::new("deals_created", &[("tier", "gold"), ("role", "brand")]);
        assert_eq!(a, b);
    }
}
