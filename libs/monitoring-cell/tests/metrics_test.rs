// =====================================================================================
// METRICS COLLECTOR & EXPORTER TESTS
// =====================================================================================

use std::sync::Arc;
use std::time::Duration;

use monitoring_cell::services::metrics::MAX_SAMPLES_PER_ENDPOINT;
use monitoring_cell::{MetricsCollector, PrometheusExporter};
use performance_cell::models::{CacheCategory, CachedValue};
use performance_cell::{CacheManager, MemoryStore};
use serde_json::json;
use shared_utils::clock::ManualClock;
use shared_utils::test_utils::window_aligned_clock;

fn collector() -> (Arc<ManualClock>, Arc<MetricsCollector>) {
    let clock = window_aligned_clock();
    let metrics = Arc::new(MetricsCollector::with_clock(clock.clone()));
    (clock, metrics)
}

#[tokio::test]
async fn test_percentiles_use_nearest_rank() {
    let (_, metrics) = collector();

    for ms in 1..=100u64 {
        let endpoint = if ms % 2 == 0 { "/api/deals" } else { "/api/profile" };
        metrics
            .record_request_duration(endpoint, "GET", 200, Duration::from_millis(ms), "athlete")
            .await;
    }

    let perf = metrics.performance_metrics().await;
    let p = perf.response_time_percentiles.unwrap();
    assert_eq!(p.p50, 50.0);
    assert_eq!(p.p95, 95.0);
    assert_eq!(p.p99, 99.0);
    assert_eq!(perf.total_requests, 100);
}

#[tokio::test]
async fn test_percentiles_absent_without_samples() {
    let (_, metrics) = collector();
    let perf = metrics.performance_metrics().await;
    assert!(perf.response_time_percentiles.is_none());
    assert_eq!(perf.total_requests, 0);
    assert_eq!(perf.cache_metrics.hit_rate, 0.0);
}

#[tokio::test]
async fn test_request_metrics_per_endpoint() {
    let (clock, metrics) = collector();

    for status in [200, 200, 201, 404, 500] {
        metrics
            .record_request_duration("/api/deals", "POST", status, Duration::from_millis(100), "brand")
            .await;
    }

    clock.advance(chrono::Duration::minutes(5));
    for _ in 0..3 {
        metrics
            .record_request_duration("/api/deals", "GET", 200, Duration::from_millis(400), "brand")
            .await;
    }

    let requests = metrics.request_metrics().await;
    assert_eq!(requests.requests_per_hour["/api/deals"], 8);
    assert_eq!(requests.requests_per_minute["/api/deals"], 3);
    assert_eq!(requests.average_response_time["/api/deals"], 212.5);
    assert_eq!(requests.error_rates["/api/deals"], 25.0);
    assert_eq!(requests.status_code_distribution[&200], 5);
    assert_eq!(requests.status_code_distribution[&500], 1);

    clock.advance(chrono::Duration::hours(2));
    let requests = metrics.request_metrics().await;
    assert!(requests.requests_per_hour.is_empty());
}

#[tokio::test]
async fn test_retains_last_thousand_samples_per_endpoint() {
    let (_, metrics) = collector();

    for i in 0..(MAX_SAMPLES_PER_ENDPOINT + 5) {
        let status = if i < 5 { 500 } else { 200 };
        metrics
            .record_request_duration("/api/schools", "GET", status, Duration::from_millis(10), "anonymous")
            .await;
    }

    let perf = metrics.performance_metrics().await;
    assert_eq!(perf.request_metrics.requests_per_hour["/api/schools"], 1000);
    // The five failures were the oldest samples and have been evicted.
    assert_eq!(perf.request_metrics.error_rates["/api/schools"], 0.0);
    assert_eq!(perf.total_requests, 1005);
}

#[tokio::test]
async fn test_user_activity_and_reset() {
    let (clock, metrics) = collector();

    metrics.record_user_activity("u1", "athlete", "deal_created").await;
    metrics.record_user_activity("u1", "athlete", "deal_created").await;
    metrics.record_user_activity("u2", "brand", "profile_viewed").await;
    metrics
        .record_request_duration("/api/deals", "GET", 200, Duration::from_millis(5), "athlete")
        .await;

    let users = metrics.user_metrics().await;
    assert_eq!(users.active_users_count, 2);
    assert_eq!(users.user_activities["athlete_deal_created"], 2);
    assert_eq!(users.activity_distribution["athlete"], 2);
    assert_eq!(users.activity_distribution["brand"], 1);

    clock.advance(chrono::Duration::hours(25));
    metrics
        .record_request_duration("/api/profile", "GET", 200, Duration::from_millis(5), "athlete")
        .await;
    metrics.reset_metrics(chrono::Duration::hours(24)).await;

    let perf = metrics.performance_metrics().await;
    assert_eq!(perf.user_metrics.active_users_count, 0);
    assert!(!perf.request_metrics.requests_per_hour.contains_key("/api/deals"));
    assert_eq!(perf.request_metrics.requests_per_hour["/api/profile"], 1);
    // Activity counters survive a reset.
    assert_eq!(perf.user_metrics.user_activities["athlete_deal_created"], 2);
}

#[tokio::test]
async fn test_database_query_stats() {
    let (_, metrics) = collector();

    metrics.record_database_query("deals_select", Duration::from_millis(100), true).await;
    metrics.record_database_query("deals_select", Duration::from_millis(300), false).await;

    let stats = metrics.database_metrics().await;
    assert_eq!(stats["deals_select"].total, 2);
    assert_eq!(stats["deals_select"].errors, 1);
    assert_eq!(stats["deals_select"].avg_duration_ms, 200.0);
}

#[tokio::test]
async fn test_cache_manager_reports_into_collector() {
    let (_, metrics) = collector();
    let cache = CacheManager::new(Arc::new(MemoryStore::new())).with_metrics(metrics.clone());
    cache.init().await;

    cache
        .set(CacheCategory::Schools, CachedValue::Json(json!(["SEC"])), "all", None)
        .await;
    cache.get(CacheCategory::Schools, "all").await;
    cache.get(CacheCategory::Schools, "all").await;
    cache.get(CacheCategory::Schools, "division_II").await;

    let cache_metrics = metrics.cache_metrics().await;
    assert_eq!(cache_metrics.total_hits, 2);
    assert_eq!(cache_metrics.total_misses, 1);
    assert_eq!(cache_metrics.total_operations, 3);
    assert_eq!(cache_metrics.hit_rate, 66.67);
}

#[tokio::test]
async fn test_prometheus_exposition() {
    let (_, metrics) = collector();

    metrics
        .record_request_duration("/api/deals", "GET", 200, Duration::from_millis(120), "athlete")
        .await;
    metrics
        .record_request_duration("/api/deals", "GET", 500, Duration::from_millis(80), "athlete")
        .await;
    metrics.record_error_rate("/api/deals", "server_error", "athlete").await;
    metrics.record_cache_operation("get", true, Duration::from_millis(2)).await;
    metrics.increment_counter("deals_created", 2.0, &[("role", "brand")]).await;
    metrics.set_gauge("queue_depth", 7.0, &[]).await;

    let text = PrometheusExporter::new(metrics.clone()).render().await;

    assert!(text.contains("# HELP fairplay_nil_info FairPlay NIL application info\n# TYPE fairplay_nil_info gauge\n"));
    assert!(text.contains(r#"fairplay_nil_info{version="#));
    assert!(text.contains(r#"http_requests_per_minute{endpoint="/api/deals"} 2"#));
    assert!(text.contains(r#"http_request_duration_ms{endpoint="/api/deals"} 100"#));
    assert!(text.contains(r#"http_error_rate{endpoint="/api/deals"} 50"#));
    assert!(text.contains(r#"http_errors_total{endpoint="/api/deals",error_type="server_error",user_role="athlete"} 1"#));
    assert!(text.contains(r#"cache_operations_total{operation="get",result="hit"} 1"#));
    assert!(text.contains("cache_hit_rate 100"));
    assert!(text.contains("# TYPE deals_created counter"));
    assert!(text.contains(r#"deals_created{role="brand"} 2"#));
    assert!(text.contains("# TYPE queue_depth gauge\nqueue_depth 7"));

    // Every family is announced once.
    assert_eq!(text.matches("# TYPE http_error_rate ").count(), 1);
}

#[tokio::test]
async fn test_json_snapshot_wraps_performance_metrics() {
    let (_, metrics) = collector();
    metrics
        .record_request_duration("/api/deals", "GET", 200, Duration::from_millis(10), "athlete")
        .await;

    let snapshot = PrometheusExporter::new(metrics).json_snapshot().await;
    let value = serde_json::to_value(&snapshot).unwrap();

    assert_eq!(value["service"], "fairplay-nil-api");
    assert_eq!(value["metrics"]["total_requests"], 1);
    assert!(value["metrics"]["response_time_percentiles"]["p95"].is_number());
}
