// =====================================================================================
// PROMETHEUS EXPORTER - TEXT EXPOSITION & JSON SNAPSHOT
// =====================================================================================

use std::fmt::Write;
use std::sync::Arc;

use chrono::Utc;

use crate::models::{MetricsJson, SERVICE_NAME, SERVICE_VERSION};
use crate::services::metrics::{MetricKey, MetricsCollector};

pub struct PrometheusExporter {
    collector: Arc<MetricsCollector>,
}

/// Accumulates one metric family at a time: HELP and TYPE first, then the
/// samples, then a blank separator line.
struct Exposition {
    out: String,
}

impl Exposition {
    fn new() -> Self {
        Self { out: String::new() }
    }

    fn family(&mut self, name: &str, kind: &str, help: &str) {
        let _ = writeln!(self.out, "# HELP {} {}", name, help);
        let _ = writeln!(self.out, "# TYPE {} {}", name, kind);
    }

    fn sample(&mut self, name: &str, labels: &[(&str, &str)], value: impl std::fmt::Display) {
        if labels.is_empty() {
            let _ = writeln!(self.out, "{} {}", name, value);
            return;
        }
        let rendered: Vec<String> = labels
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
            .collect();
        let _ = writeln!(self.out, "{}{{{}}} {}", name, rendered.join(","), value);
    }

    fn end(&mut self) {
        self.out.push('\n');
    }
}

impl PrometheusExporter {
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self { collector }
    }

    pub async fn render(&self) -> String {
        let requests = self.collector.request_metrics().await;
        let users = self.collector.user_metrics().await;
        let cache = self.collector.cache_metrics().await;
        let totals = self.collector.counter_snapshot().await;

        let mut exp = Exposition::new();

        exp.family("fairplay_nil_info", "gauge", "FairPlay NIL application info");
        exp.sample(
            "fairplay_nil_info",
            &[("version", SERVICE_VERSION), ("service", SERVICE_NAME)],
            1,
        );
        exp.end();

        exp.family("http_requests_total", "counter", "Total HTTP requests");
        for (labels, count) in &totals.requests {
            let status = labels.status.to_string();
            exp.sample(
                "http_requests_total",
                &[
                    ("method", labels.method.as_str()),
                    ("endpoint", labels.endpoint.as_str()),
                    ("status_code", status.as_str()),
                    ("user_role", labels.role.as_str()),
                ],
                count,
            );
        }
        exp.end();

        exp.family("http_requests_per_minute", "gauge", "Number of HTTP requests per minute");
        for (endpoint, count) in &requests.requests_per_minute {
            exp.sample("http_requests_per_minute", &[("endpoint", endpoint.as_str())], count);
        }
        exp.end();

        exp.family(
            "http_request_duration_ms",
            "gauge",
            "Average HTTP request duration in milliseconds",
        );
        for (endpoint, avg) in &requests.average_response_time {
            exp.sample("http_request_duration_ms", &[("endpoint", endpoint.as_str())], avg);
        }
        exp.end();

        exp.family("http_error_rate", "gauge", "HTTP error rate percentage");
        for (endpoint, rate) in &requests.error_rates {
            exp.sample("http_error_rate", &[("endpoint", endpoint.as_str())], rate);
        }
        exp.end();

        exp.family("http_errors_total", "counter", "Total recorded HTTP errors");
        for (labels, count) in &totals.errors {
            exp.sample(
                "http_errors_total",
                &[
                    ("endpoint", labels.endpoint.as_str()),
                    ("error_type", labels.error_type.as_str()),
                    ("user_role", labels.role.as_str()),
                ],
                count,
            );
        }
        exp.end();

        exp.family("active_users_count", "gauge", "Number of active users");
        exp.sample("active_users_count", &[], users.active_users_count);
        exp.end();

        exp.family("cache_hit_rate", "gauge", "Cache hit rate percentage");
        exp.sample("cache_hit_rate", &[], cache.hit_rate);
        exp.end();

        exp.family("cache_operations_total", "counter", "Total cache operations");
        for ((operation, hit), count) in &totals.cache_operations {
            let result = if *hit { "hit" } else { "miss" };
            exp.sample(
                "cache_operations_total",
                &[("operation", operation.as_str()), ("result", result)],
                count,
            );
        }
        exp.end();

        exp.family(
            "cache_operation_duration_ms_total",
            "counter",
            "Cumulative time spent in cache operations in milliseconds",
        );
        exp.sample("cache_operation_duration_ms_total", &[], round2(totals.cache_duration_ms));
        exp.end();

        if !totals.queries.is_empty() {
            exp.family("database_queries_total", "counter", "Total database queries");
            for (query_type, stats) in &totals.queries {
                let ok = (stats.total - stats.errors).to_string();
                let failed = stats.errors.to_string();
                exp.sample("database_queries_total", &[("query_type", query_type.as_str()), ("status", "success")], ok);
                exp.sample("database_queries_total", &[("query_type", query_type.as_str()), ("status", "error")], failed);
            }
            exp.end();
        }

        render_custom(&mut exp, "counter", &totals.counters);
        render_custom(&mut exp, "gauge", &totals.gauges);

        exp.out
    }

    pub async fn json_snapshot(&self) -> MetricsJson {
        MetricsJson {
            timestamp: Utc::now(),
            service: SERVICE_NAME,
            version: SERVICE_VERSION,
            metrics: self.collector.performance_metrics().await,
        }
    }
}

/// Groups application-defined series under one HELP/TYPE pair per name.
fn render_custom(exp: &mut Exposition, kind: &str, series: &std::collections::BTreeMap<MetricKey, f64>) {
    let mut current: Option<&str> = None;
    for (key, value) in series {
        let name = sanitize_name(&key.name);
        if current != Some(key.name.as_str()) {
            if current.is_some() {
                exp.end();
            }
            exp.family(&name, kind, &format!("Application {} {}", kind, key.name));
            current = Some(key.name.as_str());
        }
        let labels: Vec<(&str, &str)> = key.labels.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        exp.sample(&name, &labels, value);
    }
    if current.is_some() {
        exp.end();
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Metric names are `[a-zA-Z_:][a-zA-Z0-9_:]*`.
fn sanitize_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == ':' { c } else { '_' })
        .collect();
    if out.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_values_are_escaped() {
        assert_eq!(escape_label(r#"say "hi"\n"#), r#"say \"hi\"\\n"#);
        assert_eq!(escape_label("line\nbreak"), "line\\nbreak");
    }

    #[test]
    fn metric_names_are_sanitized() {
        assert_eq!(sanitize_name("deals.created-total"), "deals_created_total");
        assert_eq!(sanitize_name("9lives"), "_9lives");
    }
}
