// =====================================================================================
// ALERT MANAGER SERVICE
// =====================================================================================

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::models::{
    Alert, AlertLevel, AlertSubject, AlertSummary, AlertThresholds, HealthReport, HealthStatus,
    PerformanceMetrics, Resource, Threshold,
};
use crate::services::health::{CACHE_STORE, DATABASE, SYSTEM};
use shared_utils::clock::{Clock, SystemClock};

pub const MAX_ALERT_HISTORY: usize = 1000;
const RECENT_WINDOW: usize = 20;

/// A condition that currently holds, before it becomes an `Alert`.
#[derive(Debug, Clone)]
struct Firing {
    subject: AlertSubject,
    level: AlertLevel,
    title: String,
    description: String,
    service: String,
    metric_value: Option<f64>,
    threshold: Option<f64>,
}

impl Firing {
    fn id(&self) -> String {
        self.subject.alert_id(self.level)
    }

    fn into_alert(self, now: DateTime<Utc>) -> Alert {
        Alert {
            id: self.id(),
            level: self.level,
            title: self.title,
            description: self.description,
            service: self.service,
            subject: self.subject,
            metric_value: self.metric_value,
            threshold: self.threshold,
            timestamp: now,
            resolved: false,
            resolved_at: None,
        }
    }
}

#[derive(Debug, Default)]
struct AlertState {
    active: BTreeMap<String, Alert>,
    history: VecDeque<Alert>,
}

impl AlertState {
    fn resolve(&mut self, id: &str, at: DateTime<Utc>) -> Option<Alert> {
        let mut alert = self.active.remove(id)?;
        alert.resolved = true;
        alert.resolved_at = Some(at);

        if let Some(entry) = self
            .history
            .iter_mut()
            .rev()
            .find(|a| a.id == id && !a.resolved)
        {
            entry.resolved = true;
            entry.resolved_at = Some(at);
        }
        Some(alert)
    }

    fn record(&mut self, alert: Alert) {
        self.history.push_back(alert);
        while self.history.len() > MAX_ALERT_HISTORY {
            self.history.pop_front();
        }
    }
}

/// Turns health reports and metrics into alerts with stable ids. At most one
/// alert is active per id, and per subject only the most severe level.
pub struct AlertManager {
    thresholds: AlertThresholds,
    state: RwLock<AlertState>,
    clock: Arc<dyn Clock>,
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new(AlertThresholds::default())
    }
}

fn title_case(value: &str) -> String {
    value
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Level for a higher-is-worse value.
fn above(value: f64, threshold: Threshold) -> Option<(AlertLevel, f64)> {
    if value > threshold.critical {
        Some((AlertLevel::Critical, threshold.critical))
    } else if value > threshold.warning {
        Some((AlertLevel::Warning, threshold.warning))
    } else {
        None
    }
}

/// Level for a lower-is-worse value.
fn below(value: f64, threshold: Threshold) -> Option<(AlertLevel, f64)> {
    if value < threshold.critical {
        Some((AlertLevel::Critical, threshold.critical))
    } else if value < threshold.warning {
        Some((AlertLevel::Warning, threshold.warning))
    } else {
        None
    }
}

impl AlertManager {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self::with_clock(thresholds, Arc::new(SystemClock))
    }

    pub fn with_clock(thresholds: AlertThresholds, clock: Arc<dyn Clock>) -> Self {
        Self {
            thresholds,
            state: RwLock::new(AlertState::default()),
            clock,
        }
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    fn firing_conditions(&self, report: &HealthReport, metrics: &PerformanceMetrics) -> Vec<Firing> {
        let mut firing = Vec::new();

        for (service, result) in &report.services {
            if result.status == HealthStatus::Critical {
                firing.push(Firing {
                    subject: AlertSubject::ServiceHealth { service: service.clone() },
                    level: AlertLevel::Critical,
                    title: format!("{} Service Critical", title_case(service)),
                    description: result.message.clone(),
                    service: service.clone(),
                    metric_value: None,
                    threshold: None,
                });
            }

            let threshold = match service.as_str() {
                DATABASE => self.thresholds.database_response,
                CACHE_STORE => self.thresholds.response_time,
                _ => continue,
            };
            if result.response_time_ms <= 0.0 {
                continue;
            }
            if let Some((level, limit)) = above(result.response_time_ms, threshold) {
                let suffix = if level == AlertLevel::Critical { "Critical" } else { "Elevated" };
                firing.push(Firing {
                    subject: AlertSubject::ResponseTime { service: service.clone() },
                    level,
                    title: format!("{} Response Time {}", title_case(service), suffix),
                    description: format!("Response time is {:.0}ms", result.response_time_ms),
                    service: service.clone(),
                    metric_value: Some(result.response_time_ms),
                    threshold: Some(limit),
                });
            }
        }

        if let Some(system) = report.services.get(SYSTEM) {
            for resource in Resource::ALL {
                let Some(value) = system.detail_f64(resource.detail_key()) else {
                    continue;
                };
                if let Some((level, limit)) = above(value, self.thresholds.for_resource(resource)) {
                    let prefix = if level == AlertLevel::Critical { "High" } else { "Elevated" };
                    firing.push(Firing {
                        subject: AlertSubject::SystemResource { resource },
                        level,
                        title: format!("{} {}", prefix, resource.label()),
                        description: format!("{} is at {:.1}%", resource.label(), value),
                        service: SYSTEM.to_string(),
                        metric_value: Some(value),
                        threshold: Some(limit),
                    });
                }
            }
        }

        for (endpoint, rate) in &metrics.request_metrics.error_rates {
            if let Some((level, limit)) = above(*rate, self.thresholds.error_rate) {
                let prefix = if level == AlertLevel::Critical { "High" } else { "Elevated" };
                firing.push(Firing {
                    subject: AlertSubject::ErrorRate { endpoint: endpoint.clone() },
                    level,
                    title: format!("{} Error Rate on {}", prefix, endpoint),
                    description: format!("Error rate is {:.1}%", rate),
                    service: "application".to_string(),
                    metric_value: Some(*rate),
                    threshold: Some(limit),
                });
            }
        }

        let cache = &metrics.cache_metrics;
        if cache.total_operations > 0 {
            if let Some((level, limit)) = below(cache.hit_rate, self.thresholds.cache_hit_rate) {
                let title = if level == AlertLevel::Critical {
                    "Low Cache Hit Rate"
                } else {
                    "Cache Hit Rate Below Optimal"
                };
                firing.push(Firing {
                    subject: AlertSubject::CacheHitRate,
                    level,
                    title: title.to_string(),
                    description: format!("Cache hit rate is {:.1}%", cache.hit_rate),
                    service: "cache".to_string(),
                    metric_value: Some(cache.hit_rate),
                    threshold: Some(limit),
                });
            }
        }

        firing
    }

    /// Raises alerts for newly firing conditions and resolves active alerts
    /// whose condition no longer holds. Returns only the new alerts.
    #[instrument(skip_all)]
    pub async fn evaluate(&self, report: &HealthReport, metrics: &PerformanceMetrics) -> Vec<Alert> {
        let now = self.clock.now();
        let firing: HashMap<String, Firing> = self
            .firing_conditions(report, metrics)
            .into_iter()
            .map(|f| (f.id(), f))
            .collect();

        let mut state = self.state.write().await;

        // Covers both recovery and a level change on the same subject.
        let stale: Vec<String> = state
            .active
            .keys()
            .filter(|id| !firing.contains_key(*id))
            .cloned()
            .collect();
        for id in stale {
            if state.resolve(&id, now).is_some() {
                info!(alert_id = %id, "Alert auto-resolved");
            }
        }

        let mut new_alerts = Vec::new();
        let mut fresh: Vec<Firing> = firing
            .into_values()
            .filter(|f| !state.active.contains_key(&f.id()))
            .collect();
        fresh.sort_by_key(|f| f.id());

        for condition in fresh {
            let alert = condition.into_alert(now);
            match alert.level {
                AlertLevel::Critical | AlertLevel::Emergency => {
                    warn!(alert_id = %alert.id, "Critical alert raised: {}", alert.title)
                }
                _ => info!(alert_id = %alert.id, "Alert raised: {}", alert.title),
            }
            state.active.insert(alert.id.clone(), alert.clone());
            state.record(alert.clone());
            new_alerts.push(alert);
        }

        new_alerts
    }

    pub async fn active_alerts(&self) -> Vec<Alert> {
        self.state.read().await.active.values().cloned().collect()
    }

    pub async fn summary(&self) -> AlertSummary {
        let state = self.state.read().await;

        let mut by_level: BTreeMap<String, usize> = AlertLevel::ALL
            .iter()
            .map(|level| (level.as_str().to_string(), 0))
            .collect();
        let mut by_service: BTreeMap<String, usize> = BTreeMap::new();

        for alert in state.active.values() {
            *by_level.entry(alert.level.as_str().to_string()).or_insert(0) += 1;
            *by_service.entry(alert.service.clone()).or_insert(0) += 1;
        }

        let skip = state.history.len().saturating_sub(RECENT_WINDOW);
        let recent_alerts = state.history.iter().skip(skip).filter(|a| !a.resolved).count();

        AlertSummary {
            total_active: state.active.len(),
            by_level,
            by_service,
            recent_alerts,
        }
    }

    /// Manually resolves an active alert. It is raised again if its condition
    /// still holds at the next evaluation.
    pub async fn acknowledge(&self, id: &str) -> bool {
        let resolved = self.state.write().await.resolve(id, self.clock.now()).is_some();
        if resolved {
            info!(alert_id = %id, "Alert acknowledged");
        }
        resolved
    }

    pub async fn clear_all(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let ids: Vec<String> = state.active.keys().cloned().collect();
        for id in &ids {
            state.resolve(id, now);
        }
        ids.len()
    }

    /// Most recent `limit` history entries, oldest first.
    pub async fn history(&self, limit: usize) -> Vec<Alert> {
        let state = self.state.read().await;
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }
}
