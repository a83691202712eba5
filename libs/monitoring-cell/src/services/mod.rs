pub mod alerts;
pub mod dashboard;
pub mod health;
pub mod metrics;
pub mod prometheus;

pub use alerts::AlertManager;
pub use dashboard::MonitoringDashboard;
pub use health::{
    ApplicationCheck, CacheStoreCheck, DatabaseCheck, DatabasePing, HealthCheck, ResourceSampler,
    ResourceUsage, SysinfoSampler, SystemHealthMonitor, SystemResourcesCheck,
};
pub use metrics::MetricsCollector;
pub use prometheus::PrometheusExporter;
