use std::sync::Arc;

use tracing::{info, warn};

use monitoring_cell::services::{
    ApplicationCheck, CacheStoreCheck, DatabaseCheck, HealthCheck, SysinfoSampler,
    SystemResourcesCheck,
};
use monitoring_cell::{AlertManager, MetricsCollector, MonitoringDashboard, SystemHealthMonitor};
use performance_cell::{CacheManager, KeyValueStore, MemoryStore, RedisStore, UnavailableStore};
use security_cell::{ErrorBoundary, RateLimiter};
use shared_config::AppConfig;
use shared_database::SupabaseClient;
use shared_utils::clock::SystemClock;
use shared_utils::jwt::{JwtTokenDecoder, TokenDecoder};

/// Every long-lived service, constructed once at startup and shared by the
/// routers and middleware.
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub cache: Arc<CacheManager>,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics: Arc<MetricsCollector>,
    pub health: Arc<SystemHealthMonitor>,
    pub alerts: Arc<AlertManager>,
    pub dashboard: Arc<MonitoringDashboard>,
    pub boundary: Arc<ErrorBoundary>,
    pub decoder: Arc<dyn TokenDecoder>,
}

fn select_store(config: &AppConfig) -> Arc<dyn KeyValueStore> {
    match &config.redis_url {
        Some(url) => match RedisStore::connect(url, config.store_timeout()) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!("Redis store could not be configured, cache runs in fallback mode: {}", e);
                Arc::new(UnavailableStore)
            }
        },
        None => Arc::new(MemoryStore::new()),
    }
}

impl AppState {
    pub async fn init(config: AppConfig) -> Self {
        let config = Arc::new(config);
        let metrics = Arc::new(MetricsCollector::new());

        let cache = Arc::new(
            CacheManager::with_prefix(select_store(&config), config.cache_key_prefix.clone())
                .with_metrics(metrics.clone()),
        );
        if cache.init().await {
            info!("Cache store connected");
        }

        let rate_limiter = Arc::new(RateLimiter::with_clock(
            cache.clone(),
            Arc::new(SystemClock),
            config.rate_limit_window_seconds,
        ));
        rate_limiter.init().await;

        let checks: Vec<Arc<dyn HealthCheck>> = vec![
            Arc::new(
                DatabaseCheck::new(Arc::new(SupabaseClient::new(&config)))
                    .with_metrics(metrics.clone()),
            ),
            Arc::new(CacheStoreCheck::new(cache.clone())),
            Arc::new(SystemResourcesCheck::new(Arc::new(SysinfoSampler))),
            Arc::new(ApplicationCheck::new(metrics.clone())),
        ];
        let health = Arc::new(SystemHealthMonitor::new(checks, config.health_check_timeout()));

        let alerts = Arc::new(AlertManager::default());
        let dashboard = Arc::new(
            MonitoringDashboard::new(health.clone(), metrics.clone(), alerts.clone())
                .with_ttl(config.dashboard_cache_ttl()),
        );

        Self {
            decoder: Arc::new(JwtTokenDecoder::new(config.supabase_jwt_secret.clone())),
            boundary: Arc::new(ErrorBoundary::new(config.is_development())),
            config,
            cache,
            rate_limiter,
            metrics,
            health,
            alerts,
            dashboard,
        }
    }

    pub async fn shutdown(&self) {
        self.cache.shutdown().await;
    }
}
