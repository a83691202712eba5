// =====================================================================================
// RATE LIMITER - FIXED WINDOW WITH BURST ALLOWANCE
// =====================================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::models::{
    RateLimitDecision, RateLimitInfo, RoleQuota, WindowState, DEFAULT_WINDOW_SECONDS,
    RATE_LIMIT_PREFIX,
};
use performance_cell::services::CacheManager;
use shared_utils::clock::{Clock, SystemClock};

/// Counts requests per (identity, role, endpoint) in wall-clock aligned
/// windows. Counters live in the cache manager's store so every instance
/// behind the load balancer shares them.
///
/// Fallback mode is decided by `init` alone. A failed counter update only
/// lets that one request through.
pub struct RateLimiter {
    cache: Arc<CacheManager>,
    clock: Arc<dyn Clock>,
    window: u64,
    fallback: AtomicBool,
}

struct Window {
    now: i64,
    start: i64,
    end: i64,
}

impl RateLimiter {
    pub fn new(cache: Arc<CacheManager>) -> Self {
        Self::with_clock(cache, Arc::new(SystemClock), DEFAULT_WINDOW_SECONDS)
    }

    pub fn with_clock(cache: Arc<CacheManager>, clock: Arc<dyn Clock>, window_seconds: u64) -> Self {
        Self {
            cache,
            clock,
            window: window_seconds.max(1),
            fallback: AtomicBool::new(false),
        }
    }

    /// Pings the counter store; on failure every check is allowed unmetered
    /// until `init` succeeds again.
    pub async fn init(&self) -> bool {
        match self.cache.store().ping().await {
            Ok(()) => {
                self.fallback.store(false, Ordering::Relaxed);
                info!("Rate limiter connected to {} store", self.cache.store().backend());
                true
            }
            Err(e) => {
                self.fallback.store(true, Ordering::Relaxed);
                warn!("Rate limit store unavailable, running in fallback mode: {}", e);
                false
            }
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback.load(Ordering::Relaxed)
    }

    pub fn window_seconds(&self) -> u64 {
        self.window
    }

    fn current_window(&self) -> Window {
        let now = self.clock.unix_seconds();
        let window = self.window as i64;
        let start = now - now.rem_euclid(window);
        Window { now, start, end: start + window }
    }

    fn counter_key(kind: &str, identity: &str, role: &str, endpoint: &str, window_start: i64) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}",
            RATE_LIMIT_PREFIX, kind, identity, role, endpoint, window_start
        )
    }

    fn fail_open(&self, quota: RoleQuota, window: &Window) -> RateLimitDecision {
        RateLimitDecision {
            allowed: true,
            state: WindowState::Unmetered,
            info: RateLimitInfo {
                limit: quota.limit,
                remaining: quota.limit,
                reset: window.end,
                retry_after: 0,
                window: self.window,
            },
        }
    }

    #[instrument(skip(self))]
    pub async fn check(&self, identity: &str, role: &str, endpoint: &str) -> RateLimitDecision {
        let quota = RoleQuota::for_role(role);
        let window = self.current_window();

        if self.is_fallback() {
            warn!("Rate limiting in fallback mode - allowing request");
            return self.fail_open(quota, &window);
        }

        let store = self.cache.store();
        let ttl = Duration::from_secs(self.window);
        let rate_key = Self::counter_key("rate", identity, role, endpoint, window.start);

        let count = match store.incr_with_expiry(&rate_key, ttl).await {
            Ok(count) => count.max(0) as u64,
            Err(e) => {
                warn!("Rate limit backend failed, allowing request: {}", e);
                return self.fail_open(quota, &window);
            }
        };

        let state = if count <= quota.limit {
            WindowState::Active
        } else if count <= quota.ceiling() {
            WindowState::Burst
        } else {
            WindowState::Exceeded
        };

        if state == WindowState::Burst {
            let burst_key = Self::counter_key("burst", identity, role, endpoint, window.start);
            if let Err(e) = store.incr_with_expiry(&burst_key, ttl).await {
                debug!("Failed to track burst usage: {}", e);
            }
        }

        let info = if state == WindowState::Exceeded {
            RateLimitInfo {
                limit: quota.limit,
                remaining: 0,
                reset: window.end,
                retry_after: (window.end - window.now).max(1) as u64,
                window: self.window,
            }
        } else {
            RateLimitInfo {
                limit: quota.limit,
                remaining: quota.ceiling() - count,
                reset: window.end,
                retry_after: 0,
                window: self.window,
            }
        };

        if state == WindowState::Exceeded {
            warn!(count, "Rate limit exceeded for {} ({}) on {}", identity, role, endpoint);
        }

        RateLimitDecision {
            allowed: state != WindowState::Exceeded,
            state,
            info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_keys_are_window_scoped() {
        assert_eq!(
            RateLimiter::counter_key("rate", "u1", "athlete", "/api/deals", 1_700_000_040),
            "fairplay_rate_limit:rate:u1:athlete:/api/deals:1700000040"
        );
    }
}
