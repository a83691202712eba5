// =====================================================================================
// SECURITY CELL INTEGRATION TESTS - RATE LIMITING & ERROR BOUNDARY
// =====================================================================================

use axum::{
    body::Body,
    http::{header::AUTHORIZATION, Request, StatusCode},
    middleware,
    routing::get,
    Router,
};
use serde_json::Value;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;

use performance_cell::{CacheManager, KeyValueStore, MemoryStore, StoreError, UnavailableStore};
use security_cell::{
    error_boundary_middleware, panic_response, rate_limit_middleware, ApiError, ErrorBoundary,
    RateLimitState, RateLimiter, WindowState,
};
use shared_utils::clock::{Clock, ManualClock};
use shared_utils::jwt::JwtTokenDecoder;
use shared_utils::test_utils::{window_aligned_clock, JwtTestUtils, TestConfig, TestUser};

struct Fixture {
    clock: Arc<ManualClock>,
    store: Arc<MemoryStore>,
    limiter: Arc<RateLimiter>,
}

async fn fixture() -> Fixture {
    let clock = window_aligned_clock();
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    let cache = Arc::new(CacheManager::new(store.clone()));
    cache.init().await;
    let limiter = Arc::new(RateLimiter::with_clock(cache, clock.clone(), 60));
    Fixture { clock, store, limiter }
}

#[tokio::test]
async fn test_athlete_gets_exactly_limit_plus_burst() {
    let f = fixture().await;
    f.clock.advance(chrono::Duration::seconds(17));

    let mut last_remaining = u64::MAX;
    for n in 1..=110u64 {
        let decision = f.limiter.check("athlete-1", "athlete", "/api/deals").await;
        assert!(decision.allowed, "request {} should be allowed", n);
        assert_eq!(decision.info.limit, 100);
        assert_eq!(decision.info.remaining, 110 - n);
        assert!(decision.info.remaining < last_remaining);
        last_remaining = decision.info.remaining;

        let expected = if n <= 100 { WindowState::Active } else { WindowState::Burst };
        assert_eq!(decision.state, expected);
    }

    let rejected = f.limiter.check("athlete-1", "athlete", "/api/deals").await;
    assert!(!rejected.allowed);
    assert_eq!(rejected.state, WindowState::Exceeded);
    assert_eq!(rejected.info.remaining, 0);
    assert_eq!(rejected.info.retry_after, 43);
    assert_eq!(rejected.info.reset, f.clock.unix_seconds() + 43);
}

#[tokio::test]
async fn test_new_window_admits_again() {
    let f = fixture().await;

    for _ in 0..56 {
        f.limiter.check("anonymous", "anonymous", "/api/schools").await;
    }
    assert!(!f.limiter.check("anonymous", "anonymous", "/api/schools").await.allowed);

    f.clock.advance(chrono::Duration::seconds(60));
    let decision = f.limiter.check("anonymous", "anonymous", "/api/schools").await;
    assert!(decision.allowed);
    assert_eq!(decision.info.remaining, 54);
}

#[tokio::test]
async fn test_burst_usage_is_tracked_in_its_own_counter() {
    let f = fixture().await;
    let window_start = f.clock.unix_seconds();

    for _ in 0..205 {
        f.limiter.check("brand-9", "brand", "/api/deals").await;
    }

    let burst_key = format!("fairplay_rate_limit:burst:brand-9:brand:/api/deals:{}", window_start);
    assert_eq!(f.store.get(&burst_key).await.unwrap(), Some(b"5".to_vec()));
    assert_eq!(f.store.ttl(&burst_key).await, Some(Duration::from_secs(60)));
}

#[tokio::test]
async fn test_counters_are_scoped_per_identity_and_endpoint() {
    let f = fixture().await;

    for _ in 0..3 {
        f.limiter.check("u1", "athlete", "/api/deals").await;
    }
    assert_eq!(f.limiter.check("u1", "athlete", "/api/profile").await.info.remaining, 109);
    assert_eq!(f.limiter.check("u2", "athlete", "/api/deals").await.info.remaining, 109);
    assert_eq!(f.limiter.check("u1", "athlete", "/api/deals").await.info.remaining, 106);
}

#[tokio::test]
async fn test_unknown_role_gets_anonymous_quota() {
    let f = fixture().await;
    let decision = f.limiter.check("u1", "scout", "/api/deals").await;
    assert_eq!(decision.info.limit, 50);
    assert_eq!(decision.info.remaining, 54);
}

#[tokio::test]
async fn test_fail_open_when_backend_unavailable() {
    let cache = Arc::new(CacheManager::new(Arc::new(UnavailableStore)));
    let limiter = RateLimiter::new(cache.clone());

    for _ in 0..200 {
        let decision = limiter.check("athlete-1", "athlete", "/api/deals").await;
        assert!(decision.allowed);
        assert_eq!(decision.state, WindowState::Unmetered);
        assert_eq!(decision.info.limit, 100);
        assert_eq!(decision.info.remaining, 100);
    }
    // Per-request failures never switch the shared cache off.
    assert!(!cache.is_fallback());
    assert!(!limiter.is_fallback());
}

#[tokio::test]
async fn test_init_against_unreachable_store_enters_fallback() {
    let cache = Arc::new(CacheManager::new(Arc::new(UnavailableStore)));
    let limiter = RateLimiter::new(cache);

    assert!(!limiter.init().await);
    assert!(limiter.is_fallback());
    let decision = limiter.check("u1", "brand", "/api/deals").await;
    assert_eq!(decision.state, WindowState::Unmetered);
    assert_eq!(decision.info.remaining, 200);
}

/// Times out on the next counter update when armed, otherwise delegates.
struct FlakyStore {
    inner: MemoryStore,
    fail_next_incr: AtomicBool,
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    fn backend(&self) -> &'static str {
        "flaky"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key).await
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        self.inner.set_ex(key, value, ttl).await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.inner.delete(keys).await
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.inner.scan_match(pattern).await
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        if self.fail_next_incr.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Timeout(Duration::from_secs(5)));
        }
        self.inner.incr_with_expiry(key, ttl).await
    }

    async fn info(&self) -> Result<HashMap<String, String>, StoreError> {
        self.inner.info().await
    }
}

#[tokio::test]
async fn test_transient_store_timeout_only_affects_one_request() {
    let clock = window_aligned_clock();
    let store = Arc::new(FlakyStore {
        inner: MemoryStore::with_clock(clock.clone()),
        fail_next_incr: AtomicBool::new(true),
    });
    let cache = Arc::new(CacheManager::new(store));
    assert!(cache.init().await);
    let limiter = RateLimiter::with_clock(cache.clone(), clock, 60);
    assert!(limiter.init().await);

    let first = limiter.check("anonymous", "anonymous", "/api/schools").await;
    assert!(first.allowed);
    assert_eq!(first.state, WindowState::Unmetered);

    // The store is healthy again, so the normal 50 + 5 quota applies.
    let mut admitted = 0;
    let mut last = None;
    for _ in 0..500 {
        let decision = limiter.check("anonymous", "anonymous", "/api/schools").await;
        if decision.allowed {
            admitted += 1;
        }
        last = Some(decision.state);
    }
    assert_eq!(admitted, 55);
    assert_eq!(last, Some(WindowState::Exceeded));
    assert!(!limiter.is_fallback());
    assert!(!cache.is_fallback());
}

// =====================================================================================
// MIDDLEWARE
// =====================================================================================

fn limited_app(f: &Fixture) -> Router {
    let decoder = Arc::new(JwtTokenDecoder::new(TestConfig::default().jwt_secret));
    let state = Arc::new(RateLimitState::new(f.limiter.clone(), decoder));

    Router::new()
        .route("/api/deals", get(|| async { "deals" }))
        .route("/health", get(|| async { "ok" }))
        .layer(middleware::from_fn_with_state(state, rate_limit_middleware))
}

fn get_request(uri: &str, auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(auth) = auth {
        builder = builder.header(AUTHORIZATION, auth);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_middleware_attaches_rate_headers() {
    let f = fixture().await;
    let brand = JwtTestUtils::bearer(&TestUser::brand(), &TestConfig::default().jwt_secret);

    let response = limited_app(&f)
        .oneshot(get_request("/api/deals", Some(&brand)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-limit"], "200");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "219");
    assert_eq!(response.headers()["x-ratelimit-window"], "60");
    assert_eq!(
        response.headers()["x-ratelimit-reset"],
        (f.clock.unix_seconds() + 60).to_string().as_str()
    );
}

#[tokio::test]
async fn test_middleware_treats_bad_tokens_as_anonymous_and_rejects_with_429() {
    let f = fixture().await;
    let app = limited_app(&f);

    for _ in 0..55 {
        let response = app
            .clone()
            .oneshot(get_request("/api/deals", Some("Bearer not-a-jwt")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app.oneshot(get_request("/api/deals", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["retry-after"], "60");
    assert_eq!(response.headers()["x-ratelimit-exceeded"], "true");
    assert_eq!(response.headers()["x-ratelimit-limit"], "50");

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["rate_limit_exceeded"], true);
    assert_eq!(json["remaining"], 0);
    assert_eq!(json["retry_after"], 60);
}

#[tokio::test]
async fn test_bypass_paths_are_not_counted() {
    let f = fixture().await;
    let app = limited_app(&f);

    for _ in 0..100 {
        let response = app.clone().oneshot(get_request("/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("x-ratelimit-limit").is_none());
    }
    assert!(f.store.is_empty().await);
}

// =====================================================================================
// ERROR BOUNDARY
// =====================================================================================

async fn failing_handler() -> Result<&'static str, ApiError> {
    Err(anyhow::anyhow!("payment provider rejected token=abc123").into())
}

async fn panicking_handler() -> &'static str {
    panic!("deal ledger corrupted")
}

fn guarded_app(development: bool) -> Router {
    let boundary = Arc::new(ErrorBoundary::new(development));
    Router::new()
        .route("/fails", get(failing_handler))
        .route("/panics", get(panicking_handler))
        .route("/ok", get(|| async { "fine" }))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn_with_state(boundary, error_boundary_middleware))
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_boundary_returns_opaque_incident_in_production() {
    for uri in ["/fails", "/panics"] {
        let response = guarded_app(false).oneshot(get_request(uri, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = json_body(response).await;
        assert_eq!(json["error"], "Internal server error");
        assert_eq!(json["detail"], "An unexpected error occurred. Please try again later.");
        assert!(json["error_id"].as_str().unwrap().starts_with("error_"));
        assert!(json.get("type").is_none());
    }
}

#[tokio::test]
async fn test_boundary_exposes_detail_in_development() {
    let response = guarded_app(true).oneshot(get_request("/panics", None)).await.unwrap();
    let json = json_body(response).await;
    assert_eq!(json["detail"], "deal ledger corrupted");
    assert_eq!(json["type"], "panic");
}

#[tokio::test]
async fn test_boundary_leaves_successful_responses_alone() {
    let response = guarded_app(false).oneshot(get_request("/ok", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"fine");
}
