// =====================================================================================
// CACHE MANAGER - TYPED CACHE OVER THE KEY-VALUE STORE
// =====================================================================================

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, instrument, warn};

use crate::models::{CacheCategory, CacheStats, CachedValue, RedisInfo};
use crate::store::{escape_glob, KeyValueStore, StoreError};

pub const DEFAULT_PREFIX: &str = "fairplay_cache";
const MAX_IDENTIFIER_LEN: usize = 100;

/// Receives one event per cache read.
#[async_trait]
pub trait CacheMetricsSink: Send + Sync {
    async fn record_cache_operation(&self, operation: &str, hit: bool, duration: Duration);
}

/// `{prefix}:{category}:{identifier}`, hashing identifiers over 100 characters.
pub fn build_key(prefix: &str, category: CacheCategory, identifier: &str) -> String {
    if identifier.is_empty() {
        format!("{}:{}", prefix, category)
    } else if identifier.chars().count() > MAX_IDENTIFIER_LEN {
        let digest = Sha256::digest(identifier.as_bytes());
        format!("{}:{}:{:x}", prefix, category, digest)
    } else {
        format!("{}:{}:{}", prefix, category, identifier)
    }
}

pub struct CacheManager {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
    fallback: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    operations: AtomicU64,
    metrics: Option<Arc<dyn CacheMetricsSink>>,
}

impl CacheManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_prefix(store, DEFAULT_PREFIX)
    }

    pub fn with_prefix(store: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            fallback: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            operations: AtomicU64::new(0),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, sink: Arc<dyn CacheMetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.store)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback.load(Ordering::Relaxed)
    }

    pub fn key(&self, category: CacheCategory, identifier: &str) -> String {
        build_key(&self.prefix, category, identifier)
    }

    /// Scopes an administrative glob to this cache's namespace.
    pub fn scoped_pattern(&self, pattern: &str) -> String {
        let namespace = format!("{}:", self.prefix);
        if pattern.starts_with(&namespace) {
            pattern.to_string()
        } else {
            format!("{}{}", namespace, pattern)
        }
    }

    // =====================================================================================
    // LIFECYCLE
    // =====================================================================================

    /// Pings the store. Clears fallback mode on success, enters it otherwise.
    #[instrument(skip(self))]
    pub async fn init(&self) -> bool {
        match self.store.ping().await {
            Ok(()) => {
                self.fallback.store(false, Ordering::Relaxed);
                info!(backend = self.store.backend(), "Cache store connected");
                true
            }
            Err(e) => {
                self.fallback.store(true, Ordering::Relaxed);
                warn!("Cache store unavailable, using fallback mode: {}", e);
                false
            }
        }
    }

    pub async fn shutdown(&self) {
        self.store.close().await;
        info!("Cache manager shut down");
    }

    /// Records a store failure observed by a collaborator sharing this store.
    fn note_store_failure(&self, operation: &str, e: &StoreError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        if e.is_connectivity() {
            if !self.fallback.swap(true, Ordering::Relaxed) {
                warn!("Cache store lost during {}, switching to fallback mode: {}", operation, e);
            }
        } else {
            error!("Cache {} error: {}", operation, e);
        }
    }

    // =====================================================================================
    // CORE OPERATIONS
    // =====================================================================================

    #[instrument(skip(self))]
    pub async fn get(&self, category: CacheCategory, identifier: &str) -> Option<CachedValue> {
        let started = Instant::now();
        self.operations.fetch_add(1, Ordering::Relaxed);

        let value = if self.is_fallback() {
            None
        } else {
            let key = self.key(category, identifier);
            match self.store.get(&key).await {
                Ok(Some(raw)) => match CachedValue::decode(&raw) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        warn!("Discarding undecodable cache entry {}: {}", key, e);
                        self.errors.fetch_add(1, Ordering::Relaxed);
                        None
                    }
                },
                Ok(None) => None,
                Err(e) => {
                    self.note_store_failure("get", &e);
                    None
                }
            }
        };

        let hit = value.is_some();
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(sink) = &self.metrics {
            sink.record_cache_operation("get", hit, started.elapsed()).await;
        }

        value
    }

    pub async fn get_json<T: DeserializeOwned>(&self, category: CacheCategory, identifier: &str) -> Option<T> {
        match self.get(category, identifier).await? {
            CachedValue::Json(value) => serde_json::from_value(value)
                .map_err(|e| debug!("Cached value for {} has unexpected shape: {}", category, e))
                .ok(),
            CachedValue::Binary(_) => {
                debug!("Cached value for {} is binary, expected JSON", category);
                None
            }
        }
    }

    #[instrument(skip(self, value))]
    pub async fn set(
        &self,
        category: CacheCategory,
        value: CachedValue,
        identifier: &str,
        ttl: Option<Duration>,
    ) -> bool {
        if self.is_fallback() {
            return false;
        }

        let raw = match value.encode() {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Serialization failed: {}", e);
                self.errors.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };

        let key = self.key(category, identifier);
        let ttl = ttl.unwrap_or_else(|| category.default_ttl());

        match self.store.set_ex(&key, raw, ttl).await {
            Ok(()) => {
                debug!("Cached {} for {:?}", key, ttl);
                true
            }
            Err(e) => {
                self.note_store_failure("set", &e);
                false
            }
        }
    }

    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        category: CacheCategory,
        value: &T,
        identifier: &str,
        ttl: Option<Duration>,
    ) -> bool {
        match serde_json::to_value(value) {
            Ok(json) => self.set(category, CachedValue::Json(json), identifier, ttl).await,
            Err(e) => {
                warn!("Serialization failed: {}", e);
                self.errors.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub async fn delete(&self, category: CacheCategory, identifier: &str) -> bool {
        if self.is_fallback() {
            return false;
        }

        match self.store.delete(&[self.key(category, identifier)]).await {
            Ok(removed) => removed > 0,
            Err(e) => {
                self.note_store_failure("delete", &e);
                false
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        if self.is_fallback() {
            return 0;
        }

        let result = match self.store.scan_match(pattern).await {
            Ok(keys) => self.store.delete(&keys).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(removed) => {
                if removed > 0 {
                    info!("Invalidated {} cache entries matching pattern: {}", removed, pattern);
                }
                removed
            }
            Err(e) => {
                self.note_store_failure("invalidate", &e);
                0
            }
        }
    }

    /// Globs covering an entry keyed by `identifier` and every sub-key
    /// `identifier:*` in the category. Built from the same key builder as writes.
    fn owned_patterns(&self, category: CacheCategory, identifier: &str) -> [String; 2] {
        let exact = escape_glob(&self.key(category, identifier));
        let nested = format!("{}:*", exact);
        [exact, nested]
    }

    pub async fn invalidate_user_cache(&self, user_id: &str) -> u64 {
        let mut patterns = vec![escape_glob(&self.key(CacheCategory::Profile, user_id))];
        patterns.extend(self.owned_patterns(CacheCategory::Deals, user_id));
        patterns.extend(self.owned_patterns(CacheCategory::SocialMedia, user_id));

        let mut total = 0;
        for pattern in &patterns {
            total += self.invalidate_pattern(pattern).await;
        }

        info!("Invalidated {} cache entries for user {}", total, user_id);
        total
    }

    // =====================================================================================
    // ENTITY HELPERS
    // =====================================================================================

    fn schools_identifier(division: Option<&str>) -> String {
        match division {
            Some(d) => format!("division_{}", d),
            None => "all".to_string(),
        }
    }

    pub async fn get_schools(&self, division: Option<&str>) -> Option<Vec<Value>> {
        self.get_json(CacheCategory::Schools, &Self::schools_identifier(division)).await
    }

    pub async fn set_schools(&self, schools: &[Value], division: Option<&str>) -> bool {
        self.set_json(CacheCategory::Schools, schools, &Self::schools_identifier(division), None)
            .await
    }

    pub async fn get_profile(&self, user_id: &str) -> Option<Value> {
        self.get_json(CacheCategory::Profile, user_id).await
    }

    pub async fn set_profile(&self, user_id: &str, profile: &Value) -> bool {
        self.set_json(CacheCategory::Profile, profile, user_id, None).await
    }

    pub async fn get_deals(&self, user_id: &str, view: &str) -> Option<Vec<Value>> {
        self.get_json(CacheCategory::Deals, &format!("{}:{}", user_id, view)).await
    }

    pub async fn set_deals(&self, user_id: &str, view: &str, deals: &[Value]) -> bool {
        self.set_json(CacheCategory::Deals, deals, &format!("{}:{}", user_id, view), None)
            .await
    }

    /// Drops every cached deal view for the user. Call after each deal write.
    pub async fn invalidate_deals(&self, user_id: &str) -> u64 {
        let mut total = 0;
        for pattern in self.owned_patterns(CacheCategory::Deals, user_id) {
            total += self.invalidate_pattern(&pattern).await;
        }
        total
    }

    pub async fn get_social_media(&self, user_id: &str) -> Option<Value> {
        self.get_json(CacheCategory::SocialMedia, user_id).await
    }

    pub async fn set_social_media(&self, user_id: &str, accounts: &Value) -> bool {
        self.set_json(CacheCategory::SocialMedia, accounts, user_id, None).await
    }

    // =====================================================================================
    // STATISTICS
    // =====================================================================================

    pub async fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let hit_rate = if lookups > 0 {
            ((hits as f64 / lookups as f64) * 10_000.0).round() / 100.0
        } else {
            0.0
        };

        let fallback_mode = self.is_fallback();
        let redis_info = if fallback_mode {
            RedisInfo::default()
        } else {
            match self.store.info().await {
                Ok(info) => {
                    let field = |name: &str| info.get(name).cloned().unwrap_or_else(|| "N/A".to_string());
                    RedisInfo {
                        used_memory_human: field("used_memory_human"),
                        connected_clients: field("connected_clients"),
                        keyspace_hits: field("keyspace_hits"),
                        keyspace_misses: field("keyspace_misses"),
                    }
                }
                Err(e) => {
                    warn!("Failed to get store info: {}", e);
                    RedisInfo::default()
                }
            }
        };

        CacheStats {
            hit_rate,
            total_hits: hits,
            total_misses: misses,
            total_errors: self.errors.load(Ordering::Relaxed),
            cache_operations: self.operations.load(Ordering::Relaxed),
            fallback_mode,
            redis_connected: !fallback_mode,
            backend: self.store.backend().to_string(),
            redis_info,
        }
    }

    // =====================================================================================
    // MEMOIZATION
    // =====================================================================================

    /// Returns the cached value, or computes, stores and returns it.
    /// Only successful results are stored.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        category: CacheCategory,
        identifier: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get_json::<T>(category, identifier).await {
            debug!("Cache hit for {}:{}", category, identifier);
            return Ok(cached);
        }

        let value = compute().await?;
        self.set_json(category, &value, identifier, ttl).await;
        Ok(value)
    }
}

/// Reusable memoizing wrapper: derives an identifier from the call
/// arguments and caches successful results under one category.
pub struct Memoized<A> {
    cache: Arc<CacheManager>,
    category: CacheCategory,
    name: String,
    ttl: Option<Duration>,
    key_fn: Box<dyn Fn(&A) -> String + Send + Sync>,
}

impl<A> Memoized<A> {
    pub fn new(
        cache: Arc<CacheManager>,
        category: CacheCategory,
        name: impl Into<String>,
        key_fn: impl Fn(&A) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            cache,
            category,
            name: name.into(),
            ttl: None,
            key_fn: Box::new(key_fn),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn identifier(&self, args: &A) -> String {
        format!("{}_{}", self.name, (self.key_fn)(args))
    }

    pub async fn call<T, E, F, Fut>(&self, args: A, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let identifier = self.identifier(&args);
        self.cache
            .get_or_compute(self.category, &identifier, self.ttl, || compute(args))
            .await
    }
}
