// =====================================================================================
// KEY-VALUE STORE ADAPTER - REDIS & IN-PROCESS BACKENDS
// =====================================================================================

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use regex::Regex;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use shared_utils::clock::{Clock, SystemClock};

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("store command failed: {0}")]
    Command(String),
}

impl StoreError {
    /// Connectivity failures switch the cache into fallback mode.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
            StoreError::Unavailable(e.to_string())
        } else {
            StoreError::Command(e.to_string())
        }
    }
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError>;

    /// Removes the given keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// All keys matching a Redis-style glob.
    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Increments a counter. The expiry is applied only when the increment
    /// created the key.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, StoreError>;

    async fn info(&self) -> Result<HashMap<String, String>, StoreError>;

    async fn close(&self) {}
}

// =====================================================================================
// REDIS
// =====================================================================================

const INCR_WITH_EXPIRY: &str = r"
local current = redis.call('INCR', KEYS[1])
if current == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return current
";

const SCAN_BATCH: usize = 200;

pub struct RedisStore {
    pool: Pool,
    timeout: Duration,
    incr_script: redis::Script,
}

impl RedisStore {
    /// Builds the pool lazily; no connection is attempted until first use.
    pub fn connect(redis_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::Unavailable(format!("Pool creation error: {}", e)))?;

        Ok(Self {
            pool,
            timeout,
            incr_script: redis::Script::new(INCR_WITH_EXPIRY),
        })
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.timeout, op)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }

    async fn connection(&self) -> Result<Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Connection error: {}", e)))
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
            Ok(value)
        })
        .await
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let seconds = ttl.as_secs().max(1);
        self.bounded(async {
            let mut conn = self.connection().await?;
            let _: () = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(seconds)
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.bounded(async {
            let mut conn = self.connection().await?;
            let removed: u64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
            Ok(removed)
        })
        .await
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            let mut cursor: u64 = 0;
            let mut keys = BTreeSet::new();

            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query_async(&mut conn)
                    .await?;
                keys.extend(batch);
                if next == 0 {
                    break;
                }
                cursor = next;
            }

            Ok(keys.into_iter().collect())
        })
        .await
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let seconds = ttl.as_secs().max(1);
        self.bounded(async {
            let mut conn = self.connection().await?;
            let count: i64 = self
                .incr_script
                .key(key)
                .arg(seconds)
                .invoke_async(&mut conn)
                .await?;
            Ok(count)
        })
        .await
    }

    async fn info(&self) -> Result<HashMap<String, String>, StoreError> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            let raw: String = redis::cmd("INFO").query_async(&mut conn).await?;
            Ok(parse_info(&raw))
        })
        .await
    }

    async fn close(&self) {
        self.pool.close();
        info!("Redis connection pool closed");
    }
}

fn parse_info(raw: &str) -> HashMap<String, String> {
    raw.lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

// =====================================================================================
// IN-PROCESS
// =====================================================================================

struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

impl MemoryEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Seconds between sweeps of expired entries.
const SWEEP_INTERVAL_SECONDS: i64 = 1;

/// Map-backed store with expiry driven by an injectable clock. Expired
/// entries are evicted when read and swept on writes.
pub struct MemoryStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    clock: Arc<dyn Clock>,
    next_sweep: AtomicI64,
    keyspace_hits: AtomicU64,
    keyspace_misses: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            next_sweep: AtomicI64::new(i64::MIN),
            keyspace_hits: AtomicU64::new(0),
            keyspace_misses: AtomicU64::new(0),
        }
    }

    fn sweep_if_due(&self, entries: &mut HashMap<String, MemoryEntry>, now: DateTime<Utc>) {
        if now.timestamp() < self.next_sweep.load(Ordering::Relaxed) {
            return;
        }
        self.next_sweep
            .store(now.timestamp() + SWEEP_INTERVAL_SECONDS, Ordering::Relaxed);

        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, "Swept expired entries");
        }
    }

    fn expiry(&self, ttl: Duration) -> Option<DateTime<Utc>> {
        let ttl = chrono::Duration::from_std(ttl).ok()?;
        Some(self.clock.now() + ttl)
    }

    /// Remaining time to live, `None` for missing or persistent keys.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        let entry = entries.get(key).filter(|e| e.is_live(now))?;
        entry.expires_at.and_then(|at| (at - now).to_std().ok())
    }

    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.read().await.values().filter(|e| e.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Entries physically held, expired or not.
    pub async fn stored_entries(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = self.clock.now();
        let (value, expired) = match self.entries.read().await.get(key) {
            Some(entry) if entry.is_live(now) => (Some(entry.value.clone()), false),
            Some(_) => (None, true),
            None => (None, false),
        };

        if expired {
            let mut entries = self.entries.write().await;
            if entries.get(key).is_some_and(|e| !e.is_live(now)) {
                entries.remove(key);
            }
        }

        match value {
            Some(_) => self.keyspace_hits.fetch_add(1, Ordering::Relaxed),
            None => self.keyspace_misses.fetch_add(1, Ordering::Relaxed),
        };
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let now = self.clock.now();
        let expires_at = self.expiry(ttl.max(Duration::from_secs(1)));
        let mut entries = self.entries.write().await;
        self.sweep_if_due(&mut entries, now);
        entries.insert(key.to_string(), MemoryEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let removed = keys
            .iter()
            .filter_map(|k| entries.remove(k))
            .filter(|e| e.is_live(now))
            .count();
        Ok(removed as u64)
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let matcher = glob_to_regex(pattern)?;
        let now = self.clock.now();
        let mut keys: Vec<String> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|(k, e)| e.is_live(now) && matcher.is_match(k))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        self.sweep_if_due(&mut entries, now);

        let current = match entries.get(key).filter(|e| e.is_live(now)) {
            Some(entry) => std::str::from_utf8(&entry.value)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| {
                    StoreError::Command("value is not an integer or out of range".to_string())
                })?,
            None => 0,
        };

        let next = current + 1;
        let expires_at = if current == 0 {
            self.expiry(ttl.max(Duration::from_secs(1)))
        } else {
            entries.get(key).and_then(|e| e.expires_at)
        };

        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: next.to_string().into_bytes(),
                expires_at,
            },
        );
        debug!("Incremented {} to {}", key, next);
        Ok(next)
    }

    async fn info(&self) -> Result<HashMap<String, String>, StoreError> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        let bytes: usize = entries
            .iter()
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, e)| k.len() + e.value.len())
            .sum();

        Ok(HashMap::from([
            ("used_memory_human".to_string(), format!("{:.2}K", bytes as f64 / 1024.0)),
            ("connected_clients".to_string(), "1".to_string()),
            (
                "keyspace_hits".to_string(),
                self.keyspace_hits.load(Ordering::Relaxed).to_string(),
            ),
            (
                "keyspace_misses".to_string(),
                self.keyspace_misses.load(Ordering::Relaxed).to_string(),
            ),
        ]))
    }
}

/// Backend that is never reachable.
#[derive(Debug, Default)]
pub struct UnavailableStore;

#[async_trait]
impl KeyValueStore for UnavailableStore {
    fn backend(&self) -> &'static str {
        "unavailable"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn set_ex(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn delete(&self, _keys: &[String]) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn scan_match(&self, _pattern: &str) -> Result<Vec<String>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn incr_with_expiry(&self, _key: &str, _ttl: Duration) -> Result<i64, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn info(&self) -> Result<HashMap<String, String>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

// =====================================================================================
// GLOB MATCHING
// =====================================================================================

/// Compiles a Redis glob (`*`, `?`, `[...]`, `\` escapes) into an anchored regex.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, StoreError> {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push_str(&regex::escape(&next.to_string()));
                }
            }
            '[' => {
                let mut class = String::from("[");
                if chars.peek() == Some(&'^') {
                    chars.next();
                    class.push('^');
                }
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    if inner == '\\' || inner == '[' {
                        class.push('\\');
                    }
                    class.push(inner);
                }
                if !closed {
                    return Err(StoreError::Command(format!("unterminated class in pattern {}", pattern)));
                }
                class.push(']');
                out.push_str(&class);
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    out.push('$');
    Regex::new(&out).map_err(|e| StoreError::Command(format!("invalid pattern {}: {}", pattern, e)))
}

/// Escapes glob metacharacters so the value matches only itself.
pub fn escape_glob(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_utils::clock::ManualClock;

    #[test]
    fn glob_translation() {
        let re = glob_to_regex("fairplay_cache:deals:u1*").unwrap();
        assert!(re.is_match("fairplay_cache:deals:u1:active"));
        assert!(!re.is_match("fairplay_cache:profile:u1"));

        let re = glob_to_regex("k?y:[ab]").unwrap();
        assert!(re.is_match("key:a"));
        assert!(!re.is_match("key:c"));

        let re = glob_to_regex("a.b").unwrap();
        assert!(!re.is_match("axb"));

        assert!(glob_to_regex("broken[").is_err());
    }

    #[test]
    fn escaped_glob_matches_literally() {
        let re = glob_to_regex(&escape_glob("user*[1]")).unwrap();
        assert!(re.is_match("user*[1]"));
        assert!(!re.is_match("userX1"));
    }

    #[test]
    fn parses_info_sections() {
        let info = parse_info("# Memory\r\nused_memory_human:1.5M\r\nconnected_clients:3\r\n");
        assert_eq!(info.get("used_memory_human").map(String::as_str), Some("1.5M"));
        assert_eq!(info.get("connected_clients").map(String::as_str), Some("3"));
    }

    #[tokio::test]
    async fn memory_store_expires_entries() {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let store = MemoryStore::with_clock(clock.clone());

        store.set_ex("k", b"v".to_vec(), Duration::from_secs(10)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));

        clock.advance(chrono::Duration::seconds(10));
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incr_sets_expiry_only_on_create() {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let store = MemoryStore::with_clock(clock.clone());

        assert_eq!(store.incr_with_expiry("c", Duration::from_secs(60)).await.unwrap(), 1);
        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(store.incr_with_expiry("c", Duration::from_secs(60)).await.unwrap(), 2);
        assert_eq!(store.ttl("c").await, Some(Duration::from_secs(30)));

        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(store.incr_with_expiry("c", Duration::from_secs(60)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expired_window_counters_are_evicted() {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_040));
        let store = MemoryStore::with_clock(clock.clone());

        for window in 0..1000 {
            let key = format!("fairplay_rate_limit:rate:anonymous:anonymous:/api/deals:{}", window);
            store.incr_with_expiry(&key, Duration::from_secs(60)).await.unwrap();
            clock.advance(chrono::Duration::seconds(60));
        }

        assert_eq!(store.len().await, 0);
        assert_eq!(store.stored_entries().await, 1);
    }

    #[tokio::test]
    async fn expired_entries_are_dropped_on_read_and_write() {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let store = MemoryStore::with_clock(clock.clone());

        store.set_ex("profile", b"p".to_vec(), Duration::from_secs(10)).await.unwrap();
        store.set_ex("schools", b"s".to_vec(), Duration::from_secs(10)).await.unwrap();
        clock.advance(chrono::Duration::seconds(11));

        assert_eq!(store.get("profile").await.unwrap(), None);
        assert_eq!(store.stored_entries().await, 1);

        store.set_ex("deals", b"d".to_vec(), Duration::from_secs(10)).await.unwrap();
        assert_eq!(store.stored_entries().await, 1);
    }

    #[tokio::test]
    async fn incr_rejects_non_integer_values() {
        let store = MemoryStore::new();
        store.set_ex("s", b"text".to_vec(), Duration::from_secs(60)).await.unwrap();
        assert!(matches!(
            store.incr_with_expiry("s", Duration::from_secs(60)).await,
            Err(StoreError::Command(_))
        ));
    }

    #[tokio::test]
    async fn unavailable_store_reports_connectivity() {
        let err = UnavailableStore.get("k").await.unwrap_err();
        assert!(err.is_connectivity());
    }
}
