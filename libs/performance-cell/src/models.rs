use std::fmt;
use std::time::Duration;

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

// =====================================================================================
// CACHE CATEGORIES & TTL POLICY
// =====================================================================================

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// Namespace of a cache entry. Each category carries its default TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheCategory {
    Schools,
    Sports,
    Profile,
    Deals,
    SocialMedia,
    Query,
    Health,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 7] = [
        CacheCategory::Schools,
        CacheCategory::Sports,
        CacheCategory::Profile,
        CacheCategory::Deals,
        CacheCategory::SocialMedia,
        CacheCategory::Query,
        CacheCategory::Health,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheCategory::Schools => "schools",
            CacheCategory::Sports => "sports",
            CacheCategory::Profile => "profile",
            CacheCategory::Deals => "deals",
            CacheCategory::SocialMedia => "social_media",
            CacheCategory::Query => "query",
            CacheCategory::Health => "health",
        }
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(match self {
            CacheCategory::Schools | CacheCategory::Sports => 7 * DAY,
            CacheCategory::Profile => 6 * HOUR,
            CacheCategory::Deals => 2 * HOUR,
            CacheCategory::SocialMedia => 4 * HOUR,
            CacheCategory::Query => HOUR,
            CacheCategory::Health => MINUTE,
        })
    }
}

impl fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =====================================================================================
// PAYLOADS
// =====================================================================================

const JSON_TAG: u8 = b'j';
const BINARY_TAG: u8 = b'b';

/// Cached payload. Encoded as a one byte format tag followed by the body.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Json(serde_json::Value),
    Binary(Vec<u8>),
}

impl CachedValue {
    pub fn encode(&self) -> Result<Vec<u8>, CacheError> {
        match self {
            CachedValue::Json(value) => {
                let body = serde_json::to_vec(value)
                    .map_err(|e| CacheError::Serialization(e.to_string()))?;
                let mut out = Vec::with_capacity(body.len() + 1);
                out.push(JSON_TAG);
                out.extend_from_slice(&body);
                Ok(out)
            }
            CachedValue::Binary(bytes) => {
                let mut out = Vec::with_capacity(bytes.len() + 1);
                out.push(BINARY_TAG);
                out.extend_from_slice(bytes);
                Ok(out)
            }
        }
    }

    pub fn decode(raw: &[u8]) -> Result<Self, CacheError> {
        match raw.split_first() {
            Some((&JSON_TAG, body)) => serde_json::from_slice(body)
                .map(CachedValue::Json)
                .map_err(|e| CacheError::Deserialization(e.to_string())),
            Some((&BINARY_TAG, body)) => Ok(CachedValue::Binary(body.to_vec())),
            Some((tag, _)) => Err(CacheError::Deserialization(format!(
                "unknown format tag {:#04x}",
                tag
            ))),
            None => Err(CacheError::Deserialization("empty payload".to_string())),
        }
    }
}

// =====================================================================================
// STATISTICS
// =====================================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisInfo {
    pub used_memory_human: String,
    pub connected_clients: String,
    pub keyspace_hits: String,
    pub keyspace_misses: String,
}

impl Default for RedisInfo {
    fn default() -> Self {
        Self {
            used_memory_human: "N/A".to_string(),
            connected_clients: "N/A".to_string(),
            keyspace_hits: "N/A".to_string(),
            keyspace_misses: "N/A".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub hit_rate: f64,
    pub total_hits: u64,
    pub total_misses: u64,
    pub total_errors: u64,
    pub cache_operations: u64,
    pub fallback_mode: bool,
    pub redis_connected: bool,
    pub backend: String,
    pub redis_info: RedisInfo,
}

// =====================================================================================
// ADMIN REQUESTS
// =====================================================================================

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub pattern: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvalidateResponse {
    pub pattern: String,
    pub invalidated: u64,
}

// =====================================================================================
// ERRORS
// =====================================================================================

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Serialization failed: {0}")]
    Serialization(String),
    #[error("Deserialization failed: {0}")]
    Deserialization(String),
}

impl IntoResponse for CacheError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            CacheError::Store(e) if e.is_connectivity() => {
                (StatusCode::SERVICE_UNAVAILABLE, "Cache unavailable")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "Cache error"),
        };

        tracing::error!("Cache error: {}", self);

        (status, Json(serde_json::json!({
            "error": message,
            "timestamp": chrono::Utc::now()
        }))).into_response()
    }
}
