use axum::{
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

// =====================================================================================
// RATE LIMIT MODELS
// =====================================================================================

pub const RATE_LIMIT_PREFIX: &str = "fairplay_rate_limit";
pub const DEFAULT_WINDOW_SECONDS: u64 = 60;

/// Requests per window and burst allowance for one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleQuota {
    pub limit: u64,
    pub burst: u64,
}

impl RoleQuota {
    pub const ATHLETE: RoleQuota = RoleQuota { limit: 100, burst: 10 };
    pub const BRAND: RoleQuota = RoleQuota { limit: 200, burst: 20 };
    pub const UNIVERSITY: RoleQuota = RoleQuota { limit: 300, burst: 30 };
    pub const COLLECTIVE: RoleQuota = RoleQuota { limit: 250, burst: 25 };
    pub const ANONYMOUS: RoleQuota = RoleQuota { limit: 50, burst: 5 };

    /// Unknown roles get the anonymous quota.
    pub fn for_role(role: &str) -> RoleQuota {
        match role {
            "athlete" => Self::ATHLETE,
            "brand" => Self::BRAND,
            "university" => Self::UNIVERSITY,
            "collective" => Self::COLLECTIVE,
            _ => Self::ANONYMOUS,
        }
    }

    pub fn ceiling(&self) -> u64 {
        self.limit + self.burst
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowState {
    Active,
    Burst,
    Exceeded,
    /// Backend unavailable; request admitted without counting.
    Unmetered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub limit: u64,
    pub remaining: u64,
    /// Unix seconds at which the current window ends.
    pub reset: i64,
    pub retry_after: u64,
    pub window: u64,
}

impl RateLimitInfo {
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        let pairs = [
            ("x-ratelimit-limit", self.limit.to_string()),
            ("x-ratelimit-remaining", self.remaining.to_string()),
            ("x-ratelimit-reset", self.reset.to_string()),
            ("x-ratelimit-window", self.window.to_string()),
        ];
        for (name, value) in pairs {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(HeaderName::from_static(name), value);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub state: WindowState,
    pub info: RateLimitInfo,
}

// =====================================================================================
// ERRORS
// =====================================================================================

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Rate limit exceeded. Try again in {} seconds.", .0.retry_after)]
    Exceeded(RateLimitInfo),
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let detail = self.to_string();
        let RateLimitError::Exceeded(info) = self;

        let body = json!({
            "error": "Rate limit exceeded",
            "detail": detail,
            "retry_after": info.retry_after,
            "limit": info.limit,
            "remaining": info.remaining,
            "reset": info.reset,
            "rate_limit_exceeded": true,
        });

        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        let headers = response.headers_mut();
        info.apply_headers(headers);
        headers.insert("retry-after", HeaderValue::from(info.retry_after));
        headers.insert("x-ratelimit-exceeded", HeaderValue::from_static("true"));
        response
    }
}

/// Failure that reached the top-level boundary. Handlers return
/// `ApiError::Unexpected`; the boundary middleware assigns the incident id,
/// logs it and shapes the body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Unexpected {
        error_type: String,
        message: String,
        trace: Option<String>,
    },
}

impl ApiError {
    pub fn unexpected(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::Unexpected {
            error_type: error_type.into(),
            message: message.into(),
            trace: None,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Unexpected {
            error_type: "anyhow::Error".to_string(),
            message: format!("{:#}", e),
            trace: Some(format!("{:?}", e)),
        }
    }
}

/// Carried on a 500 response so the boundary can see what went wrong.
#[derive(Debug, Clone)]
pub struct UnexpectedFailure {
    pub error_type: String,
    pub message: String,
    pub trace: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let ApiError::Unexpected { error_type, message, trace } = self;
        let mut response = (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Internal server error" })),
        )
            .into_response();
        response.extensions_mut().insert(UnexpectedFailure {
            error_type,
            message,
            trace,
        });
        response
    }
}

/// Body returned for incidents.
#[derive(Debug, Serialize, Deserialize)]
pub struct IncidentResponse {
    pub error: String,
    pub detail: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub error_id: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_table() {
        assert_eq!(RoleQuota::for_role("athlete").ceiling(), 110);
        assert_eq!(RoleQuota::for_role("brand"), RoleQuota { limit: 200, burst: 20 });
        assert_eq!(RoleQuota::for_role("university").limit, 300);
        assert_eq!(RoleQuota::for_role("collective").burst, 25);
        assert_eq!(RoleQuota::for_role("anonymous"), RoleQuota::ANONYMOUS);
        assert_eq!(RoleQuota::for_role("admin"), RoleQuota::ANONYMOUS);
    }

    #[test]
    fn exceeded_response_carries_retry_metadata() {
        let info = RateLimitInfo { limit: 100, remaining: 0, reset: 1_700_000_100, retry_after: 17, window: 60 };
        let response = RateLimitError::Exceeded(info).into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "17");
        assert_eq!(response.headers()["x-ratelimit-exceeded"], "true");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
        assert_eq!(response.headers()["x-ratelimit-window"], "60");
    }
}
