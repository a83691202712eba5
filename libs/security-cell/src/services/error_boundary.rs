// =====================================================================================
// ERROR BOUNDARY - INCIDENT IDS, REDACTION & OPAQUE RESPONSES
// =====================================================================================

use std::any::Any;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::models::{IncidentResponse, UnexpectedFailure};

const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "token",
    "key",
    "secret",
    "auth",
    "session",
    "bearer",
    "jwt",
    "phone",
    "email",
    "compensation",
    "payment",
    "financial",
];

pub const MAX_TRACE_LENGTH: usize = 1000;
const REDACTED: &str = "[REDACTED]";
const OPAQUE_DETAIL: &str = "An unexpected error occurred. Please try again later.";

/// `error_{yyyymmdd_hhmmss}_{8 hex chars}`
pub fn incident_id(at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("error_{}_{}", at.format("%Y%m%d_%H%M%S"), &suffix[..8])
}

/// Strips values attached to sensitive field names before they reach logs.
pub struct Redactor {
    assignments: Option<Regex>,
    bearer: Option<Regex>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Redactor {
    pub fn new() -> Self {
        let keys = SENSITIVE_KEYS.join("|");
        // `password=hunter2`, `"api_key": "abc"`, `email: a@b.c`
        let assignments = RegexBuilder::new(&format!(
            r#"(?P<name>"?[\w.-]*(?:{})[\w.-]*"?\s*[:=]\s*)(?P<value>"[^"]*"|'[^']*'|[^\s,;&}}\]]+)"#,
            keys
        ))
        .case_insensitive(true)
        .build()
        .ok();
        let bearer = RegexBuilder::new(r"bearer\s+[A-Za-z0-9\-._~+/]+=*")
            .case_insensitive(true)
            .build()
            .ok();

        Self { assignments, bearer }
    }

    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        if let Some(bearer) = &self.bearer {
            out = bearer.replace_all(&out, REDACTED).into_owned();
        }
        if let Some(assignments) = &self.assignments {
            out = assignments
                .replace_all(&out, format!("${{name}}{}", REDACTED).as_str())
                .into_owned();
        }
        out
    }

    /// Redacts then truncates to `MAX_TRACE_LENGTH` characters.
    pub fn sanitize_trace(&self, trace: &str) -> String {
        let redacted = self.redact(trace);
        if redacted.chars().count() > MAX_TRACE_LENGTH {
            let cut: String = redacted.chars().take(MAX_TRACE_LENGTH).collect();
            format!("{}...", cut)
        } else {
            redacted
        }
    }
}

pub struct ErrorBoundary {
    development: bool,
    redactor: Redactor,
}

impl ErrorBoundary {
    pub fn new(development: bool) -> Self {
        Self {
            development,
            redactor: Redactor::new(),
        }
    }

    pub fn is_development(&self) -> bool {
        self.development
    }

    /// Logs the failure under a fresh incident id and builds the client body.
    pub fn report(&self, failure: &UnexpectedFailure, method: &str, path: &str) -> IncidentResponse {
        let now = Utc::now();
        let error_id = incident_id(now);
        let message = self.redactor.redact(&failure.message);
        let trace = failure
            .trace
            .as_deref()
            .map(|t| self.redactor.sanitize_trace(t))
            .unwrap_or_default();

        error!(
            error_id = %error_id,
            error_type = %failure.error_type,
            method = %method,
            path = %path,
            stack_trace = %trace,
            "Unhandled exception caught by boundary: {} - {}", failure.error_type, message
        );

        let (detail, error_type) = if self.development {
            (failure.message.clone(), Some(failure.error_type.clone()))
        } else {
            (OPAQUE_DETAIL.to_string(), None)
        };

        IncidentResponse {
            error: "Internal server error".to_string(),
            detail,
            timestamp: now,
            error_id,
            error_type,
        }
    }
}

/// Outermost layer: rewrites any response carrying an `UnexpectedFailure`.
pub async fn error_boundary_middleware(
    State(boundary): State<Arc<ErrorBoundary>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let mut response = next.run(request).await;

    match response.extensions_mut().remove::<UnexpectedFailure>() {
        Some(failure) => {
            let body = boundary.report(&failure, &method, &path);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
        None => response,
    }
}

/// Handler for `tower_http::catch_panic::CatchPanicLayer::custom`.
pub fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "panic with non-string payload".to_string()
    };

    let mut response = Response::new(Body::from(r#"{"error":"Internal server error"}"#));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response.extensions_mut().insert(UnexpectedFailure {
        error_type: "panic".to_string(),
        message,
        trace: None,
    });
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incident_id_format() {
        let at = DateTime::parse_from_rfc3339("2024-03-05T07:08:09Z").unwrap().with_timezone(&Utc);
        let id = incident_id(at);
        assert!(id.starts_with("error_20240305_070809_"));
        let suffix = id.rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), 8);
        assert_ne!(incident_id(at), id);
    }

    #[test]
    fn redacts_sensitive_values() {
        let redactor = Redactor::new();
        let text = r#"failed for email=jo@example.edu with {"api_key": "abc123", "deal_compensation": 5000} Bearer eyJhbGciOi.x.y"#;
        let out = redactor.redact(text);

        assert!(!out.contains("jo@example.edu"));
        assert!(!out.contains("abc123"));
        assert!(!out.contains("5000"));
        assert!(!out.contains("eyJhbGciOi"));
        assert!(out.contains("failed for"));
    }

    #[test]
    fn truncates_long_traces() {
        let redactor = Redactor::new();
        let out = redactor.sanitize_trace(&"a".repeat(5000));
        assert_eq!(out.chars().count(), MAX_TRACE_LENGTH + 3);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn production_body_is_opaque() {
        let failure = UnexpectedFailure {
            error_type: "DatabaseError".to_string(),
            message: "connection string postgres://secret".to_string(),
            trace: None,
        };

        let body = ErrorBoundary::new(false).report(&failure, "GET", "/api/deals");
        assert_eq!(body.detail, OPAQUE_DETAIL);
        assert!(body.error_type.is_none());

        let body = ErrorBoundary::new(true).report(&failure, "GET", "/api/deals");
        assert_eq!(body.detail, failure.message);
        assert_eq!(body.error_type.as_deref(), Some("DatabaseError"));
    }
}
