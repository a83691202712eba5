// =====================================================================================
// SECURITY CELL - RATE LIMITING & ERROR BOUNDARY
// =====================================================================================
//
// Request-path protection shared by every route:
// - Role-based fixed-window rate limiting with burst allowance
// - Top-level error boundary with incident ids and log redaction
//
// =====================================================================================

pub mod middleware;
pub mod models;
pub mod services;

pub use middleware::{rate_limit_middleware, RateLimitState, BYPASS_PATHS};
pub use models::{
    ApiError, RateLimitDecision, RateLimitError, RateLimitInfo, RoleQuota, WindowState,
};
pub use services::{error_boundary_middleware, panic_response, ErrorBoundary, RateLimiter};
