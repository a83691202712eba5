pub mod error_boundary;
pub mod rate_limit;

pub use error_boundary::{error_boundary_middleware, panic_response, ErrorBoundary, Redactor};
pub use rate_limit::RateLimiter;
