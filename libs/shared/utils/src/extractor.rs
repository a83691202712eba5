use axum::http::HeaderMap;
use tracing::debug;

use shared_models::auth::Identity;
use shared_models::error::AppError;

use crate::jwt::{bearer_token, TokenDecoder};

/// Resolves the caller from the `Authorization` header. Missing or
/// undecodable tokens are treated as anonymous, never as an error.
pub fn identity_from_headers(headers: &HeaderMap, decoder: &dyn TokenDecoder) -> Identity {
    match bearer_token(headers) {
        Some(token) => decoder.decode(token).unwrap_or_else(|e| {
            debug!("Failed to decode token, treating caller as anonymous: {}", e);
            Identity::anonymous()
        }),
        None => Identity::anonymous(),
    }
}

/// Administrative operations require an authenticated admin.
pub fn require_admin(headers: &HeaderMap, decoder: &dyn TokenDecoder) -> Result<Identity, AppError> {
    let token = bearer_token(headers)
        .ok_or_else(|| AppError::Auth("Missing authorization header".to_string()))?;

    let identity = decoder.decode(token).map_err(AppError::Auth)?;

    if !identity.is_admin() {
        return Err(AppError::Forbidden("Admin role required".to_string()));
    }

    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::JwtTokenDecoder;
    use crate::test_utils::{JwtTestUtils, TestUser};
    use assert_matches::assert_matches;
    use axum::http::{header::AUTHORIZATION, HeaderValue};

    const SECRET: &str = "extractor-secret";

    fn headers_with(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    #[test]
    fn invalid_token_is_anonymous() {
        let decoder = JwtTokenDecoder::new(SECRET);
        let identity = identity_from_headers(&headers_with("garbage"), &decoder);
        assert_eq!(identity, Identity::anonymous());
    }

    #[test]
    fn admin_guard() {
        let decoder = JwtTokenDecoder::new(SECRET);

        let admin = JwtTestUtils::create_test_token(&TestUser::admin(), SECRET, None);
        assert!(require_admin(&headers_with(&admin), &decoder).is_ok());

        let athlete = JwtTestUtils::create_test_token(&TestUser::athlete(), SECRET, None);
        assert_matches!(
            require_admin(&headers_with(&athlete), &decoder),
            Err(AppError::Forbidden(_))
        );
        assert_matches!(require_admin(&HeaderMap::new(), &decoder), Err(AppError::Auth(_)));
    }
}
