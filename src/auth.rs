//! 管理员密钥的请求级解析与守卫。

use axum::http::{HeaderMap, header};

use crate::engine;
use crate::error::ApiError;

#[derive(Debug)]
pub struct AuthConfig {
    pub admin_key: String,
}

/// 从 `Authorization` 头或 `adminKey` 查询参数判定管理员身份。
/// 头部存在时优先于查询参数。
pub fn is_admin(headers: &HeaderMap, query_key: Option<&str>, auth: &AuthConfig) -> bool {
    let header_key = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    engine::admin_key_matches(header_key.or(query_key), &auth.admin_key)
}

/// 管理端点守卫：非管理员一律硬性拒绝。
pub fn require_admin(
    headers: &HeaderMap,
    query_key: Option<&str>,
    auth: &AuthConfig,
) -> Result<(), ApiError> {
    if is_admin(headers, query_key, auth) {
        return Ok(());
    }
    Err(ApiError::Forbidden(
        "access denied, admin key required".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn auth() -> AuthConfig {
        AuthConfig {
            admin_key: "test-key".to_string(),
        }
    }

    #[test]
    fn header_key_grants_admin() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("test-key"));
        assert!(is_admin(&headers, None, &auth()));

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer test-key"),
        );
        assert!(is_admin(&headers, None, &auth()));
    }

    #[test]
    fn query_key_is_a_fallback_only() {
        assert!(is_admin(&HeaderMap::new(), Some("test-key"), &auth()));

        // a wrong header is not rescued by a correct query key
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("wrong"));
        assert!(!is_admin(&headers, Some("test-key"), &auth()));
    }

    #[test]
    fn require_admin_rejects_missing_key() {
        assert!(matches!(
            require_admin(&HeaderMap::new(), None, &auth()),
            Err(ApiError::Forbidden(_))
        ));
        assert!(require_admin(&HeaderMap::new(), Some("test-key"), &auth()).is_ok());
    }
}
