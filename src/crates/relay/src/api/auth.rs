//! Bearer credential checks
//!
//! `POST /process` carries the token in the `Authorization` header;
//! `GET /stream` carries it as the `token` query parameter.

use axum::http::{header::AUTHORIZATION, HeaderMap};

use super::error::{ApiError, ApiResult};

/// Token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Check `presented` against the configured token.
///
/// With no configured token every request is allowed.
pub fn authorize(expected: Option<&str>, presented: Option<&str>) -> ApiResult<()> {
    let Some(expected) = expected else {
        return Ok(());
    };
    match presented {
        None => Err(ApiError::Unauthorized("missing credential".to_string())),
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => Ok(()),
        Some(_) => Err(ApiError::Unauthorized("invalid credential".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_authorize() {
        assert!(authorize(None, None).is_ok());
        assert!(authorize(Some("t"), Some("t")).is_ok());
        assert!(authorize(Some("t"), None).is_err());
        assert!(authorize(Some("t"), Some("x")).is_err());
        assert!(authorize(Some("t"), Some("tt")).is_err());
    }
}
