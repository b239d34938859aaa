use std::env;

use axum::http::HeaderMap;
use subtle::ConstantTimeEq;

use crate::core::errors::ApiError;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared token guarding `/api/*`. `None` leaves the API open.
#[derive(Debug, Clone, Default)]
pub struct ApiToken {
    value: Option<String>,
}

impl ApiToken {
    pub fn new(value: Option<String>) -> Self {
        Self {
            value: value.filter(|token| !token.trim().is_empty()),
        }
    }

    pub fn from_env() -> Self {
        let token = Self::new(env::var("RAG_AGENTS_API_TOKEN").ok());
        if token.is_enabled() {
            tracing::info!("API token authentication enabled");
        } else {
            tracing::warn!("RAG_AGENTS_API_TOKEN not set; API is unauthenticated");
        }
        token
    }

    pub fn is_enabled(&self) -> bool {
        self.value.is_some()
    }
}

pub fn require_api_key(headers: &HeaderMap, expected: &ApiToken) -> Result<(), ApiError> {
    let Some(expected) = expected.value.as_deref() else {
        return Ok(());
    };

    let header_value = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if header_value.is_empty() {
        return Err(ApiError::Unauthorized);
    }

    if !bool::from(header_value.as_bytes().ct_eq(expected.as_bytes())) {
        return Err(ApiError::Unauthorized);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn require_api_key_accepts_valid_header() {
        let expected = ApiToken::new(Some("secret".to_string()));
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("secret"));

        assert!(require_api_key(&headers, &expected).is_ok());
    }

    #[test]
    fn require_api_key_rejects_missing_or_invalid_header() {
        let expected = ApiToken::new(Some("secret".to_string()));
        let headers = HeaderMap::new();

        let missing = require_api_key(&headers, &expected);
        assert!(matches!(missing, Err(ApiError::Unauthorized)));

        let mut invalid_headers = HeaderMap::new();
        invalid_headers.insert(API_KEY_HEADER, HeaderValue::from_static("wrong"));
        let invalid = require_api_key(&invalid_headers, &expected);
        assert!(matches!(invalid, Err(ApiError::Unauthorized)));
    }

    #[test]
    fn disabled_token_lets_everything_through() {
        let open = ApiToken::new(Some("  ".to_string()));
        assert!(!open.is_enabled());
        assert!(require_api_key(&HeaderMap::new(), &open).is_ok());
    }

    #[test]
    fn require_api_key_rejects_non_utf8_header_value() {
        let expected = ApiToken::new(Some("secret".to_string()));
        let mut headers = HeaderMap::new();
        let non_utf8 = HeaderValue::from_bytes(&[0xFF, 0xFE, 0xFD])
            .expect("header value bytes should be accepted");
        headers.insert(API_KEY_HEADER, non_utf8);

        let result = require_api_key(&headers, &expected);

        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }
}
