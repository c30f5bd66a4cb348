//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache and its host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Argument or policy rejected before any shard was touched
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation on a disposed cache created with `throw_on_disposed`
    #[error("Cache disposed: {0}")]
    Disposed(String),

    /// A region name was supplied; regions are not implemented
    #[error("Region names are not supported")]
    RegionNotSupported,

    /// Key not found in cache (host surface only)
    #[error("Key not found: {0}")]
    NotFound(String),
}

impl CacheError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        CacheError::InvalidArgument(msg.into())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            CacheError::RegionNotSupported => StatusCode::BAD_REQUEST,
            CacheError::Disposed(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::invalid("bad policy");
        assert_eq!(err.to_string(), "Invalid argument: bad policy");
        assert_eq!(
            CacheError::RegionNotSupported.to_string(),
            "Region names are not supported"
        );
    }

    #[test]
    fn test_error_status_codes() {
        let resp = CacheError::NotFound("k".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = CacheError::invalid("x").into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = CacheError::Disposed("c".into()).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
