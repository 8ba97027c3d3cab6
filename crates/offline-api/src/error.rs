//! API error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use offline_core::CoreError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] offline_storage::StorageError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Core(CoreError::Network(_)) => (StatusCode::BAD_GATEWAY, "NETWORK_ERROR"),
            ApiError::Core(CoreError::InvalidUrl(_)) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Core(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
        };

        let body = axum::Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offline_proxy::ProxyError;

    #[test]
    fn test_status_mapping() {
        let network = ApiError::from(CoreError::Network(ProxyError::Unreachable("x".into())));
        assert_eq!(network.into_response().status(), StatusCode::BAD_GATEWAY);

        let bad = ApiError::BadRequest("unknown message".into());
        assert_eq!(bad.into_response().status(), StatusCode::BAD_REQUEST);

        let install = ApiError::from(CoreError::InstallFailed {
            failed: vec!["/".into()],
        });
        assert_eq!(
            install.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
