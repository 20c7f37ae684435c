use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::middleware::audit::AuditError;
use crate::middleware::authz::DenyReason;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    /// Missing, malformed or unknown credential. These are indistinguishable
    /// to the client.
    #[error("invalid token")]
    InvalidToken,

    #[error("token expired")]
    TokenExpired,

    #[error("token revoked")]
    TokenRevoked,

    #[error("source address not allowed")]
    IpNotAllowed,

    #[error("insufficient permissions: requires {required}")]
    InsufficientScope { required: String },

    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Owner identity missing or invalid on management routes.
    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn denied(reason: DenyReason, required: &str) -> Self {
        match reason {
            DenyReason::InvalidToken => AppError::InvalidToken,
            DenyReason::Revoked => AppError::TokenRevoked,
            DenyReason::Expired => AppError::TokenExpired,
            DenyReason::IpNotAllowed => AppError::IpNotAllowed,
            DenyReason::InsufficientPermissions => AppError::InsufficientScope {
                required: required.to_string(),
            },
            DenyReason::Aborted => AppError::BadRequest("request aborted".into()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => AppError::NotFound,
            StoreError::Forbidden => AppError::Forbidden,
            StoreError::Invalid(msg) => AppError::BadRequest(msg),
            StoreError::Revoked => AppError::Conflict("token is revoked".into()),
            StoreError::Unavailable(msg) => AppError::StorageUnavailable(msg),
        }
    }
}

impl From<AuditError> for AppError {
    fn from(e: AuditError) -> Self {
        AppError::StorageUnavailable(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_token",
                "invalid or missing token".to_string(),
            ),
            AppError::TokenExpired => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "token_expired",
                "Token expired".to_string(),
            ),
            AppError::TokenRevoked => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "token_revoked",
                "Token revoked".to_string(),
            ),
            AppError::IpNotAllowed => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "ip_not_allowed",
                "IP address not allowed".to_string(),
            ),
            AppError::InsufficientScope { required } => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "insufficient_scope",
                format!("Insufficient permissions: requires '{}'", required),
            ),
            AppError::RateLimited { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limit_error",
                "rate_limit_exceeded",
                "rate limit exceeded".to_string(),
            ),
            AppError::StorageUnavailable(e) => {
                tracing::error!("Storage unavailable: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "storage_unavailable",
                    "storage unavailable".to_string(),
                )
            }
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "unauthorized",
                "missing or invalid credentials".to_string(),
            ),
            AppError::Forbidden => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "forbidden",
                "not allowed to act on this resource".to_string(),
            ),
            AppError::NotFound => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "not_found",
                "resource not found".to_string(),
            ),
            AppError::BadRequest(e) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "bad_request",
                e.clone(),
            ),
            AppError::Conflict(e) => (
                StatusCode::CONFLICT,
                "invalid_request_error",
                "conflict",
                e.clone(),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        let mut response = (status, body).into_response();

        if let AppError::RateLimited { retry_after_secs } = self {
            if let Ok(v) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert("retry-after", v);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limited_carries_retry_after() {
        let resp = AppError::RateLimited { retry_after_secs: 17 }.into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()["retry-after"], "17");
    }

    #[tokio::test]
    async fn test_expired_and_revoked_stay_distinct() {
        let expired = AppError::denied(DenyReason::Expired, "fcs:read").into_response();
        let revoked = AppError::denied(DenyReason::Revoked, "fcs:read").into_response();
        assert_eq!(expired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(revoked.status(), StatusCode::UNAUTHORIZED);

        let body = axum::body::to_bytes(expired.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["error"]["code"], "token_expired");

        let body = axum::body::to_bytes(revoked.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["error"]["code"], "token_revoked");
    }

    #[test]
    fn test_store_errors_map() {
        assert!(matches!(AppError::from(StoreError::Forbidden), AppError::Forbidden));
        assert!(matches!(
            AppError::from(StoreError::Unavailable("timeout".into())),
            AppError::StorageUnavailable(_)
        ));
        let resp = AppError::from(StoreError::Unavailable("x".into())).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
