//! Relay pipeline error types.
//!
//! One variant per client-visible disposition. Conversion failures are not
//! represented here (they fall back to the untranslated upstream body) and
//! persistence failures never surface to the client at all.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

#[derive(Debug, Clone, thiserror::Error)]
pub enum RelayError {
    /// Missing required header or unparseable request body
    #[error("Bad request: {0}")]
    BadRequest(String),
    /// Placeholder token missing, malformed, or wrong
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    /// Chat-completions endpoint hit with a non-POST method
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),
    /// No model could be derived from the request
    #[error("Model undetermined: {0}")]
    ModelUndetermined(String),
    /// Every key in the pool is quarantined for the requested model
    #[error("Pool exhausted: {0}")]
    PoolExhausted(String),
    /// No keys loaded, or no usable key after a full pass
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Upstream request hit the total deadline
    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),
    /// Upstream request failed at the transport layer
    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            RelayError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "invalid_request", msg),
            RelayError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            RelayError::MethodNotAllowed(msg) => {
                (StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", msg)
            }
            RelayError::ModelUndetermined(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "model_undetermined", msg)
            }
            RelayError::PoolExhausted(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "pool_exhausted", msg)
            }
            RelayError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
            RelayError::UpstreamTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "timeout", msg),
            RelayError::UpstreamUnreachable(msg) => {
                (StatusCode::BAD_GATEWAY, "upstream_unreachable", msg)
            }
            RelayError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
            }
        };

        crate::logger::warn(
            "relay_error",
            &format!(
                "Returning error response: status={}, type={}, message={}",
                status.as_u16(),
                error_type,
                message
            ),
        );

        (
            status,
            Json(serde_json::json!({
                "error": {
                    "type": error_type,
                    "message": message
                }
            })),
        )
            .into_response()
    }
}

/// Result type alias for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
