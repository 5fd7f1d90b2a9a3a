use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Pipeline-wide error taxonomy with appropriate HTTP status codes.
///
/// The first five variants are produced by the security middleware itself and
/// map directly onto structured JSON rejections (400/429/401/403). The
/// remaining variants originate in handlers or the storage boundary and are
/// surfaced as sanitized 5xx responses.
///
/// `Config` errors are fatal at startup: `main` refuses to serve traffic on a
/// misconfigured process rather than failing intermittently per request.
#[derive(Error, Debug)]
pub enum SecurityError {
    #[error("Request validation failed: {0}")]
    Validation(String),

    #[error("Rate limit exceeded for class '{class}'")]
    RateLimitExceeded {
        class: String,
        limit: u32,
        remaining: u32,
        /// Epoch milliseconds at which the current window resets.
        reset_time: i64,
        /// Seconds the client should wait before retrying.
        retry_after: u64,
    },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Sanitization rejected input: {0}")]
    Sanitization(String),

    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("Store operation failed: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Generic error envelope returned for every failure.
///
/// `details` is populated only for 4xx responses where the message is safe to
/// show; 5xx responses never carry internal detail.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    status: u16,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

/// Rate-limit rejection body with the fields clients need for backoff.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitResponse {
    error: &'static str,
    status: u16,
    limit: u32,
    remaining: u32,
    reset_time: i64,
    retry_after: u64,
    timestamp: DateTime<Utc>,
}

impl SecurityError {
    /// HTTP status code this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            SecurityError::Validation(_) | SecurityError::Sanitization(_) => {
                StatusCode::BAD_REQUEST
            }
            SecurityError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            SecurityError::Authentication(_) => StatusCode::UNAUTHORIZED,
            SecurityError::Authorization(_) => StatusCode::FORBIDDEN,
            SecurityError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            SecurityError::TransactionAborted(_)
            | SecurityError::Config(_)
            | SecurityError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SecurityError {
    fn into_response(self) -> Response {
        // Full error details are logged server-side; clients only ever see
        // the sanitized envelope below.
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::warn!(error = %self, "Request rejected");
        }

        if let SecurityError::RateLimitExceeded {
            limit,
            remaining,
            reset_time,
            retry_after,
            ..
        } = &self
        {
            let body = RateLimitResponse {
                error: "Rate limit exceeded",
                status: status.as_u16(),
                limit: *limit,
                remaining: *remaining,
                reset_time: *reset_time,
                retry_after: *retry_after,
                timestamp: Utc::now(),
            };
            let retry_header = [("Retry-After", retry_after.to_string())];
            return (status, retry_header, Json(body)).into_response();
        }

        let (error, details) = match &self {
            SecurityError::Validation(msg) => ("Invalid request", Some(msg.clone())),
            SecurityError::Sanitization(msg) => ("Invalid request payload", Some(msg.clone())),
            SecurityError::Authentication(_) => ("Authentication required", None),
            SecurityError::Authorization(_) => ("Insufficient permissions", None),
            SecurityError::Store(_) => ("Service temporarily unavailable", None),
            // 5xx: never expose internal messages to clients
            SecurityError::TransactionAborted(_)
            | SecurityError::Config(_)
            | SecurityError::Internal(_)
            | SecurityError::RateLimitExceeded { .. } => ("Internal server error", None),
        };

        let body = ErrorResponse {
            error: error.to_string(),
            status: status.as_u16(),
            timestamp: Utc::now(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Convenience type alias for Results with SecurityError.
pub type AppResult<T> = Result<T, SecurityError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            SecurityError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            SecurityError::Authentication("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            SecurityError::Authorization("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            SecurityError::Sanitization("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            SecurityError::TransactionAborted("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            SecurityError::Store("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_rate_limit_status() {
        let err = SecurityError::RateLimitExceeded {
            class: "api".into(),
            limit: 100,
            remaining: 0,
            reset_time: 0,
            retry_after: 60,
        };
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_details_omitted_when_none() {
        let response = ErrorResponse {
            error: "Internal server error".to_string(),
            status: 500,
            timestamp: Utc::now(),
            details: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("details"));
    }
}
