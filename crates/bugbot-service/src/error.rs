//! Error-to-HTTP mapping
//!
//! The single place where the platform error taxonomy becomes status codes.
//! Bodies carry a machine-readable code alongside the redacted message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bugbot_core::redaction::redact_error_message;
use serde_json::json;

/// HTTP-facing wrapper for [`bugbot_core::Error`]
#[derive(Debug)]
pub struct ApiError(pub bugbot_core::Error);

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        use bugbot_core::Error::*;
        match &self.0 {
            InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            BackendUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "backend_unavailable"),
            Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            StageFailure { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "stage_failure"),
            UnsafeInput(_) => (StatusCode::BAD_REQUEST, "unsafe_input"),
            Cancelled => (StatusCode::CONFLICT, "cancelled"),
            Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = json!({
            "error": redact_error_message(&self.0.to_string()),
            "code": code,
        });
        (status, Json(body)).into_response()
    }
}

impl<E> From<E> for ApiError
where
    bugbot_core::Error: From<E>,
{
    fn from(err: E) -> Self {
        ApiError(bugbot_core::Error::from(err))
    }
}

/// Result alias for axum handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_expected_status_codes() {
        let cases = [
            (
                bugbot_core::Error::InvalidRequest("x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (bugbot_core::Error::Unauthorized, StatusCode::UNAUTHORIZED),
            (
                bugbot_core::Error::NotFound("x".into()),
                StatusCode::NOT_FOUND,
            ),
            (
                bugbot_core::Error::Conflict("x".into()),
                StatusCode::CONFLICT,
            ),
            (
                bugbot_core::Error::BackendUnavailable("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                bugbot_core::Error::Timeout("x".into()),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                bugbot_core::Error::UnsafeInput("x".into()),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).status_and_code().0, expected);
        }
    }

    #[test]
    fn bodies_are_redacted() {
        let err = ApiError(bugbot_core::Error::BackendUnavailable(
            "provider https://rpc.example.test?apikey=supersecret failed, token=abcdef012345".into(),
        ));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
