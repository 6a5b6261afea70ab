use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use serde::Deserialize;
use serde_json::json;

/// Client-facing error carrying the wire taxonomy type. Upstream failures
/// keep their original status code; transport failures become
/// `internal_error`.
#[derive(Debug, thiserror::Error)]
#[error("{status}: {message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub error_type: String,
    pub message: String,
}

impl ApiError {
    fn new(status: StatusCode, error_type: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            error_type: error_type.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request_error", message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "authentication_error", message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "rate_limit_error", message)
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "permission_error", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    /// Re-encode an upstream non-2xx body, extracting `error.message` and
    /// `error.type` best-effort and keeping the original status code.
    pub fn from_upstream(status: u16, body: &[u8]) -> Self {
        let status =
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        #[derive(Default, Deserialize)]
        struct UpstreamError {
            #[serde(default)]
            error: UpstreamErrorDetail,
            #[serde(default)]
            message: String,
        }
        #[derive(Default, Deserialize)]
        struct UpstreamErrorDetail {
            #[serde(default)]
            message: String,
            #[serde(rename = "type", default)]
            error_type: String,
        }

        let parsed: UpstreamError = serde_json::from_slice(body).unwrap_or_default();
        let (message, error_type) = if !parsed.error.message.is_empty() {
            let error_type = if parsed.error.error_type.is_empty() {
                "api_error".to_string()
            } else {
                parsed.error.error_type
            };
            (parsed.error.message, error_type)
        } else if !parsed.message.is_empty() {
            (parsed.message, "api_error".to_string())
        } else {
            (
                String::from_utf8_lossy(body).into_owned(),
                "api_error".to_string(),
            )
        };

        Self {
            status,
            error_type,
            message,
        }
    }

    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(status = %self.status.as_u16(), error_type = %self.error_type, message = %self.message, "request error");
        let body = Json(json!({
            "error": {
                "message": self.message,
                "type": self.error_type,
            }
        }));
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_error_body_is_reencoded() {
        let err = ApiError::from_upstream(
            402,
            br#"{"error":{"message":"quota exhausted","type":"billing_error"}}"#,
        );
        assert_eq!(err.status.as_u16(), 402);
        assert_eq!(err.error_type, "billing_error");
        assert_eq!(err.message, "quota exhausted");
    }

    #[test]
    fn flat_message_body_falls_back_to_api_error() {
        let err = ApiError::from_upstream(503, br#"{"message":"upstream down"}"#);
        assert_eq!(err.error_type, "api_error");
        assert_eq!(err.message, "upstream down");
    }

    #[test]
    fn unparseable_body_is_passed_as_text() {
        let err = ApiError::from_upstream(500, b"gateway timeout");
        assert_eq!(err.message, "gateway timeout");
    }
}
