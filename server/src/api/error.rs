//! API Errors

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::connection::ConnectionError;
use crate::session::SessionError;

/// Errors returned by API handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Malformed request.
    #[error("{0}")]
    BadRequest(String),

    /// Missing or wrong API key.
    #[error("Invalid API key")]
    Unauthorized,
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            Self::Connection(err) => match err {
                ConnectionError::NotConnected => {
                    (StatusCode::NOT_FOUND, "NOT_CONNECTED", self.to_string())
                }
                ConnectionError::AlreadyConnected => {
                    (StatusCode::CONFLICT, "ALREADY_CONNECTED", self.to_string())
                }
                ConnectionError::Closed => {
                    (StatusCode::CONFLICT, "CONNECTION_CLOSED", self.to_string())
                }
                ConnectionError::InvalidPhoneNumber(_) => {
                    (StatusCode::BAD_REQUEST, "INVALID_PHONE_NUMBER", self.to_string())
                }
                ConnectionError::InvalidOptions(_) => {
                    (StatusCode::BAD_REQUEST, "INVALID_OPTIONS", self.to_string())
                }
                ConnectionError::SessionStartup(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SESSION_STARTUP_FAILED",
                    self.to_string(),
                ),
                ConnectionError::Engine(SessionError::Timeout(_)) => {
                    (StatusCode::GATEWAY_TIMEOUT, "ENGINE_TIMEOUT", self.to_string())
                }
                ConnectionError::Engine(_) => {
                    (StatusCode::BAD_GATEWAY, "ENGINE_ERROR", self.to_string())
                }
                ConnectionError::AuthStore(_)
                | ConnectionError::Qr(_)
                | ConnectionError::Serialization(_) => {
                    tracing::error!(error = %err, "Internal error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "Internal server error".to_string(),
                    )
                }
            },
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", self.to_string()),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),
        };

        let body = Json(serde_json::json!({
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

impl From<relay_common::Error> for ApiError {
    fn from(err: relay_common::Error) -> Self {
        Self::Connection(err.into())
    }
}
