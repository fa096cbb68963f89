use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::chat::ChatError;
use crate::error::Error;

/// Error returned by HTTP handlers, rendered as `{"error": "<message>"}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Chat(ChatError::ConversationNotFound(_)) => {
                Self::new(StatusCode::NOT_FOUND, err.to_string())
            }
            Error::Chat(_) | Error::Validation(_) => Self::bad_request(err.to_string()),
            Error::Database(sqlx::Error::RowNotFound) => Self::new(StatusCode::NOT_FOUND, "not found"),
            Error::AllProvidersFailed { .. } => {
                // Upstream causes stay in the logs.
                error!("Request failed: {}", err);
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "service unavailable")
            }
            other => {
                error!("Internal error: {}", other);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
