//! Error-to-HTTP response conversion.
//!
//! Wraps [`dr_core::Error`] so route handlers can return it directly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: dr_core::Error,
    request_id: Option<String>,
}

impl AppError {
    pub fn new(inner: dr_core::Error) -> Self {
        Self {
            inner,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, id: String) -> Self {
        self.request_id = Some(id);
        self
    }
}

impl From<dr_core::Error> for AppError {
    fn from(e: dr_core::Error) -> Self {
        Self::new(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error = %self.inner,
                "Server error in API handler"
            );
        } else {
            tracing::debug!(status = %status, error = %self.inner, "Request rejected");
        }

        let mut body = json!({
            "error": self.inner.to_string(),
            "code": self.inner.code(),
        });
        if let Some(id) = self.request_id {
            body["request_id"] = json!(id);
        }

        (status, axum::Json(body)).into_response()
    }
}
