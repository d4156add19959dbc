use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Errors are `Clone` so a single fetch outcome can be handed to every
/// caller that joined the same in-flight fetch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SalesfeedError {
    #[error("Upstream API error: {0}")]
    Upstream(String),

    #[error("Upstream request timed out: {0}")]
    Timeout(String),

    #[error("Malformed upstream response: {0}")]
    Malformed(String),

    #[error("Unknown report type: {0}")]
    UnknownReport(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl SalesfeedError {
    /// Whether another attempt against the upstream may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, SalesfeedError::Upstream(_) | SalesfeedError::Timeout(_))
    }
}

impl From<reqwest::Error> for SalesfeedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SalesfeedError::Timeout(err.to_string())
        } else {
            SalesfeedError::Upstream(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SalesfeedError {
    fn from(err: serde_json::Error) -> Self {
        SalesfeedError::Malformed(err.to_string())
    }
}

impl IntoResponse for SalesfeedError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            SalesfeedError::UnknownReport(_) => (StatusCode::BAD_REQUEST, "Invalid report type"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch data"),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
