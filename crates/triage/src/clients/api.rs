//! Shared error type and response handling for REST API clients.

use reqwest::{Response, StatusCode};
use thiserror::Error;

/// Errors returned by the HTTP API clients.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Response body did not have the expected shape.
    #[error("Unexpected response: {0}")]
    Unexpected(String),
}

/// Turn a non-success response into an [`ApiError`].
pub(crate) async fn check(response: Response, resource: &str) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ApiError::NotFound(resource.to_string()));
    }
    let message = response.text().await.unwrap_or_default();
    Err(ApiError::Api {
        status: status.as_u16(),
        message,
    })
}
