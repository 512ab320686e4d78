//! Provider error types.

use thiserror::Error;

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors that can occur during provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP request failed before a response arrived.
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Response body did not have the expected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Missing API key for provider: {0}")]
    MissingApiKey(String),

    #[error("Invalid API key for provider: {0}")]
    InvalidApiKey(String),

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited {
        retry_after: Option<std::time::Duration>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Non-success status returned by the API.
    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },
}

impl ProviderError {
    pub fn missing_api_key(provider: impl Into<String>) -> Self {
        Self::MissingApiKey(provider.into())
    }

    pub fn invalid_api_key(provider: impl Into<String>) -> Self {
        Self::InvalidApiKey(provider.into())
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }

    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Map a non-success HTTP status and body to an error. Both providers
    /// report failures as `{"error": {"message": ...}}`.
    pub fn from_status(status: u16, body: &serde_json::Value) -> Self {
        if status == 429 {
            return Self::RateLimited { retry_after: None };
        }
        let message = body["error"]["message"]
            .as_str()
            .map(String::from)
            .unwrap_or_else(|| body.to_string());
        Self::api_error(status, message)
    }

    /// Whether the caller may reasonably retry. The core never retries on
    /// its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RequestFailed(_) | ProviderError::RateLimited { .. } => true,
            ProviderError::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
