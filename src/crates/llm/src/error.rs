//! Error types for the chat-completion client.

use thiserror::Error;

/// Result type for LLM operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors that can occur when calling a chat-completion API.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP transport failed (connect, timeout, TLS, ...).
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// API authentication failed (401).
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    /// API key not found in the environment.
    #[error("API key not found: set {0}")]
    ApiKeyNotFound(String),

    /// Rate limit exceeded (429).
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Provider-side failure (5xx).
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Invalid request parameters.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Response body did not have the expected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Any other non-2xx answer from the provider.
    #[error("Provider error: {0}")]
    ProviderError(String),
}

impl LlmError {
    /// Whether a retry with backoff has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::HttpError(_)
                | LlmError::RateLimitExceeded(_)
                | LlmError::ServiceUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LlmError::RateLimitExceeded("slow down".into()).is_retryable());
        assert!(LlmError::ServiceUnavailable("502".into()).is_retryable());
        assert!(!LlmError::AuthenticationError("bad key".into()).is_retryable());
        assert!(!LlmError::InvalidRequest("no messages".into()).is_retryable());
        assert!(!LlmError::ApiKeyNotFound("OPENAI_API_KEY".into()).is_retryable());
    }
}
