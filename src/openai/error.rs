//! Error types for the OpenAI-compatible client.
//!
//! [`ApiError`] covers failures that happen before a response body is
//! available. Interruptions in the middle of a streamed body are not errors:
//! they come back as a partial [`StreamOutput`](crate::model::StreamOutput).

use thiserror::Error;

/// Provider error code reported when prompt plus `max_tokens` overflow the window.
pub const CONTEXT_LENGTH_CODE: &str = "context_length_exceeded";

// Fallback for providers that only report the overflow in the message text.
const CONTEXT_LENGTH_MESSAGE: &str = "maximum context length";

/// Errors that can occur while talking to the completion service.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server answered HTTP 429.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Any other non-success HTTP status. `code` is the provider's structured
    /// error code when the body carried one.
    #[error("API error (status {status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Underlying network failure (DNS, refused connection, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// No response, or no further stream data, within the read limit.
    #[error("no data from the server within {0:?}")]
    Timeout(std::time::Duration),

    /// The response body did not have the expected shape.
    #[error("failed to parse API response: {0}")]
    Parse(String),
}

impl ApiError {
    /// True when the request failed because the prompt and requested output
    /// length do not fit in the model's context window.
    pub fn is_context_length_exceeded(&self) -> bool {
        match self {
            ApiError::Api { code, message, .. } => {
                code.as_deref() == Some(CONTEXT_LENGTH_CODE)
                    || message.contains(CONTEXT_LENGTH_MESSAGE)
            }
            _ => false,
        }
    }
}
