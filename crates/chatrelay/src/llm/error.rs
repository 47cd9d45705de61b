//! LLM error types.

use thiserror::Error;

/// Turn a non-success response into an [`LLMError`], consuming its body.
///
/// The body is kept verbatim so callers can surface the provider's own
/// explanation. Returns the response untouched when it succeeded.
pub async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, LLMError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let message = response.text().await.unwrap_or_default();

    if status == 429 {
        return Err(LLMError::RateLimit {
            retry_after,
            message,
        });
    }
    Err(LLMError::Api { status, message })
}

/// Errors that can occur when making LLM API calls.
#[derive(Debug, Error)]
pub enum LLMError {
    /// HTTP request failed
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// API returned an error response
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Rate limited by the provider (429)
    #[error("rate limited (retry after {retry_after:?}s): {message}")]
    RateLimit {
        retry_after: Option<u64>,
        message: String,
    },
}

impl LLMError {
    /// The message to show a client: the provider's body when there is one.
    pub fn client_message(&self) -> String {
        match self {
            LLMError::Api { message, .. } | LLMError::RateLimit { message, .. }
                if !message.is_empty() =>
            {
                message.clone()
            }
            other => other.to_string(),
        }
    }
}
