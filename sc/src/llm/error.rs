//! Chat transport error types

use thiserror::Error;

/// Errors that can occur while streaming a chat turn
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Request cancelled")]
    Cancelled,
}

impl LlmError {
    /// Check if this is a cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LlmError::Cancelled)
    }

    /// Human-readable message shown in an error block
    ///
    /// API errors carry the server's own message; everything else uses its
    /// display form.
    pub fn user_message(&self) -> String {
        match self {
            LlmError::ApiError { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
