//! Provider client errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider rejected credentials")]
    Unauthorized,

    #[error("Provider error: {status} - {message}")]
    Rejected { status: u16, message: String },

    /// The request may or may not have been accepted upstream.
    #[error("Provider call timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Whether the same request could succeed if sent again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Timeout | ProviderError::Transport(_) => true,
            ProviderError::Rejected { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Unauthorized | ProviderError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Decode(err.to_string())
    }
}
