use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Email content produced by a generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedEmail {
    pub subject: String,
    /// HTML body fragment (not yet wrapped in the branded shell).
    pub content: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AiError {
    #[error("ai generation is not configured: {0}")]
    NotConfigured(String),

    #[error("invalid generation input: {0}")]
    InvalidInput(String),

    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("ai returned a malformed response: {0}")]
    MalformedResponse(String),

    #[error("internal error: {0}")]
    Internal(String),
}
