//! Render error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("No stems selected to render")]
    NoStemsSelected,

    #[error("Render request timed out")]
    Timeout,

    #[error("Render service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Render backend error: {0}")]
    Backend(String),

    #[error("Failed to load rendered resource {url}: {reason}")]
    ResourceLoad { url: String, reason: String },

    #[error("Malformed render response")]
    InvalidResponse,
}

pub type Result<T> = std::result::Result<T, RenderError>;
