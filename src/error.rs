//! Error types for the memory engine.

use thiserror::Error;

/// Result type alias for memory-engine operations.
pub type Result<T> = std::result::Result<T, MemoryError>;

#[derive(Error, Debug)]
pub enum MemoryError {
    // =============================
    // Core policy errors
    // =============================
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("language model unavailable: {0}")]
    LlmUnavailable(String),

    /// Reserved for concrete `LanguageModel` adapters (summary without the
    /// expected delimiter, invalid knowledge JSON, ...); the port in this
    /// crate is opaque (SPEC_FULL §4.5) and never constructs this itself.
    #[error("language model returned malformed output: {0}")]
    LlmMalformed(String),

    // =============================
    // External library conversions
    // =============================
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("uuid parse error: {0}")]
    Uuid(#[from] uuid::Error),
}
