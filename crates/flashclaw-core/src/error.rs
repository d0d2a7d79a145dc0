use thiserror::Error;

/// Top-level error type shared by the daemon and any crate that doesn't need
/// its own narrower error enum.
#[derive(Debug, Error)]
pub enum FlashclawError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("authorisation error: {0}")]
    Authorization(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("channel error ({channel}): {reason}")]
    Channel { channel: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl FlashclawError {
    /// Short SCREAMING_SNAKE_CASE code, useful in log fields and user-facing
    /// error mapping (§7 "User-visible failure").
    pub fn code(&self) -> &'static str {
        match self {
            FlashclawError::Config(_) => "CONFIG_ERROR",
            FlashclawError::Validation(_) => "VALIDATION_ERROR",
            FlashclawError::Authorization(_) => "AUTHORIZATION_ERROR",
            FlashclawError::Database(_) => "DATABASE_ERROR",
            FlashclawError::LlmProvider(_) => "LLM_PROVIDER_ERROR",
            FlashclawError::Channel { .. } => "CHANNEL_ERROR",
            FlashclawError::Serialization(_) => "SERIALIZATION_ERROR",
            FlashclawError::Io(_) => "IO_ERROR",
            FlashclawError::Timeout { .. } => "TIMEOUT",
            FlashclawError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, FlashclawError>;
