use thiserror::Error;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("authorisation error: {0}")]
    Authorization(String),

    #[error("file too large: {0} bytes")]
    TooLarge(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("dispatch failed: {0}")]
    Dispatch(String),

    #[error("unknown task: {0}")]
    UnknownTask(String),
}

pub type Result<T> = std::result::Result<T, IpcError>;
