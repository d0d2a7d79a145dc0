use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The summarisation LLM call failed (§4.1 step 4/6): state is left
    /// unchanged and the caller may retry later.
    #[error("compaction summarisation failed: {0}")]
    Summarize(String),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
