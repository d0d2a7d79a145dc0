use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("store error: {0}")]
    Store(#[from] flashclaw_store::StoreError),

    /// The provided schedule value (cron expr / interval / ISO instant) is
    /// invalid for its `schedule_type` (§4.7 "validate before insertion").
    #[error("invalid schedule value: {0}")]
    InvalidSchedule(String),

    #[error("task not found: {id}")]
    TaskNotFound { id: String },

    #[error("task execution timed out after {ms}ms")]
    Timeout { ms: u64 },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
