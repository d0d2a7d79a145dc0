//! `flashclaw-sessions` — per-chat token accounting (§4.10, §3 `SessionStats`).

pub mod error;
pub mod manager;
pub mod types;

pub use error::SessionError;
pub use manager::{SessionTracker, Usage};
pub use types::{context_window_for, DEFAULT_CONTEXT_WINDOW};
