pub mod config;
pub mod error;
pub mod queue;

pub use config::QueueConfig;
pub use error::{QueueError, Result};
pub use queue::{MessageHandler, MessageQueue};
