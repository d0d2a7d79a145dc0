use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is full ({size}/{max})")]
    Full { size: usize, max: usize },

    #[error("message exceeded max retries ({retries}) for chat {chat_id}")]
    RetriesExhausted { chat_id: String, retries: u32 },
}

pub type Result<T> = std::result::Result<T, QueueError>;
