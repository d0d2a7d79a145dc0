use flashclaw_core::types::{Chat, Message, ScheduledTask};

use crate::error::Result;
use crate::types::{TaskRun, TaskRunOutcome};

/// The persistence operations the core requires (§6.4). Everything else
/// about how messages/tasks/chats are actually stored is an implementation
/// detail of whatever implements this trait.
///
/// Methods are synchronous — `rusqlite` has no async API, and a single
/// SQLite connection is serialized behind a mutex (§5 "shared resources").
/// Callers on an async runtime should run these through
/// `tokio::task::spawn_blocking`.
pub trait Store: Send + Sync {
    fn store_message(&self, msg: &Message) -> Result<()>;
    fn message_exists(&self, id: &str, chat_id: &str) -> Result<bool>;
    fn get_messages_since(
        &self,
        chat_id: &str,
        since: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<Message>>;
    fn get_chat_history(
        &self,
        chat_id: &str,
        limit: usize,
        since: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Vec<Message>>;
    fn store_chat_metadata(&self, chat: &Chat) -> Result<()>;
    fn get_all_chats(&self) -> Result<Vec<Chat>>;

    fn create_task(&self, task: &ScheduledTask) -> Result<()>;
    fn get_task_by_id(&self, id: &str) -> Result<Option<ScheduledTask>>;
    fn update_task(&self, task: &ScheduledTask) -> Result<()>;
    fn update_task_after_run(&self, id: &str, outcome: &TaskRunOutcome) -> Result<()>;
    fn update_task_retry(
        &self,
        id: &str,
        retry_count: u32,
        next_run: chrono::DateTime<chrono::Utc>,
    ) -> Result<()>;
    fn reset_task_retry(&self, id: &str) -> Result<()>;
    fn delete_task(&self, id: &str) -> Result<()>;
    fn log_task_run(&self, run: &TaskRun) -> Result<()>;
    fn get_all_tasks(&self) -> Result<Vec<ScheduledTask>>;
    fn get_due_tasks(&self, now: chrono::DateTime<chrono::Utc>) -> Result<Vec<ScheduledTask>>;
    fn get_next_wake_time(&self) -> Result<Option<chrono::DateTime<chrono::Utc>>>;
}
