use async_trait::async_trait;
use flashclaw_core::types::{ContextMode, Platform, ScheduleType};

/// The IPC bus's view of "the rest of the runtime" (§4.7 step 4 "Dispatch").
/// Kept as a narrow trait so `flashclaw-ipc` never depends on
/// `flashclaw-channels`/`flashclaw-scheduler`/`flashclaw-agent` directly —
/// the daemon crate wires a concrete implementation over all three.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send_message(
        &self,
        target_folder: &str,
        chat_jid: &str,
        text: &str,
        platform: Option<Platform>,
    ) -> Result<(), String>;

    async fn send_image(
        &self,
        target_folder: &str,
        chat_jid: &str,
        image_data: &str,
        caption: Option<String>,
        platform: Option<Platform>,
    ) -> Result<(), String>;

    async fn schedule_task(
        &self,
        group_folder: &str,
        prompt: &str,
        schedule_type: ScheduleType,
        schedule_value: &str,
        context_mode: ContextMode,
        max_retries: Option<u32>,
        timeout_ms: Option<u64>,
    ) -> Result<(), String>;

    async fn pause_task(&self, task_id: &str) -> Result<(), String>;
    async fn resume_task(&self, task_id: &str) -> Result<(), String>;
    async fn cancel_task(&self, task_id: &str) -> Result<(), String>;

    async fn register_group(
        &self,
        jid: &str,
        name: &str,
        folder: &str,
        trigger: &str,
        agent_config: Option<serde_json::Value>,
    ) -> Result<(), String>;

    /// Resolves `task_id`'s owning `group_folder`, for authorising
    /// `pause_task`/`resume_task`/`cancel_task` envelopes (§4.7 step 3).
    /// `None` if the task doesn't exist — the caller treats this as an
    /// authorisation failure, not a dispatch error.
    async fn task_group_folder(&self, task_id: &str) -> Option<String>;
}
