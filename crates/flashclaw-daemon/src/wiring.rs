//! Daemon-local glue: the two narrow seam traits (`AgentInvoker` for channel
//! dispatch, `Dispatcher` for the IPC bus) implemented over the concrete
//! runtime built in `main.rs`. Neither `flashclaw-channels` nor
//! `flashclaw-ipc` needs to know about the agent runner or scheduler crates
//! directly — this module is the only place that does.

use std::sync::Arc;

use async_trait::async_trait;

use flashclaw_agent::slash::SlashCommandHandler;
use flashclaw_agent::{AgentRunner, RunInput};
use flashclaw_channels::{AgentInvocation, AgentInvoker, ChannelManager};
use flashclaw_core::types::{ContextMode, Platform, ScheduleType};
use flashclaw_scheduler::SchedulerHandle;
use flashclaw_store::Store;

pub struct DaemonInvoker {
    runner: Arc<AgentRunner>,
    slash: Arc<SlashCommandHandler>,
}

impl DaemonInvoker {
    pub fn new(runner: Arc<AgentRunner>, slash: Arc<SlashCommandHandler>) -> Self {
        Self { runner, slash }
    }
}

#[async_trait]
impl AgentInvoker for DaemonInvoker {
    async fn invoke(&self, input: AgentInvocation) -> Result<String, String> {
        let mut run = RunInput::for_message(input.prompt, input.chat_id, input.group_folder, input.is_main);
        run.user_id = input.user_id;
        run.platform = input.platform;
        run.attachments = input.attachments;
        self.runner.run(run).await.map(|o| o.result)
    }

    async fn check_compact_threshold(&self, chat_id: &str) -> Option<u64> {
        self.runner.sessions().check_compact_threshold(chat_id)
    }

    async fn handle_slash_command(&self, chat_id: &str, group_folder: &str, text: &str) -> Option<String> {
        self.slash.handle(chat_id, group_folder, text).await
    }
}

/// Wires the IPC bus to the channel manager (outbound sends), the
/// scheduler (task CRUD), and the store (folder/chat resolution for
/// envelopes that only name a `group_folder`, not a `chat_id`).
pub struct DaemonDispatcher {
    channels: Arc<ChannelManager>,
    scheduler: SchedulerHandle,
    store: Arc<dyn Store>,
}

impl DaemonDispatcher {
    pub fn new(channels: Arc<ChannelManager>, scheduler: SchedulerHandle, store: Arc<dyn Store>) -> Self {
        Self { channels, scheduler, store }
    }

    /// `chat_jid` is always known to be some registered chat's ID; resolve
    /// its platform from the store when the envelope didn't name one.
    fn resolve_platform(&self, chat_jid: &str, platform: Option<Platform>) -> Option<Platform> {
        if platform.is_some() {
            return platform;
        }
        self.store
            .get_all_chats()
            .ok()?
            .into_iter()
            .find(|c| c.chat_id == chat_jid)
            .map(|c| c.platform)
    }

    fn chat_id_for_folder(&self, group_folder: &str) -> String {
        self.store
            .get_all_chats()
            .ok()
            .and_then(|chats| chats.into_iter().find(|c| c.folder == group_folder))
            .map(|c| c.chat_id)
            .unwrap_or_else(|| group_folder.to_string())
    }
}

#[async_trait]
impl flashclaw_ipc::Dispatcher for DaemonDispatcher {
    async fn send_message(
        &self,
        _target_folder: &str,
        chat_jid: &str,
        text: &str,
        platform: Option<Platform>,
    ) -> Result<(), String> {
        let Some(platform) = self.resolve_platform(chat_jid, platform) else {
            return Err(format!("cannot resolve platform for chat {chat_jid}"));
        };
        let result = self.channels.send_message(&platform, chat_jid, text, None).await;
        if result.success {
            Ok(())
        } else {
            Err(result.error.unwrap_or_else(|| "send failed".to_string()))
        }
    }

    async fn send_image(
        &self,
        _target_folder: &str,
        chat_jid: &str,
        image_data: &str,
        caption: Option<String>,
        platform: Option<Platform>,
    ) -> Result<(), String> {
        let Some(platform) = self.resolve_platform(chat_jid, platform) else {
            return Err(format!("cannot resolve platform for chat {chat_jid}"));
        };
        let bytes = base64_decode(image_data)?;
        let result = self.channels.send_image(&platform, chat_jid, &bytes, caption.as_deref()).await;
        if result.success {
            Ok(())
        } else {
            Err(result.error.unwrap_or_else(|| "send failed".to_string()))
        }
    }

    async fn schedule_task(
        &self,
        group_folder: &str,
        prompt: &str,
        schedule_type: ScheduleType,
        schedule_value: &str,
        context_mode: ContextMode,
        max_retries: Option<u32>,
        timeout_ms: Option<u64>,
    ) -> Result<(), String> {
        let chat_id = self.chat_id_for_folder(group_folder);
        self.scheduler
            .create_task(
                group_folder,
                &chat_id,
                prompt,
                schedule_type,
                schedule_value,
                context_mode,
                max_retries,
                timeout_ms,
            )
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn pause_task(&self, task_id: &str) -> Result<(), String> {
        self.scheduler.pause_task(task_id).map_err(|e| e.to_string())
    }

    async fn resume_task(&self, task_id: &str) -> Result<(), String> {
        self.scheduler.resume_task(task_id).map_err(|e| e.to_string())
    }

    async fn cancel_task(&self, task_id: &str) -> Result<(), String> {
        self.scheduler.cancel_task(task_id).map_err(|e| e.to_string())
    }

    async fn register_group(
        &self,
        jid: &str,
        name: &str,
        folder: &str,
        trigger: &str,
        _agent_config: Option<serde_json::Value>,
    ) -> Result<(), String> {
        tracing::info!(jid, name, folder, trigger, "registering group via IPC");
        let platform = self
            .store
            .get_all_chats()
            .ok()
            .and_then(|chats| chats.into_iter().find(|c| c.chat_id == jid))
            .map(|c| c.platform)
            .unwrap_or_else(|| "unknown".to_string());
        let chat = flashclaw_core::types::Chat {
            chat_id: jid.to_string(),
            platform,
            chat_type: flashclaw_core::types::ChatType::Group,
            folder: folder.to_string(),
            agent_timeout_ms: None,
        };
        self.store.store_chat_metadata(&chat).map_err(|e| e.to_string())
    }

    async fn task_group_folder(&self, task_id: &str) -> Option<String> {
        self.scheduler.get_task(task_id).ok().flatten().map(|t| t.group_folder)
    }
}

fn base64_decode(data: &str) -> Result<Vec<u8>, String> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| format!("invalid base64 image data: {e}"))
}
