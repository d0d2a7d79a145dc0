//! Channel dispatch (§4.8): wires the channel port to the message queue and
//! the agent runner without either side knowing about the other's crate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use tracing::{info, instrument, warn};

use flashclaw_core::types::{Attachment, Chat, ChatType, Message};
use flashclaw_core::Paths;
use flashclaw_queue::{MessageHandler, MessageQueue};
use flashclaw_store::Store;

use crate::channel::InboundHandler;
use crate::manager::ChannelManager;
use crate::types::split_message_id;

/// How long an invocation may run before dispatch sends a "thinking"
/// placeholder (§4.8).
const THINKING_THRESHOLD_MS: u64 = 3_000;

/// Everything the agent runner needs to process one turn, handed across the
/// dispatch/agent boundary so neither crate depends on the other's types.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    pub chat_id: String,
    pub group_folder: String,
    pub is_main: bool,
    pub user_id: String,
    pub platform: String,
    pub prompt: String,
    pub attachments: Vec<Attachment>,
}

/// Narrow seam into the agent runner (§9 "runtime context"). Dispatch only
/// ever needs to kick off one turn and check the compaction threshold —
/// everything else about prompts, tools, and memory is the runner's concern.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, input: AgentInvocation) -> Result<String, String>;

    /// Mirrors `sessionTracker.checkCompactThreshold` (§4.10); `Some(pct)`
    /// means dispatch should append a `/compact` suggestion after sending.
    async fn check_compact_threshold(&self, chat_id: &str) -> Option<u64>;

    /// Intercepts slash commands before a turn is queued (§4.9). Returns
    /// `Some(reply)` when `text` was a recognised command — dispatch sends
    /// it directly and skips the agent entirely. `None` means `text` isn't
    /// a command and dispatch should enqueue as usual.
    async fn handle_slash_command(&self, chat_id: &str, group_folder: &str, text: &str) -> Option<String>;
}

/// Drives both halves of §4.8: [`InboundHandler`] for messages arriving from
/// a [`Channel`](crate::channel::Channel), [`MessageHandler`] for turns
/// popped off the per-chat queue.
pub struct ChannelDispatch {
    store: Arc<dyn Store>,
    queue: Arc<MessageQueue<Message>>,
    channels: Arc<ChannelManager>,
    invoker: Arc<dyn AgentInvoker>,
    paths: Arc<Paths>,
    main_group_folder: String,
    bot_name_re: Regex,
    thinking_threshold: Duration,
    chat_cache: DashMap<String, Chat>,
    placeholders: DashMap<String, String>,
}

impl ChannelDispatch {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<MessageQueue<Message>>,
        channels: Arc<ChannelManager>,
        invoker: Arc<dyn AgentInvoker>,
        paths: Arc<Paths>,
        main_group_folder: String,
        bot_name: &str,
    ) -> Self {
        let escaped = regex::escape(bot_name);
        let bot_name_re = Regex::new(&format!(r"(?i)@?{escaped}\b")).unwrap_or_else(|_| {
            Regex::new(&regex::escape(bot_name)).expect("literal pattern always compiles")
        });

        let chat_cache = DashMap::new();
        if let Ok(chats) = store.get_all_chats() {
            for chat in chats {
                chat_cache.insert(chat.chat_id.clone(), chat);
            }
        }

        Self {
            store,
            queue,
            channels,
            invoker,
            paths,
            main_group_folder,
            bot_name_re,
            thinking_threshold: Duration::from_millis(THINKING_THRESHOLD_MS),
            chat_cache,
            placeholders: DashMap::new(),
        }
    }

    fn should_trigger_agent(&self, chat: &Chat, msg: &Message) -> bool {
        if chat.folder == self.main_group_folder {
            return true;
        }
        match chat.chat_type {
            ChatType::P2p => true,
            ChatType::Group => {
                let mentioned = msg
                    .mentions
                    .as_ref()
                    .map(|m| !m.is_empty())
                    .unwrap_or(false);
                mentioned || self.bot_name_re.is_match(&msg.content)
            }
        }
    }

    /// Registers a chat the dispatcher has never seen before, by cloning the
    /// main group's template files into a freshly derived folder (§4.8).
    fn auto_register(&self, msg: &Message) -> Chat {
        let last8: String = msg.chat_id.chars().rev().take(8).collect::<String>().chars().rev().collect();
        let prefix = match msg.chat_type {
            ChatType::P2p => "private",
            ChatType::Group => "group",
        };
        let folder = format!("{prefix}-{last8}");

        if let Err(e) = self.paths.ensure_group_dirs(&folder) {
            warn!(chat_id = %msg.chat_id, error = %e, "failed to create group directories");
        }
        for (src, dst) in [
            (
                self.paths.group_claude_md(&self.main_group_folder),
                self.paths.group_claude_md(&folder),
            ),
            (
                self.paths.group_soul_md(&self.main_group_folder),
                self.paths.group_soul_md(&folder),
            ),
        ] {
            if src.exists() && !dst.exists() {
                if let Err(e) = std::fs::copy(&src, &dst) {
                    warn!(chat_id = %msg.chat_id, file = %dst.display(), error = %e, "failed to clone group template");
                }
            }
        }

        let chat = Chat {
            chat_id: msg.chat_id.clone(),
            platform: msg.platform.clone(),
            chat_type: msg.chat_type,
            folder,
            agent_timeout_ms: None,
        };
        if let Err(e) = self.store.store_chat_metadata(&chat) {
            warn!(chat_id = %msg.chat_id, error = %e, "failed to persist auto-registered chat");
        }
        self.chat_cache.insert(chat.chat_id.clone(), chat.clone());
        chat
    }

    fn friendly_error(raw: &str) -> String {
        let lower = raw.to_lowercase();
        if lower.contains("401") || lower.contains("missing api key") {
            "API 密钥无效或缺失，请检查配置".to_string()
        } else if lower.contains("403") {
            "权限不足，无法完成该请求".to_string()
        } else {
            raw.to_string()
        }
    }

    async fn send_or_update(
        &self,
        platform: &str,
        chat_id: &str,
        placeholder_id: Option<String>,
        text: &str,
    ) {
        if let Some(message_id) = placeholder_id {
            let Some((_, platform_message_id)) = split_message_id(&message_id) else {
                let _ = self.channels.send_message(platform, chat_id, text, None).await;
                return;
            };
            if self.channels.update_message(platform, platform_message_id, text).await.is_ok() {
                return;
            }
            let _ = self.channels.delete_message(platform, platform_message_id).await;
        }
        let _ = self.channels.send_message(platform, chat_id, text, None).await;
    }
}

#[async_trait]
impl InboundHandler for ChannelDispatch {
    #[instrument(skip(self, msg), fields(chat_id = %msg.chat_id, msg_id = %msg.id))]
    async fn handle(&self, msg: Message) {
        match self.store.message_exists(&msg.id, &msg.chat_id) {
            Ok(true) => {
                return;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "message_exists lookup failed, processing anyway");
            }
        }

        if let Err(e) = self.store.store_message(&msg) {
            warn!(error = %e, "failed to persist inbound message");
        }

        let chat = match self.chat_cache.get(&msg.chat_id).map(|c| c.clone()) {
            Some(c) => c,
            None => self.auto_register(&msg),
        };

        if !self.should_trigger_agent(&chat, &msg) {
            return;
        }

        if let Some(reply) = self
            .invoker
            .handle_slash_command(&msg.chat_id, &chat.folder, &msg.content)
            .await
        {
            self.send_or_update(&msg.platform, &msg.chat_id, None, &reply).await;
            return;
        }

        if let Err(e) = self.queue.enqueue(&msg.chat_id, &msg.id, msg).await {
            warn!(error = %e, "failed to enqueue message for agent processing");
        }
    }
}

#[async_trait]
impl MessageHandler<Message> for ChannelDispatch {
    #[instrument(skip(self, msg), fields(chat_id = %msg.chat_id, msg_id = %msg.id))]
    async fn handle(&self, msg: Message) -> Result<(), String> {
        let chat = self
            .chat_cache
            .get(&msg.chat_id)
            .map(|c| c.clone())
            .ok_or_else(|| format!("unknown chat {}", msg.chat_id))?;

        let invocation = AgentInvocation {
            chat_id: msg.chat_id.clone(),
            group_folder: chat.folder.clone(),
            is_main: chat.folder == self.main_group_folder,
            user_id: msg.sender_id.clone(),
            platform: msg.platform.clone(),
            prompt: msg.content.clone(),
            attachments: msg.attachments.clone().unwrap_or_default(),
        };

        let invoke_fut = self.invoker.invoke(invocation);
        tokio::pin!(invoke_fut);

        let outcome = tokio::select! {
            result = &mut invoke_fut => result,
            _ = tokio::time::sleep(self.thinking_threshold) => {
                let placeholder = self.channels.send_message(&msg.platform, &msg.chat_id, "正在思考...", None).await;
                if placeholder.success {
                    if let Some(id) = placeholder.message_id.clone() {
                        self.placeholders.insert(msg.chat_id.clone(), id);
                    }
                }
                (&mut invoke_fut).await
            }
        };

        let placeholder_id = self.placeholders.remove(&msg.chat_id).map(|(_, v)| v);

        match outcome {
            Ok(text) => {
                self.send_or_update(&msg.platform, &msg.chat_id, placeholder_id, &text)
                    .await;

                if let Some(pct) = self.invoker.check_compact_threshold(&msg.chat_id).await {
                    let suggestion =
                        format!("提示：当前对话已使用 {pct}% 的上下文窗口，建议发送 /compact 进行压缩。");
                    self.send_or_update(&msg.platform, &msg.chat_id, None, &suggestion)
                        .await;
                }
                info!(chat_id = %msg.chat_id, "agent turn delivered");
                Ok(())
            }
            Err(err) => {
                let friendly = format!("❌ {}", Self::friendly_error(&err));
                self.send_or_update(&msg.platform, &msg.chat_id, placeholder_id, &friendly)
                    .await;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(folder: &str, chat_type: ChatType) -> Chat {
        Chat {
            chat_id: "c1".to_string(),
            platform: "telegram".to_string(),
            chat_type,
            folder: folder.to_string(),
            agent_timeout_ms: None,
        }
    }

    fn msg(content: &str, mentions: Option<Vec<String>>) -> Message {
        Message {
            id: "m1".to_string(),
            chat_id: "c1".to_string(),
            sender_id: "u1".to_string(),
            sender_name: "user".to_string(),
            content: content.to_string(),
            timestamp: chrono::Utc::now(),
            chat_type: ChatType::Group,
            platform: "telegram".to_string(),
            attachments: None,
            mentions,
            reply_to_message_id: None,
        }
    }

    fn dispatch_for_test() -> ChannelDispatch {
        struct NoopStore;
        impl Store for NoopStore {
            fn store_message(&self, _: &Message) -> flashclaw_store::Result<()> {
                Ok(())
            }
            fn message_exists(&self, _: &str, _: &str) -> flashclaw_store::Result<bool> {
                Ok(false)
            }
            fn get_messages_since(
                &self,
                _: &str,
                _: chrono::DateTime<chrono::Utc>,
            ) -> flashclaw_store::Result<Vec<Message>> {
                Ok(vec![])
            }
            fn get_chat_history(
                &self,
                _: &str,
                _: usize,
                _: Option<chrono::DateTime<chrono::Utc>>,
            ) -> flashclaw_store::Result<Vec<Message>> {
                Ok(vec![])
            }
            fn store_chat_metadata(&self, _: &Chat) -> flashclaw_store::Result<()> {
                Ok(())
            }
            fn get_all_chats(&self) -> flashclaw_store::Result<Vec<Chat>> {
                Ok(vec![])
            }
            fn create_task(&self, _: &flashclaw_core::types::ScheduledTask) -> flashclaw_store::Result<()> {
                Ok(())
            }
            fn get_task_by_id(
                &self,
                _: &str,
            ) -> flashclaw_store::Result<Option<flashclaw_core::types::ScheduledTask>> {
                Ok(None)
            }
            fn update_task(&self, _: &flashclaw_core::types::ScheduledTask) -> flashclaw_store::Result<()> {
                Ok(())
            }
            fn update_task_after_run(
                &self,
                _: &str,
                _: &flashclaw_store::TaskRunOutcome,
            ) -> flashclaw_store::Result<()> {
                Ok(())
            }
            fn update_task_retry(
                &self,
                _: &str,
                _: u32,
                _: chrono::DateTime<chrono::Utc>,
            ) -> flashclaw_store::Result<()> {
                Ok(())
            }
            fn reset_task_retry(&self, _: &str) -> flashclaw_store::Result<()> {
                Ok(())
            }
            fn delete_task(&self, _: &str) -> flashclaw_store::Result<()> {
                Ok(())
            }
            fn log_task_run(&self, _: &flashclaw_store::TaskRun) -> flashclaw_store::Result<()> {
                Ok(())
            }
            fn get_all_tasks(&self) -> flashclaw_store::Result<Vec<flashclaw_core::types::ScheduledTask>> {
                Ok(vec![])
            }
            fn get_due_tasks(
                &self,
                _: chrono::DateTime<chrono::Utc>,
            ) -> flashclaw_store::Result<Vec<flashclaw_core::types::ScheduledTask>> {
                Ok(vec![])
            }
            fn get_next_wake_time(&self) -> flashclaw_store::Result<Option<chrono::DateTime<chrono::Utc>>> {
                Ok(None)
            }
        }

        struct NoopInvoker;
        #[async_trait]
        impl AgentInvoker for NoopInvoker {
            async fn invoke(&self, _: AgentInvocation) -> Result<String, String> {
                Ok(String::new())
            }
            async fn check_compact_threshold(&self, _: &str) -> Option<u64> {
                None
            }
            async fn handle_slash_command(&self, _: &str, _: &str, _: &str) -> Option<String> {
                None
            }
        }

        let queue_config = flashclaw_queue::QueueConfig::default();
        ChannelDispatch::new(
            Arc::new(NoopStore),
            flashclaw_queue::MessageQueue::new(queue_config),
            Arc::new(ChannelManager::new()),
            Arc::new(NoopInvoker),
            Arc::new(Paths::new(std::env::temp_dir().join("flashclaw-dispatch-test"))),
            "main".to_string(),
            "FlashBot",
        )
    }

    #[test]
    fn main_folder_always_triggers() {
        let d = dispatch_for_test();
        let c = chat("main", ChatType::Group);
        let m = msg("random chatter", None);
        assert!(d.should_trigger_agent(&c, &m));
    }

    #[test]
    fn p2p_always_triggers() {
        let d = dispatch_for_test();
        let c = chat("private-abcd1234", ChatType::P2p);
        let m = msg("hi", None);
        assert!(d.should_trigger_agent(&c, &m));
    }

    #[test]
    fn group_chat_requires_mention() {
        let d = dispatch_for_test();
        let c = chat("group-abcd1234", ChatType::Group);
        let unmentioned = msg("just chatting", None);
        assert!(!d.should_trigger_agent(&c, &unmentioned));

        let mentioned = msg("hey @FlashBot help me", None);
        assert!(d.should_trigger_agent(&c, &mentioned));

        let with_mentions_field = msg("help", Some(vec!["FlashBot".to_string()]));
        assert!(d.should_trigger_agent(&c, &with_mentions_field));
    }

    #[test]
    fn friendly_error_maps_known_codes() {
        assert!(ChannelDispatch::friendly_error("401 Unauthorized").contains("密钥"));
        assert!(ChannelDispatch::friendly_error("Missing API key").contains("密钥"));
        assert!(ChannelDispatch::friendly_error("connection reset") == "connection reset");
    }
}
