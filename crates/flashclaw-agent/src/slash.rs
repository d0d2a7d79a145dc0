//! Slash commands (§4.9): intercepted before a turn is ever queued. Handles
//! session-stats read/reset, listing scheduled tasks for the current chat,
//! and in-place compaction — nothing here enqueues a full agent turn.

use std::sync::Arc;

use flashclaw_scheduler::SchedulerHandle;

use crate::runner::AgentRunner;

pub struct SlashCommandHandler {
    runner: Arc<AgentRunner>,
    scheduler: SchedulerHandle,
}

impl SlashCommandHandler {
    pub fn new(runner: Arc<AgentRunner>, scheduler: SchedulerHandle) -> Self {
        Self { runner, scheduler }
    }

    /// Returns `Some(reply)` when `text` is a recognised command, `None`
    /// otherwise — the caller treats `None` as "not a command, enqueue it."
    pub async fn handle(&self, chat_id: &str, group_folder: &str, text: &str) -> Option<String> {
        let trimmed = text.trim();
        if !trimmed.starts_with('/') {
            return None;
        }
        let command = trimmed.split_whitespace().next().unwrap_or("");
        let reply = match command {
            "/stats" | "/状态" => self.stats(chat_id),
            "/reset" | "/重置" => self.reset(chat_id),
            "/tasks" | "/任务" => self.tasks(chat_id).await,
            "/compact" | "/压缩" => self.compact(chat_id, group_folder).await,
            _ => return None,
        };
        Some(reply)
    }

    fn stats(&self, chat_id: &str) -> String {
        match self.runner.sessions().get_stats(chat_id) {
            Some(s) => format!(
                "会话统计\n模型: {}\n消息数: {}\n输入 tokens: {}\n输出 tokens: {}\n总计 tokens: {}",
                s.model, s.message_count, s.input_tokens, s.output_tokens, s.total_tokens
            ),
            None => "当前会话暂无统计数据。".to_string(),
        }
    }

    fn reset(&self, chat_id: &str) -> String {
        self.runner.sessions().reset(chat_id);
        "会话统计已重置。".to_string()
    }

    async fn tasks(&self, chat_id: &str) -> String {
        match self.scheduler.list_tasks_for_chat(chat_id) {
            Ok(tasks) if tasks.is_empty() => "当前没有已安排的任务。".to_string(),
            Ok(tasks) => {
                let lines: Vec<String> = tasks
                    .iter()
                    .map(|t| format!("- [{:?}] {} ({})", t.status, t.prompt, t.schedule_value))
                    .collect();
                format!("已安排的任务：\n{}", lines.join("\n"))
            }
            Err(e) => format!("读取任务列表失败: {e}"),
        }
    }

    async fn compact(&self, chat_id: &str, group_folder: &str) -> String {
        match self.runner.compact_now(group_folder).await {
            Ok(result) => {
                self.runner.sessions().reset(chat_id);
                format!(
                    "已压缩对话：{} -> {} 条消息，节省约 {} tokens。",
                    result.original_count, result.compacted_count, result.saved_tokens
                )
            }
            Err(e) => format!("压缩失败: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use flashclaw_core::Paths;
    use flashclaw_memory::MemoryManager;
    use flashclaw_sessions::SessionTracker;

    use crate::provider::{ChatResponse, LlmProvider, ProviderError};

    struct StubProvider;

    #[async_trait]
    impl LlmProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }
        async fn send(&self, _req: &crate::provider::ChatRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                content: "摘要".to_string(),
                model: "stub".to_string(),
                tokens_in: 0,
                tokens_out: 0,
                stop_reason: "end_turn".to_string(),
                tool_calls: Vec::new(),
            })
        }
    }

    fn handler() -> (SlashCommandHandler, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let paths = Arc::new(Paths::new(dir.path().to_path_buf()));
        let memory = Arc::new(MemoryManager::new(paths.clone()));
        let sessions = SessionTracker::spawn(paths.session_tracker_cache_file());
        let runner = Arc::new(AgentRunner::new(
            Arc::new(StubProvider),
            "stub-model".to_string(),
            memory,
            sessions,
            paths,
            "UTC".to_string(),
            "main".to_string(),
            300_000,
            4_096,
            16_000,
            32_000,
        ));
        let store: Arc<dyn flashclaw_store::Store> = Arc::new(flashclaw_store::sqlite::SqliteStore::in_memory().unwrap());
        let (_tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        let (wake_tx, _wake_rx) = tokio::sync::mpsc::unbounded_channel();
        let scheduler = SchedulerHandle::new(store, wake_tx);
        (SlashCommandHandler::new(runner, scheduler), dir)
    }

    #[tokio::test]
    async fn non_slash_text_is_not_intercepted() {
        let (handler, _dir) = handler();
        assert!(handler.handle("c1", "main", "hello there").await.is_none());
    }

    #[tokio::test]
    async fn stats_reports_no_data_for_fresh_chat() {
        let (handler, _dir) = handler();
        let reply = handler.handle("c1", "main", "/stats").await.unwrap();
        assert!(reply.contains("暂无统计数据"));
    }

    #[tokio::test]
    async fn tasks_reports_empty_list() {
        let (handler, _dir) = handler();
        let reply = handler.handle("c1", "main", "/tasks").await.unwrap();
        assert!(reply.contains("没有已安排的任务"));
    }
}
