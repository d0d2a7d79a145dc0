//! Agent Runner (§4.3): executes one LLM invocation end-to-end for one chat.
//!
//! `AgentRunner::run` is the retry-wrapped entry point every caller uses —
//! live channel turns via `run`, scheduled tasks via the `TaskExecutor` impl
//! below (the scheduler crate has no notion of prompts or LLMs, so this is
//! the only place that bridges the two).

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, instrument, warn};

use flashclaw_core::types::{
    Attachment, AttachmentType, ChatMessage, ContextMode, MessageContent, Role as CoreRole,
    ScheduledTask,
};
use flashclaw_core::Paths;
use flashclaw_memory::MemoryManager;
use flashclaw_scheduler::TaskExecutor;
use flashclaw_sessions::manager::{SessionTracker, Usage};

use crate::prompt::{self, SystemPrompt};
use crate::provider::{ChatRequest, LlmProvider, Message as ProviderMessage, Role as ProviderRole};
use crate::retry;
use crate::tools::tool_loop;
use crate::tools::{to_definitions, ToolContext, ToolRegistry};

/// Models known to accept image content blocks. Nothing in the corpus names
/// a capability table for this — a judgment call, recorded in DESIGN.md —
/// keyed on substrings shared by current vision-capable model families.
fn model_is_vision_capable(model: &str) -> bool {
    let m = model.to_lowercase();
    m.starts_with("claude-") || m.contains("gpt-4o") || m.contains("gpt-5") || m.contains("vision")
}

/// One Agent Runner invocation's input (§4.3 "Input").
#[derive(Debug, Clone)]
pub struct RunInput {
    pub prompt: String,
    pub chat_id: String,
    pub group_folder: String,
    pub is_main: bool,
    pub is_scheduled_task: bool,
    /// Isolated scheduled-task runs use a throwaway context: no read from,
    /// and no write to, the group's short-term memory buffer.
    pub isolated: bool,
    pub user_id: String,
    pub platform: String,
    pub attachments: Vec<Attachment>,
    /// Overrides the runner's default activity-timer timeout, in ms.
    pub timeout_ms: Option<u64>,
}

impl RunInput {
    pub fn for_message(prompt: String, chat_id: String, group_folder: String, is_main: bool) -> Self {
        Self {
            prompt,
            chat_id,
            group_folder,
            is_main,
            is_scheduled_task: false,
            isolated: false,
            user_id: String::new(),
            platform: String::new(),
            attachments: Vec::new(),
            timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub result: String,
}

struct GroupFiles {
    soul_md: Option<String>,
    claude_md: Option<String>,
}

fn load_group_files(paths: &Paths, folder: &str) -> GroupFiles {
    GroupFiles {
        soul_md: std::fs::read_to_string(paths.group_soul_md(folder)).ok(),
        claude_md: std::fs::read_to_string(paths.group_claude_md(folder)).ok(),
    }
}

/// Builds the content sent to the LLM for the current turn (§4.3 step 2):
/// plain text when there are no images or the model can't see them (in which
/// case a Chinese fallback sentence is appended), else an Anthropic-style
/// content-block array with the text first and one `image` block per
/// attachment.
fn build_request_content(text: &str, images: &[&Attachment], vision_ok: bool, model: &str) -> serde_json::Value {
    if images.is_empty() {
        return serde_json::Value::String(text.to_string());
    }
    if !vision_ok {
        let note = format!("[用户发送了 {} 张图片，但当前模型 {} 不支持图片输入]", images.len(), model);
        let combined = if text.is_empty() { note } else { format!("{text}\n{note}") };
        return serde_json::Value::String(combined);
    }

    let mut blocks = Vec::with_capacity(images.len() + 1);
    if !text.is_empty() {
        blocks.push(serde_json::json!({ "type": "text", "text": text }));
    }
    for att in images {
        if let Some(data) = &att.content {
            let (media_type, payload) = extract_base64(data, att.mime_type.as_deref());
            blocks.push(serde_json::json!({
                "type": "image",
                "source": { "type": "base64", "media_type": media_type, "data": payload },
            }));
        }
    }
    serde_json::Value::Array(blocks)
}

/// Splits a `data:<mime>;base64,<payload>` URL into its parts; passes raw
/// base64 through unchanged when the content isn't a data URL.
fn extract_base64(content: &str, fallback_mime: Option<&str>) -> (String, String) {
    if let (Some(scheme_idx), Some(marker_idx)) = (content.find("data:"), content.find(";base64,")) {
        if scheme_idx < marker_idx {
            let mime = &content[scheme_idx + 5..marker_idx];
            let payload = &content[marker_idx + ";base64,".len()..];
            return (mime.to_string(), payload.to_string());
        }
    }
    (fallback_mime.unwrap_or("image/png").to_string(), content.to_string())
}

fn chat_message_text(msg: &ChatMessage) -> String {
    match &msg.content {
        MessageContent::Text(s) => s.clone(),
        MessageContent::Blocks(blocks) => serde_json::to_string(blocks).unwrap_or_default(),
    }
}

fn role_str(role: CoreRole) -> &'static str {
    match role {
        CoreRole::User => "user",
        CoreRole::Assistant => "assistant",
    }
}

/// Bridges the provider port to `flashclaw_memory::Summarizer` so
/// `MemoryManager::compact` never has to know about chat requests or tool
/// calls — it only needs "give me a summary of this transcript."
struct ProviderSummarizer {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

#[async_trait]
impl flashclaw_memory::Summarizer for ProviderSummarizer {
    async fn summarize(&self, transcript: &str) -> Result<String, String> {
        let req = ChatRequest {
            model: self.model.clone(),
            system: "你是对话摘要助手。用 2-3 句中文总结以下对话的要点，不要使用项目符号。".to_string(),
            system_prompt: None,
            messages: vec![ProviderMessage { role: ProviderRole::User, content: transcript.to_string() }],
            max_tokens: 512,
            stream: false,
            thinking: None,
            tools: Vec::new(),
            raw_messages: None,
        };
        self.provider.send(&req).await.map(|r| r.content).map_err(|e| e.to_string())
    }
}

pub struct AgentRunner {
    provider: Arc<dyn LlmProvider>,
    model: String,
    memory: Arc<MemoryManager>,
    sessions: SessionTracker,
    paths: Arc<Paths>,
    timezone: String,
    main_group_folder: String,
    default_timeout_ms: u64,
    max_output_tokens: u32,
    context_min_tokens: usize,
    context_warn_tokens: usize,
}

impl AgentRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        model: String,
        memory: Arc<MemoryManager>,
        sessions: SessionTracker,
        paths: Arc<Paths>,
        timezone: String,
        main_group_folder: String,
        default_timeout_ms: u64,
        max_output_tokens: u32,
        context_min_tokens: usize,
        context_warn_tokens: usize,
    ) -> Self {
        Self {
            provider,
            model,
            memory,
            sessions,
            paths,
            timezone,
            main_group_folder,
            default_timeout_ms,
            max_output_tokens,
            context_min_tokens,
            context_warn_tokens,
        }
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    /// Runs compaction immediately, outside the background path taken by
    /// step 7 — used by the `/compact` slash command (§4.9), which needs
    /// the result synchronously so it can report what happened.
    pub async fn compact_now(&self, group_folder: &str) -> Result<flashclaw_memory::CompactResult, String> {
        self.memory.compact(group_folder, &self.summarizer()).await.map_err(|e| e.to_string())
    }

    fn summarizer(&self) -> ProviderSummarizer {
        ProviderSummarizer { provider: self.provider.clone(), model: self.model.clone() }
    }

    /// Retry-wrapped entry point (§4.3 "Retry wrapper").
    pub async fn run(&self, input: RunInput) -> Result<RunOutput, String> {
        retry::with_retry(|| self.run_once(input.clone())).await
    }

    #[instrument(skip(self, input), fields(chat_id = %input.chat_id))]
    async fn run_once(&self, input: RunInput) -> Result<RunOutput, String> {
        let tool_registry = ToolRegistry::build(&self.paths.plugins_dir());
        let tool_ctx = ToolContext::new(
            input.chat_id.clone(),
            input.group_folder.clone(),
            input.user_id.clone(),
            input.is_main,
            self.paths.clone(),
        );

        // Step 1: system prompt.
        let files = load_group_files(&self.paths, &input.group_folder);
        let static_tier = prompt::build_static_tier(
            files.soul_md.as_deref(),
            files.claude_md.as_deref(),
            &tool_registry.catalog(),
            input.is_main,
            input.is_scheduled_task,
        );
        let user_tier = if input.isolated {
            String::new()
        } else {
            self.memory.build_system_prompt(&input.group_folder, None)
        };
        let volatile_tier = prompt::build_volatile_tier(Utc::now(), &self.timezone);
        let system_prompt = SystemPrompt { static_tier, user_tier, volatile_tier };

        // Step 2: user message, with vision fallback. Memory always keeps
        // the plain text; only the live request gets image blocks.
        let images: Vec<&Attachment> =
            input.attachments.iter().filter(|a| a.kind == AttachmentType::Image).collect();
        let vision_ok = model_is_vision_capable(&self.model);
        let request_content = build_request_content(&input.prompt, &images, vision_ok, &self.model);

        if !input.isolated {
            self.memory.add_message(
                &input.group_folder,
                ChatMessage { role: CoreRole::User, content: MessageContent::Text(input.prompt.clone()) },
            );
        }

        // Step 3: context-window check.
        let mut context_messages = if input.isolated {
            Vec::new()
        } else {
            self.memory.get_context(&input.group_folder, None)
        };
        let system_tokens = flashclaw_memory::estimate::estimate_text(&system_prompt.to_plain_text()) / 2;
        let messages_tokens = flashclaw_memory::estimate::estimate_messages(context_messages.iter());
        let window = flashclaw_sessions::context_window_for(&self.model) as usize;
        let used = system_tokens + messages_tokens;
        let remaining = window.saturating_sub(used);

        if remaining < self.context_min_tokens {
            return Err("请执行 /compact 以释放上下文空间后重试".to_string());
        }
        if remaining < self.context_warn_tokens && !input.isolated {
            match self.memory.compact(&input.group_folder, &self.summarizer()).await {
                Ok(_) => context_messages = self.memory.get_context(&input.group_folder, None),
                Err(e) => warn!(chat_id = %input.chat_id, error = %e, "pre-emptive compaction failed, continuing with existing context"),
            }
        }

        // Step 4/5: activity-timer-guarded streaming tool loop.
        let raw_messages = build_raw_messages(&context_messages, &request_content, input.isolated, &input.prompt);
        let req = ChatRequest {
            model: self.model.clone(),
            system: system_prompt.to_plain_text(),
            system_prompt: Some(system_prompt),
            messages: Vec::new(),
            max_tokens: self.max_output_tokens,
            stream: true,
            thinking: None,
            tools: to_definitions(tool_registry.tools()),
            raw_messages: Some(raw_messages),
        };

        let last_activity = Arc::new(Mutex::new(Instant::now()));
        let heartbeat_ref = last_activity.clone();
        let heartbeat = move || {
            *heartbeat_ref.lock().unwrap() = Instant::now();
        };

        let timeout_ms = input.timeout_ms.unwrap_or(self.default_timeout_ms);
        let watchdog = {
            let last_activity = last_activity.clone();
            async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    let elapsed = last_activity.lock().unwrap().elapsed();
                    if elapsed.as_millis() as u64 > timeout_ms {
                        return;
                    }
                }
            }
        };

        let loop_fut = tool_loop::run_tool_loop(self.provider.as_ref(), req, tool_registry.tools(), &tool_ctx, heartbeat);

        let result = tokio::select! {
            res = loop_fut => res.map_err(|e| e.to_string())?,
            _ = watchdog => return Err(format!("agent invocation timed out after {timeout_ms}ms of inactivity")),
        };

        // Step 6: record token usage.
        self.sessions.record_usage(
            &input.chat_id,
            Usage { input_tokens: result.tokens_in as i64, output_tokens: result.tokens_out as i64 },
            Some(&result.model),
        );

        // Step 7: append reply to memory, compact in background if needed.
        if !input.isolated {
            self.memory.add_message(
                &input.group_folder,
                ChatMessage { role: CoreRole::Assistant, content: MessageContent::Text(result.content.clone()) },
            );

            if self.memory.needs_compaction(&input.group_folder) {
                let memory = self.memory.clone();
                let group_folder = input.group_folder.clone();
                let summarizer = self.summarizer();
                tokio::spawn(async move {
                    if let Err(e) = memory.compact(&group_folder, &summarizer).await {
                        warn!(group_folder, error = %e, "background compaction failed");
                    }
                });
            }
        }

        info!(chat_id = %input.chat_id, tools_called = result.called_tools.len(), "agent turn complete");
        Ok(RunOutput { result: result.content })
    }
}

/// Rebuilds the wire-format message list: prior turns as plain text (memory
/// only ever stores text), the current turn using `request_content` (which
/// may carry image blocks). Isolated runs skip history entirely.
fn build_raw_messages(
    context_messages: &[ChatMessage],
    request_content: &serde_json::Value,
    isolated: bool,
    prompt: &str,
) -> Vec<serde_json::Value> {
    if isolated || context_messages.is_empty() {
        let content = if isolated { request_content.clone() } else { serde_json::Value::String(prompt.to_string()) };
        return vec![serde_json::json!({ "role": "user", "content": content })];
    }

    let last = context_messages.len() - 1;
    context_messages
        .iter()
        .enumerate()
        .map(|(i, msg)| {
            let content = if i == last { request_content.clone() } else { serde_json::Value::String(chat_message_text(msg)) };
            serde_json::json!({ "role": role_str(msg.role), "content": content })
        })
        .collect()
}

#[async_trait]
impl TaskExecutor for AgentRunner {
    /// Bridges a fired `ScheduledTask` into a full agent turn (§4.6, §4.3).
    async fn execute(&self, task: &ScheduledTask) -> Result<String, String> {
        let input = RunInput {
            prompt: task.prompt.clone(),
            chat_id: task.chat_id.clone(),
            group_folder: task.group_folder.clone(),
            is_main: task.group_folder == self.main_group_folder,
            is_scheduled_task: true,
            isolated: task.context_mode == ContextMode::Isolated,
            user_id: String::new(),
            platform: String::new(),
            attachments: Vec::new(),
            timeout_ms: Some(task.timeout_ms),
        };
        self.run(input).await.map(|o| o.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vision_capability_recognises_claude_family() {
        assert!(model_is_vision_capable("claude-sonnet-4-6"));
        assert!(model_is_vision_capable("gpt-4o-mini"));
        assert!(!model_is_vision_capable("llama-3-8b"));
    }

    #[test]
    fn request_content_is_plain_string_without_images() {
        let content = build_request_content("hello", &[], true, "claude-sonnet-4-6");
        assert_eq!(content, serde_json::json!("hello"));
    }

    #[test]
    fn request_content_falls_back_to_text_note_without_vision() {
        let att = Attachment {
            kind: AttachmentType::Image,
            content: Some("base64data".to_string()),
            mime_type: Some("image/png".to_string()),
            file_name: None,
        };
        let content = build_request_content("look", &[&att], false, "llama-3-8b");
        let text = content.as_str().unwrap();
        assert!(text.contains("不支持图片输入"));
        assert!(text.contains("look"));
    }

    #[test]
    fn request_content_builds_image_blocks_when_vision_capable() {
        let att = Attachment {
            kind: AttachmentType::Image,
            content: Some("data:image/png;base64,AAAA".to_string()),
            mime_type: None,
            file_name: None,
        };
        let content = build_request_content("look", &[&att], true, "claude-sonnet-4-6");
        let blocks = content.as_array().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1]["source"]["media_type"], "image/png");
        assert_eq!(blocks[1]["source"]["data"], "AAAA");
    }
}
