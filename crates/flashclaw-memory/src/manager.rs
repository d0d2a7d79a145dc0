use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use flashclaw_core::paths::{safe_id, Paths};
use flashclaw_core::types::{ChatMessage, ContentBlock, MemoryEntry, MessageContent, Role};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, instrument, warn};

use crate::cache::BoundedCache;
use crate::error::{MemoryError, Result};
use crate::estimate::{estimate_message, estimate_messages};
use crate::markdown::{format_file, format_recall_all, parse_file};
use crate::summarizer::Summarizer;
use crate::types::{
    CompactResult, Scope, ADD_MESSAGE_MIN_LEN_TO_SHIFT, ADD_MESSAGE_SHIFT_MULTIPLIER, CACHE_KEY_CAP,
    DEFAULT_COMPACT_KEEP_TOKENS, DEFAULT_COMPACT_THRESHOLD, DEFAULT_CONTEXT_TOKEN_LIMIT,
};

#[derive(Debug, Clone, Default)]
struct ShortTermBuffer {
    messages: Vec<ChatMessage>,
    total_tokens: usize,
}

#[derive(Debug, Clone, Default)]
struct LongTermStore {
    entries: Vec<MemoryEntry>,
    loaded: bool,
}

/// Short-term conversational context, long-term Markdown-backed facts, and
/// LLM-driven compaction, per chat/group and per user (§4.1).
pub struct MemoryManager {
    paths: Arc<Paths>,
    short_term: BoundedCache<ShortTermBuffer>,
    long_term_group: BoundedCache<LongTermStore>,
    long_term_user: BoundedCache<LongTermStore>,
    summaries: DashMap<String, String>,
    compaction_locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl MemoryManager {
    pub fn new(paths: Arc<Paths>) -> Self {
        Self {
            paths,
            short_term: BoundedCache::new(CACHE_KEY_CAP),
            long_term_group: BoundedCache::new(CACHE_KEY_CAP),
            long_term_user: BoundedCache::new(CACHE_KEY_CAP),
            summaries: DashMap::new(),
            compaction_locks: DashMap::new(),
        }
    }

    /// Returns the most-recent suffix of `groupId`'s short-term buffer whose
    /// estimated tokens stay at or under `max_tokens` (default
    /// [`DEFAULT_CONTEXT_TOKEN_LIMIT`]). If the single newest message alone
    /// exceeds the limit, returns exactly that message.
    pub fn get_context(&self, group_id: &str, max_tokens: Option<usize>) -> Vec<ChatMessage> {
        let limit = max_tokens.unwrap_or(DEFAULT_CONTEXT_TOKEN_LIMIT);
        let Some(buffer) = self.short_term.get(group_id) else {
            return Vec::new();
        };
        if buffer.messages.is_empty() {
            return Vec::new();
        }

        let len = buffer.messages.len();
        let mut running = 0usize;
        let mut start = len;
        for (i, msg) in buffer.messages.iter().enumerate().rev() {
            let cost = estimate_message(msg);
            if start != len && running + cost > limit {
                break;
            }
            running += cost;
            start = i;
        }
        buffer.messages[start..].to_vec()
    }

    /// Appends `msg` to `groupId`'s short-term buffer. If the running total
    /// exceeds `2 × compactThreshold` AND the buffer holds more than 10
    /// messages, shifts the oldest messages out until back under the
    /// ceiling — accounting is incremental, never re-summing the whole
    /// buffer (§4.1, §8 P2).
    #[instrument(skip(self, msg), fields(group_id))]
    pub fn add_message(&self, group_id: &str, msg: ChatMessage) {
        let ceiling = DEFAULT_COMPACT_THRESHOLD * ADD_MESSAGE_SHIFT_MULTIPLIER;
        self.short_term.with_entry(group_id, ShortTermBuffer::default, |buffer| {
            buffer.total_tokens += estimate_message(&msg);
            buffer.messages.push(msg);

            if buffer.total_tokens > ceiling && buffer.messages.len() > ADD_MESSAGE_MIN_LEN_TO_SHIFT {
                while buffer.total_tokens > ceiling && buffer.messages.len() > 1 {
                    let removed = buffer.messages.remove(0);
                    buffer.total_tokens = buffer.total_tokens.saturating_sub(estimate_message(&removed));
                }
            }
        });
    }

    /// True iff `groupId`'s short-term buffer exceeds `compactThreshold`
    /// (default 150 000 estimated tokens).
    pub fn needs_compaction(&self, group_id: &str) -> bool {
        self.short_term
            .get(group_id)
            .is_some_and(|b| b.total_tokens > DEFAULT_COMPACT_THRESHOLD)
    }

    /// Runs the compaction protocol (§4.1): acquire a non-reentrant
    /// per-group lock, split the buffer into a tail to keep and a head to
    /// compress, ask `summarizer` for a Chinese summary of the head, and on
    /// success replace the buffer with the tail and cache the summary.
    /// Returns a no-op result (never an error) when the lock is already
    /// held or there is nothing old enough to compress.
    #[instrument(skip(self, summarizer), fields(group_id))]
    pub async fn compact(&self, group_id: &str, summarizer: &dyn Summarizer) -> Result<CompactResult> {
        let lock = self
            .compaction_locks
            .entry(group_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();

        let Ok(_guard) = lock.try_lock() else {
            return Ok(self.no_op_result(group_id));
        };

        let Some(buffer) = self.short_term.get(group_id) else {
            return Ok(self.no_op_result(group_id));
        };

        let mut to_keep: Vec<ChatMessage> = Vec::new();
        let mut kept_tokens = 0usize;
        let mut split_at = buffer.messages.len();
        for (i, msg) in buffer.messages.iter().enumerate().rev() {
            let cost = estimate_message(msg);
            if kept_tokens + cost > DEFAULT_COMPACT_KEEP_TOKENS && !to_keep.is_empty() {
                break;
            }
            kept_tokens += cost;
            to_keep.push(msg.clone());
            split_at = i;
        }
        to_keep.reverse();

        let to_compress = &buffer.messages[..split_at];
        if to_compress.is_empty() {
            return Ok(self.no_op_result(group_id));
        }

        let transcript = format_transcript(to_compress);
        let original_count = buffer.messages.len();
        let original_tokens = buffer.total_tokens;
        drop(buffer);

        let summary = match summarizer.summarize(&transcript).await {
            Ok(s) => s,
            Err(e) => {
                warn!(group_id, error = %e, "compaction summarisation failed, state left unchanged");
                return Err(MemoryError::Summarize(e));
            }
        };
        let summary = if summary.contains("## 对话摘要") {
            summary
        } else {
            format!("## 对话摘要\n\n{summary}")
        };

        let new_tokens = estimate_messages(to_keep.iter());
        let compacted_count = to_keep.len();
        self.short_term.with_entry(group_id, ShortTermBuffer::default, |buffer| {
            buffer.messages = to_keep;
            buffer.total_tokens = new_tokens;
        });
        self.summaries.insert(group_id.to_string(), summary.clone());

        info!(group_id, original_count, compacted_count, "memory compacted");
        Ok(CompactResult {
            original_count,
            compacted_count,
            summary,
            saved_tokens: original_tokens.saturating_sub(new_tokens),
        })
    }

    fn no_op_result(&self, group_id: &str) -> CompactResult {
        let current_count = self.short_term.get(group_id).map(|b| b.messages.len()).unwrap_or(0);
        let cached = self.summaries.get(group_id).map(|r| r.value().clone());
        CompactResult::no_op(current_count, cached)
    }

    /// `base` + cached compaction summary (if any) + `recall()` for the
    /// group, concatenated per §4.1.
    pub fn build_system_prompt(&self, group_id: &str, base: Option<&str>) -> String {
        let mut out = base.unwrap_or("").to_string();
        if let Some(summary) = self.summaries.get(group_id) {
            out.push_str("\n\n## 之前对话的摘要\n");
            out.push_str(summary.value());
        }
        let recalled = self.recall(group_id, None);
        out.push_str("\n\n## 关于这个群组/用户的记忆\n");
        out.push_str(&recalled);
        out
    }

    // -- long-term group KV --------------------------------------------

    pub fn remember(&self, group_id: &str, key: &str, value: &str) {
        self.remember_scoped(&Scope::Group(group_id.to_string()), key, value);
    }

    pub fn recall(&self, group_id: &str, key: Option<&str>) -> String {
        self.recall_scoped(&Scope::Group(group_id.to_string()), key)
    }

    pub fn forget(&self, group_id: &str, key: &str) -> bool {
        self.forget_scoped(&Scope::Group(group_id.to_string()), key)
    }

    // -- long-term user KV (identical semantics, cross-chat) -------------

    pub fn remember_user(&self, user_id: &str, key: &str, value: &str) {
        self.remember_scoped(&Scope::User(user_id.to_string()), key, value);
    }

    pub fn recall_user(&self, user_id: &str, key: Option<&str>) -> String {
        self.recall_scoped(&Scope::User(user_id.to_string()), key)
    }

    pub fn forget_user(&self, user_id: &str, key: &str) -> bool {
        self.forget_scoped(&Scope::User(user_id.to_string()), key)
    }

    fn cache_for(&self, scope: &Scope) -> &BoundedCache<LongTermStore> {
        match scope {
            Scope::Group(_) => &self.long_term_group,
            Scope::User(_) => &self.long_term_user,
        }
    }

    fn file_for(&self, scope: &Scope) -> PathBuf {
        let safe = safe_id(scope.id());
        match scope {
            Scope::Group(_) => self.paths.memory_group_file(&safe),
            Scope::User(_) => self.paths.memory_user_file(&safe),
        }
    }

    fn remember_scoped(&self, scope: &Scope, key: &str, value: &str) {
        let cache = self.cache_for(scope);
        let cache_key = scope.cache_key();
        let file = self.file_for(scope);
        let now = Utc::now();

        cache.with_entry(
            &cache_key,
            || LongTermStore {
                entries: load_long_term(&file),
                loaded: true,
            },
            |store| {
                if !store.loaded {
                    store.entries = load_long_term(&file);
                    store.loaded = true;
                }
                if let Some(existing) = store.entries.iter_mut().find(|e| e.key == key) {
                    existing.value = value.to_string();
                    existing.updated_at = now;
                } else {
                    store.entries.push(MemoryEntry {
                        key: key.to_string(),
                        value: value.to_string(),
                        created_at: now,
                        updated_at: now,
                    });
                }
                if let Err(e) = save_long_term(&file, scope, &store.entries) {
                    warn!(key, error = %e, "failed to persist long-term memory file");
                }
            },
        );
    }

    fn recall_scoped(&self, scope: &Scope, key: Option<&str>) -> String {
        let cache = self.cache_for(scope);
        let cache_key = scope.cache_key();
        let file = self.file_for(scope);

        cache.with_entry(
            &cache_key,
            || LongTermStore {
                entries: load_long_term(&file),
                loaded: true,
            },
            |store| {
                if !store.loaded {
                    store.entries = load_long_term(&file);
                    store.loaded = true;
                }
                match key {
                    Some(k) => store
                        .entries
                        .iter()
                        .find(|e| e.key == k)
                        .map(|e| e.value.clone())
                        .unwrap_or_default(),
                    None => format_recall_all(&store.entries),
                }
            },
        )
    }

    fn forget_scoped(&self, scope: &Scope, key: &str) -> bool {
        let cache = self.cache_for(scope);
        let cache_key = scope.cache_key();
        let file = self.file_for(scope);

        cache.with_entry(
            &cache_key,
            || LongTermStore {
                entries: load_long_term(&file),
                loaded: true,
            },
            |store| {
                if !store.loaded {
                    store.entries = load_long_term(&file);
                    store.loaded = true;
                }
                let before = store.entries.len();
                store.entries.retain(|e| e.key != key);
                let removed = store.entries.len() != before;
                if removed {
                    if let Err(e) = save_long_term(&file, scope, &store.entries) {
                        warn!(key, error = %e, "failed to persist long-term memory file");
                    }
                }
                removed
            },
        )
    }

    /// Writes `<root>/data/memory/sessions/<YYYY-MM-DD>-<safeName>.md` with
    /// the group's short-term log (§4.1 "Session export").
    pub fn export_session(&self, group_id: &str, safe_name: &str) -> Result<PathBuf> {
        let messages = self
            .short_term
            .get(group_id)
            .map(|b| b.messages)
            .unwrap_or_default();

        let date = Utc::now().format("%Y-%m-%d");
        let path = self.paths.memory_sessions_dir().join(format!("{date}-{safe_name}.md"));

        let mut out = String::new();
        for msg in &messages {
            let heading = match msg.role {
                Role::User => "## 👤 用户",
                Role::Assistant => "## 🤖 助手",
            };
            out.push_str(heading);
            out.push_str("\n\n");
            out.push_str(&render_session_content(msg));
            out.push_str("\n\n");
        }

        std::fs::create_dir_all(self.paths.memory_sessions_dir())?;
        std::fs::write(&path, out)?;
        Ok(path)
    }
}

fn load_long_term(path: &Path) -> Vec<MemoryEntry> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_file(&content),
        Err(_) => Vec::new(),
    }
}

fn save_long_term(path: &Path, scope: &Scope, entries: &[MemoryEntry]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = format_file(scope, entries);
    let tmp = path.with_extension("md.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn message_text(msg: &ChatMessage) -> String {
    match &msg.content {
        MessageContent::Text(s) => s.clone(),
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .map(|b| match b {
                ContentBlock::Text(t) => t.text.clone(),
                ContentBlock::Image(_) => "[图片]".to_string(),
                ContentBlock::ToolUse(t) => format!("[调用工具: {}]", t.name),
                ContentBlock::ToolResult(_) => "[工具结果]".to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn render_session_content(msg: &ChatMessage) -> String {
    match &msg.content {
        MessageContent::Text(s) => s.clone(),
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .map(|b| match b {
                ContentBlock::Text(t) => t.text.clone(),
                ContentBlock::Image(_) => "[包含图片/媒体内容]".to_string(),
                ContentBlock::ToolUse(t) => format!("[调用工具: {}]", t.name),
                ContentBlock::ToolResult(_) => "[工具结果]".to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn format_transcript(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            let who = match m.role {
                Role::User => "用户",
                Role::Assistant => "助手",
            };
            format!("{who}: {}", message_text(m))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use flashclaw_core::types::Role;

    fn text_msg(role: Role, text: &str) -> ChatMessage {
        ChatMessage {
            role,
            content: MessageContent::Text(text.to_string()),
        }
    }

    fn manager() -> MemoryManager {
        let dir = tempfile::tempdir().unwrap();
        MemoryManager::new(Arc::new(Paths::new(dir.keep())))
    }

    #[test]
    fn get_context_returns_suffix_under_limit() {
        let mgr = manager();
        for i in 0..5 {
            mgr.add_message("g1", text_msg(Role::User, &format!("message {i}")));
        }
        let ctx = mgr.get_context("g1", Some(30));
        assert!(!ctx.is_empty());
        assert!(ctx.len() < 5);
        assert!(matches!(&ctx.last().unwrap().content, MessageContent::Text(t) if t == "message 4"));
    }

    #[test]
    fn get_context_returns_single_message_if_it_alone_exceeds_limit() {
        let mgr = manager();
        mgr.add_message("g1", text_msg(Role::User, &"x".repeat(1000)));
        let ctx = mgr.get_context("g1", Some(5));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn remember_preserves_created_at_on_update() {
        let mgr = manager();
        mgr.remember("g1", "name", "first");
        std::thread::sleep(std::time::Duration::from_millis(5));
        mgr.remember("g1", "name", "second");
        let recalled = mgr.recall("g1", Some("name"));
        assert_eq!(recalled, "second");
    }

    #[test]
    fn recall_without_key_lists_all_in_insertion_order() {
        let mgr = manager();
        mgr.remember("g1", "b", "2");
        mgr.remember("g1", "a", "1");
        assert_eq!(mgr.recall("g1", None), "- b: 2\n- a: 1");
    }

    #[test]
    fn forget_removes_key_and_reports_whether_it_existed() {
        let mgr = manager();
        mgr.remember("g1", "k", "v");
        assert!(mgr.forget("g1", "k"));
        assert!(!mgr.forget("g1", "k"));
        assert_eq!(mgr.recall("g1", Some("k")), "");
    }

    #[test]
    fn user_scope_is_independent_of_group_scope() {
        let mgr = manager();
        mgr.remember("g1", "k", "group-value");
        mgr.remember_user("g1", "k", "user-value");
        assert_eq!(mgr.recall("g1", Some("k")), "group-value");
        assert_eq!(mgr.recall_user("g1", Some("k")), "user-value");
    }

    #[test]
    fn needs_compaction_false_when_under_threshold() {
        let mgr = manager();
        mgr.add_message("g1", text_msg(Role::User, "hi"));
        assert!(!mgr.needs_compaction("g1"));
    }

    struct StubSummarizer {
        result: Result<String>,
    }

    #[async_trait::async_trait]
    impl Summarizer for StubSummarizer {
        async fn summarize(&self, _transcript: &str) -> std::result::Result<String, String> {
            match &self.result {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(e.to_string()),
            }
        }
    }

    #[tokio::test]
    async fn compact_is_no_op_with_short_history() {
        let mgr = manager();
        mgr.add_message("g1", text_msg(Role::User, "hi"));
        let summarizer = StubSummarizer {
            result: Ok("ignored".to_string()),
        };
        let result = mgr.compact("g1", &summarizer).await.unwrap();
        assert_eq!(result.compacted_count, result.original_count);
        assert_eq!(result.saved_tokens, 0);
    }

    #[tokio::test]
    async fn compact_replaces_old_messages_with_summary_on_success() {
        let mgr = manager();
        for i in 0..50 {
            mgr.add_message("g1", text_msg(Role::User, &format!("message number {i}")));
        }
        let summarizer = StubSummarizer {
            result: Ok("用户讨论了若干话题".to_string()),
        };
        let before = mgr.short_term.get("g1").unwrap().messages.len();
        let result = mgr.compact("g1", &summarizer).await.unwrap();
        assert!(result.compacted_count < before);
        assert!(result.summary.contains("## 对话摘要"));

        let prompt = mgr.build_system_prompt("g1", Some("base"));
        assert!(prompt.contains("之前对话的摘要"));
    }

    #[tokio::test]
    async fn compact_leaves_state_unchanged_on_summarizer_failure() {
        let mgr = manager();
        for i in 0..50 {
            mgr.add_message("g1", text_msg(Role::User, &format!("message number {i}")));
        }
        let before = mgr.short_term.get("g1").unwrap().messages.len();
        let summarizer = StubSummarizer {
            result: Err(MemoryError::Summarize("boom".to_string())),
        };
        let err = mgr.compact("g1", &summarizer).await;
        assert!(err.is_err());
        let after = mgr.short_term.get("g1").unwrap().messages.len();
        assert_eq!(before, after);
    }
}
