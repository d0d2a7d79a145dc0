use async_trait::async_trait;

/// The Memory Manager's narrow view of the LLM provider port, used only for
/// compaction summaries (§4.1 step 4). Kept separate from the full
/// tool-use-capable provider trait in `flashclaw-agent` so this crate never
/// depends on it — `flashclaw-agent` depends on `flashclaw-memory`, not the
/// other way around.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Produces a Chinese summary of `transcript` (already formatted as
    /// `用户/助手: <text>` paragraphs) at temperature 0.3. Returns the raw
    /// model text; the caller wraps it in `## 对话摘要` if the model didn't.
    async fn summarize(&self, transcript: &str) -> Result<String, String>;
}
