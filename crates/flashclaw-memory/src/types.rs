use serde::{Deserialize, Serialize};

/// `getContext` default ceiling when the caller doesn't pass `maxTokens` (§4.1).
pub const DEFAULT_CONTEXT_TOKEN_LIMIT: usize = 100_000;
/// `addMessage` / `needsCompaction` ceiling (§4.1).
pub const DEFAULT_COMPACT_THRESHOLD: usize = 150_000;
/// `addMessage` only shifts once total tokens exceed this multiple of
/// `compactThreshold`, per §4.1 "if total estimated tokens > 2 × compactThreshold".
pub const ADD_MESSAGE_SHIFT_MULTIPLIER: usize = 2;
/// `addMessage` never shifts a history shorter than this (§4.1 "AND length > 10").
pub const ADD_MESSAGE_MIN_LEN_TO_SHIFT: usize = 10;
/// How many tokens of recent history `compact()` keeps untouched (§4.1).
pub const DEFAULT_COMPACT_KEEP_TOKENS: usize = 30_000;
/// Cap on short-term/long-term-group/long-term-user cache keys; excess is
/// evicted FIFO (§4.1 "LRU eviction").
pub const CACHE_KEY_CAP: usize = 200;

/// The scope a short-term buffer / long-term KV file belongs to (§3, §4.1).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// `<root>/data/memory/<safeId>.md`.
    Group(String),
    /// `<root>/data/memory/users/<safeId>.md`, shared across chats.
    User(String),
}

impl Scope {
    pub fn id(&self) -> &str {
        match self {
            Scope::Group(id) | Scope::User(id) => id,
        }
    }

    /// The cache key used by the short-term/long-term LRU maps — group and
    /// user scopes never collide even if the raw ids happen to match.
    pub fn cache_key(&self) -> String {
        match self {
            Scope::Group(id) => format!("group:{id}"),
            Scope::User(id) => format!("user:{id}"),
        }
    }

    /// The Chinese label used in the Markdown file header and the
    /// `buildSystemPrompt` memory heading (§4.1).
    pub fn label(&self) -> &'static str {
        match self {
            Scope::Group(_) => "群组",
            Scope::User(_) => "用户",
        }
    }
}

/// Result of one `compact()` call (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactResult {
    pub original_count: usize,
    pub compacted_count: usize,
    pub summary: String,
    pub saved_tokens: usize,
}

impl CompactResult {
    /// Returned when the per-group compaction lock is already held, or when
    /// there is nothing old enough to compress (§4.1 steps 1, 3).
    pub fn no_op(current_count: usize, cached_summary: Option<String>) -> Self {
        Self {
            original_count: current_count,
            compacted_count: current_count,
            summary: cached_summary.unwrap_or_default(),
            saved_tokens: 0,
        }
    }
}
