use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Chat-platform tag. New platforms can be added without touching the core's
/// routing logic — everything keys off this string plus a `Channel` impl.
pub type Platform = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    P2p,
    Group,
}

/// A chat/group the core has seen at least one inbound message from.
///
/// Created on first inbound message (cloning the main template), persisted to
/// `registered_groups.json`; never destroyed by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub chat_id: String,
    pub platform: Platform,
    pub chat_type: ChatType,
    /// Filesystem-safe folder name under `groups/`, `[A-Za-z0-9_-]+`, <=100 chars.
    pub folder: String,
    /// Per-chat override of the agent invocation timeout (§6.6 `AGENT_TIMEOUT`).
    pub agent_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentType {
    Image,
    Video,
    Audio,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: AttachmentType,
    pub content: Option<String>,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
}

/// Inbound/outbound message in the platform-agnostic shape channels normalise to.
///
/// Invariant: `id` is unique within `chat_id` — duplicates are silently dropped
/// by dispatch (§4.8), not by this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub chat_type: ChatType,
    pub platform: Platform,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mentions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageBlock {
    /// Base64-encoded image bytes.
    pub data: String,
    pub media_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

/// One block of a `ChatMessage`'s structured content.
///
/// Every `ToolUse.id` MUST have exactly one paired `ToolResult` with a
/// matching `tool_use_id` in the very next user-role message. History
/// compression (§4.2) must preserve this pairing or erase both sides at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "block_type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text(TextBlock),
    Image(ImageBlock),
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
}

/// The content an LLM-facing `ChatMessage` carries — either a plain string
/// (the common case) or a list of structured blocks (vision input, tool
/// use/result pairs).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// LLM-facing view of a turn, as fed to and returned from the provider port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

/// A long-term key/value fact, scoped to a group folder or a user id.
///
/// Persisted as Markdown (`### key` heading + an HTML comment carrying
/// `created`/`updated` ISO timestamps) — the file is the canonical store,
/// not a cache over some other source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-chat token accounting, debounced to a JSON cache (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub chat_id: String,
    pub message_count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub compact_suggested: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Cron,
    Interval,
    Once,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    /// Runs in the group's ongoing conversation context.
    Group,
    /// Runs with a fresh, throwaway context.
    Isolated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Paused,
    Completed,
}

/// An unattended agent invocation armed to run at a future time.
///
/// Invariants: `next_run` is `Some` iff `status == Active`; `retry_count <=
/// max_retries`; a `once` task whose retry budget is exhausted transitions to
/// `Completed` rather than being retried forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub group_folder: String,
    pub chat_id: String,
    pub prompt: String,
    pub schedule_type: ScheduleType,
    /// Cron expression, interval in milliseconds (as a string), or an
    /// ISO-8601 instant, depending on `schedule_type`.
    pub schedule_value: String,
    pub context_mode: ContextMode,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    /// Truncated to 200 chars (§4.6).
    pub last_result: Option<String>,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout_ms: u64,
}

impl ScheduledTask {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;
}

/// One entry of an inbound IPC envelope file, discriminated by `type`.
/// Field names match the wire schema in §4.7 literally, since these files
/// are produced by out-of-process tool plugins, not by this crate.
///
/// Authorisation (§3, §4.7): `source_group == MAIN_GROUP_FOLDER` grants full
/// privileges; otherwise the envelope's target folder must equal
/// `source_group`, or the file is dropped and logged. `PauseTask`/
/// `ResumeTask`/`CancelTask` carry no folder of their own — their target
/// folder is the `group_folder` of the task they name, resolved by looking
/// the task up before authorising.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcEnvelope {
    Message {
        #[serde(rename = "chatJid")]
        chat_jid: String,
        text: String,
        #[serde(rename = "groupFolder", default)]
        group_folder: Option<String>,
        #[serde(default)]
        platform: Option<Platform>,
    },
    Image {
        #[serde(rename = "chatJid")]
        chat_jid: String,
        /// Base64-encoded image bytes.
        #[serde(rename = "imageData")]
        image_data: String,
        #[serde(default)]
        caption: Option<String>,
        #[serde(rename = "groupFolder", default)]
        group_folder: Option<String>,
        #[serde(default)]
        platform: Option<Platform>,
    },
    ScheduleTask {
        prompt: String,
        schedule_type: ScheduleType,
        schedule_value: String,
        #[serde(rename = "groupFolder")]
        group_folder: String,
        #[serde(default)]
        context_mode: Option<ContextMode>,
        #[serde(default)]
        max_retries: Option<u32>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    PauseTask {
        #[serde(rename = "taskId")]
        task_id: String,
    },
    ResumeTask {
        #[serde(rename = "taskId")]
        task_id: String,
    },
    CancelTask {
        #[serde(rename = "taskId")]
        task_id: String,
    },
    RegisterGroup {
        jid: String,
        name: String,
        /// `^[A-Za-z0-9_-]+$`.
        folder: String,
        trigger: String,
        #[serde(rename = "agentConfig", default)]
        agent_config: Option<serde_json::Value>,
    },
}

/// Where an envelope's authorisation check (§4.7) should be anchored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpcTargetFolder {
    /// The envelope names its own target folder.
    Explicit(String),
    /// The envelope carries no folder of its own (task-id ops); the caller
    /// must resolve the named task's `group_folder` before authorising.
    ResolveFromTask { task_id: String },
    /// `message`/`image` envelopes with no `groupFolder` — scoped to
    /// whatever `sourceGroup` already is (so the check is trivially
    /// satisfied for non-main senders, and explicit for main).
    SameAsSource,
}

impl IpcEnvelope {
    pub fn target_folder(&self) -> IpcTargetFolder {
        match self {
            IpcEnvelope::Message { group_folder, .. } | IpcEnvelope::Image { group_folder, .. } => {
                match group_folder {
                    Some(f) => IpcTargetFolder::Explicit(f.clone()),
                    None => IpcTargetFolder::SameAsSource,
                }
            }
            IpcEnvelope::ScheduleTask { group_folder, .. } => {
                IpcTargetFolder::Explicit(group_folder.clone())
            }
            IpcEnvelope::PauseTask { task_id }
            | IpcEnvelope::ResumeTask { task_id }
            | IpcEnvelope::CancelTask { task_id } => IpcTargetFolder::ResolveFromTask {
                task_id: task_id.clone(),
            },
            IpcEnvelope::RegisterGroup { folder, .. } => IpcTargetFolder::Explicit(folder.clone()),
        }
    }

    /// `register_group` is the only envelope type restricted to the main
    /// group regardless of its own target folder (§4.7).
    pub fn requires_main(&self) -> bool {
        matches!(self, IpcEnvelope::RegisterGroup { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_type_round_trips_through_json() {
        let json = serde_json::to_string(&ChatType::Group).unwrap();
        assert_eq!(json, "\"group\"");
        let back: ChatType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ChatType::Group);
    }

    #[test]
    fn ipc_envelope_discriminates_on_type_field() {
        let json = r#"{"type":"pause_task","taskId":"t1"}"#;
        let env: IpcEnvelope = serde_json::from_str(json).unwrap();
        match env {
            IpcEnvelope::PauseTask { task_id } => assert_eq!(task_id, "t1"),
            other => panic!("expected PauseTask, got {other:?}"),
        }
        assert_eq!(
            env.target_folder(),
            IpcTargetFolder::ResolveFromTask { task_id: "t1".to_string() }
        );
    }

    #[test]
    fn ipc_envelope_target_folder_for_register_group_is_folder() {
        let env = IpcEnvelope::RegisterGroup {
            jid: "123".to_string(),
            name: "Private chat".to_string(),
            folder: "private-abcd1234".to_string(),
            trigger: "always".to_string(),
            agent_config: None,
        };
        assert_eq!(
            env.target_folder(),
            IpcTargetFolder::Explicit("private-abcd1234".to_string())
        );
        assert!(env.requires_main());
    }

    #[test]
    fn ipc_message_without_group_folder_targets_source() {
        let json = r#"{"type":"message","chatJid":"123","text":"hi"}"#;
        let env: IpcEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(env.target_folder(), IpcTargetFolder::SameAsSource);
        assert!(!env.requires_main());
    }

    #[test]
    fn scheduled_task_defaults_match_spec() {
        assert_eq!(ScheduledTask::DEFAULT_MAX_RETRIES, 3);
        assert_eq!(ScheduledTask::DEFAULT_TIMEOUT_MS, 300_000);
    }
}
