//! `schedule_task` and `register_group` tools (§4.4, §4.6, §4.7): arm an
//! unattended agent invocation, or — main-group only — teach the core about
//! a new chat. Both emit IPC envelopes rather than touching the scheduler or
//! store directly, so this crate stays decoupled from them.

use async_trait::async_trait;
use flashclaw_core::ipc_write::IpcKind;
use flashclaw_core::types::{ContextMode, IpcEnvelope, ScheduleType};

use super::{Tool, ToolContext, ToolResult};

pub struct ScheduleTaskTool;

#[async_trait]
impl Tool for ScheduleTaskTool {
    fn name(&self) -> &str {
        "schedule_task"
    }

    fn description(&self) -> &str {
        "Arm an unattended agent invocation for later: a cron expression, a millisecond \
         interval, or a one-off ISO-8601 instant. The prompt runs through the full agent \
         turn when it fires — use send_message inside that prompt if you need to deliver \
         a result, since nobody is waiting synchronously."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "prompt": { "type": "string", "description": "The instruction to run when the task fires." },
                "schedule_type": { "type": "string", "enum": ["cron", "interval", "once"] },
                "schedule_value": {
                    "type": "string",
                    "description": "Cron expression, interval in milliseconds, or an ISO-8601 instant, matching schedule_type."
                },
                "isolated": {
                    "type": "boolean",
                    "description": "Run with a fresh throwaway context instead of this chat's ongoing conversation (default false)."
                }
            },
            "required": ["prompt", "schedule_type", "schedule_value"]
        })
    }

    async fn execute(&self, input: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        let prompt = match input.get("prompt").and_then(|v| v.as_str()) {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => return ToolResult::error("missing or empty 'prompt' parameter"),
        };
        let schedule_type = match input.get("schedule_type").and_then(|v| v.as_str()) {
            Some("cron") => ScheduleType::Cron,
            Some("interval") => ScheduleType::Interval,
            Some("once") => ScheduleType::Once,
            _ => return ToolResult::error("'schedule_type' must be one of: cron, interval, once"),
        };
        let schedule_value = match input.get("schedule_value").and_then(|v| v.as_str()) {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => return ToolResult::error("missing or empty 'schedule_value' parameter"),
        };
        let isolated = input.get("isolated").and_then(|v| v.as_bool()).unwrap_or(false);

        let envelope = IpcEnvelope::ScheduleTask {
            prompt,
            schedule_type,
            schedule_value,
            group_folder: ctx.group_folder.clone(),
            context_mode: Some(if isolated { ContextMode::Isolated } else { ContextMode::Group }),
            max_retries: None,
            timeout_ms: None,
        };

        match ctx.emit_ipc(IpcKind::Task, &envelope) {
            Ok(()) => ToolResult::success("Task scheduled."),
            Err(e) => ToolResult::error(format!("failed to schedule task: {e}")),
        }
    }
}

pub struct RegisterGroupTool;

#[async_trait]
impl Tool for RegisterGroupTool {
    fn name(&self) -> &str {
        "register_group"
    }

    fn description(&self) -> &str {
        "Main-group-only: register a new chat the core hasn't seen traffic from yet, so it \
         gets its own folder, memory, and trigger policy. Fails outside the main group."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "jid": { "type": "string", "description": "Platform-native chat id." },
                "name": { "type": "string", "description": "Human-readable label for the chat." },
                "folder": { "type": "string", "description": "Filesystem-safe folder name, [A-Za-z0-9_-]+." },
                "trigger": { "type": "string", "enum": ["always", "mention"], "description": "When the agent should respond in this chat." }
            },
            "required": ["jid", "name", "folder", "trigger"]
        })
    }

    async fn execute(&self, input: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        if !ctx.is_main {
            return ToolResult::error("register_group can only be used from the main group");
        }
        let jid = match input.get("jid").and_then(|v| v.as_str()) {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => return ToolResult::error("missing or empty 'jid' parameter"),
        };
        let name = match input.get("name").and_then(|v| v.as_str()) {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => return ToolResult::error("missing or empty 'name' parameter"),
        };
        let folder = match input.get("folder").and_then(|v| v.as_str()) {
            Some(v) if !v.is_empty() && v.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') => {
                v.to_string()
            }
            _ => return ToolResult::error("'folder' must match [A-Za-z0-9_-]+"),
        };
        let trigger = match input.get("trigger").and_then(|v| v.as_str()) {
            Some(v @ ("always" | "mention")) => v.to_string(),
            _ => return ToolResult::error("'trigger' must be 'always' or 'mention'"),
        };

        let envelope = IpcEnvelope::RegisterGroup {
            jid,
            name,
            folder,
            trigger,
            agent_config: None,
        };

        match ctx.emit_ipc(IpcKind::Task, &envelope) {
            Ok(()) => ToolResult::success("Group registration queued."),
            Err(e) => ToolResult::error(format!("failed to register group: {e}")),
        }
    }
}
