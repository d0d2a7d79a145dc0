//! `send_message` tool (§4.4, §4.9): the only way the model can deliver text
//! outside the reply it's already composing — most importantly from a
//! scheduled-task invocation, where there's no one waiting synchronously on
//! a return value. Emits a `message` IPC envelope instead of calling a
//! channel directly, so this crate never depends on `flashclaw-channels`.

use async_trait::async_trait;
use flashclaw_core::ipc_write::IpcKind;
use flashclaw_core::types::IpcEnvelope;

use super::{Tool, ToolContext, ToolResult};

pub struct SendMessageTool;

#[async_trait]
impl Tool for SendMessageTool {
    fn name(&self) -> &str {
        "send_message"
    }

    fn description(&self) -> &str {
        "Send a message to a chat on its originating platform. Required when this turn \
         was triggered by a scheduled task and you want to deliver a result — there is no \
         synchronous caller waiting for your reply in that case. Defaults to the current chat."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "chat_id": {
                    "type": "string",
                    "description": "Target chat id. Defaults to the chat this turn is running in."
                },
                "message": {
                    "type": "string",
                    "description": "The text to send."
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, input: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        let message = match input.get("message").and_then(|v| v.as_str()) {
            Some(m) if !m.is_empty() => m.to_string(),
            _ => return ToolResult::error("missing or empty 'message' parameter"),
        };
        let chat_id = input
            .get("chat_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| ctx.chat_id.clone());

        // Non-main callers may only target their own chat (§4.7 authorisation).
        let group_folder = if chat_id == ctx.chat_id || ctx.is_main {
            None
        } else {
            Some(ctx.group_folder.clone())
        };

        let envelope = IpcEnvelope::Message {
            chat_jid: chat_id.clone(),
            text: message,
            group_folder,
            platform: None,
        };

        match ctx.emit_ipc(IpcKind::Message, &envelope) {
            Ok(()) => ToolResult::success(format!("Message queued for delivery to {chat_id}")),
            Err(e) => ToolResult::error(format!("failed to queue message: {e}")),
        }
    }
}
