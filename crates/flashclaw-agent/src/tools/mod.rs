//! Tool system for AI agent tool calling (§4.4, §6.2).
//!
//! Defines the `Tool` trait every built-in and plugin tool implements, the
//! per-invocation `ToolContext` that carries the chat/group/user the turn
//! belongs to, and a `ToolRegistry` that resolves built-ins first with
//! same-named plugins overriding them.

pub mod execute_command;
pub mod list_files;
pub mod read_file;
pub mod registry;
pub mod schedule_task;
pub mod search_files;
pub mod send_message;
pub mod tool_loop;
pub mod write_file;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use flashclaw_core::ipc_write::IpcKind;
use flashclaw_core::types::IpcEnvelope;
use flashclaw_core::Paths;

use crate::provider::ToolDefinition;

pub use registry::ToolRegistry;

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Text content returned to the LLM.
    pub content: String,
    /// Whether the tool execution failed.
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }
}

/// Everything a tool needs about the turn it's running inside (§6.2 `ctx`),
/// plus a way to emit IPC envelopes without ever blocking on delivery —
/// tool plugins write a job file and return immediately (§4.4, §4.7).
#[derive(Clone)]
pub struct ToolContext {
    pub chat_id: String,
    pub group_folder: String,
    pub user_id: String,
    pub is_main: bool,
    paths: Arc<Paths>,
}

impl ToolContext {
    pub fn new(chat_id: String, group_folder: String, user_id: String, is_main: bool, paths: Arc<Paths>) -> Self {
        Self {
            chat_id,
            group_folder,
            user_id,
            is_main,
            paths,
        }
    }

    /// Emits `envelope` into this turn's own IPC source group, so dispatch's
    /// authorisation check (§4.7) sees it as self-originated.
    pub fn emit_ipc(&self, kind: IpcKind, envelope: &IpcEnvelope) -> std::io::Result<()> {
        flashclaw_core::ipc_write::emit(&self.paths, &self.group_folder, kind, envelope)?;
        Ok(())
    }
}

/// Trait every tool (built-in or plugin) implements.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name for this tool (e.g. "read_file").
    fn name(&self) -> &str;
    /// Human-readable description of what this tool does.
    fn description(&self) -> &str;
    /// JSON Schema for the tool's input parameters.
    fn input_schema(&self) -> serde_json::Value;
    /// Execute the tool with the given input and turn context.
    async fn execute(&self, input: serde_json::Value, ctx: &ToolContext) -> ToolResult;
}

/// Convert a slice of tools to API-level tool definitions.
pub fn to_definitions(tools: &[Box<dyn Tool>]) -> Vec<ToolDefinition> {
    tools
        .iter()
        .map(|t| ToolDefinition {
            name: t.name().to_string(),
            description: t.description().to_string(),
            input_schema: t.input_schema(),
        })
        .collect()
}
