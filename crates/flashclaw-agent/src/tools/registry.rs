//! Tool Registry (§4.4, §6.2): built-in tools plus script-style plugins
//! dropped under `<root>/plugins/<name>/plugin.json`, with built-ins always
//! resolved first and same-named plugins overriding them.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::warn;

use super::{Tool, ToolContext, ToolResult};

/// Default per-plugin execution timeout (§6.2 doesn't name one; matches the
/// one-shot `execute_command` default below so a misbehaving plugin can't
/// wedge a turn indefinitely).
const DEFAULT_PLUGIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Holds the resolved tool list for one turn: built-ins, then any
/// `plugin.json` plugins whose `name` doesn't collide, then (again) plugins
/// that DO collide — inserted in place of the built-in they shadow.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    /// Assembles the full built-in tool set, then overlays plugins found
    /// under `plugins_dir` (skipped silently if the directory is absent).
    pub fn build(plugins_dir: &Path) -> Self {
        let mut tools: Vec<Box<dyn Tool>> = vec![
            Box::new(super::read_file::ReadFileTool),
            Box::new(super::write_file::WriteFileTool),
            Box::new(super::list_files::ListFilesTool),
            Box::new(super::search_files::SearchFilesTool),
            Box::new(super::execute_command::ExecuteCommandTool),
            Box::new(super::send_message::SendMessageTool),
            Box::new(super::schedule_task::ScheduleTaskTool),
            Box::new(super::schedule_task::RegisterGroupTool),
        ];

        for plugin in load_plugins(plugins_dir) {
            if let Some(pos) = tools.iter().position(|t| t.name() == plugin.name()) {
                tools[pos] = Box::new(plugin);
            } else {
                tools.push(Box::new(plugin));
            }
        }

        Self { tools }
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn catalog(&self) -> Vec<(String, String)> {
        self.tools
            .iter()
            .map(|t| (t.name().to_string(), t.description().to_string()))
            .collect()
    }
}

/// `plugin.json` manifest (§6.2): `{name, version, type, main, config?,
/// dependencies?}`. Only `type: "tool"` plugins are loaded here — `channel`
/// and `provider` plugins are out of scope for this registry.
#[derive(Debug, Deserialize)]
struct PluginManifest {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    main: String,
    #[serde(default)]
    input_schema: Option<serde_json::Value>,
}

fn load_plugins(plugins_dir: &Path) -> Vec<ScriptPlugin> {
    let Ok(entries) = std::fs::read_dir(plugins_dir) else {
        return Vec::new();
    };

    let mut plugins = Vec::new();
    let mut dirs: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    dirs.sort();

    for dir in dirs {
        if !dir.is_dir() {
            continue;
        }
        match ScriptPlugin::load(&dir) {
            Ok(Some(plugin)) => plugins.push(plugin),
            Ok(None) => {}
            Err(e) => warn!(dir = %dir.display(), error = %e, "skipping invalid tool plugin"),
        }
    }
    plugins
}

/// A single `type: "tool"` plugin: its manifest plus the validated absolute
/// path to its `main` entry point.
struct ScriptPlugin {
    manifest: PluginManifest,
    main_path: PathBuf,
}

impl ScriptPlugin {
    fn load(dir: &Path) -> std::io::Result<Option<Self>> {
        let manifest_path = dir.join("plugin.json");
        if !manifest_path.is_file() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&manifest_path)?;
        let manifest: PluginManifest = serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        if manifest.kind != "tool" {
            return Ok(None);
        }

        // `main` must resolve to a path inside `dir` — reject `..` and
        // absolute paths (§6.2 manifest contract).
        if manifest.main.starts_with('/') || manifest.main.split('/').any(|seg| seg == "..") {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("plugin '{}' has an unsafe main path: {}", manifest.name, manifest.main),
            ));
        }
        let main_path = dir.join(&manifest.main);
        if !main_path.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("plugin '{}' main entry not found: {}", manifest.name, main_path.display()),
            ));
        }

        Ok(Some(Self { manifest, main_path }))
    }
}

#[async_trait]
impl Tool for ScriptPlugin {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn description(&self) -> &str {
        self.manifest.description.as_deref().unwrap_or("")
    }

    fn input_schema(&self) -> serde_json::Value {
        self.manifest
            .input_schema
            .clone()
            .unwrap_or_else(|| serde_json::json!({ "type": "object", "properties": {} }))
    }

    /// Invokes `main` as a subprocess. Feeds `{"input": ..., "ctx": {...}}`
    /// as one JSON line on stdin (§6.2 `execute(input, ctx)`); expects
    /// `{"success": bool, "data"?: string, "error"?: string}` on stdout.
    /// Never blocks past [`DEFAULT_PLUGIN_TIMEOUT`].
    async fn execute(&self, input: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        let payload = serde_json::json!({
            "input": input,
            "ctx": {
                "chatId": ctx.chat_id,
                "groupFolder": ctx.group_folder,
                "userId": ctx.user_id,
                "isMain": ctx.is_main,
            },
        });

        let run = async {
            let mut child = Command::new(&self.main_path)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()?;

            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(payload.to_string().as_bytes()).await?;
                stdin.write_all(b"\n").await?;
            }

            child.wait_with_output().await
        };

        match tokio::time::timeout(DEFAULT_PLUGIN_TIMEOUT, run).await {
            Ok(Ok(output)) => parse_plugin_output(&output.stdout, &output.stderr, output.status.success()),
            Ok(Err(e)) => ToolResult::error(format!("plugin '{}' failed to run: {e}", self.manifest.name)),
            Err(_) => ToolResult::error(format!(
                "plugin '{}' timed out after {}s",
                self.manifest.name,
                DEFAULT_PLUGIN_TIMEOUT.as_secs()
            )),
        }
    }
}

fn parse_plugin_output(stdout: &[u8], stderr: &[u8], exited_ok: bool) -> ToolResult {
    let stdout_text = String::from_utf8_lossy(stdout);
    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(stdout_text.trim()) {
        let success = parsed.get("success").and_then(|v| v.as_bool()).unwrap_or(exited_ok);
        if success {
            let data = parsed
                .get("data")
                .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                .unwrap_or_default();
            return ToolResult::success(data);
        }
        let error = parsed
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("plugin reported failure")
            .to_string();
        return ToolResult::error(error);
    }

    if exited_ok {
        ToolResult::success(stdout_text.trim().to_string())
    } else {
        let stderr_text = String::from_utf8_lossy(stderr);
        ToolResult::error(format!("plugin exited with an error: {stderr_text}"))
    }
}
