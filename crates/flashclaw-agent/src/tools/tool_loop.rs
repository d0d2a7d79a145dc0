//! Tool execution loop — the core agentic behavior (§4.2).
//!
//! Flow: stream from the LLM → if it emitted `tool_use` blocks, execute each
//! tool in emission order → append the paired `tool_result` blocks → stream
//! again → repeat. Stops when a turn has no tool calls, the depth guard
//! trips, or the provider errors.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::provider::{ChatRequest, LlmProvider, ProviderError, ToolCall};
use crate::stream::StreamEvent;

use super::{Tool, ToolContext, ToolResult};

/// Tool results longer than this are truncated before being fed back to the
/// model (§4.2).
pub const MAX_TOOL_RESULT_CHARS: usize = 4_000;
/// Depth guard: once this many tool-use rounds have run without a final
/// answer, the loop force-stops (§4.2, §8 test 3).
pub const MAX_TOOL_CALL_DEPTH: usize = 20;
/// Tool rounds older than the most recent N are collapsed into a one-line
/// summary before the next request (§4.2).
pub const KEEP_RECENT_TOOL_ROUNDS: usize = 2;

const DEPTH_GUARD_FALLBACK: &str = "[工具调用链过深（超过 20 轮），已强制终止]";

/// Outcome of a fully-resolved tool loop: text-only, no pending tool calls.
#[derive(Debug, Clone, Default)]
pub struct ToolLoopResult {
    pub content: String,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub stop_reason: String,
    /// Names of every tool invoked during the loop, in call order — used for
    /// usage-frequency logging by the caller.
    pub called_tools: Vec<String>,
}

/// One assembled assistant/tool_result pair produced by a tool-use round.
struct ToolRound {
    assistant: serde_json::Value,
    user: serde_json::Value,
    /// Leading assistant text for this round, if any — preserved verbatim
    /// when the round is later compressed.
    text: String,
    calls: Vec<CompressedCall>,
}

/// Per-tool-use summary kept around so a compressed round can still say what
/// ran and whether it worked, without the full (and possibly large) payload.
struct CompressedCall {
    name: String,
    input_preview: String,
    success: bool,
    result_preview: String,
}

/// Accumulator for a single streamed turn (one call to the provider).
#[derive(Default)]
struct Turn {
    text: String,
    tool_calls: Vec<ToolCall>,
    model: String,
    tokens_in: u32,
    tokens_out: u32,
    stop_reason: String,
}

/// Streams one provider turn, invoking `heartbeat` on every event (§5
/// "Agent activity timer: resets on any stream event"). Thinking deltas are
/// consumed but not surfaced — only `TextDelta`/`ToolUse`/`Done` matter here.
async fn stream_turn(
    provider: &dyn LlmProvider,
    req: &ChatRequest,
    heartbeat: &mut (dyn FnMut() + Send),
) -> Result<Turn, ProviderError> {
    let (tx, mut rx) = mpsc::channel(64);
    let mut stream_req = req.clone();
    stream_req.stream = true;

    let send_fut = provider.send_stream(&stream_req, tx);
    tokio::pin!(send_fut);

    let mut turn = Turn::default();
    let mut send_result: Option<Result<(), ProviderError>> = None;

    loop {
        if send_result.is_some() {
            match rx.recv().await {
                Some(event) => {
                    heartbeat();
                    apply_event(&mut turn, event)?;
                }
                None => break,
            }
        } else {
            tokio::select! {
                r = &mut send_fut => {
                    send_result = Some(r);
                }
                event = rx.recv() => {
                    match event {
                        Some(event) => {
                            heartbeat();
                            apply_event(&mut turn, event)?;
                        }
                        None => {
                            send_result = Some(Ok(()));
                        }
                    }
                }
            }
        }
    }

    send_result.unwrap_or(Ok(()))?;
    Ok(turn)
}

fn apply_event(turn: &mut Turn, event: StreamEvent) -> Result<(), ProviderError> {
    match event {
        StreamEvent::TextDelta { text } => turn.text.push_str(&text),
        StreamEvent::Thinking { .. } => {}
        StreamEvent::ToolUse { id, name, input } => {
            turn.tool_calls.push(ToolCall { id, name, input })
        }
        StreamEvent::Done {
            model,
            tokens_in,
            tokens_out,
            stop_reason,
        } => {
            turn.model = model;
            turn.tokens_in = tokens_in;
            turn.tokens_out = tokens_out;
            turn.stop_reason = stop_reason;
        }
        StreamEvent::Error { message } => return Err(ProviderError::Unavailable(message)),
    }
    Ok(())
}

/// Run the full tool-use loop against a streaming provider.
///
/// `initial_request` must have `messages` or `raw_messages` set to the
/// starting conversation; `heartbeat` is invoked on every stream event and
/// every tool start/end (§5).
pub async fn run_tool_loop(
    provider: &dyn LlmProvider,
    initial_request: ChatRequest,
    tools: &[Box<dyn Tool>],
    ctx: &ToolContext,
    mut heartbeat: impl FnMut() + Send,
) -> Result<ToolLoopResult, ProviderError> {
    let initial_messages: Vec<serde_json::Value> = match &initial_request.raw_messages {
        Some(raw) => raw.clone(),
        None => initial_request
            .messages
            .iter()
            .map(|m| serde_json::json!({ "role": m.role, "content": m.content }))
            .collect(),
    };

    let mut rounds: Vec<ToolRound> = Vec::new();
    let mut called_tools: Vec<String> = Vec::new();

    for round_index in 0..=MAX_TOOL_CALL_DEPTH {
        if round_index == MAX_TOOL_CALL_DEPTH {
            warn!(depth = MAX_TOOL_CALL_DEPTH, "tool call depth guard tripped");
            return Ok(ToolLoopResult {
                content: DEPTH_GUARD_FALLBACK.to_string(),
                model: rounds
                    .last()
                    .map(|_| String::new())
                    .unwrap_or_default(),
                tokens_in: 0,
                tokens_out: 0,
                stop_reason: "max_depth".to_string(),
                called_tools,
            });
        }

        let mut req = initial_request.clone();
        req.raw_messages = Some(build_raw_messages(&initial_messages, &rounds));

        debug!(round = round_index, "tool loop round");
        let turn = stream_turn(provider, &req, &mut heartbeat).await?;

        if turn.tool_calls.is_empty() {
            info!(round = round_index, "tool loop complete — no more tool calls");
            return Ok(ToolLoopResult {
                content: turn.text,
                model: turn.model,
                tokens_in: turn.tokens_in,
                tokens_out: turn.tokens_out,
                stop_reason: turn.stop_reason,
                called_tools,
            });
        }

        let mut assistant_content: Vec<serde_json::Value> = Vec::new();
        if !turn.text.is_empty() {
            assistant_content.push(serde_json::json!({ "type": "text", "text": turn.text }));
        }
        for call in &turn.tool_calls {
            assistant_content.push(serde_json::json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.name,
                "input": call.input,
            }));
        }

        let mut tool_result_content: Vec<serde_json::Value> = Vec::new();
        let mut calls = Vec::with_capacity(turn.tool_calls.len());
        for call in &turn.tool_calls {
            heartbeat();
            let result = execute_tool(tools, call, ctx).await;
            heartbeat();
            let truncated = truncate_tool_result(&result.content, MAX_TOOL_RESULT_CHARS);
            tool_result_content.push(serde_json::json!({
                "type": "tool_result",
                "tool_use_id": call.id,
                "content": truncated,
                "is_error": result.is_error,
            }));
            calls.push(CompressedCall {
                name: call.name.clone(),
                input_preview: preview(&call.input.to_string(), 80),
                success: !result.is_error,
                result_preview: preview(&result.content, 100),
            });
            called_tools.push(call.name.clone());
        }

        rounds.push(ToolRound {
            assistant: serde_json::json!({ "role": "assistant", "content": assistant_content }),
            user: serde_json::json!({ "role": "user", "content": tool_result_content }),
            text: turn.text.clone(),
            calls,
        });
    }

    unreachable!("loop always returns within MAX_TOOL_CALL_DEPTH + 1 rounds")
}

/// Rebuilds the full raw-message list for the next request: the original
/// conversation, then one entry per tool round — rounds beyond the most
/// recent [`KEEP_RECENT_TOOL_ROUNDS`] are collapsed via [`compress_round`]
/// (P1: compression drops both sides of a dropped round together, never
/// leaves an orphaned `tool_use`/`tool_result`).
fn build_raw_messages(
    initial: &[serde_json::Value],
    rounds: &[ToolRound],
) -> Vec<serde_json::Value> {
    let mut out = initial.to_vec();
    let total = rounds.len();
    for (i, round) in rounds.iter().enumerate() {
        if total > KEEP_RECENT_TOOL_ROUNDS && i < total - KEEP_RECENT_TOOL_ROUNDS {
            let (assistant, user) = compress_round(round);
            out.push(assistant);
            out.push(user);
        } else {
            out.push(round.assistant.clone());
            out.push(round.user.clone());
        }
    }
    out
}

/// Collapses one tool round into a compressed assistant/tool_result pair
/// (spec: both halves rewritten together, never just one).
fn compress_round(round: &ToolRound) -> (serde_json::Value, serde_json::Value) {
    let mut assistant_text = round.text.clone();
    for call in &round.calls {
        if !assistant_text.is_empty() {
            assistant_text.push('\n');
        }
        assistant_text.push_str(&format!("[已执行工具 {}({})]", call.name, call.input_preview));
    }

    let user_text = round
        .calls
        .iter()
        .map(|call| {
            if call.success {
                format!("[成功: {}]", call.result_preview)
            } else {
                format!("[失败: {}]", call.result_preview)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    (
        serde_json::json!({ "role": "assistant", "content": assistant_text }),
        serde_json::json!({ "role": "user", "content": user_text }),
    )
}

/// Truncates a tool result to `max_chars`, appending a marker with the
/// original character count when cut (§4.2 `truncate`).
fn truncate_tool_result(content: &str, max_chars: usize) -> String {
    let total = content.chars().count();
    if total <= max_chars {
        return content.to_string();
    }
    let head: String = content.chars().take(max_chars).collect();
    format!("{head}\n...(内容已截断，原始 {total} 字符)")
}

/// Truncates `s` to at most `max_chars`, marking the cut with an ellipsis —
/// used for the short previews embedded in compressed tool-round summaries.
fn preview(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let head: String = s.chars().take(max_chars).collect();
    format!("{head}...")
}

/// Find and execute the named tool. Returns an error [`ToolResult`] if not found.
async fn execute_tool(tools: &[Box<dyn Tool>], call: &ToolCall, ctx: &ToolContext) -> ToolResult {
    match tools.iter().find(|t| t.name() == call.name) {
        Some(tool) => {
            debug!(tool = %call.name, "executing tool");
            tool.execute(call.input.clone(), ctx).await
        }
        None => ToolResult::error(format!("工具执行失败: unknown tool {}", call.name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round(tool_names: Vec<&str>) -> ToolRound {
        ToolRound {
            assistant: serde_json::json!({"role": "assistant", "content": []}),
            user: serde_json::json!({"role": "user", "content": []}),
            text: String::new(),
            calls: tool_names
                .into_iter()
                .map(|n| CompressedCall {
                    name: n.to_string(),
                    input_preview: String::new(),
                    success: true,
                    result_preview: "ok".to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn keeps_recent_rounds_uncompressed() {
        let rounds = vec![round(vec!["a"]), round(vec!["b"]), round(vec!["c"])];
        let messages = build_raw_messages(&[], &rounds);
        // round 0 compressed into an assistant+user pair, rounds 1-2 kept (2 messages each).
        assert_eq!(messages.len(), 2 + 2 + 2);
    }

    #[test]
    fn compressed_round_preserves_both_halves() {
        let r = round(vec!["read_file"]);
        let (assistant, user) = compress_round(&r);
        assert!(assistant["content"].as_str().unwrap().contains("已执行工具 read_file"));
        assert!(user["content"].as_str().unwrap().contains("成功: ok"));
    }

    #[test]
    fn under_threshold_keeps_everything() {
        let rounds = vec![round(vec!["a"]), round(vec!["b"])];
        let messages = build_raw_messages(&[], &rounds);
        assert_eq!(messages.len(), 4);
    }

    #[test]
    fn truncate_tool_result_adds_marker_when_cut() {
        let long = "x".repeat(MAX_TOOL_RESULT_CHARS + 10);
        let out = truncate_tool_result(&long, MAX_TOOL_RESULT_CHARS);
        assert!(out.contains("截断"));
        assert!(out.len() > MAX_TOOL_RESULT_CHARS);
    }

    #[test]
    fn truncate_tool_result_passes_short_content_through() {
        assert_eq!(truncate_tool_result("short", MAX_TOOL_RESULT_CHARS), "short");
    }
}
