//! The local terminal channel (§1 PURPOSE) — implements [`Channel`] over the
//! process's own stdin/stdout. Distinct from [`crate::manager::TerminalManager`],
//! which runs PTY sessions as an agent *tool*; this is how a human at the
//! controlling terminal chats with the agent directly, with no network
//! transport involved.

use std::sync::{Arc, RwLock as SyncRwLock};

use async_trait::async_trait;
use chrono::Utc;
use flashclaw_channels::{Channel, ChannelError, ChannelStatus, InboundHandler, Result, SendOptions, SendResult};
use flashclaw_core::types::{ChatType, Message};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

/// Fixed chat identity for the single local terminal session.
pub const LOCAL_CHAT_ID: &str = "local";
const LOCAL_SENDER_ID: &str = "local-user";

pub struct TerminalChannel {
    handler: Option<Arc<dyn InboundHandler>>,
    status: Arc<SyncRwLock<ChannelStatus>>,
    read_task: Option<tokio::task::JoinHandle<()>>,
}

impl TerminalChannel {
    pub fn new() -> Self {
        Self {
            handler: None,
            status: Arc::new(SyncRwLock::new(ChannelStatus::Disconnected)),
            read_task: None,
        }
    }
}

impl Default for TerminalChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for TerminalChannel {
    fn name(&self) -> &str {
        "terminal"
    }

    async fn init(&mut self, _config: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    fn on_message(&mut self, handler: Arc<dyn InboundHandler>) {
        self.handler = Some(handler);
    }

    async fn start(&mut self) -> Result<()> {
        let handler = self
            .handler
            .clone()
            .ok_or_else(|| ChannelError::ConfigError("on_message must be called before start".to_string()))?;
        let status = self.status.clone();

        let task = tokio::spawn(async move {
            *status.write().unwrap() = ChannelStatus::Connected;
            info!("terminal: reading from stdin, type a message and press enter");

            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let msg = Message {
                            id: uuid::Uuid::new_v4().to_string(),
                            chat_id: LOCAL_CHAT_ID.to_string(),
                            sender_id: LOCAL_SENDER_ID.to_string(),
                            sender_name: LOCAL_SENDER_ID.to_string(),
                            content: line,
                            timestamp: Utc::now(),
                            chat_type: ChatType::P2p,
                            platform: "terminal".to_string(),
                            attachments: None,
                            mentions: None,
                            reply_to_message_id: None,
                        };
                        handler.handle(msg).await;
                    }
                    Ok(None) => break,
                    Err(_) => break,
                }
            }
            *status.write().unwrap() = ChannelStatus::Disconnected;
        });

        self.read_task = Some(task);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
        *self.status.write().unwrap() = ChannelStatus::Disconnected;
        Ok(())
    }

    async fn send_message(&self, chat_id: &str, text: &str, _opts: Option<&SendOptions>) -> SendResult {
        println!("{text}");
        SendResult::ok(chat_id, &uuid::Uuid::new_v4().to_string())
    }

    fn status(&self) -> ChannelStatus {
        self.status.read().unwrap().clone()
    }
}
