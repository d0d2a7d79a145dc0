//! Telegram channel adapter — implements [`Channel`] (§6.1).
//!
//! Wraps a teloxide `Bot` + `Dispatcher` and drives the long-polling event
//! loop in a background task. `start()` returns once the dispatcher is
//! spawned; [`ChannelManager`](flashclaw_channels::ChannelManager) owns the
//! reconnect/backoff loop around `start()` itself, so this adapter only
//! needs to report failure, not retry internally.

use std::sync::Arc;
use std::sync::RwLock as SyncRwLock;

use async_trait::async_trait;
use dashmap::DashMap;
use flashclaw_channels::{Channel, ChannelError, ChannelStatus, InboundHandler, Result, SendOptions, SendResult};
use flashclaw_core::config::TelegramConfig;
use teloxide::prelude::*;
use tracing::info;

/// Telegram channel adapter.
pub struct TelegramAdapter {
    config: TelegramConfig,
    handler: Option<Arc<dyn InboundHandler>>,
    bot: Option<Bot>,
    dispatch_task: Option<tokio::task::JoinHandle<()>>,
    status: Arc<SyncRwLock<ChannelStatus>>,
    /// `platform_message_id -> ChatId`, populated on send so `update_message`/
    /// `delete_message` (which only receive the platform message ID, per
    /// §6.1) can still address a chat on Telegram's chat-scoped API.
    message_chats: Arc<DashMap<String, ChatId>>,
}

impl TelegramAdapter {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            config,
            handler: None,
            bot: None,
            dispatch_task: None,
            status: Arc::new(SyncRwLock::new(ChannelStatus::Disconnected)),
            message_chats: Arc::new(DashMap::new()),
        }
    }
}

#[async_trait]
impl Channel for TelegramAdapter {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn init(&mut self, _config: &serde_json::Value) -> Result<()> {
        if self.config.bot_token.is_empty() {
            return Err(ChannelError::ConfigError("telegram bot_token is empty".to_string()));
        }
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

        *self.status.write().unwrap() = ChannelStatus::Connecting;

        let bot = Bot::new(&self.config.bot_token);
        if let Err(e) = bot.get_me().await {
            *self.status.write().unwrap() = ChannelStatus::Error(e.to_string());
            return Err(ChannelError::ConnectionFailed(e.to_string()));
        }

        self.bot = Some(bot.clone());
        let config = self.config.clone();
        let status = self.status.clone();

        let task = tokio::spawn(async move {
            let endpoint = Update::filter_message().endpoint(
                move |bot: Bot, msg: Message| {
                    let handler = handler.clone();
                    let config = config.clone();
                    async move { crate::handler::handle_message(bot, msg, handler, config).await }
                },
            );

            info!("telegram: starting long-polling dispatcher");
            *status.write().unwrap() = ChannelStatus::Connected;

            Dispatcher::builder(bot, endpoint)
                .default_handler(|_upd| async {})
                .build()
                .dispatch()
                .await;

            *status.write().unwrap() = ChannelStatus::Disconnected;
        });

        self.dispatch_task = Some(task);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.dispatch_task.take() {
            task.abort();
        }
        *self.status.write().unwrap() = ChannelStatus::Disconnected;
        Ok(())
    }

    async fn send_message(&self, chat_id: &str, text: &str, _opts: Option<&SendOptions>) -> SendResult {
        let Some(bot) = &self.bot else {
            return SendResult::failure("telegram adapter not started");
        };
        let Ok(id) = chat_id.parse::<i64>() else {
            return SendResult::failure("invalid telegram chat id");
        };
        let tg_chat_id = ChatId(id);

        match crate::send::send_chunked(bot, tg_chat_id, text).await {
            Some(message_id) => {
                let platform_message_id = message_id.to_string();
                self.message_chats.insert(platform_message_id.clone(), tg_chat_id);
                SendResult::ok(chat_id, &platform_message_id)
            }
            None => SendResult::failure("telegram: failed to deliver any chunk"),
        }
    }

    async fn update_message(&self, message_id: &str, text: &str) -> Result<()> {
        let Some(bot) = &self.bot else {
            return Err(ChannelError::ConnectionFailed("not started".to_string()));
        };
        let Some(chat_id) = self.message_chats.get(message_id).map(|e| *e) else {
            return Err(ChannelError::Unsupported);
        };
        let Ok(msg_id) = message_id.parse::<i32>() else {
            return Err(ChannelError::Unsupported);
        };

        bot.edit_message_text(chat_id, teloxide::types::MessageId(msg_id), text)
            .await
            .map(|_| ())
            .map_err(|e| ChannelError::SendFailed(e.to_string()))
    }

    async fn delete_message(&self, message_id: &str) -> Result<()> {
        let Some(bot) = &self.bot else {
            return Err(ChannelError::ConnectionFailed("not started".to_string()));
        };
        let Some(chat_id) = self.message_chats.get(message_id).map(|e| *e) else {
            return Err(ChannelError::Unsupported);
        };
        let Ok(msg_id) = message_id.parse::<i32>() else {
            return Err(ChannelError::Unsupported);
        };

        bot.delete_message(chat_id, teloxide::types::MessageId(msg_id))
            .await
            .map(|_| ())
            .map_err(|e| ChannelError::SendFailed(e.to_string()))
    }

    async fn send_image(&self, chat_id: &str, data: &[u8], caption: Option<&str>) -> SendResult {
        let Some(bot) = &self.bot else {
            return SendResult::failure("telegram adapter not started");
        };
        let Ok(id) = chat_id.parse::<i64>() else {
            return SendResult::failure("invalid telegram chat id");
        };

        let photo = teloxide::types::InputFile::memory(data.to_vec());
        let mut req = bot.send_photo(ChatId(id), photo);
        if let Some(cap) = caption {
            req = req.caption(cap);
        }

        match req.await {
            Ok(m) => {
                let platform_message_id = m.id.0.to_string();
                self.message_chats.insert(platform_message_id.clone(), ChatId(id));
                SendResult::ok(chat_id, &platform_message_id)
            }
            Err(e) => SendResult::failure(e.to_string()),
        }
    }

    fn status(&self) -> ChannelStatus {
        self.status.read().unwrap().clone()
    }
}
