use async_trait::async_trait;
use flashclaw_core::types::Message;

use crate::error::{ChannelError, Result};
use crate::types::{ChannelStatus, SendOptions, SendResult};

/// Receives normalised inbound messages from a [`Channel`] (§6.1
/// `onMessage(handler)`). Implementations MUST be reentrant — a channel may
/// call `handle` for the next message before the previous call returns.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, msg: Message);
}

/// Common interface implemented by every channel adapter (Telegram, Feishu,
/// DingTalk, terminal, …), per §6.1.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable lowercase identifier for this channel (e.g. `"telegram"`),
    /// also `Message.platform` for messages it produces.
    fn name(&self) -> &str;

    /// One-time setup from channel-specific config (§6.1 `init(config)`).
    async fn init(&mut self, config: &serde_json::Value) -> Result<()>;

    /// Registers the handler that receives every inbound message. Must be
    /// called before [`Channel::start`].
    fn on_message(&mut self, handler: std::sync::Arc<dyn InboundHandler>);

    /// Establishes the connection and begins delivering inbound messages to
    /// the registered handler.
    async fn start(&mut self) -> Result<()>;

    /// Gracefully closes the connection (§5 graceful shutdown step (a)).
    async fn stop(&mut self) -> Result<()>;

    /// Sends a new message to `chat_id` (§6.1 `sendMessage`).
    async fn send_message(&self, chat_id: &str, text: &str, opts: Option<&SendOptions>) -> SendResult;

    /// Edits a previously sent message in place. Optional — the default
    /// returns [`ChannelError::Unsupported`] so dispatch (§4.8) falls back
    /// to delete+send.
    async fn update_message(&self, _message_id: &str, _text: &str) -> Result<()> {
        Err(ChannelError::Unsupported)
    }

    /// Deletes a previously sent message. Optional, same fallback contract
    /// as [`Channel::update_message`].
    async fn delete_message(&self, _message_id: &str) -> Result<()> {
        Err(ChannelError::Unsupported)
    }

    /// Sends an image with an optional caption (§6.1 `sendImage`). Optional
    /// — channels with no media support return a failed [`SendResult`].
    async fn send_image(&self, _chat_id: &str, _data: &[u8], _caption: Option<&str>) -> SendResult {
        SendResult::failure("this channel does not support sending images")
    }

    /// Current runtime status without blocking — used for monitoring, not
    /// part of the §6.1 contract itself.
    fn status(&self) -> ChannelStatus;
}
