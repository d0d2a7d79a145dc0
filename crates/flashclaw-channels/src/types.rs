use serde::{Deserialize, Serialize};

/// Formatting hint for outbound message content (§6.1 `sendMessage(..., opts?)`).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageFormat {
    #[default]
    PlainText,
    Markdown,
    Html,
}

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub format: MessageFormat,
}

/// Result of `sendMessage`/`sendImage` (§6.1 `{success, messageId?, error?}`).
///
/// `message_id` is `"<chatId>:<platformMessageId>"` so `updateMessage`/
/// `deleteMessage` can route without a session table (§6.1).
#[derive(Debug, Clone)]
pub struct SendResult {
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl SendResult {
    pub fn ok(chat_id: &str, platform_message_id: &str) -> Self {
        Self {
            success: true,
            message_id: Some(format!("{chat_id}:{platform_message_id}")),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

/// Splits a `"<chatId>:<platformMessageId>"` handle back into its parts.
pub fn split_message_id(message_id: &str) -> Option<(&str, &str)> {
    message_id.split_once(':')
}

/// Runtime connection state of a channel adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Connected,
    Connecting,
    Disconnected,
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_result_ok_encodes_chat_and_message_id() {
        let r = SendResult::ok("123", "456");
        assert_eq!(r.message_id.as_deref(), Some("123:456"));
        assert!(r.success);
    }

    #[test]
    fn split_message_id_round_trips() {
        let id = "123:456";
        assert_eq!(split_message_id(id), Some(("123", "456")));
    }
}
