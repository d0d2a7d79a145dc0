//! Telegram message handler registered in the teloxide Dispatcher.
//!
//! Normalises an inbound teloxide `Message` into the core [`Message`] shape
//! and forwards it to the registered [`InboundHandler`] — everything past
//! that point (dedupe, auto-registration, queueing, agent invocation) is
//! dispatch's concern, not the adapter's.

use std::sync::Arc;

use flashclaw_channels::InboundHandler;
use flashclaw_core::config::TelegramConfig;
use flashclaw_core::types::{ChatType, Message as CoreMessage};
use teloxide::prelude::*;

use crate::allow;
use crate::attach;

/// Main message handler registered in the teloxide Dispatcher.
///
/// Runs for every incoming `Message`. Performs:
/// 1. Bot-message filter
/// 2. Allowlist check (deny-by-default)
/// 3. DM guard
/// 4. `require_mention` guard for groups
/// 5. Media extraction
/// 6. Hand-off to the shared [`InboundHandler`]
pub async fn handle_message(
    bot: Bot,
    msg: Message,
    handler: Arc<dyn InboundHandler>,
    config: TelegramConfig,
) -> ResponseResult<()> {
    if msg.from.as_ref().map(|u| u.is_bot).unwrap_or(false) {
        return Ok(());
    }

    let from = match msg.from.as_ref() {
        Some(u) => u,
        None => return Ok(()),
    };
    let username = from.username.as_deref().unwrap_or("");
    let telegram_user_id = from.id.0.to_string();

    if !allow::is_allowed(&config.allow_users, username, &telegram_user_id) {
        return Ok(());
    }

    if msg.chat.is_private() && !config.dm_allowed {
        return Ok(());
    }

    let mut mentions: Vec<String> = Vec::new();
    if msg.chat.is_group() || msg.chat.is_supergroup() {
        let bot_info = bot.get_me().await;
        let bot_username = bot_info
            .as_ref()
            .ok()
            .and_then(|me| me.user.username.as_deref())
            .unwrap_or("");
        let text_for_mention = msg.text().or(msg.caption()).unwrap_or("");
        let mentioned = contains_mention(text_for_mention, bot_username);
        if mentioned {
            mentions.push(bot_username.to_string());
        } else if config.require_mention {
            return Ok(());
        }
    }

    let text = msg.text().or(msg.caption()).unwrap_or("").to_string();

    let has_media = msg.photo().is_some()
        || msg.document().is_some()
        || msg.video().is_some()
        || msg.audio().is_some()
        || msg.voice().is_some()
        || msg.sticker().is_some();

    if text.is_empty() && !has_media {
        return Ok(());
    }

    let attachments = attach::extract_media(&bot, &msg, config.max_attachment_bytes).await;

    let chat_type = if msg.chat.is_private() {
        ChatType::P2p
    } else {
        ChatType::Group
    };

    let core_msg = CoreMessage {
        id: msg.id.0.to_string(),
        chat_id: msg.chat.id.0.to_string(),
        sender_id: telegram_user_id,
        sender_name: from
            .username
            .clone()
            .unwrap_or_else(|| from.first_name.clone()),
        content: if text.is_empty() {
            "[User sent attachment(s)]".to_string()
        } else {
            text
        },
        timestamp: msg.date,
        chat_type,
        platform: "telegram".to_string(),
        attachments,
        mentions: if mentions.is_empty() { None } else { Some(mentions) },
        reply_to_message_id: msg.reply_to_message().map(|m| m.id.0.to_string()),
    };

    handler.handle(core_msg).await;

    Ok(())
}

/// Return `true` if `text` contains a `@bot_username` mention.
fn contains_mention(text: &str, bot_username: &str) -> bool {
    if bot_username.is_empty() {
        return false;
    }
    let mention = format!("@{bot_username}");
    text.contains(&mention)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_mention_positive() {
        assert!(contains_mention("Hey @mybot, help!", "mybot"));
    }

    #[test]
    fn contains_mention_negative() {
        assert!(!contains_mention("Hello there", "mybot"));
    }

    #[test]
    fn contains_mention_empty_username() {
        assert!(!contains_mention("@foo bar", ""));
    }
}
