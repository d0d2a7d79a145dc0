//! Inbound media handling for the Telegram adapter.
//!
//! Downloads Telegram media via `get_file` + `download_file`, base64-encodes
//! the bytes, and wraps them in the core [`Attachment`] shape (§3) so
//! dispatch and the agent runner never see a platform-specific type.

use base64::Engine;
use flashclaw_core::types::{Attachment, AttachmentType};
use teloxide::net::Download;
use teloxide::prelude::*;
use tracing::warn;

/// Extract media from a Telegram message and convert to a core [`Attachment`].
///
/// Returns `None` when the message has no supported media, or when the file
/// exceeds `max_bytes`. Text-only messages return `None`.
pub async fn extract_media(bot: &Bot, msg: &Message, max_bytes: u64) -> Option<Vec<Attachment>> {
    if let Some(photos) = msg.photo() {
        if let Some(photo) = photos.last() {
            return download_as_attachment(bot, &photo.file.id, "image/jpeg", AttachmentType::Image, max_bytes).await;
        }
    }

    if let Some(doc) = msg.document() {
        let mime = doc
            .mime_type
            .as_ref()
            .map(|m| m.as_ref())
            .unwrap_or("application/octet-stream");
        return download_as_attachment(bot, &doc.file.id, mime, AttachmentType::File, max_bytes).await;
    }

    if let Some(video) = msg.video() {
        let mime = video
            .mime_type
            .as_ref()
            .map(|m| m.as_ref())
            .unwrap_or("video/mp4");
        return download_as_attachment(bot, &video.file.id, mime, AttachmentType::Video, max_bytes).await;
    }

    if let Some(audio) = msg.audio() {
        let mime = audio
            .mime_type
            .as_ref()
            .map(|m| m.as_ref())
            .unwrap_or("audio/mpeg");
        return download_as_attachment(bot, &audio.file.id, mime, AttachmentType::Audio, max_bytes).await;
    }

    if let Some(voice) = msg.voice() {
        let mime = voice
            .mime_type
            .as_ref()
            .map(|m| m.as_ref())
            .unwrap_or("audio/ogg");
        return download_as_attachment(bot, &voice.file.id, mime, AttachmentType::Audio, max_bytes).await;
    }

    if let Some(sticker) = msg.sticker() {
        return download_as_attachment(bot, &sticker.file.id, "image/webp", AttachmentType::Image, max_bytes).await;
    }

    None
}

/// Download a file via the Telegram Bot API and return a base64-encoded [`Attachment`].
///
/// Returns `None` when `get_file`/`download_file` fails or the file exceeds `max_bytes`.
async fn download_as_attachment(
    bot: &Bot,
    file_id: &str,
    mime: &str,
    kind: AttachmentType,
    max_bytes: u64,
) -> Option<Vec<Attachment>> {
    let file = match bot.get_file(file_id).await {
        Ok(f) => f,
        Err(e) => {
            warn!(file_id, error = %e, "Telegram: get_file failed");
            return None;
        }
    };

    if u64::from(file.size) > max_bytes {
        warn!(
            file_id,
            size = file.size,
            limit = max_bytes,
            "Telegram: file exceeds size limit, skipping"
        );
        return None;
    }

    let mut buf: Vec<u8> = Vec::new();
    if let Err(e) = bot.download_file(&file.path, &mut buf).await {
        warn!(file_id, error = %e, "Telegram: download_file failed");
        return None;
    }

    let content = base64::engine::general_purpose::STANDARD.encode(&buf);
    let file_name = file.path.rsplit('/').next().map(|s| s.to_string());

    Some(vec![Attachment {
        kind,
        content: Some(content),
        mime_type: Some(mime.to_string()),
        file_name,
    }])
}

#[cfg(test)]
mod tests {
    /// Verify that size guard logic is correct (pure arithmetic).
    #[test]
    fn size_guard_boundary() {
        let max: u64 = 20 * 1024 * 1024;
        assert!(max - 1 < max);
        assert!(max > max - 1);
    }
}
