use flashclaw_core::config::TuningConfig;
use flashclaw_core::types::IpcEnvelope;

use crate::error::{IpcError, Result};

const MIN_PROMPT_CHARS: usize = 1;
const MAX_PROMPT_CHARS: usize = 10_000;
const MIN_SCHEDULE_VALUE_CHARS: usize = 1;
const MAX_SCHEDULE_VALUE_CHARS: usize = 200;
const MIN_MAX_RETRIES: u32 = 0;
const MAX_MAX_RETRIES: u32 = 10;
const MIN_TIMEOUT_MS: u64 = 1_000;
const MAX_TIMEOUT_MS: u64 = 3_600_000;
const MIN_TASK_ID_CHARS: usize = 1;
const MAX_TASK_ID_CHARS: usize = 100;

/// Schema validation beyond what `serde` already enforces via `IpcEnvelope`'s
/// shape (§4.7 step 2): field length/range bounds.
pub fn validate(env: &IpcEnvelope, tuning: &TuningConfig) -> Result<()> {
    match env {
        IpcEnvelope::Message { chat_jid, text, .. } => {
            check_len("chatJid", chat_jid, 1, tuning.max_ipc_chat_id_chars)?;
            check_len("text", text, 1, tuning.max_ipc_message_chars)?;
        }
        IpcEnvelope::Image { chat_jid, image_data, .. } => {
            check_len("chatJid", chat_jid, 1, tuning.max_ipc_chat_id_chars)?;
            if image_data.is_empty() {
                return Err(IpcError::Validation("imageData must not be empty".to_string()));
            }
        }
        IpcEnvelope::ScheduleTask {
            prompt,
            schedule_value,
            max_retries,
            timeout_ms,
            ..
        } => {
            check_len("prompt", prompt, MIN_PROMPT_CHARS, MAX_PROMPT_CHARS)?;
            check_len(
                "schedule_value",
                schedule_value,
                MIN_SCHEDULE_VALUE_CHARS,
                MAX_SCHEDULE_VALUE_CHARS,
            )?;
            if let Some(r) = max_retries {
                check_range("max_retries", *r, MIN_MAX_RETRIES, MAX_MAX_RETRIES)?;
            }
            if let Some(t) = timeout_ms {
                check_range("timeout_ms", *t, MIN_TIMEOUT_MS, MAX_TIMEOUT_MS)?;
            }
        }
        IpcEnvelope::PauseTask { task_id }
        | IpcEnvelope::ResumeTask { task_id }
        | IpcEnvelope::CancelTask { task_id } => {
            check_len("taskId", task_id, MIN_TASK_ID_CHARS, MAX_TASK_ID_CHARS)?;
        }
        IpcEnvelope::RegisterGroup { folder, .. } => {
            if !is_valid_folder(folder) {
                return Err(IpcError::Validation(format!(
                    "folder {folder:?} must match ^[A-Za-z0-9_-]+$"
                )));
            }
        }
    }
    Ok(())
}

fn check_len(field: &str, value: &str, min: usize, max: usize) -> Result<()> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(IpcError::Validation(format!(
            "{field} length {len} outside [{min}, {max}]"
        )));
    }
    Ok(())
}

fn check_range<T: PartialOrd + std::fmt::Display>(field: &str, value: T, min: T, max: T) -> Result<()> {
    if value < min || value > max {
        return Err(IpcError::Validation(format!("{field} {value} outside [{min}, {max}]")));
    }
    Ok(())
}

fn is_valid_folder(folder: &str) -> bool {
    !folder.is_empty() && folder.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuning() -> TuningConfig {
        TuningConfig::default()
    }

    #[test]
    fn message_with_empty_text_is_rejected() {
        let env = IpcEnvelope::Message {
            chat_jid: "123".to_string(),
            text: "".to_string(),
            group_folder: None,
            platform: None,
        };
        assert!(validate(&env, &tuning()).is_err());
    }

    #[test]
    fn register_group_rejects_invalid_folder_chars() {
        let env = IpcEnvelope::RegisterGroup {
            jid: "1".to_string(),
            name: "n".to_string(),
            folder: "not/valid".to_string(),
            trigger: "always".to_string(),
            agent_config: None,
        };
        assert!(validate(&env, &tuning()).is_err());
    }

    #[test]
    fn schedule_task_rejects_out_of_range_retries() {
        let env = IpcEnvelope::ScheduleTask {
            prompt: "do a thing".to_string(),
            schedule_type: flashclaw_core::types::ScheduleType::Once,
            schedule_value: "2030-01-01T00:00:00Z".to_string(),
            group_folder: "main".to_string(),
            context_mode: None,
            max_retries: Some(99),
            timeout_ms: None,
        };
        assert!(validate(&env, &tuning()).is_err());
    }

    #[test]
    fn valid_message_passes() {
        let env = IpcEnvelope::Message {
            chat_jid: "123".to_string(),
            text: "hello".to_string(),
            group_folder: None,
            platform: None,
        };
        assert!(validate(&env, &tuning()).is_ok());
    }
}
