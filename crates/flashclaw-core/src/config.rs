use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{FlashclawError, Result};
use crate::paths::MAIN_GROUP_FOLDER;

/// Top-level config (`flashclaw.toml` + `FLASHCLAW_*` env overrides, §6.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashclawConfig {
    pub agent: AgentConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub tuning: TuningConfig,
}

impl Default for FlashclawConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig {
                model: default_model(),
                soul_path: None,
            },
            database: DatabaseConfig::default(),
            providers: ProvidersConfig::default(),
            channels: ChannelsConfig::default(),
            tuning: TuningConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub model: String,
    pub soul_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub anthropic: Option<AnthropicConfig>,
    pub openai: Option<OpenAiProviderConfig>,
    /// Additional OpenAI-compatible providers. Each entry can reference a
    /// well-known provider ID (e.g. "groq", "deepseek") or define a fully
    /// custom endpoint. Providers are tried in order after the primary slots.
    #[serde(default)]
    pub openai_compat: Vec<OpenAiCompatEntry>,
}

/// A single OpenAI-compatible provider entry. Well-known IDs are resolved by
/// the agent crate's provider registry; unknown IDs require `base_url`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiCompatEntry {
    pub id: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub chat_path: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiProviderConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Deny-by-default allowlist. `"*"` allows everyone; entries match by
    /// username (with or without `@`) or numeric user ID.
    pub allow_users: Vec<String>,
    pub dm_allowed: bool,
    /// Require an @mention (or reply) to trigger the agent in groups.
    pub require_mention: bool,
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            allow_users: Vec::new(),
            dm_allowed: true,
            require_mention: true,
            max_attachment_bytes: default_max_attachment_bytes(),
        }
    }
}

fn default_max_attachment_bytes() -> u64 {
    20 * 1024 * 1024
}

/// Tuning knobs from §6.6, with the literal defaults the spec gives where it
/// gives one; the rest are judgment calls recorded in DESIGN.md.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    pub context_min_tokens: u64,
    pub context_warn_tokens: u64,
    pub agent_timeout_ms: u64,
    pub ai_max_output_tokens: u64,
    pub message_queue_max_size: usize,
    pub message_queue_max_concurrent: usize,
    pub message_queue_processing_timeout_ms: u64,
    pub message_queue_max_retries: u32,
    pub ipc_poll_interval_ms: u64,
    pub thinking_threshold_ms: u64,
    pub max_ipc_file_bytes: u64,
    pub max_ipc_message_chars: usize,
    pub max_ipc_chat_id_chars: usize,
    pub max_image_bytes: u64,
    pub timezone: String,
    pub main_group_folder: String,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            context_min_tokens: 16_000,
            context_warn_tokens: 32_000,
            agent_timeout_ms: 300_000,
            ai_max_output_tokens: 4_096,
            message_queue_max_size: 1_000,
            message_queue_max_concurrent: 10,
            message_queue_processing_timeout_ms: 300_000,
            message_queue_max_retries: 3,
            ipc_poll_interval_ms: 1_000,
            thinking_threshold_ms: 3_000,
            max_ipc_file_bytes: 1_048_576,
            max_ipc_message_chars: 10_000,
            max_ipc_chat_id_chars: 256,
            max_image_bytes: 5_242_880,
            timezone: "UTC".to_string(),
            main_group_folder: MAIN_GROUP_FOLDER.to_string(),
        }
    }
}

fn default_model() -> String {
    "claude-sonnet-4-6".to_string()
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.flashclaw/flashclaw.db", home)
}

impl FlashclawConfig {
    /// Loads config from a TOML file with `FLASHCLAW_*` env var overrides.
    ///
    /// Checks in order: explicit path argument, `FLASHCLAW_CONFIG` env var,
    /// `${FLASHCLAW_HOME:-~/.flashclaw}/flashclaw.toml`, built-in defaults.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("FLASHCLAW_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        let config: FlashclawConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("FLASHCLAW_").split("_"))
            .extract()
            .map_err(|e| FlashclawError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    crate::paths::Paths::default_root()
        .join("flashclaw.toml")
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tuning_matches_spec_literals() {
        let t = TuningConfig::default();
        assert_eq!(t.context_min_tokens, 16_000);
        assert_eq!(t.context_warn_tokens, 32_000);
        assert_eq!(t.agent_timeout_ms, 300_000);
        assert_eq!(t.ai_max_output_tokens, 4_096);
        assert_eq!(t.max_ipc_chat_id_chars, 256);
        assert_eq!(t.main_group_folder, "main");
    }

    #[test]
    fn default_config_has_no_providers_configured() {
        let cfg = FlashclawConfig::default();
        assert!(cfg.providers.anthropic.is_none());
        assert!(cfg.providers.openai.is_none());
        assert!(cfg.providers.openai_compat.is_empty());
    }
}
