use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::channel::{Channel, InboundHandler};
use crate::error::ChannelError;
use crate::types::ChannelStatus;

/// Minimum delay between reconnect attempts (seconds).
const BACKOFF_BASE_SECS: u64 = 5;
/// Maximum delay between reconnect attempts (seconds).
const BACKOFF_MAX_SECS: u64 = 300;
/// Maximum number of reconnect attempts before giving up.
const MAX_ATTEMPTS: u32 = 10;
/// Jitter fraction applied to each delay (±10 %).
const JITTER_FRACTION: f64 = 0.10;

/// Manages the set of registered channel adapters — one `Channel` per
/// configured platform (§6.1). All inbound messages are routed through the
/// same [`InboundHandler`], registered once per channel before `start()`.
///
/// Interior mutability (`RwLock`) so one `Arc<ChannelManager>` can be shared
/// between the startup/shutdown lifecycle and `ChannelDispatch`'s outbound
/// routing, which only ever needs `&self`.
pub struct ChannelManager {
    channels: RwLock<HashMap<String, Box<dyn Channel>>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a channel adapter. If a channel with the same name is
    /// already registered it is replaced.
    pub async fn register(&self, channel: Box<dyn Channel>) {
        let name = channel.name().to_string();
        info!(channel = %name, "registering channel adapter");
        self.channels.write().await.insert(name, channel);
    }

    /// Wires `handler` into every registered channel, then starts each with
    /// exponential backoff + jitter on failure.
    pub async fn start_all(&self, handler: Arc<dyn InboundHandler>) {
        let mut channels = self.channels.write().await;
        for (name, channel) in channels.iter_mut() {
            channel.on_message(handler.clone());
            info!(channel = %name, "starting channel");
            if let Err(e) = start_with_backoff(name, channel.as_mut()).await {
                error!(channel = %name, error = %e, "failed to start channel after retries");
            }
        }
    }

    /// Stops every registered channel (§5 graceful shutdown step (a)).
    /// Errors are logged but do not abort stopping of remaining channels.
    pub async fn stop_all(&self) {
        let mut channels = self.channels.write().await;
        for (name, channel) in channels.iter_mut() {
            info!(channel = %name, "stopping channel");
            if let Err(e) = channel.stop().await {
                warn!(channel = %name, error = %e, "error while stopping channel");
            }
        }
    }

    /// Sends `text` to `chat_id` over the named platform's channel.
    pub async fn send_message(
        &self,
        platform: &str,
        chat_id: &str,
        text: &str,
        opts: Option<&crate::types::SendOptions>,
    ) -> crate::types::SendResult {
        let channels = self.channels.read().await;
        match channels.get(platform) {
            Some(ch) => ch.send_message(chat_id, text, opts).await,
            None => crate::types::SendResult::failure(format!("no channel registered for platform {platform}")),
        }
    }

    pub async fn send_image(
        &self,
        platform: &str,
        chat_id: &str,
        data: &[u8],
        caption: Option<&str>,
    ) -> crate::types::SendResult {
        let channels = self.channels.read().await;
        match channels.get(platform) {
            Some(ch) => ch.send_image(chat_id, data, caption).await,
            None => crate::types::SendResult::failure(format!("no channel registered for platform {platform}")),
        }
    }

    pub async fn update_message(&self, platform: &str, message_id: &str, text: &str) -> crate::error::Result<()> {
        let channels = self.channels.read().await;
        match channels.get(platform) {
            Some(ch) => ch.update_message(message_id, text).await,
            None => Err(ChannelError::ConfigError(format!("no channel registered for platform {platform}"))),
        }
    }

    pub async fn delete_message(&self, platform: &str, message_id: &str) -> crate::error::Result<()> {
        let channels = self.channels.read().await;
        match channels.get(platform) {
            Some(ch) => ch.delete_message(message_id).await,
            None => Err(ChannelError::ConfigError(format!("no channel registered for platform {platform}"))),
        }
    }

    /// Returns the current [`ChannelStatus`] for every registered channel,
    /// sorted by name for deterministic output.
    pub async fn statuses(&self) -> Vec<(String, ChannelStatus)> {
        let channels = self.channels.read().await;
        let mut result: Vec<(String, ChannelStatus)> =
            channels.iter().map(|(name, ch)| (name.clone(), ch.status())).collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Attempt to start a single channel with exponential backoff and ±10 % jitter.
/// Schedule: 5 s → 10 s → 20 s → … → 300 s (cap), up to [`MAX_ATTEMPTS`] tries.
async fn start_with_backoff(name: &str, channel: &mut dyn Channel) -> Result<(), ChannelError> {
    let mut delay_secs = BACKOFF_BASE_SECS;

    for attempt in 1..=MAX_ATTEMPTS {
        match channel.start().await {
            Ok(()) => {
                info!(channel = %name, attempt, "channel started successfully");
                return Ok(());
            }
            Err(e) if attempt == MAX_ATTEMPTS => {
                return Err(e);
            }
            Err(e) => {
                let jitter = jitter_secs(delay_secs);
                let total = delay_secs + jitter;
                warn!(
                    channel = %name,
                    attempt,
                    max = MAX_ATTEMPTS,
                    error = %e,
                    retry_after_secs = total,
                    "channel start failed, retrying with backoff"
                );
                sleep(Duration::from_secs(total)).await;
                delay_secs = (delay_secs * 2).min(BACKOFF_MAX_SECS);
            }
        }
    }

    unreachable!("backoff loop exited without returning")
}

/// Returns a jitter offset (0 … `JITTER_FRACTION * base_secs`) as integer
/// seconds, derived from the current monotonic timestamp to avoid a `rand`
/// dependency.
fn jitter_secs(base_secs: u64) -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    let max_jitter = ((base_secs as f64) * JITTER_FRACTION) as u64;
    if max_jitter == 0 {
        return 0;
    }
    (nanos as u64) % max_jitter
}
