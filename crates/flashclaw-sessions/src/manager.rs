use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use flashclaw_core::types::SessionStats;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::types::{context_window_for, COMPACT_SUGGEST_RATIO};

/// Debounce window for persisting to `cache/session-tracker.json` (§4.10).
const WRITE_DEBOUNCE: Duration = Duration::from_secs(1);
/// Loading a cache file bigger than this is treated as corrupt and skipped.
const MAX_CACHE_BYTES: u64 = 10 * 1024 * 1024;
/// How often the idle-session sweep runs (§4.10 "a background interval (1 h)").
const EVICTION_INTERVAL: Duration = Duration::from_secs(3600);
/// Sessions idle longer than this are evicted by the sweep.
const EVICTION_IDLE_AFTER: chrono::Duration = chrono::Duration::hours(24);

/// Reported token usage for one LLM call (§4.3 step 6).
#[derive(Debug, Clone, Copy)]
pub struct Usage {
    pub input_tokens: i64,
    pub output_tokens: i64,
}

/// Per-chat token accounting with a debounced JSON cache and a 1 h idle
/// eviction sweep (§4.10). Cheap to `Clone` — all state lives behind `Arc`.
#[derive(Clone)]
pub struct SessionTracker {
    sessions: Arc<DashMap<String, SessionStats>>,
    cache_path: PathBuf,
    dirty: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
}

impl SessionTracker {
    /// Loads the on-disk cache (if any) and spawns the debounced writer and
    /// idle-eviction background tasks.
    pub fn spawn(cache_path: PathBuf) -> Self {
        let sessions = Arc::new(load_cache(&cache_path));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tracker = Self {
            sessions,
            cache_path,
            dirty: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        };
        tracker.spawn_writer(shutdown_rx.clone());
        tracker.spawn_evictor(shutdown_rx);
        tracker
    }

    /// Returns the tracked stats for `chat_id`, creating a fresh entry with
    /// `message_count = 0` if none exists yet.
    pub fn get_or_create(&self, chat_id: &str, model: Option<&str>) -> SessionStats {
        self.sessions
            .entry(chat_id.to_string())
            .or_insert_with(|| {
                let now = Utc::now();
                SessionStats {
                    chat_id: chat_id.to_string(),
                    message_count: 0,
                    input_tokens: 0,
                    output_tokens: 0,
                    total_tokens: 0,
                    model: model.unwrap_or("unknown").to_string(),
                    started_at: now,
                    last_activity_at: now,
                    compact_suggested: false,
                }
            })
            .clone()
    }

    /// Records one turn's usage (§4.3 step 6). Invalid (negative) reports are
    /// logged and ignored rather than corrupting the monotonic counters
    /// (§3 SessionStats invariant).
    #[instrument(skip(self), fields(chat_id, model))]
    pub fn record_usage(&self, chat_id: &str, usage: Usage, model: Option<&str>) -> SessionStats {
        if usage.input_tokens < 0 || usage.output_tokens < 0 {
            warn!(chat_id, ?usage, "ignoring invalid (negative) usage report");
            return self.get_or_create(chat_id, model);
        }
        let mut entry = self.sessions.entry(chat_id.to_string()).or_insert_with(|| {
            let now = Utc::now();
            SessionStats {
                chat_id: chat_id.to_string(),
                message_count: 0,
                input_tokens: 0,
                output_tokens: 0,
                total_tokens: 0,
                model: model.unwrap_or("unknown").to_string(),
                started_at: now,
                last_activity_at: now,
                compact_suggested: false,
            }
        });
        entry.message_count += 1;
        entry.input_tokens += usage.input_tokens as u64;
        entry.output_tokens += usage.output_tokens as u64;
        entry.total_tokens = entry.input_tokens + entry.output_tokens;
        entry.last_activity_at = Utc::now();
        if let Some(m) = model {
            entry.model = m.to_string();
        }
        let stats = entry.clone();
        drop(entry);
        self.mark_dirty();
        stats
    }

    pub fn get_stats(&self, chat_id: &str) -> Option<SessionStats> {
        self.sessions.get(chat_id).map(|r| r.clone())
    }

    /// Returns `round(usage/limit*100)` the first time the ratio crosses
    /// [`COMPACT_SUGGEST_RATIO`] for this session, then `None` on every
    /// subsequent call until [`SessionTracker::reset`] (§8 P3).
    pub fn check_compact_threshold(&self, chat_id: &str) -> Option<u64> {
        let mut entry = self.sessions.get_mut(chat_id)?;
        if entry.compact_suggested {
            return None;
        }
        let limit = context_window_for(&entry.model) as f64;
        let ratio = entry.total_tokens as f64 / limit;
        if ratio < COMPACT_SUGGEST_RATIO {
            return None;
        }
        entry.compact_suggested = true;
        let pct = (ratio * 100.0).round() as u64;
        drop(entry);
        self.mark_dirty();
        Some(pct)
    }

    /// Clears accumulated stats for `chat_id` back to a fresh session,
    /// re-arming `check_compact_threshold` (§4.9 slash-command compaction).
    pub fn reset(&self, chat_id: &str) {
        let now = Utc::now();
        self.sessions.insert(
            chat_id.to_string(),
            SessionStats {
                chat_id: chat_id.to_string(),
                message_count: 0,
                input_tokens: 0,
                output_tokens: 0,
                total_tokens: 0,
                model: "unknown".to_string(),
                started_at: now,
                last_activity_at: now,
                compact_suggested: false,
            },
        );
        self.mark_dirty();
    }

    /// Stops background tasks and flushes the cache synchronously (§5
    /// graceful shutdown "flush session tracker").
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.persist() {
            warn!("failed to flush session tracker on shutdown: {e}");
        }
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    fn persist(&self) -> Result<()> {
        let snapshot: std::collections::HashMap<String, SessionStats> = self
            .sessions
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        let json = serde_json::to_vec_pretty(&snapshot)?;
        if let Some(parent) = self.cache_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.cache_path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.cache_path)?;
        self.dirty.store(false, Ordering::Relaxed);
        debug!(path = %self.cache_path.display(), "session tracker cache persisted");
        Ok(())
    }

    fn spawn_writer(&self, mut shutdown: watch::Receiver<bool>) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(WRITE_DEBOUNCE);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if this.dirty.load(Ordering::Relaxed) {
                            if let Err(e) = this.persist() {
                                warn!("debounced session tracker persist failed: {e}");
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }

    fn spawn_evictor(&self, mut shutdown: watch::Receiver<bool>) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(EVICTION_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = Utc::now();
                        let stale: Vec<String> = this
                            .sessions
                            .iter()
                            .filter(|r| now - r.last_activity_at > EVICTION_IDLE_AFTER)
                            .map(|r| r.key().clone())
                            .collect();
                        if !stale.is_empty() {
                            for chat_id in &stale {
                                this.sessions.remove(chat_id);
                            }
                            info!(count = stale.len(), "evicted idle sessions");
                            this.mark_dirty();
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }
}

fn load_cache(path: &PathBuf) -> DashMap<String, SessionStats> {
    let map = DashMap::new();
    let Ok(metadata) = std::fs::metadata(path) else {
        return map;
    };
    if metadata.len() > MAX_CACHE_BYTES {
        warn!(path = %path.display(), "session tracker cache too large, skipping load");
        return map;
    }
    let Ok(bytes) = std::fs::read(path) else {
        return map;
    };
    match serde_json::from_slice::<std::collections::HashMap<String, SessionStats>>(&bytes) {
        Ok(loaded) => {
            for (k, v) in loaded {
                map.insert(k, v);
            }
        }
        Err(e) => warn!("session tracker cache is corrupt, starting empty: {e}"),
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_then_record_usage_accumulates() {
        let tracker = SessionTracker::spawn(std::env::temp_dir().join("flashclaw-sessions-test.json"));
        tracker.get_or_create("c1", Some("claude-sonnet-4-6"));
        let stats = tracker.record_usage(
            "c1",
            Usage {
                input_tokens: 100,
                output_tokens: 50,
            },
            None,
        );
        assert_eq!(stats.message_count, 1);
        assert_eq!(stats.total_tokens, 150);
        let stats = tracker.record_usage(
            "c1",
            Usage {
                input_tokens: 10,
                output_tokens: 10,
            },
            None,
        );
        assert_eq!(stats.message_count, 2);
        assert_eq!(stats.total_tokens, 170);
    }

    #[tokio::test]
    async fn negative_usage_is_ignored() {
        let tracker = SessionTracker::spawn(std::env::temp_dir().join("flashclaw-sessions-test2.json"));
        tracker.get_or_create("c2", None);
        let before = tracker.get_stats("c2").unwrap();
        let after = tracker.record_usage(
            "c2",
            Usage {
                input_tokens: -5,
                output_tokens: 0,
            },
            None,
        );
        assert_eq!(before.message_count, after.message_count);
    }

    #[tokio::test]
    async fn compact_threshold_fires_once_until_reset() {
        let tracker = SessionTracker::spawn(std::env::temp_dir().join("flashclaw-sessions-test3.json"));
        tracker.get_or_create("c3", Some("claude-sonnet-4-6"));
        tracker.record_usage(
            "c3",
            Usage {
                input_tokens: 150_000,
                output_tokens: 0,
            },
            None,
        );
        let first = tracker.check_compact_threshold("c3");
        assert!(first.is_some());
        let second = tracker.check_compact_threshold("c3");
        assert!(second.is_none());
        tracker.reset("c3");
        tracker.record_usage(
            "c3",
            Usage {
                input_tokens: 150_000,
                output_tokens: 0,
            },
            None,
        );
        assert!(tracker.check_compact_threshold("c3").is_some());
    }

    #[tokio::test]
    async fn below_threshold_returns_none() {
        let tracker = SessionTracker::spawn(std::env::temp_dir().join("flashclaw-sessions-test4.json"));
        tracker.get_or_create("c4", Some("claude-sonnet-4-6"));
        tracker.record_usage(
            "c4",
            Usage {
                input_tokens: 100,
                output_tokens: 100,
            },
            None,
        );
        assert!(tracker.check_compact_threshold("c4").is_none());
    }
}
