use std::sync::Arc;

use tracing::{info, warn};

mod wiring;

use flashclaw_agent::registry;
use flashclaw_agent::router::{ProviderRouter, ProviderSlot};
use flashclaw_agent::slash::SlashCommandHandler;
use flashclaw_agent::{anthropic::AnthropicProvider, openai::OpenAiProvider, provider::LlmProvider, AgentRunner};
use flashclaw_channels::{ChannelDispatch, ChannelManager, InboundHandler};
use flashclaw_core::config::FlashclawConfig;
use flashclaw_core::Paths;
use flashclaw_ipc::IpcBus;
use flashclaw_memory::MemoryManager;
use flashclaw_queue::{MessageQueue, QueueConfig};
use flashclaw_scheduler::SchedulerEngine;
use flashclaw_sessions::SessionTracker;
use flashclaw_store::SqliteStore;
use flashclaw_terminal::TerminalChannel;
use wiring::{DaemonDispatcher, DaemonInvoker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "flashclaw_gateway=info".into()),
        )
        .init();

    info!(git_sha = env!("FLASHCLAW_GIT_SHA"), "starting flashclaw daemon");

    let config_path = std::env::var("FLASHCLAW_CONFIG").ok();
    let config = FlashclawConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        FlashclawConfig::default()
    });

    let paths = Arc::new(Paths::new(Paths::default_root()));
    paths.ensure_base_dirs()?;
    paths.ensure_group_dirs(&config.tuning.main_group_folder)?;

    let store: Arc<dyn flashclaw_store::Store> = Arc::new(SqliteStore::open(&config.database.path)?);

    let provider = build_provider(&config)?;
    let memory = Arc::new(MemoryManager::new(paths.clone()));
    let sessions = SessionTracker::spawn(paths.session_tracker_cache_file());

    let runner = Arc::new(AgentRunner::new(
        provider,
        config.agent.model.clone(),
        memory,
        sessions,
        paths.clone(),
        config.tuning.timezone.clone(),
        config.tuning.main_group_folder.clone(),
        config.tuning.agent_timeout_ms,
        config.tuning.ai_max_output_tokens as u32,
        config.tuning.context_min_tokens as usize,
        config.tuning.context_warn_tokens as usize,
    ));

    let (scheduler_engine, scheduler_handle) = SchedulerEngine::new(store.clone());
    let slash = Arc::new(SlashCommandHandler::new(runner.clone(), scheduler_handle.clone()));

    let channels = Arc::new(ChannelManager::new());
    channels.register(Box::new(TerminalChannel::new())).await;
    if let Some(tg) = config.channels.telegram.clone() {
        channels
            .register(Box::new(flashclaw_telegram::TelegramAdapter::new(tg)))
            .await;
    }

    let queue_config = QueueConfig {
        max_queue_size: config.tuning.message_queue_max_size,
        max_concurrent: config.tuning.message_queue_max_concurrent,
        processing_timeout_ms: config.tuning.message_queue_processing_timeout_ms,
        max_retries: config.tuning.message_queue_max_retries,
    };
    let queue = MessageQueue::new(queue_config);

    let invoker = Arc::new(DaemonInvoker::new(runner.clone(), slash));
    let dispatch = Arc::new(ChannelDispatch::new(
        store.clone(),
        queue.clone(),
        channels.clone(),
        invoker,
        paths.clone(),
        config.tuning.main_group_folder.clone(),
        "flashclaw",
    ));

    let ipc_dispatcher = Arc::new(DaemonDispatcher::new(channels.clone(), scheduler_handle.clone(), store.clone()));
    let ipc_bus = IpcBus::new(paths.clone(), ipc_dispatcher, config.tuning.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let scheduler_task = tokio::spawn(scheduler_engine.run(runner.clone(), shutdown_rx.clone()));
    let ipc_task = tokio::spawn(ipc_bus.run(shutdown_rx.clone()));
    let queue_task = tokio::spawn(queue.clone().run(dispatch.clone() as Arc<dyn flashclaw_queue::MessageHandler<flashclaw_core::types::Message>>));

    channels.start_all(dispatch.clone() as Arc<dyn InboundHandler>).await;

    info!("flashclaw daemon running");
    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining");

    let _ = shutdown_tx.send(true);
    channels.stop_all().await;

    let _ = tokio::join!(scheduler_task, ipc_task, queue_task);

    info!("flashclaw daemon stopped");
    Ok(())
}

/// Builds the LLM provider stack (§4.2): a single configured provider if
/// only one is present, otherwise a [`ProviderRouter`] over every slot in
/// priority order — `anthropic`, then `openai`, then each `openai_compat`
/// entry, resolving well-known IDs through the provider registry.
fn build_provider(config: &FlashclawConfig) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let mut slots: Vec<ProviderSlot> = Vec::new();

    if let Some(a) = &config.providers.anthropic {
        let provider = AnthropicProvider::new(a.api_key.clone(), Some(a.base_url.clone()));
        slots.push(ProviderSlot::new(Box::new(provider), 2));
    }
    if let Some(o) = &config.providers.openai {
        let provider = OpenAiProvider::new(o.api_key.clone(), Some(o.base_url.clone()));
        slots.push(ProviderSlot::new(Box::new(provider), 2));
    }
    for entry in &config.providers.openai_compat {
        let known = registry::lookup(&entry.id);
        let base_url = entry
            .base_url
            .clone()
            .or_else(|| known.map(|k| k.base_url.to_string()))
            .ok_or_else(|| anyhow::anyhow!("openai_compat entry {} has no base_url and is not a known provider", entry.id))?;
        let chat_path = entry
            .chat_path
            .clone()
            .or_else(|| known.map(|k| k.chat_path.to_string()))
            .unwrap_or_else(|| "/v1/chat/completions".to_string());
        let provider = OpenAiProvider::with_path(entry.id.clone(), entry.api_key.clone(), base_url, chat_path);
        slots.push(ProviderSlot::new(Box::new(provider), 2));
    }

    if slots.is_empty() {
        anyhow::bail!("no LLM provider configured (set [providers.anthropic], [providers.openai], or [[providers.openai_compat]])");
    }

    if slots.len() == 1 {
        let ProviderSlot { provider, .. } = slots.into_iter().next().unwrap();
        return Ok(Arc::from(provider));
    }

    Ok(Arc::new(ProviderRouter::new(slots)))
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
