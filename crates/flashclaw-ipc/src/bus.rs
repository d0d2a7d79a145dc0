use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use flashclaw_core::config::TuningConfig;
use flashclaw_core::paths::Paths;
use flashclaw_core::types::IpcEnvelope;
use tokio::sync::watch;
use tracing::{debug, error, instrument, warn};

use crate::authorize::authorize;
use crate::dispatcher::Dispatcher;
use crate::validate;

/// Polls `<root>/data/ipc/*/{messages,tasks}/*.json` and dispatches each
/// file's envelope, unlinking it on success and quarantining it to
/// `<group>/errors/` on any failure (§4.7).
pub struct IpcBus {
    paths: Arc<Paths>,
    dispatcher: Arc<dyn Dispatcher>,
    poll_interval: Duration,
    max_file_bytes: u64,
    main_group_folder: String,
    tuning: TuningConfig,
}

impl IpcBus {
    pub fn new(paths: Arc<Paths>, dispatcher: Arc<dyn Dispatcher>, tuning: TuningConfig) -> Self {
        Self {
            paths,
            dispatcher,
            poll_interval: Duration::from_millis(tuning.ipc_poll_interval_ms),
            max_file_bytes: tuning.max_ipc_file_bytes,
            main_group_folder: tuning.main_group_folder.clone(),
            tuning,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {
                    self.poll_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn poll_once(&self) {
        let ipc_dir = self.paths.ipc_dir();
        let Ok(read_dir) = std::fs::read_dir(&ipc_dir) else {
            return;
        };

        for group_entry in read_dir.flatten() {
            let path = group_entry.path();
            if !path.is_dir() {
                continue;
            }
            let source_group = group_entry.file_name().to_string_lossy().into_owned();

            for sub in ["messages", "tasks"] {
                let sub_dir = path.join(sub);
                let Ok(files) = std::fs::read_dir(&sub_dir) else {
                    continue;
                };
                for file_entry in files.flatten() {
                    let file_path = file_entry.path();
                    if file_path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    self.process_file(&source_group, &file_path).await;
                }
            }
        }
    }

    #[instrument(skip(self), fields(source_group, file = %file_path.display()))]
    async fn process_file(&self, source_group: &str, file_path: &Path) {
        match self.handle_file(source_group, file_path).await {
            Ok(()) => {
                if let Err(e) = std::fs::remove_file(file_path) {
                    warn!(error = %e, "failed to unlink processed IPC file");
                }
            }
            Err(e) => {
                warn!(error = %e, "IPC file rejected, quarantining");
                self.quarantine(source_group, file_path);
            }
        }
    }

    async fn handle_file(&self, source_group: &str, file_path: &Path) -> crate::error::Result<()> {
        let metadata = std::fs::metadata(file_path)?;
        if metadata.len() > self.max_file_bytes {
            return Err(crate::error::IpcError::TooLarge(metadata.len()));
        }

        let content = std::fs::read_to_string(file_path)?;
        let envelope: IpcEnvelope = serde_json::from_str(&content)?;

        validate::validate(&envelope, &self.tuning)?;
        authorize(&envelope, source_group, &self.main_group_folder, self.dispatcher.as_ref()).await?;

        self.dispatch(source_group, &envelope)
            .await
            .map_err(crate::error::IpcError::Dispatch)?;

        debug!("IPC envelope dispatched");
        Ok(())
    }

    /// `source_group` is the fallback target when an envelope omits
    /// `groupFolder` — `target_folder()`/`authorize()` resolve that omission
    /// to `IpcTargetFolder::SameAsSource` (§4.7), so dispatch must honour the
    /// same resolution rather than passing an empty folder downstream.
    async fn dispatch(&self, source_group: &str, envelope: &IpcEnvelope) -> Result<(), String> {
        match envelope {
            IpcEnvelope::Message {
                chat_jid,
                text,
                group_folder,
                platform,
            } => {
                let target = group_folder.clone().unwrap_or_else(|| source_group.to_string());
                self.dispatcher
                    .send_message(&target, chat_jid, text, platform.clone())
                    .await
            }
            IpcEnvelope::Image {
                chat_jid,
                image_data,
                caption,
                group_folder,
                platform,
            } => {
                let target = group_folder.clone().unwrap_or_else(|| source_group.to_string());
                self.dispatcher
                    .send_image(&target, chat_jid, image_data, caption.clone(), platform.clone())
                    .await
            }
            IpcEnvelope::ScheduleTask {
                prompt,
                schedule_type,
                schedule_value,
                group_folder,
                context_mode,
                max_retries,
                timeout_ms,
            } => {
                self.dispatcher
                    .schedule_task(
                        group_folder,
                        prompt,
                        *schedule_type,
                        schedule_value,
                        (*context_mode).unwrap_or(flashclaw_core::types::ContextMode::Group),
                        *max_retries,
                        *timeout_ms,
                    )
                    .await
            }
            IpcEnvelope::PauseTask { task_id } => self.dispatcher.pause_task(task_id).await,
            IpcEnvelope::ResumeTask { task_id } => self.dispatcher.resume_task(task_id).await,
            IpcEnvelope::CancelTask { task_id } => self.dispatcher.cancel_task(task_id).await,
            IpcEnvelope::RegisterGroup {
                jid,
                name,
                folder,
                trigger,
                agent_config,
            } => {
                self.dispatcher
                    .register_group(jid, name, folder, trigger, agent_config.clone())
                    .await
            }
        }
    }

    fn quarantine(&self, source_group: &str, file_path: &Path) {
        if let Err(e) = self.paths.ensure_ipc_group_dirs(source_group) {
            error!(error = %e, "failed to ensure IPC error dir before quarantining");
            return;
        }
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown.json".to_string());
        let dest: PathBuf = self
            .paths
            .ipc_errors_dir(source_group)
            .join(format!("{source_group}-{file_name}"));
        if let Err(e) = std::fs::rename(file_path, &dest) {
            error!(error = %e, dest = %dest.display(), "failed to quarantine IPC file");
        }
    }
}
