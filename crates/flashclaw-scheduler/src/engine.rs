use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Utc;
use flashclaw_core::types::{ScheduledTask, TaskStatus};
use flashclaw_store::{Store, TaskRun, TaskRunOutcome};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::schedule;

/// Base retry delay (§4.6: `base = 60_000 ms`).
const RETRY_BASE_MS: i64 = 60_000;
/// Retry delay cap (§4.6: `cap = 3_600_000 ms`).
const RETRY_CAP_MS: i64 = 3_600_000;
/// `setTimeout` max delay; longer horizons re-arm on wake instead (§4.6, §5).
const MAX_TIMER_MS: i64 = i32::MAX as i64;
/// Default concurrency limit for due-task execution (§4.6).
const DEFAULT_CONCURRENCY: usize = 3;
/// `lastResult` is truncated to this many chars before persisting (§4.6).
const RESULT_TRUNCATE_CHARS: usize = 200;

/// Runs one scheduled task to completion. Implemented by whatever wires in
/// the agent runner — the scheduler itself has no notion of prompts or LLMs.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &ScheduledTask) -> std::result::Result<String, String>;
}

/// Handle for creating/pausing/resuming/cancelling tasks and waking the
/// engine, shared between the IPC bus, slash commands, and the engine itself.
#[derive(Clone)]
pub struct SchedulerHandle {
    store: Arc<dyn Store>,
    wake_tx: mpsc::UnboundedSender<()>,
}

impl SchedulerHandle {
    pub fn new(store: Arc<dyn Store>, wake_tx: mpsc::UnboundedSender<()>) -> Self {
        Self { store, wake_tx }
    }

    /// Validates the schedule value, inserts the task, and calls `wake()`
    /// immediately (§4.7 "call `wake()` on the scheduler").
    #[instrument(skip(self, prompt))]
    pub fn create_task(
        &self,
        group_folder: &str,
        chat_id: &str,
        prompt: &str,
        schedule_type: flashclaw_core::types::ScheduleType,
        schedule_value: &str,
        context_mode: flashclaw_core::types::ContextMode,
        max_retries: Option<u32>,
        timeout_ms: Option<u64>,
    ) -> Result<ScheduledTask> {
        schedule::validate(schedule_type, schedule_value)?;
        let now = Utc::now();
        let next_run = schedule::next_run_after(schedule_type, schedule_value, now)?;
        let task = ScheduledTask {
            id: Uuid::new_v4().to_string(),
            group_folder: group_folder.to_string(),
            chat_id: chat_id.to_string(),
            prompt: prompt.to_string(),
            schedule_type,
            schedule_value: schedule_value.to_string(),
            context_mode,
            next_run,
            last_run: None,
            last_result: None,
            status: if next_run.is_some() {
                TaskStatus::Active
            } else {
                TaskStatus::Completed
            },
            retry_count: 0,
            max_retries: max_retries.unwrap_or(ScheduledTask::DEFAULT_MAX_RETRIES),
            timeout_ms: timeout_ms.unwrap_or(ScheduledTask::DEFAULT_TIMEOUT_MS),
        };
        self.store.create_task(&task)?;
        self.wake();
        Ok(task)
    }

    pub fn pause_task(&self, id: &str) -> Result<()> {
        let mut task = self.get(id)?;
        task.status = TaskStatus::Paused;
        task.next_run = None;
        self.store.update_task(&task)?;
        Ok(())
    }

    pub fn resume_task(&self, id: &str) -> Result<()> {
        let mut task = self.get(id)?;
        let next_run = schedule::next_run_after(task.schedule_type, &task.schedule_value, Utc::now())?;
        task.status = if next_run.is_some() {
            TaskStatus::Active
        } else {
            TaskStatus::Completed
        };
        task.next_run = next_run;
        self.store.update_task(&task)?;
        self.wake();
        Ok(())
    }

    pub fn cancel_task(&self, id: &str) -> Result<()> {
        self.store.delete_task(id)?;
        Ok(())
    }

    pub fn get_task(&self, id: &str) -> Result<Option<ScheduledTask>> {
        Ok(self.store.get_task_by_id(id)?)
    }

    /// Tasks belonging to `chat_id`, for the `/tasks` slash command (§4.9).
    pub fn list_tasks_for_chat(&self, chat_id: &str) -> Result<Vec<ScheduledTask>> {
        Ok(self
            .store
            .get_all_tasks()?
            .into_iter()
            .filter(|t| t.chat_id == chat_id)
            .collect())
    }

    fn get(&self, id: &str) -> Result<ScheduledTask> {
        self.store
            .get_task_by_id(id)?
            .ok_or_else(|| SchedulerError::TaskNotFound { id: id.to_string() })
    }

    /// External trigger (§4.6): re-arm the engine's timer immediately,
    /// e.g. right after a task is created or resumed.
    pub fn wake(&self) {
        let _ = self.wake_tx.send(());
    }
}

/// Drives the armed single-timer scheduling loop (§4.6).
pub struct SchedulerEngine {
    store: Arc<dyn Store>,
    concurrency: usize,
    wake_rx: mpsc::UnboundedReceiver<()>,
}

impl SchedulerEngine {
    pub fn new(store: Arc<dyn Store>) -> (Self, SchedulerHandle) {
        Self::with_concurrency(store, DEFAULT_CONCURRENCY)
    }

    pub fn with_concurrency(store: Arc<dyn Store>, concurrency: usize) -> (Self, SchedulerHandle) {
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        let handle = SchedulerHandle::new(store.clone(), wake_tx);
        (
            Self {
                store,
                concurrency,
                wake_rx,
            },
            handle,
        )
    }

    /// Main loop: sleep until the next known wake time (clamped, re-armed on
    /// each wake per §4.6 and §8 P6/boundary), run due tasks, repeat. Exits
    /// on `shutdown` (§5 graceful shutdown "stop scheduler timer").
    pub async fn run(mut self, executor: Arc<dyn TaskExecutor>, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler engine started");
        loop {
            let delay = self.next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = self.run_due(executor.clone()).await {
                        error!("scheduler tick error: {e}");
                    }
                }
                _ = self.wake_rx.recv() => {
                    // Re-arm: loop back around and recompute the delay.
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    fn next_delay(&self) -> StdDuration {
        let next_wake = match self.store.get_next_wake_time() {
            Ok(w) => w,
            Err(e) => {
                error!("failed to read next wake time: {e}");
                return StdDuration::from_secs(1);
            }
        };
        let Some(next_wake) = next_wake else {
            // Nothing scheduled — a long sleep, interruptible by `wake()`.
            return StdDuration::from_millis(MAX_TIMER_MS as u64);
        };
        let millis = (next_wake - Utc::now()).num_milliseconds().max(0);
        StdDuration::from_millis(millis.min(MAX_TIMER_MS) as u64)
    }

    async fn run_due(&self, executor: Arc<dyn TaskExecutor>) -> Result<()> {
        let now = Utc::now();
        let due = self.store.get_due_tasks(now)?;
        if due.is_empty() {
            return Ok(());
        }
        let semaphore = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let mut handles = Vec::with_capacity(due.len());
        for task in due {
            let store = self.store.clone();
            let executor = executor.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                run_one(store, executor, &task.id).await
            }));
        }
        for h in handles {
            if let Err(e) = h.await {
                error!("scheduled task task panicked: {e}");
            }
        }
        Ok(())
    }
}

/// Re-reads the task before executing it — if another writer paused or
/// cancelled it since `get_due_tasks` ran, skip (§4.6).
#[instrument(skip(store, executor), fields(task_id = %task_id))]
async fn run_one(store: Arc<dyn Store>, executor: Arc<dyn TaskExecutor>, task_id: &str) {
    let task = match store.get_task_by_id(task_id) {
        Ok(Some(t)) => t,
        Ok(None) => return,
        Err(e) => {
            error!("failed to re-read task before execution: {e}");
            return;
        }
    };
    if task.status != TaskStatus::Active {
        return;
    }

    let deadline = StdDuration::from_millis(task.timeout_ms);
    let outcome = timeout(deadline, executor.execute(&task)).await;

    match outcome {
        Ok(Ok(result)) => on_success(&store, &task, &result),
        Ok(Err(err)) => on_failure(&store, &task, &err),
        Err(_) => on_failure(&store, &task, &format!("timed out after {}ms", task.timeout_ms)),
    }
}

fn on_success(store: &Arc<dyn Store>, task: &ScheduledTask, result: &str) {
    let now = Utc::now();
    let truncated = truncate_chars(result, RESULT_TRUNCATE_CHARS);
    let next_run = match schedule::next_run_after(task.schedule_type, &task.schedule_value, now) {
        Ok(n) => n,
        Err(e) => {
            error!(task_id = %task.id, "failed to compute next run after success: {e}");
            None
        }
    };
    let status = if next_run.is_some() {
        TaskStatus::Active
    } else {
        TaskStatus::Completed
    };
    if let Err(e) = store.reset_task_retry(&task.id) {
        warn!(task_id = %task.id, "failed to reset retry count: {e}");
    }
    if let Err(e) = store.update_task_after_run(
        &task.id,
        &TaskRunOutcome {
            next_run,
            last_result: Some(truncated.clone()),
            status,
        },
    ) {
        error!(task_id = %task.id, "failed to persist successful run: {e}");
    }
    let _ = store.log_task_run(&TaskRun {
        task_id: task.id.clone(),
        ran_at: now,
        success: true,
        result: Some(truncated),
    });
}

fn on_failure(store: &Arc<dyn Store>, task: &ScheduledTask, err: &str) {
    let now = Utc::now();
    let retry_count = task.retry_count + 1;
    let _ = store.log_task_run(&TaskRun {
        task_id: task.id.clone(),
        ran_at: now,
        success: false,
        result: Some(truncate_chars(err, RESULT_TRUNCATE_CHARS)),
    });

    if retry_count >= task.max_retries {
        // Retry budget exhausted (§4.6): once-tasks complete; recurring
        // tasks reset and schedule their normal next occurrence.
        let next_run = schedule::next_run_after(task.schedule_type, &task.schedule_value, now)
            .unwrap_or(None);
        let status = if next_run.is_some() {
            TaskStatus::Active
        } else {
            TaskStatus::Completed
        };
        if let Err(e) = store.reset_task_retry(&task.id) {
            warn!(task_id = %task.id, "failed to reset retry count: {e}");
        }
        if let Err(e) = store.update_task_after_run(
            &task.id,
            &TaskRunOutcome {
                next_run,
                last_result: Some(format!("失败（已达最大重试次数）: {}", truncate_chars(err, 150))),
                status,
            },
        ) {
            error!(task_id = %task.id, "failed to persist exhausted-retry outcome: {e}");
        }
        return;
    }

    let delay_ms = (RETRY_BASE_MS * 2i64.pow(retry_count - 1)).min(RETRY_CAP_MS);
    let next_run = now + chrono::Duration::milliseconds(delay_ms);
    if let Err(e) = store.update_task_retry(&task.id, retry_count, next_run) {
        error!(task_id = %task.id, "failed to persist retry: {e}");
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
