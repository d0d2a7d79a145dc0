/// One row of the `task_runs` log (§6.4 `logTaskRun`).
#[derive(Debug, Clone)]
pub struct TaskRun {
    pub task_id: String,
    pub ran_at: chrono::DateTime<chrono::Utc>,
    pub success: bool,
    pub result: Option<String>,
}

/// Fields `updateTaskAfterRun` is allowed to change on success (§4.6).
#[derive(Debug, Clone)]
pub struct TaskRunOutcome {
    pub next_run: Option<chrono::DateTime<chrono::Utc>>,
    pub last_result: Option<String>,
    pub status: flashclaw_core::types::TaskStatus,
}
