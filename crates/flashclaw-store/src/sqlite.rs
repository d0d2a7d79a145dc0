use std::sync::Mutex;

use chrono::{DateTime, Utc};
use flashclaw_core::types::{
    Chat, ChatType, ContextMode, Message, ScheduleType, ScheduledTask, TaskStatus,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::instrument;

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::{TaskRun, TaskRunOutcome};

pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }
}

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Internal(format!("bad timestamp {s}: {e}")))
}

fn chat_type_str(t: ChatType) -> &'static str {
    match t {
        ChatType::P2p => "p2p",
        ChatType::Group => "group",
    }
}

fn parse_chat_type(s: &str) -> Result<ChatType> {
    match s {
        "p2p" => Ok(ChatType::P2p),
        "group" => Ok(ChatType::Group),
        other => Err(StoreError::Internal(format!("unknown chat_type {other}"))),
    }
}

fn schedule_type_str(t: ScheduleType) -> &'static str {
    match t {
        ScheduleType::Cron => "cron",
        ScheduleType::Interval => "interval",
        ScheduleType::Once => "once",
    }
}

fn parse_schedule_type(s: &str) -> Result<ScheduleType> {
    match s {
        "cron" => Ok(ScheduleType::Cron),
        "interval" => Ok(ScheduleType::Interval),
        "once" => Ok(ScheduleType::Once),
        other => Err(StoreError::Internal(format!("unknown schedule_type {other}"))),
    }
}

fn context_mode_str(m: ContextMode) -> &'static str {
    match m {
        ContextMode::Group => "group",
        ContextMode::Isolated => "isolated",
    }
}

fn parse_context_mode(s: &str) -> Result<ContextMode> {
    match s {
        "group" => Ok(ContextMode::Group),
        "isolated" => Ok(ContextMode::Isolated),
        other => Err(StoreError::Internal(format!("unknown context_mode {other}"))),
    }
}

fn task_status_str(s: TaskStatus) -> &'static str {
    match s {
        TaskStatus::Active => "active",
        TaskStatus::Paused => "paused",
        TaskStatus::Completed => "completed",
    }
}

fn parse_task_status(s: &str) -> Result<TaskStatus> {
    match s {
        "active" => Ok(TaskStatus::Active),
        "paused" => Ok(TaskStatus::Paused),
        "completed" => Ok(TaskStatus::Completed),
        other => Err(StoreError::Internal(format!("unknown status {other}"))),
    }
}

fn row_to_message(row: &Row) -> rusqlite::Result<(Message, String, Option<String>)> {
    let attachments_json: Option<String> = row.get("attachments")?;
    let mentions_json: Option<String> = row.get("mentions")?;
    let chat_type_s: String = row.get("chat_type")?;
    let timestamp_s: String = row.get("timestamp")?;
    Ok((
        Message {
            id: row.get("id")?,
            chat_id: row.get("chat_id")?,
            sender_id: row.get("sender_id")?,
            sender_name: row.get("sender_name")?,
            content: row.get("content")?,
            timestamp: DateTime::parse_from_rfc3339(&timestamp_s)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            chat_type: parse_chat_type(&chat_type_s).unwrap_or(ChatType::P2p),
            platform: row.get("platform")?,
            attachments: attachments_json
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok()),
            mentions: mentions_json
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok()),
            reply_to_message_id: row.get("reply_to_message_id")?,
        },
        chat_type_s,
        mentions_json,
    ))
}

fn row_to_chat(row: &Row) -> rusqlite::Result<Chat> {
    let chat_type_s: String = row.get("chat_type")?;
    Ok(Chat {
        chat_id: row.get("chat_id")?,
        platform: row.get("platform")?,
        chat_type: parse_chat_type(&chat_type_s).unwrap_or(ChatType::P2p),
        folder: row.get("folder")?,
        agent_timeout_ms: row.get::<_, Option<i64>>("agent_timeout_ms")?.map(|v| v as u64),
    })
}

fn row_to_task(row: &Row) -> rusqlite::Result<ScheduledTask> {
    let schedule_type_s: String = row.get("schedule_type")?;
    let context_mode_s: String = row.get("context_mode")?;
    let status_s: String = row.get("status")?;
    let next_run_s: Option<String> = row.get("next_run")?;
    let last_run_s: Option<String> = row.get("last_run")?;
    Ok(ScheduledTask {
        id: row.get("id")?,
        group_folder: row.get("group_folder")?,
        chat_id: row.get("chat_id")?,
        prompt: row.get("prompt")?,
        schedule_type: parse_schedule_type(&schedule_type_s).unwrap_or(ScheduleType::Once),
        schedule_value: row.get("schedule_value")?,
        context_mode: parse_context_mode(&context_mode_s).unwrap_or(ContextMode::Group),
        next_run: next_run_s.and_then(|s| parse_ts(&s).ok()),
        last_run: last_run_s.and_then(|s| parse_ts(&s).ok()),
        last_result: row.get("last_result")?,
        status: parse_task_status(&status_s).unwrap_or(TaskStatus::Paused),
        retry_count: row.get::<_, i64>("retry_count")? as u32,
        max_retries: row.get::<_, i64>("max_retries")? as u32,
        timeout_ms: row.get::<_, i64>("timeout_ms")? as u64,
    })
}

impl Store for SqliteStore {
    #[instrument(skip(self, msg), fields(chat_id = %msg.chat_id, message_id = %msg.id))]
    fn store_message(&self, msg: &Message) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR IGNORE INTO messages
             (id, chat_id, sender_id, sender_name, content, timestamp, chat_type,
              platform, attachments, mentions, reply_to_message_id)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            params![
                msg.id,
                msg.chat_id,
                msg.sender_id,
                msg.sender_name,
                msg.content,
                ts(msg.timestamp),
                chat_type_str(msg.chat_type),
                msg.platform,
                msg.attachments.as_ref().map(|a| serde_json::to_string(a)).transpose()?,
                msg.mentions.as_ref().map(|m| serde_json::to_string(m)).transpose()?,
                msg.reply_to_message_id,
            ],
        )?;
        Ok(())
    }

    fn message_exists(&self, id: &str, chat_id: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM messages WHERE id = ?1 AND chat_id = ?2",
            params![id, chat_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn get_messages_since(&self, chat_id: &str, since: DateTime<Utc>) -> Result<Vec<Message>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT * FROM messages WHERE chat_id = ?1 AND timestamp >= ?2 ORDER BY timestamp ASC",
        )?;
        let rows = stmt
            .query_map(params![chat_id, ts(since)], row_to_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows.into_iter().map(|(m, _, _)| m).collect())
    }

    fn get_chat_history(
        &self,
        chat_id: &str,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        let db = self.db.lock().unwrap();
        let since_s = since.map(ts).unwrap_or_default();
        let mut stmt = db.prepare(
            "SELECT * FROM messages
             WHERE chat_id = ?1 AND (?2 = '' OR timestamp >= ?2)
             ORDER BY timestamp DESC LIMIT ?3",
        )?;
        let mut rows = stmt
            .query_map(params![chat_id, since_s, limit as i64], row_to_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(m, _, _)| m)
            .collect::<Vec<_>>();
        rows.reverse();
        Ok(rows)
    }

    fn store_chat_metadata(&self, chat: &Chat) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO chats (chat_id, platform, chat_type, folder, agent_timeout_ms, created_at)
             VALUES (?1,?2,?3,?4,?5,?6)
             ON CONFLICT(chat_id) DO UPDATE SET
               platform=excluded.platform, chat_type=excluded.chat_type,
               folder=excluded.folder, agent_timeout_ms=excluded.agent_timeout_ms",
            params![
                chat.chat_id,
                chat.platform,
                chat_type_str(chat.chat_type),
                chat.folder,
                chat.agent_timeout_ms.map(|v| v as i64),
                ts(Utc::now()),
            ],
        )?;
        Ok(())
    }

    fn get_all_chats(&self) -> Result<Vec<Chat>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare("SELECT * FROM chats")?;
        let rows = stmt
            .query_map([], row_to_chat)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn create_task(&self, task: &ScheduledTask) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO tasks
             (id, group_folder, chat_id, prompt, schedule_type, schedule_value,
              context_mode, next_run, last_run, last_result, status, retry_count,
              max_retries, timeout_ms)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            params![
                task.id,
                task.group_folder,
                task.chat_id,
                task.prompt,
                schedule_type_str(task.schedule_type),
                task.schedule_value,
                context_mode_str(task.context_mode),
                task.next_run.map(ts),
                task.last_run.map(ts),
                task.last_result,
                task_status_str(task.status),
                task.retry_count,
                task.max_retries,
                task.timeout_ms as i64,
            ],
        )?;
        Ok(())
    }

    fn get_task_by_id(&self, id: &str) -> Result<Option<ScheduledTask>> {
        let db = self.db.lock().unwrap();
        let task = db
            .query_row("SELECT * FROM tasks WHERE id = ?1", params![id], row_to_task)
            .optional()?;
        Ok(task)
    }

    fn update_task(&self, task: &ScheduledTask) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE tasks SET group_folder=?2, chat_id=?3, prompt=?4, schedule_type=?5,
             schedule_value=?6, context_mode=?7, next_run=?8, last_run=?9, last_result=?10,
             status=?11, retry_count=?12, max_retries=?13, timeout_ms=?14
             WHERE id=?1",
            params![
                task.id,
                task.group_folder,
                task.chat_id,
                task.prompt,
                schedule_type_str(task.schedule_type),
                task.schedule_value,
                context_mode_str(task.context_mode),
                task.next_run.map(ts),
                task.last_run.map(ts),
                task.last_result,
                task_status_str(task.status),
                task.retry_count,
                task.max_retries,
                task.timeout_ms as i64,
            ],
        )?;
        Ok(())
    }

    fn update_task_after_run(&self, id: &str, outcome: &TaskRunOutcome) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE tasks SET next_run=?2, last_run=?3, last_result=?4, status=?5, retry_count=0
             WHERE id=?1",
            params![
                id,
                outcome.next_run.map(ts),
                ts(Utc::now()),
                outcome.last_result,
                task_status_str(outcome.status),
            ],
        )?;
        Ok(())
    }

    fn update_task_retry(&self, id: &str, retry_count: u32, next_run: DateTime<Utc>) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE tasks SET retry_count=?2, next_run=?3, last_run=?4 WHERE id=?1",
            params![id, retry_count, ts(next_run), ts(Utc::now())],
        )?;
        Ok(())
    }

    fn reset_task_retry(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("UPDATE tasks SET retry_count=0 WHERE id=?1", params![id])?;
        Ok(())
    }

    fn delete_task(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("DELETE FROM tasks WHERE id=?1", params![id])?;
        Ok(())
    }

    fn log_task_run(&self, run: &TaskRun) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO task_runs (task_id, ran_at, success, result) VALUES (?1,?2,?3,?4)",
            params![run.task_id, ts(run.ran_at), run.success as i64, run.result],
        )?;
        Ok(())
    }

    fn get_all_tasks(&self) -> Result<Vec<ScheduledTask>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare("SELECT * FROM tasks")?;
        let rows = stmt
            .query_map([], row_to_task)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn get_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT * FROM tasks WHERE status = 'active' AND next_run IS NOT NULL
             AND next_run <= ?1 ORDER BY next_run ASC",
        )?;
        let rows = stmt
            .query_map(params![ts(now)], row_to_task)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn get_next_wake_time(&self) -> Result<Option<DateTime<Utc>>> {
        let db = self.db.lock().unwrap();
        let next: Option<String> = db
            .query_row(
                "SELECT MIN(next_run) FROM tasks WHERE status = 'active' AND next_run IS NOT NULL",
                [],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        next.map(|s| parse_ts(&s)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message(id: &str, chat_id: &str) -> Message {
        Message {
            id: id.to_string(),
            chat_id: chat_id.to_string(),
            sender_id: "u1".to_string(),
            sender_name: "Alice".to_string(),
            content: "hello".to_string(),
            timestamp: Utc::now(),
            chat_type: ChatType::P2p,
            platform: "telegram".to_string(),
            attachments: None,
            mentions: None,
            reply_to_message_id: None,
        }
    }

    #[test]
    fn store_message_dedupes_by_id_within_chat() {
        let store = SqliteStore::open_in_memory().unwrap();
        let msg = sample_message("m1", "c1");
        store.store_message(&msg).unwrap();
        store.store_message(&msg).unwrap();
        let history = store.get_chat_history("c1", 10, None).unwrap();
        assert_eq!(history.len(), 1);
        assert!(store.message_exists("m1", "c1").unwrap());
        assert!(!store.message_exists("m1", "other-chat").unwrap());
    }

    #[test]
    fn get_chat_history_returns_chronological_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        for i in 0..3 {
            let mut m = sample_message(&format!("m{i}"), "c1");
            m.timestamp = Utc::now() + chrono::Duration::seconds(i);
            store.store_message(&m).unwrap();
        }
        let history = store.get_chat_history("c1", 10, None).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].id, "m0");
        assert_eq!(history[2].id, "m2");
    }

    #[test]
    fn task_lifecycle_round_trips() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();
        let task = ScheduledTask {
            id: "t1".to_string(),
            group_folder: "main".to_string(),
            chat_id: "c1".to_string(),
            prompt: "check the weather".to_string(),
            schedule_type: ScheduleType::Once,
            schedule_value: now.to_rfc3339(),
            context_mode: ContextMode::Isolated,
            next_run: Some(now),
            last_run: None,
            last_result: None,
            status: TaskStatus::Active,
            retry_count: 0,
            max_retries: 3,
            timeout_ms: 300_000,
        };
        store.create_task(&task).unwrap();

        let fetched = store.get_task_by_id("t1").unwrap().unwrap();
        assert_eq!(fetched.prompt, "check the weather");

        let due = store.get_due_tasks(now + chrono::Duration::seconds(1)).unwrap();
        assert_eq!(due.len(), 1);

        store
            .update_task_after_run(
                "t1",
                &TaskRunOutcome {
                    next_run: None,
                    last_result: Some("ok".to_string()),
                    status: TaskStatus::Completed,
                },
            )
            .unwrap();
        let after = store.get_task_by_id("t1").unwrap().unwrap();
        assert_eq!(after.status, TaskStatus::Completed);
        assert!(after.next_run.is_none());

        assert!(store.get_next_wake_time().unwrap().is_none());

        store.delete_task("t1").unwrap();
        assert!(store.get_task_by_id("t1").unwrap().is_none());
    }

    #[test]
    fn get_next_wake_time_returns_earliest_active_task() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();
        for (id, offset) in [("t1", 30), ("t2", 10), ("t3", 60)] {
            store
                .create_task(&ScheduledTask {
                    id: id.to_string(),
                    group_folder: "main".to_string(),
                    chat_id: "c1".to_string(),
                    prompt: "p".to_string(),
                    schedule_type: ScheduleType::Interval,
                    schedule_value: "60000".to_string(),
                    context_mode: ContextMode::Group,
                    next_run: Some(now + chrono::Duration::seconds(offset)),
                    last_run: None,
                    last_result: None,
                    status: TaskStatus::Active,
                    retry_count: 0,
                    max_retries: 3,
                    timeout_ms: 300_000,
                })
                .unwrap();
        }
        let wake = store.get_next_wake_time().unwrap().unwrap();
        assert_eq!(wake, now + chrono::Duration::seconds(10));
    }
}
