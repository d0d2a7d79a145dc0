use rusqlite::Connection;

use crate::error::Result;

/// Initialises the messages/chats/tasks schema (§6.4). Safe to call on every
/// startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS chats (
            chat_id          TEXT NOT NULL PRIMARY KEY,
            platform         TEXT NOT NULL,
            chat_type        TEXT NOT NULL,
            folder           TEXT NOT NULL,
            agent_timeout_ms INTEGER,
            created_at       TEXT NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS messages (
            id                   TEXT NOT NULL,
            chat_id              TEXT NOT NULL,
            sender_id            TEXT NOT NULL,
            sender_name          TEXT NOT NULL,
            content              TEXT NOT NULL,
            timestamp            TEXT NOT NULL,
            chat_type            TEXT NOT NULL,
            platform             TEXT NOT NULL,
            attachments          TEXT,
            mentions             TEXT,
            reply_to_message_id  TEXT,
            PRIMARY KEY (chat_id, id)
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
            ON messages (chat_id, timestamp);

        CREATE TABLE IF NOT EXISTS tasks (
            id             TEXT NOT NULL PRIMARY KEY,
            group_folder   TEXT NOT NULL,
            chat_id        TEXT NOT NULL,
            prompt         TEXT NOT NULL,
            schedule_type  TEXT NOT NULL,
            schedule_value TEXT NOT NULL,
            context_mode   TEXT NOT NULL,
            next_run       TEXT,
            last_run       TEXT,
            last_result    TEXT,
            status         TEXT NOT NULL,
            retry_count    INTEGER NOT NULL DEFAULT 0,
            max_retries    INTEGER NOT NULL DEFAULT 3,
            timeout_ms     INTEGER NOT NULL DEFAULT 300000
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_tasks_next_run ON tasks (next_run);
        CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status);

        CREATE TABLE IF NOT EXISTS task_runs (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id    TEXT NOT NULL,
            ran_at     TEXT NOT NULL,
            success    INTEGER NOT NULL,
            result     TEXT
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_task_runs_task ON task_runs (task_id, ran_at);
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_db_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
    }
}
