//! Atomic IPC envelope emission, shared by every tool plugin and channel
//! adapter that needs to hand work to the IPC Bus (§4.7) without depending
//! on `flashclaw-ipc` itself (which reads these files, not writes them).
//!
//! Files are written to a `.tmp` sibling and renamed into place so the bus
//! never observes a partially-written envelope (§3 "IPC envelope ...
//! atomic").

use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::paths::Paths;
use crate::types::IpcEnvelope;

/// Which subdirectory under `data/ipc/<group>/` an envelope belongs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcKind {
    Message,
    Task,
}

/// Writes `envelope` into `data/ipc/<source_group>/{messages,tasks}/` as
/// `<epoch_ms>-<rand>.json`, tmp-file + rename for atomicity.
pub fn emit(paths: &Paths, source_group: &str, kind: IpcKind, envelope: &IpcEnvelope) -> std::io::Result<PathBuf> {
    let dir = match kind {
        IpcKind::Message => paths.ipc_messages_dir(source_group),
        IpcKind::Task => paths.ipc_tasks_dir(source_group),
    };
    std::fs::create_dir_all(&dir)?;

    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let rand = random_suffix();
    let name = format!("{millis}-{rand}.json");

    let final_path = dir.join(&name);
    let tmp_path = dir.join(format!("{name}.tmp"));

    let body = serde_json::to_vec_pretty(envelope)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    {
        let mut f = std::fs::File::create(&tmp_path)?;
        f.write_all(&body)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp_path, &final_path)?;

    Ok(final_path)
}

/// Small collision-avoidance suffix, derived from the current time's
/// sub-millisecond component plus the process id — no `rand` dependency
/// needed for a filename that only needs to avoid same-millisecond clashes
/// from a single process.
fn random_suffix() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("{:06x}{:x}", nanos % 0x1_000_000, std::process::id() & 0xfff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScheduleType;

    #[test]
    fn emit_writes_readable_envelope_into_messages_dir() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::new(dir.path().to_path_buf());
        let envelope = IpcEnvelope::Message {
            chat_jid: "c1".to_string(),
            text: "hello".to_string(),
            group_folder: None,
            platform: None,
        };
        let path = emit(&paths, "main", IpcKind::Message, &envelope).unwrap();
        assert!(path.starts_with(paths.ipc_messages_dir("main")));
        let content = std::fs::read_to_string(&path).unwrap();
        let round_tripped: IpcEnvelope = serde_json::from_str(&content).unwrap();
        match round_tripped {
            IpcEnvelope::Message { text, .. } => assert_eq!(text, "hello"),
            other => panic!("unexpected envelope {other:?}"),
        }
    }

    #[test]
    fn emit_writes_schedule_task_into_tasks_dir() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::new(dir.path().to_path_buf());
        let envelope = IpcEnvelope::ScheduleTask {
            prompt: "ping me".to_string(),
            schedule_type: ScheduleType::Once,
            schedule_value: "2026-01-01T00:00:00Z".to_string(),
            group_folder: "main".to_string(),
            context_mode: None,
            max_retries: None,
            timeout_ms: None,
        };
        let path = emit(&paths, "main", IpcKind::Task, &envelope).unwrap();
        assert!(path.starts_with(paths.ipc_tasks_dir("main")));
    }

    #[test]
    fn no_tmp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::new(dir.path().to_path_buf());
        let envelope = IpcEnvelope::PauseTask { task_id: "t1".to_string() };
        emit(&paths, "main", IpcKind::Task, &envelope).unwrap();
        let entries: Vec<_> = std::fs::read_dir(paths.ipc_tasks_dir("main"))
            .unwrap()
            .flatten()
            .collect();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].file_name().to_string_lossy().ends_with(".tmp"));
    }
}
