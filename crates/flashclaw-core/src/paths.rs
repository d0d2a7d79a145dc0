use std::path::{Path, PathBuf};

use crate::error::Result;

/// Default folder name used for administrative IPC privileges and the
/// built-in template every newly-registered chat clones from.
pub const MAIN_GROUP_FOLDER: &str = "main";

/// Resolves every path under the per-user state root (§6.5).
///
/// Directories are created lazily, on first use, via the `*_dir` helpers —
/// never eagerly at startup, since most group/ipc subdirectories don't exist
/// until a chat is registered.
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// `${FLASHCLAW_HOME:-~/.flashclaw}`.
    pub fn default_root() -> PathBuf {
        if let Ok(home) = std::env::var("FLASHCLAW_HOME") {
            return PathBuf::from(home);
        }
        dirs_home().join(".flashclaw")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn env_file(&self) -> PathBuf {
        self.root.join(".env")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    pub fn plugins_config_file(&self) -> PathBuf {
        self.config_dir().join("plugins.json")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn database_file(&self) -> PathBuf {
        self.data_dir().join("flashclaw.db")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.data_dir().join("flashclaw.pid")
    }

    pub fn sessions_file(&self) -> PathBuf {
        self.data_dir().join("sessions.json")
    }

    pub fn router_state_file(&self) -> PathBuf {
        self.data_dir().join("router_state.json")
    }

    pub fn registered_groups_file(&self) -> PathBuf {
        self.data_dir().join("registered_groups.json")
    }

    pub fn ipc_dir(&self) -> PathBuf {
        self.data_dir().join("ipc")
    }

    pub fn ipc_group_dir(&self, group_folder: &str) -> PathBuf {
        self.ipc_dir().join(group_folder)
    }

    pub fn ipc_messages_dir(&self, group_folder: &str) -> PathBuf {
        self.ipc_group_dir(group_folder).join("messages")
    }

    pub fn ipc_tasks_dir(&self, group_folder: &str) -> PathBuf {
        self.ipc_group_dir(group_folder).join("tasks")
    }

    pub fn ipc_errors_dir(&self, group_folder: &str) -> PathBuf {
        self.ipc_group_dir(group_folder).join("errors")
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.data_dir().join("memory")
    }

    pub fn memory_group_file(&self, safe_id: &str) -> PathBuf {
        self.memory_dir().join(format!("{safe_id}.md"))
    }

    pub fn memory_users_dir(&self) -> PathBuf {
        self.memory_dir().join("users")
    }

    pub fn memory_user_file(&self, safe_id: &str) -> PathBuf {
        self.memory_users_dir().join(format!("{safe_id}.md"))
    }

    pub fn memory_sessions_dir(&self) -> PathBuf {
        self.memory_dir().join("sessions")
    }

    pub fn groups_dir(&self) -> PathBuf {
        self.root.join("groups")
    }

    pub fn group_dir(&self, folder: &str) -> PathBuf {
        self.groups_dir().join(folder)
    }

    pub fn group_claude_md(&self, folder: &str) -> PathBuf {
        self.group_dir(folder).join("CLAUDE.md")
    }

    pub fn group_soul_md(&self, folder: &str) -> PathBuf {
        self.group_dir(folder).join("SOUL.md")
    }

    pub fn group_logs_dir(&self, folder: &str) -> PathBuf {
        self.group_dir(folder).join("logs")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("flashclaw.log")
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.root.join("plugins")
    }

    pub fn plugin_manifest(&self, name: &str) -> PathBuf {
        self.plugins_dir().join(name).join("plugin.json")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn registry_cache_file(&self) -> PathBuf {
        self.cache_dir().join("registry.json")
    }

    pub fn session_tracker_cache_file(&self) -> PathBuf {
        self.cache_dir().join("session-tracker.json")
    }

    /// Ensures every directory that must exist before the daemon can run at
    /// all (not the per-group/per-ipc-source ones, which are created on
    /// first use by whichever component needs them).
    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [
            self.config_dir(),
            self.data_dir(),
            self.ipc_dir(),
            self.memory_dir(),
            self.memory_users_dir(),
            self.memory_sessions_dir(),
            self.groups_dir(),
            self.logs_dir(),
            self.plugins_dir(),
            self.cache_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Ensures `data/ipc/<folder>/{messages,tasks,errors}` exist, called when
    /// a group is registered or when the IPC bus first sees a new source.
    pub fn ensure_ipc_group_dirs(&self, group_folder: &str) -> Result<()> {
        std::fs::create_dir_all(self.ipc_messages_dir(group_folder))?;
        std::fs::create_dir_all(self.ipc_tasks_dir(group_folder))?;
        std::fs::create_dir_all(self.ipc_errors_dir(group_folder))?;
        Ok(())
    }

    /// Ensures `groups/<folder>/logs` exist, called when a group is registered.
    pub fn ensure_group_dirs(&self, folder: &str) -> Result<()> {
        std::fs::create_dir_all(self.group_logs_dir(folder))?;
        Ok(())
    }
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Filesystem-safe transform used for memory file names (§4.1): replaces any
/// character outside `[A-Za-z0-9_-]` with `_`.
pub fn safe_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_id_replaces_unsafe_chars() {
        assert_eq!(safe_id("group:main/chat"), "group_main_chat");
        assert_eq!(safe_id("already-safe_123"), "already-safe_123");
    }

    #[test]
    fn paths_resolve_under_root() {
        let p = Paths::new(PathBuf::from("/tmp/flashclaw-test"));
        assert_eq!(
            p.memory_group_file("main"),
            PathBuf::from("/tmp/flashclaw-test/data/memory/main.md")
        );
        assert_eq!(
            p.ipc_tasks_dir("main"),
            PathBuf::from("/tmp/flashclaw-test/data/ipc/main/tasks")
        );
        assert_eq!(
            p.group_soul_md("main"),
            PathBuf::from("/tmp/flashclaw-test/groups/main/SOUL.md")
        );
    }

    #[test]
    fn ensure_base_dirs_creates_tree() {
        let dir = tempfile::tempdir().unwrap();
        let p = Paths::new(dir.path().to_path_buf());
        p.ensure_base_dirs().unwrap();
        assert!(p.memory_dir().is_dir());
        assert!(p.cache_dir().is_dir());
    }
}
