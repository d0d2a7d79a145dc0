use std::path::Path;

use crate::error::{FlashclawError, Result};

/// Max number of rotated backups kept alongside a config file (§6.7).
pub const MAX_BACKUPS: u32 = 5;

fn backup_path(path: &Path, n: u32) -> std::path::PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(format!(".bak.{n}"));
    std::path::PathBuf::from(os)
}

/// Rotates `path`'s backups before a write: `.bak.1..N` shift to `.bak.2..N+1`,
/// anything beyond `max_backups` is deleted, and the pre-write contents of
/// `path` become the new `.bak.1`. No-ops if `path` doesn't exist yet (first
/// write, nothing to rotate).
pub fn rotate(path: &Path, max_backups: u32) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let oldest = backup_path(path, max_backups);
    if oldest.exists() {
        std::fs::remove_file(&oldest)?;
    }
    let mut n = max_backups;
    while n >= 1 {
        let from = if n == 1 { path.to_path_buf() } else { backup_path(path, n - 1) };
        let to = backup_path(path, n);
        if from.exists() {
            std::fs::rename(&from, &to)?;
        }
        n -= 1;
    }
    Ok(())
}

/// Lists existing backups, oldest index first (`.bak.1` is the most recent).
pub fn list_backups(path: &Path, max_backups: u32) -> Vec<u32> {
    (1..=max_backups)
        .filter(|n| backup_path(path, *n).exists())
        .collect()
}

/// Restores `.bak.n` over `path`, snapshotting the current contents of `path`
/// as `<path>.before-restore` first (§6.7 `config restore [n]`).
pub fn restore(path: &Path, n: u32) -> Result<()> {
    let src = backup_path(path, n);
    if !src.exists() {
        return Err(FlashclawError::Validation(format!(
            "no backup .bak.{n} exists for {}",
            path.display()
        )));
    }
    if path.exists() {
        let mut before = path.as_os_str().to_owned();
        before.push(".before-restore");
        std::fs::copy(path, std::path::PathBuf::from(before))?;
    }
    std::fs::copy(&src, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(path: &Path, content: &str) {
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn rotate_shifts_existing_backups_and_caps_at_max() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugins.json");

        for i in 0..7 {
            write(&path, &format!("version-{i}"));
            rotate(&path, MAX_BACKUPS).unwrap();
            write(&path, &format!("version-{i}"));
        }

        let backups = list_backups(&path, MAX_BACKUPS);
        assert_eq!(backups.len() as u32, MAX_BACKUPS);
        assert_eq!(
            std::fs::read_to_string(backup_path(&path, 1)).unwrap(),
            "version-6"
        );
    }

    #[test]
    fn restore_round_trips_and_snapshots_current_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugins.json");

        write(&path, "v1");
        rotate(&path, MAX_BACKUPS).unwrap();
        write(&path, "v2");

        let backups_before = list_backups(&path, MAX_BACKUPS);
        restore(&path, 1).unwrap();
        let backups_after = list_backups(&path, MAX_BACKUPS);

        assert_eq!(backups_before.len(), backups_after.len());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "v1");
        let mut before_restore = path.as_os_str().to_owned();
        before_restore.push(".before-restore");
        assert_eq!(
            std::fs::read_to_string(std::path::PathBuf::from(before_restore)).unwrap(),
            "v2"
        );
    }

    #[test]
    fn rotate_is_noop_when_file_does_not_exist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugins.json");
        rotate(&path, MAX_BACKUPS).unwrap();
        assert!(list_backups(&path, MAX_BACKUPS).is_empty());
    }
}
