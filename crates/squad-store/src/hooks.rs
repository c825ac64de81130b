//! Hook persistence: a durable, human-browsable snapshot of each work item
//! under `.squad/hooks/<id>/work_item.json`, with an optional git worktree
//! attached so an agent can `cd` straight into an isolated working copy.
//!
//! Hook failures are logged and swallowed -- the hook directory is a
//! convenience mirror of the canonical state in `workstate.json`, never the
//! source of truth.

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::Utc;
use squad_core::WorkItem;
use tracing::warn;

use crate::error::Result;

pub struct HookManager {
    workspace_root: PathBuf,
    hooks_dir: PathBuf,
    use_git_worktree: bool,
}

impl HookManager {
    /// `hooks_dir`, when given, is used as-is (already resolved against
    /// whatever `squad_dir` the caller landed on); only the default falls
    /// back to `workspace_root`-relative `.squad/hooks`, so a relocated
    /// `squad_dir` doesn't get joined onto `workspace_root` twice.
    pub fn new(workspace_root: &Path, hooks_dir: Option<&str>, use_git_worktree: bool) -> Self {
        let hooks_dir = match hooks_dir {
            Some(dir) => PathBuf::from(dir),
            None => workspace_root.join(".squad/hooks"),
        };
        Self {
            workspace_root: workspace_root.to_path_buf(),
            hooks_dir,
            use_git_worktree,
        }
    }

    fn hook_path(&self, item_id: &str) -> PathBuf {
        self.hooks_dir.join(item_id)
    }

    /// Ensures a hook directory exists for `item`, optionally attaching a
    /// git worktree, and writes its metadata snapshot.
    pub fn ensure_hook(&self, item: &WorkItem) -> Result<PathBuf> {
        let hook_path = self.hook_path(&item.id);
        std::fs::create_dir_all(&hook_path)?;

        if self.use_git_worktree {
            self.ensure_worktree(&hook_path);
        }

        self.write_metadata(item)?;
        Ok(hook_path)
    }

    /// Overwrites `work_item.json` with the current snapshot of `item`.
    pub fn write_metadata(&self, item: &WorkItem) -> Result<()> {
        let hook_path = self.hook_path(&item.id);
        std::fs::create_dir_all(&hook_path)?;

        let mut payload = serde_json::to_value(item)?;
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("updated_at".to_string(), serde_json::to_value(Utc::now())?);
        }

        std::fs::write(hook_path.join("work_item.json"), serde_json::to_string_pretty(&payload)?)?;
        Ok(())
    }

    /// Removes the metadata file, leaving any attached worktree untouched.
    pub fn remove_hook(&self, item_id: &str) -> Result<()> {
        let metadata_file = self.hook_path(item_id).join("work_item.json");
        if metadata_file.exists() {
            std::fs::remove_file(metadata_file)?;
        }
        Ok(())
    }

    /// Names of every hook directory currently on disk.
    pub fn list_hooks(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.hooks_dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect()
    }

    /// Best-effort `git worktree add`; a missing `.git`, an already-attached
    /// worktree, or any failure of the subprocess itself is logged and
    /// otherwise ignored.
    fn ensure_worktree(&self, hook_path: &Path) {
        if !self.workspace_root.join(".git").exists() {
            return;
        }
        if hook_path.join(".git").exists() {
            return;
        }

        let result = Command::new("git")
            .args(["worktree", "add", &hook_path.to_string_lossy(), "HEAD"])
            .current_dir(&self.workspace_root)
            .output();

        match result {
            Ok(output) if !output.status.success() => {
                warn!(
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "hook worktree creation failed"
                );
            }
            Err(err) => warn!(error = %err, "hook worktree creation failed"),
            Ok(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_hook_writes_metadata_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = HookManager::new(dir.path(), None, false);
        let item = WorkItem::new("title", "desc");

        let hook_path = manager.ensure_hook(&item).unwrap();
        assert!(hook_path.join("work_item.json").exists());
        assert_eq!(manager.list_hooks(), vec![item.id.clone()]);
    }

    #[test]
    fn remove_hook_deletes_only_the_metadata_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = HookManager::new(dir.path(), None, false);
        let item = WorkItem::new("title", "desc");
        let hook_path = manager.ensure_hook(&item).unwrap();

        manager.remove_hook(&item.id).unwrap();
        assert!(!hook_path.join("work_item.json").exists());
        assert!(hook_path.exists());
    }
}
