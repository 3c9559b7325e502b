//! Per-suite temporary workspace.
//!
//! Every verification run writes into its own `run-<uuid>` directory under
//! the workspace so concurrent runs never share an output destination.

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;
use uuid::Uuid;

use crate::error::HarnessResult;

/// Temporary directory that can be preserved for postmortem debugging.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
    keep: bool,
}

impl Workspace {
    /// Create a fresh workspace under the system temp directory.
    pub fn create(keep: bool) -> HarnessResult<Self> {
        let dir = tempfile::Builder::new().prefix("bugcheck-").tempdir()?;
        Ok(Self::from_tempdir(dir, keep))
    }

    /// Create a fresh workspace under `parent`.
    pub fn create_in(parent: &Path, keep: bool) -> HarnessResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix("bugcheck-")
            .tempdir_in(parent)?;
        Ok(Self::from_tempdir(dir, keep))
    }

    fn from_tempdir(dir: TempDir, keep: bool) -> Self {
        let path = dir.path().to_path_buf();
        if keep {
            info!(workspace = %path.display(), "workspace will be preserved");
        }
        Self {
            dir: Some(dir),
            path,
            keep,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create an isolated results directory for one run.
    pub fn run_dir(&self) -> HarnessResult<PathBuf> {
        let dir = self.path.join(format!("run-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if self.keep {
                let kept = dir.into_path();
                info!(workspace = %kept.display(), "preserved workspace for debugging");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_removed_on_drop() {
        let ws = Workspace::create(false).expect("create");
        let path = ws.path().to_path_buf();
        assert!(path.is_dir());
        drop(ws);
        assert!(!path.exists());
    }

    #[test]
    fn test_workspace_preserved_when_kept() {
        let parent = tempfile::tempdir().expect("parent");
        let ws = Workspace::create_in(parent.path(), true).expect("create");
        let path = ws.path().to_path_buf();
        drop(ws);
        assert!(path.is_dir());
    }

    #[test]
    fn test_run_dirs_are_isolated() {
        let ws = Workspace::create(false).expect("create");
        let a = ws.run_dir().expect("run dir");
        let b = ws.run_dir().expect("run dir");
        assert_ne!(a, b);
        assert!(a.starts_with(ws.path()));
        assert!(a.is_dir() && b.is_dir());
    }
}
