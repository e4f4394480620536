//! Per-repository state locations under `<git-dir>/commit-sweep/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Directory name inside the git directory.
pub const STATE_DIR_NAME: &str = "commit-sweep";

/// All canonical state paths for one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepPaths {
    pub git_dir: PathBuf,
    pub state_dir: PathBuf,
    pub lock_path: PathBuf,
    pub state_path: PathBuf,
    pub checkpoint_path: PathBuf,
}

impl SweepPaths {
    pub fn new(git_dir: impl Into<PathBuf>) -> Self {
        let git_dir = git_dir.into();
        let state_dir = git_dir.join(STATE_DIR_NAME);
        Self {
            git_dir,
            lock_path: state_dir.join("sweep.lock"),
            state_path: state_dir.join("state.json"),
            checkpoint_path: state_dir.join("checkpoint.json"),
            state_dir,
        }
    }

    pub fn ensure_state_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.state_dir)
            .with_context(|| format!("create directory {}", self.state_dir.display()))
    }
}

/// Write a file atomically (temp file in the same directory + rename).
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Remove a file, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_files_live_under_git_dir() {
        let paths = SweepPaths::new("/repo/.git");
        assert_eq!(paths.lock_path, PathBuf::from("/repo/.git/commit-sweep/sweep.lock"));
        assert_eq!(paths.state_path, PathBuf::from("/repo/.git/commit-sweep/state.json"));
        assert_eq!(
            paths.checkpoint_path,
            PathBuf::from("/repo/.git/commit-sweep/checkpoint.json")
        );
    }

    #[test]
    fn write_atomic_creates_parent_and_replaces() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested/state.json");
        write_atomic(&path, "one").expect("write");
        write_atomic(&path, "two").expect("rewrite");
        assert_eq!(fs::read_to_string(&path).expect("read"), "two");
        assert!(!temp.path().join("nested/state.json.tmp").exists());
    }

    #[test]
    fn remove_if_exists_tolerates_missing() {
        let temp = tempfile::tempdir().expect("tempdir");
        remove_if_exists(&temp.path().join("missing")).expect("remove");
    }
}
