//! Pre-mutation snapshots that restore the exact pre-sweep tip and index.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::io::git::Git;
use crate::io::paths::{remove_if_exists, write_atomic};

/// Ref that keeps the worktree snapshot reachable until the run is resolved.
pub const CHECKPOINT_REF: &str = "refs/commit-sweep/checkpoint";

/// Snapshot taken before the first mutation of a repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub branch: Option<String>,
    /// `None` when the branch was unborn.
    pub head: Option<String>,
    /// Tree object of the index as it stood.
    pub index_tree: String,
    /// `git stash create` commit of tracked worktree changes, if any.
    pub worktree_stash: Option<String>,
    /// HEAD after a successful sweep; `--undo` refuses if HEAD moved past it.
    #[serde(default)]
    pub sweep_tip: Option<String>,
}

impl Checkpoint {
    /// Record HEAD, the index tree, and a worktree stash commit.
    #[instrument(skip_all, fields(run_id))]
    pub fn capture(git: &Git, run_id: &str) -> Result<Self> {
        let head = git.head()?;
        let branch = git.current_branch()?;
        let index_tree = git.write_tree().context("snapshot index")?;
        let worktree_stash = match head {
            Some(_) => git.stash_create().context("snapshot worktree")?,
            None => None,
        };
        if let Some(stash) = &worktree_stash {
            git.update_ref(CHECKPOINT_REF, stash)?;
        }
        info!(head = ?head, index_tree = %index_tree, "checkpoint captured");
        Ok(Self {
            run_id: run_id.to_string(),
            created_at: Utc::now(),
            branch,
            head,
            index_tree,
            worktree_stash,
            sweep_tip: None,
        })
    }

    /// Move the branch back to the recorded tip and restore the index.
    /// The worktree is never written.
    #[instrument(skip_all, fields(run_id = %self.run_id))]
    pub fn restore(&self, git: &Git) -> Result<()> {
        match &self.head {
            Some(head) => git.reset_soft(head).context("restore HEAD")?,
            None => {
                if git.head()?.is_some() {
                    git.unborn_head().context("restore unborn branch")?;
                }
            }
        }
        git.read_tree(&self.index_tree).context("restore index")?;
        git.refresh_index()?;
        info!(head = ?self.head, "checkpoint restored");
        Ok(())
    }

    /// Restore only the index; used to roll back a pre-staged group.
    pub fn restore_index(&self, git: &Git) -> Result<()> {
        git.read_tree(&self.index_tree).context("restore index")?;
        git.refresh_index()
    }
}

pub fn load_checkpoint(path: &Path) -> Result<Option<Checkpoint>> {
    if !path.exists() {
        return Ok(None);
    }
    debug!(path = %path.display(), "loading checkpoint");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read checkpoint {}", path.display()))?;
    let checkpoint = serde_json::from_str(&contents)
        .with_context(|| format!("parse checkpoint {}", path.display()))?;
    Ok(Some(checkpoint))
}

pub fn write_checkpoint(path: &Path, checkpoint: &Checkpoint) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(checkpoint).context("serialize checkpoint")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Drop the checkpoint file and its pinning ref.
pub fn clear_checkpoint(path: &Path, git: &Git) -> Result<()> {
    git.delete_ref(CHECKPOINT_REF)?;
    remove_if_exists(path)
}
