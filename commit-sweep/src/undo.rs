//! `--undo`: rewind the last completed sweep of a repository.

use anyhow::{Context, Result, anyhow, bail};
use tracing::{info, instrument};

use crate::io::checkpoint::{clear_checkpoint, load_checkpoint};
use crate::io::lock::{LockHandle, LockSettings};
use crate::io::signal::CancelToken;
use crate::recovery::unresolved_state;
use crate::session::RepoTarget;

/// Restore the checkpoint of the last completed sweep.
///
/// Refuses when the sweep never completed or when HEAD has moved past the
/// recorded sweep tip. The worktree is left as it is, so the swept changes
/// reappear as uncommitted edits.
#[instrument(skip_all, fields(repo = %target.name))]
pub fn undo_repo(
    target: &RepoTarget,
    settings: &LockSettings,
    cancel: &CancelToken,
) -> Result<String> {
    let _lock = LockHandle::acquire(&target.paths.lock_path, settings, cancel)?;

    if let Some(state) = unresolved_state(target)? {
        bail!(
            "sweep {} is {}; use --execute --restart to roll it back",
            state.run_id,
            state.status.as_str()
        );
    }
    let checkpoint = load_checkpoint(&target.paths.checkpoint_path)?
        .ok_or_else(|| anyhow!("no recorded sweep to undo"))?;
    let tip = checkpoint
        .sweep_tip
        .as_deref()
        .ok_or_else(|| anyhow!("sweep {} never completed", checkpoint.run_id))?;

    let head = target.git.head()?;
    if head.as_deref() != Some(tip) {
        bail!(
            "HEAD moved since sweep {} (expected {tip}, found {}); refusing to undo",
            checkpoint.run_id,
            head.as_deref().unwrap_or("unborn")
        );
    }

    checkpoint
        .restore(&target.git)
        .with_context(|| format!("{}: restore checkpoint", target.name))?;
    clear_checkpoint(&target.paths.checkpoint_path, &target.git)?;
    info!(run_id = %checkpoint.run_id, "sweep undone");
    Ok(format!(
        "undid sweep {}: HEAD restored to {}",
        checkpoint.run_id,
        checkpoint.head.as_deref().unwrap_or("unborn branch")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execute::{RepoTransaction, settle};
    use crate::planner::plan_repo;
    use crate::test_support::{TestRepo, test_session};

    fn sweep(target: &RepoTarget) {
        let mut session = test_session();
        let mut plan = plan_repo(&mut session, target).expect("plan").0;
        let cancel = CancelToken::new();
        let settings = LockSettings::default();
        let lock =
            LockHandle::acquire(&target.paths.lock_path, &settings, &cancel).expect("lock");
        let mut txn = RepoTransaction::begin(target, lock, "run-1", plan.groups.len(), false)
            .expect("begin");
        let outcome = txn.run_groups(&mut plan, &cancel);
        settle(txn, outcome, &mut plan, false, &cancel);
    }

    fn undo(target: &RepoTarget) -> Result<String> {
        undo_repo(target, &LockSettings::default(), &CancelToken::new())
    }

    #[test]
    fn undo_restores_pre_sweep_head() {
        let repo = TestRepo::new().expect("repo");
        let before = repo.git().head().expect("head");
        repo.write("src/app.rs", "fn main() {}\n").expect("write");
        let target = repo.target().expect("target");
        sweep(&target);
        assert_ne!(target.git.head().expect("head"), before);

        let note = undo(&target).expect("undo");
        assert!(note.starts_with("undid sweep run-1"));
        assert_eq!(target.git.head().expect("head"), before);
        assert!(repo.path().join("src/app.rs").exists());
        assert!(!target.paths.checkpoint_path.exists());
    }

    #[test]
    fn undo_refuses_when_head_moved() {
        let repo = TestRepo::new().expect("repo");
        repo.write("src/app.rs", "fn main() {}\n").expect("write");
        let target = repo.target().expect("target");
        sweep(&target);
        repo.commit_file("later.txt", "later\n").expect("commit");

        let err = undo(&target).expect_err("refused");
        assert!(err.to_string().contains("HEAD moved"));
        assert!(target.paths.checkpoint_path.exists());
    }

    #[test]
    fn undo_without_checkpoint_is_an_error() {
        let repo = TestRepo::new().expect("repo");
        let target = repo.target().expect("target");
        let err = undo(&target).expect_err("nothing");
        assert!(err.to_string().contains("no recorded sweep"));
    }
}
