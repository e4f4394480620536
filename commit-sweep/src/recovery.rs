//! Resolution of state records left behind by earlier runs.

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::error::SweepError;
use crate::io::checkpoint::{clear_checkpoint, load_checkpoint};
use crate::io::sweep_state::{SweepState, clear_sweep_state, load_sweep_state};
use crate::session::{Recovery, RepoTarget};

/// Unresolved record for a repository, if any.
pub fn unresolved_state(target: &RepoTarget) -> Result<Option<SweepState>> {
    let state = load_sweep_state(&target.paths.state_path)
        .with_context(|| format!("{}: read sweep state", target.name))?;
    Ok(state.filter(|state| state.status.is_unresolved()))
}

/// Refuse the whole run, before any repository is touched, when a record is
/// unresolved and the operator gave no resume-or-restart choice.
pub fn require_choice(targets: &[RepoTarget], choice: Option<Recovery>) -> Result<()> {
    if choice.is_some() {
        return Ok(());
    }
    for target in targets {
        if let Some(state) = unresolved_state(target)? {
            return Err(SweepError::ResumeRequired {
                repo: target.name.clone(),
                run_id: state.run_id,
                status: state.status.as_str().to_string(),
            }
            .into());
        }
    }
    Ok(())
}

/// Warning text for a dry run that finds an unresolved record.
pub fn dry_run_notice(target: &RepoTarget) -> Result<Option<String>> {
    Ok(unresolved_state(target)?.map(|state| {
        format!(
            "previous sweep {} is {}; --execute will need --resume or --restart",
            state.run_id,
            state.status.as_str()
        )
    }))
}

/// Apply the operator's choice. Must be called with the repository lock held.
///
/// Returns a note describing what was done, for the plan's warnings.
#[instrument(skip_all, fields(repo = %target.name))]
pub fn resolve(target: &RepoTarget, choice: Option<Recovery>) -> Result<Option<String>> {
    let Some(state) = load_sweep_state(&target.paths.state_path)? else {
        return Ok(None);
    };
    if !state.status.is_unresolved() {
        clear_sweep_state(&target.paths.state_path)?;
        return Ok(None);
    }

    match choice {
        None => Err(SweepError::ResumeRequired {
            repo: target.name.clone(),
            run_id: state.run_id,
            status: state.status.as_str().to_string(),
        }
        .into()),
        Some(Recovery::Resume) => {
            info!(run_id = %state.run_id, "resuming: discarding previous record");
            clear_checkpoint(&target.paths.checkpoint_path, &target.git)?;
            clear_sweep_state(&target.paths.state_path)?;
            Ok(Some(format!(
                "resumed after {} sweep {} ({}/{} groups committed); re-planned from the live tree",
                state.status.as_str(),
                state.run_id,
                state.groups_completed,
                state.groups_total
            )))
        }
        Some(Recovery::Restart) => {
            match load_checkpoint(&target.paths.checkpoint_path)? {
                Some(checkpoint) => {
                    checkpoint
                        .restore(&target.git)
                        .with_context(|| format!("{}: restore checkpoint", target.name))?;
                    info!(run_id = %state.run_id, "restarted from checkpoint");
                }
                None => warn!(run_id = %state.run_id, "no checkpoint recorded, nothing to roll back"),
            }
            clear_checkpoint(&target.paths.checkpoint_path, &target.git)?;
            clear_sweep_state(&target.paths.state_path)?;
            Ok(Some(format!(
                "restarted: rolled back sweep {} to its checkpoint",
                state.run_id
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit_codes;
    use crate::io::checkpoint::{Checkpoint, write_checkpoint};
    use crate::io::sweep_state::{SweepStatus, write_sweep_state};
    use crate::test_support::TestRepo;

    fn leave_partial_run(repo: &TestRepo, target: &RepoTarget) -> Option<String> {
        let before = target.git.head().expect("head");
        let checkpoint = Checkpoint::capture(&target.git, "run-old").expect("capture");
        write_checkpoint(&target.paths.checkpoint_path, &checkpoint).expect("write");
        let mut state = SweepState::begin("run-old", 2);
        repo.write("a.txt", "a\n").expect("write");
        target.git.add_paths(&["a.txt".to_string()]).expect("add");
        target.git.commit("feat(root): add a.txt").expect("commit");
        state.advance();
        state.mark(SweepStatus::Interrupted);
        write_sweep_state(&target.paths.state_path, &state).expect("state");
        before
    }

    #[test]
    fn unresolved_record_requires_a_choice() {
        let repo = TestRepo::new().expect("repo");
        let target = repo.target().expect("target");
        leave_partial_run(&repo, &target);

        let err = require_choice(std::slice::from_ref(&target), None).expect_err("refused");
        assert_eq!(crate::error::exit_code_for(&err), exit_codes::INVALID);
        assert!(err.to_string().contains("--resume"));
        require_choice(std::slice::from_ref(&target), Some(Recovery::Resume)).expect("allowed");
    }

    #[test]
    fn resume_keeps_history_and_clears_record() {
        let repo = TestRepo::new().expect("repo");
        let target = repo.target().expect("target");
        let before = leave_partial_run(&repo, &target);

        let note = resolve(&target, Some(Recovery::Resume)).expect("resolve");
        assert!(note.expect("note").contains("resumed"));
        assert_ne!(target.git.head().expect("head"), before);
        assert_eq!(unresolved_state(&target).expect("state"), None);
        assert!(!target.paths.checkpoint_path.exists());
    }

    #[test]
    fn restart_rolls_back_to_checkpoint() {
        let repo = TestRepo::new().expect("repo");
        let target = repo.target().expect("target");
        let before = leave_partial_run(&repo, &target);

        resolve(&target, Some(Recovery::Restart)).expect("resolve");
        assert_eq!(target.git.head().expect("head"), before);
        assert!(repo.path().join("a.txt").exists());
        assert_eq!(unresolved_state(&target).expect("state"), None);
    }

    #[test]
    fn dry_run_only_warns() {
        let repo = TestRepo::new().expect("repo");
        let target = repo.target().expect("target");
        leave_partial_run(&repo, &target);
        let notice = dry_run_notice(&target).expect("notice");
        assert!(notice.expect("warning").contains("run-old"));
    }
}
