//! Transactional execution of one repository's plan.
//!
//! `RepoTransaction` owns the repository lock and the checkpoint. It is
//! created after the checkpoint is recorded and must be settled explicitly
//! (complete, keep partial, roll back, or interrupt); dropping it unsettled
//! restores the checkpoint.

use std::collections::HashSet;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{error, info, instrument, warn};

use crate::exit_codes;
use crate::io::checkpoint::{Checkpoint, clear_checkpoint, write_checkpoint};
use crate::io::git::Git;
use crate::io::lock::LockHandle;
use crate::io::signal::CancelToken;
use crate::io::sweep_state::{SweepState, SweepStatus, clear_sweep_state, write_sweep_state};
use crate::plan::{PlanGroup, RepoPlan, RepoStatus};
use crate::session::RepoTarget;

/// How the group loop ended.
#[derive(Debug)]
pub enum GroupsOutcome {
    Completed,
    /// Fail-fast: the named group was rolled back and later groups were not attempted.
    Failed {
        group_id: String,
        error: anyhow::Error,
    },
    Interrupted,
}

/// Exit code and failure count for one settled repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settled {
    pub exit_code: i32,
    pub groups_failed: usize,
}

pub struct RepoTransaction<'a> {
    target: &'a RepoTarget,
    _lock: LockHandle,
    checkpoint: Checkpoint,
    state: SweepState,
    armed: bool,
}

impl<'a> RepoTransaction<'a> {
    /// Checkpoint the repository, persist the run record, and prepare the index.
    ///
    /// Unless manual staging is preserved the index is reset to HEAD so each
    /// commit holds exactly one group.
    #[instrument(skip_all, fields(repo = %target.name))]
    pub fn begin(
        target: &'a RepoTarget,
        lock: LockHandle,
        run_id: &str,
        groups_total: usize,
        respect_staging: bool,
    ) -> Result<Self> {
        target.paths.ensure_state_dir()?;
        let checkpoint = Checkpoint::capture(&target.git, run_id)
            .with_context(|| format!("{}: create checkpoint", target.name))?;
        write_checkpoint(&target.paths.checkpoint_path, &checkpoint)?;
        let state = SweepState::begin(run_id, groups_total);
        write_sweep_state(&target.paths.state_path, &state)?;

        let txn = Self {
            target,
            _lock: lock,
            checkpoint,
            state,
            armed: true,
        };
        if !respect_staging {
            target
                .git
                .reset_index(txn.checkpoint.head.as_deref())
                .context("reset index to HEAD")?;
        }
        Ok(txn)
    }

    pub fn target(&self) -> &RepoTarget {
        self.target
    }

    /// Commit groups strictly in order, stopping at the first failure.
    #[instrument(skip_all, fields(repo = %self.target.name))]
    pub fn run_groups(&mut self, plan: &mut RepoPlan, cancel: &CancelToken) -> GroupsOutcome {
        plan.status = RepoStatus::Executing;
        for index in 0..plan.groups.len() {
            if cancel.is_cancelled() {
                return GroupsOutcome::Interrupted;
            }
            let result = commit_group(&self.target.git, &plan.groups[index]);
            let group = &mut plan.groups[index];
            match result {
                Ok(sha) => {
                    info!(group = %group.id, commit = %sha, "group committed");
                    group.commit = Some(sha);
                    self.state.advance();
                    if let Err(err) = write_sweep_state(&self.target.paths.state_path, &self.state)
                    {
                        warn!(err = %err, "failed to persist progress");
                        plan.warnings
                            .push(format!("could not persist progress: {err:#}"));
                    }
                }
                Err(err) => {
                    warn!(group = %group.id, err = %err, "group failed, unstaging");
                    let group_id = group.id.clone();
                    let error = match self.unstage(&plan.groups[index]) {
                        Ok(()) => err,
                        Err(rollback) => err.context(format!("unstage also failed: {rollback:#}")),
                    };
                    // A signal that kills git mid-commit surfaces here first.
                    if cancel.is_cancelled() {
                        return GroupsOutcome::Interrupted;
                    }
                    return GroupsOutcome::Failed { group_id, error };
                }
            }
        }
        GroupsOutcome::Completed
    }

    /// Unstage one group's files without touching anything else in the index.
    fn unstage(&self, group: &PlanGroup) -> Result<()> {
        if group.pre_staged {
            self.checkpoint.restore_index(&self.target.git)
        } else {
            self.target.git.reset_paths(&group.pathspecs())
        }
    }

    /// Every group committed: remember the tip for `--undo`, clear the record.
    pub fn complete(mut self) -> Result<()> {
        self.armed = false;
        self.checkpoint.sweep_tip = self.target.git.head()?;
        write_checkpoint(&self.target.paths.checkpoint_path, &self.checkpoint)?;
        clear_sweep_state(&self.target.paths.state_path)?;
        info!(repo = %self.target.name, tip = ?self.checkpoint.sweep_tip, "sweep completed");
        Ok(())
    }

    /// Keep committed groups. The record stays `in_progress` until the
    /// operator resumes or restarts.
    pub fn keep_partial(mut self) {
        self.armed = false;
        warn!(
            repo = %self.target.name,
            completed = self.state.groups_completed,
            total = self.state.groups_total,
            "sweep stopped partway"
        );
    }

    /// Restore the checkpoint and clear the run record.
    #[instrument(skip_all, fields(repo = %self.target.name))]
    pub fn roll_back(mut self) -> Result<()> {
        self.armed = false;
        self.checkpoint
            .restore(&self.target.git)
            .with_context(|| format!("{}: restore checkpoint", self.target.name))?;
        clear_checkpoint(&self.target.paths.checkpoint_path, &self.target.git)?;
        clear_sweep_state(&self.target.paths.state_path)?;
        Ok(())
    }

    /// Cooperative cleanup after cancellation: restore the checkpoint and
    /// persist `interrupted`. Signals during cleanup are ignored.
    #[instrument(skip_all, fields(repo = %self.target.name))]
    pub fn interrupt(mut self, cancel: &CancelToken) -> Result<()> {
        let _cleanup = cancel.cleanup_guard();
        self.armed = false;
        let restored = self.checkpoint.restore(&self.target.git);
        self.state.mark(SweepStatus::Interrupted);
        write_sweep_state(&self.target.paths.state_path, &self.state)?;
        restored.with_context(|| format!("{}: restore checkpoint", self.target.name))
    }
}

impl Drop for RepoTransaction<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(repo = %self.target.name, "unsettled transaction, restoring checkpoint");
        if let Err(err) = self.checkpoint.restore(&self.target.git) {
            error!(repo = %self.target.name, err = %err, "checkpoint restore failed");
            return;
        }
        if let Err(err) = clear_checkpoint(&self.target.paths.checkpoint_path, &self.target.git) {
            warn!(err = %err, "failed to clear checkpoint");
        }
        if let Err(err) = clear_sweep_state(&self.target.paths.state_path) {
            warn!(err = %err, "failed to clear sweep state");
        }
    }
}

/// Stage exactly one group's paths and commit them.
#[instrument(skip_all, fields(group = %group.id))]
fn commit_group(git: &Git, group: &PlanGroup) -> Result<String> {
    let pathspecs = group.pathspecs();
    if !group.pre_staged {
        let (present, missing): (Vec<String>, Vec<String>) = pathspecs
            .iter()
            .cloned()
            .partition(|path| git.workdir().join(path).symlink_metadata().is_ok());
        let index: HashSet<String> = git.index_paths()?.into_iter().collect();
        let removals: Vec<String> = missing
            .into_iter()
            .filter(|path| index.contains(path))
            .collect();
        git.add_paths(&present)?;
        git.add_tracked_removals(&removals)?;
    }

    let staged = git.staged_paths()?;
    if staged.is_empty() {
        bail!("nothing staged for {} (files changed since planning?)", group.id);
    }
    let allowed: HashSet<&str> = pathspecs
        .iter()
        .map(|path| path.trim_end_matches('/'))
        .collect();
    let stray: Vec<&str> = staged
        .iter()
        .map(String::as_str)
        .filter(|path| !allowed.contains(path))
        .collect();
    if !stray.is_empty() {
        return Err(anyhow!(
            "index holds paths outside {}: {}",
            group.id,
            stray.join(", ")
        ));
    }

    git.commit(&group.commit_message())
        .with_context(|| format!("commit {} ({})", group.id, group.message))
}

/// Turn a group-loop outcome into the repository's final status.
pub fn settle(
    txn: RepoTransaction<'_>,
    outcome: GroupsOutcome,
    plan: &mut RepoPlan,
    atomic: bool,
    cancel: &CancelToken,
) -> Settled {
    match outcome {
        GroupsOutcome::Completed => {
            if let Err(err) = txn.complete() {
                plan.warnings
                    .push(format!("could not record sweep tip for --undo: {err:#}"));
            }
            plan.status = RepoStatus::Completed;
            Settled {
                exit_code: exit_codes::OK,
                groups_failed: 0,
            }
        }
        GroupsOutcome::Failed { group_id, error } => {
            plan.errors.push(format!("{group_id}: {error:#}"));
            if atomic || plan.committed_groups() == 0 {
                match txn.roll_back() {
                    Ok(()) => {
                        if plan.committed_groups() > 0 {
                            plan.warnings.push(
                                "--atomic: committed groups rolled back to the checkpoint"
                                    .to_string(),
                            );
                        }
                        clear_commits(plan);
                    }
                    Err(err) => plan.errors.push(format!("rollback failed: {err:#}")),
                }
                plan.status = RepoStatus::Failed;
            } else {
                txn.keep_partial();
                plan.status = RepoStatus::Partial;
            }
            Settled {
                exit_code: exit_codes::PARTIAL,
                groups_failed: 1,
            }
        }
        GroupsOutcome::Interrupted => {
            if let Err(err) = txn.interrupt(cancel) {
                plan.errors.push(format!("cleanup after interrupt: {err:#}"));
            }
            clear_commits(plan);
            plan.fail(
                RepoStatus::Interrupted,
                "interrupted; repository restored to its checkpoint",
            );
            Settled {
                exit_code: exit_codes::INTERRUPTED,
                groups_failed: 0,
            }
        }
    }
}

pub fn clear_commits(plan: &mut RepoPlan) {
    for group in &mut plan.groups {
        group.commit = None;
    }
}
