//! Run orchestration: select repositories, plan or execute each, assemble the
//! plan document and the overall exit code.
//!
//! Per repository the order is preflight, lock, recovery, plan (or frozen
//! plan verification), then the transaction. `--atomic-repos` runs each of
//! those phases across every repository before the next phase starts.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::error::{SweepError, exit_code_for};
use crate::execute::{GroupsOutcome, RepoTransaction, Settled, clear_commits, settle};
use crate::exit_codes::{self, most_severe};
use crate::io::collector::collect;
use crate::io::lock::LockHandle;
use crate::io::plan_store::{freeze_plan, rehydrate_plan};
use crate::plan::{Plan, RepoPlan, RepoStatus};
use crate::planner::plan_repo;
use crate::recovery;
use crate::session::{Mode, PlanSource, RepoTarget, SweepSession, resolve_targets};
use crate::undo::undo_repo;

/// The finished plan document and the process exit code.
#[derive(Debug)]
pub struct SweepOutcome {
    pub plan: Plan,
    pub exit_code: i32,
}

/// One repository's final entry.
#[derive(Debug)]
struct RepoRun {
    plan: RepoPlan,
    exit_code: i32,
    groups_failed: usize,
}

impl RepoRun {
    fn from_status(plan: RepoPlan) -> Self {
        Self {
            exit_code: status_exit_code(plan.status),
            plan,
            groups_failed: 0,
        }
    }

    fn settled(plan: RepoPlan, settled: Settled) -> Self {
        Self {
            plan,
            exit_code: settled.exit_code,
            groups_failed: settled.groups_failed,
        }
    }

    fn failed(mut plan: RepoPlan, err: &anyhow::Error) -> Self {
        warn!(repo = %plan.repo, err = %err, "repository failed");
        plan.fail(status_for(err), format!("{err:#}"));
        Self {
            plan,
            exit_code: exit_code_for(err),
            groups_failed: 0,
        }
    }
}

/// Run a planning, execution, or undo invocation over `repo_args`.
///
/// Errors returned here abort the run before any repository is touched
/// (invalid arguments, unreadable plan files, unresolved previous runs).
#[instrument(skip_all, fields(run_id = %session.run_id))]
pub fn run_sweep(session: &mut SweepSession, repo_args: &[PathBuf]) -> Result<SweepOutcome> {
    let runs = match session.options.mode.clone() {
        Mode::Doctor => {
            return Err(SweepError::InvalidArguments(
                "--doctor is not a sweep mode".to_string(),
            )
            .into());
        }
        Mode::Undo => {
            let targets = resolve_targets(repo_args, &session.config)?;
            run_undo(session, &targets)
        }
        Mode::Plan { .. } => {
            let targets = resolve_targets(repo_args, &session.config)?;
            plan_each(session, &targets)
        }
        Mode::Execute { source } => {
            let (targets, frozen) = match source {
                PlanSource::Live => {
                    let targets = resolve_targets(repo_args, &session.config)?;
                    let frozen = vec![None; targets.len()];
                    (targets, frozen)
                }
                PlanSource::Frozen(path) => frozen_targets(session, &path)?,
            };
            recovery::require_choice(&targets, session.options.recovery)?;
            if session.options.atomic_repos {
                execute_atomic_repos(session, &targets, &frozen)
            } else {
                execute_each(session, &targets, &frozen)
            }
        }
    };

    let mut outcome = assemble(session, runs);
    if let Mode::Plan { save: Some(path) } = &session.options.mode {
        freeze_plan(path, &mut outcome.plan)?;
        info!(path = %path.display(), "plan saved");
    }
    Ok(outcome)
}

fn assemble(session: &SweepSession, runs: Vec<RepoRun>) -> SweepOutcome {
    let exit_code = runs
        .iter()
        .map(|run| run.exit_code)
        .fold(exit_codes::OK, most_severe);
    let groups_failed = runs.iter().map(|run| run.groups_failed).sum();

    let mut plan = Plan::new(
        session.run_id.clone(),
        runs.into_iter().map(|run| run.plan).collect(),
    );
    plan.summary.groups_failed = groups_failed;
    plan.meta.exit_code = exit_code;
    plan.meta.git_version = session
        .git_version
        .map(|version| version.to_string())
        .unwrap_or_default();
    plan.meta.task_cache_hits = session.task_cache.hits;
    plan.meta.task_cache_misses = session.task_cache.misses;
    plan.set_duration(session.elapsed_secs());
    SweepOutcome { plan, exit_code }
}

/// Dry run: plan every repository, mutate nothing.
fn plan_each(session: &mut SweepSession, targets: &[RepoTarget]) -> Vec<RepoRun> {
    let mut runs = Vec::with_capacity(targets.len());
    for target in targets {
        if let Some(run) = not_started(session, target) {
            runs.push(run);
            continue;
        }
        if let Err(err) = preflight(target) {
            runs.push(RepoRun::failed(empty_plan(target), &err));
            continue;
        }
        let mut run = match plan_repo(session, target) {
            Ok((plan, _)) => RepoRun::from_status(plan),
            Err(err) => RepoRun::failed(empty_plan(target), &err),
        };
        match recovery::dry_run_notice(target) {
            Ok(notice) => run.plan.warnings.extend(notice),
            Err(err) => run
                .plan
                .warnings
                .push(format!("could not read previous sweep state: {err:#}")),
        }
        runs.push(run);
    }
    runs
}

/// Execute repositories independently; a failure in one does not stop the next.
fn execute_each(
    session: &mut SweepSession,
    targets: &[RepoTarget],
    frozen: &[Option<RepoPlan>],
) -> Vec<RepoRun> {
    let mut runs = Vec::with_capacity(targets.len());
    for (target, frozen) in targets.iter().zip(frozen) {
        let run = match not_started(session, target) {
            Some(run) => run,
            None => execute_repo(session, target, frozen.as_ref()),
        };
        runs.push(run);
    }
    runs
}

#[instrument(skip_all, fields(repo = %target.name))]
fn execute_repo(
    session: &mut SweepSession,
    target: &RepoTarget,
    frozen: Option<&RepoPlan>,
) -> RepoRun {
    let base = || base_plan(target, frozen);
    if let Err(err) = preflight(target) {
        return RepoRun::failed(base(), &err);
    }
    let lock = match LockHandle::acquire(
        &target.paths.lock_path,
        &session.config.lock_settings(),
        &session.cancel,
    ) {
        Ok(lock) => lock,
        Err(err) => return RepoRun::failed(base(), &err),
    };
    let mut plan = match prepare_locked(session, target, frozen) {
        Ok(plan) => plan,
        Err(err) => return RepoRun::failed(base(), &err),
    };
    if plan.status != RepoStatus::Planned {
        return RepoRun::from_status(plan);
    }
    if plan.groups.is_empty() {
        plan.status = RepoStatus::Completed;
        return RepoRun::from_status(plan);
    }

    let respect_staging = respects_staging(session, &plan);
    let mut txn = match RepoTransaction::begin(
        target,
        lock,
        &session.run_id,
        plan.groups.len(),
        respect_staging,
    ) {
        Ok(txn) => txn,
        Err(err) => return RepoRun::failed(plan, &err),
    };
    let outcome = txn.run_groups(&mut plan, &session.cancel);
    let settled = settle(
        txn,
        outcome,
        &mut plan,
        session.options.atomic,
        &session.cancel,
    );
    RepoRun::settled(plan, settled)
}

/// All-or-nothing across repositories.
///
/// Preflight everything, lock everything in path order, plan everything,
/// checkpoint everything, then execute. Any failure rolls every repository
/// back to its checkpoint.
#[instrument(skip_all, fields(repos = targets.len()))]
fn execute_atomic_repos(
    session: &mut SweepSession,
    targets: &[RepoTarget],
    frozen: &[Option<RepoPlan>],
) -> Vec<RepoRun> {
    let base = |index: usize| base_plan(&targets[index], frozen[index].as_ref());

    for (index, target) in targets.iter().enumerate() {
        if let Err(err) = preflight(target) {
            let run = RepoRun::failed(base(index), &err);
            return abort_atomic(targets, frozen, Vec::new(), index, run);
        }
    }

    let mut order: Vec<usize> = (0..targets.len()).collect();
    order.sort_by(|&a, &b| targets[a].root.cmp(&targets[b].root));
    let mut slots: Vec<Option<LockHandle>> = targets.iter().map(|_| None).collect();
    for index in order {
        match LockHandle::acquire(
            &targets[index].paths.lock_path,
            &session.config.lock_settings(),
            &session.cancel,
        ) {
            Ok(lock) => slots[index] = Some(lock),
            Err(err) => {
                let run = RepoRun::failed(base(index), &err);
                return abort_atomic(targets, frozen, Vec::new(), index, run);
            }
        }
    }

    let mut plans: Vec<RepoPlan> = Vec::with_capacity(targets.len());
    for (index, target) in targets.iter().enumerate() {
        match prepare_locked(session, target, frozen[index].as_ref()) {
            Ok(plan) if plan.status == RepoStatus::Planned => plans.push(plan),
            Ok(plan) => {
                let run = RepoRun::from_status(plan);
                return abort_atomic(targets, frozen, plans, index, run);
            }
            Err(err) => {
                let run = RepoRun::failed(base(index), &err);
                return abort_atomic(targets, frozen, plans, index, run);
            }
        }
    }

    // Clean repositories keep their lock until every transaction settles.
    let mut idle_locks = Vec::new();
    let mut txns: Vec<Option<RepoTransaction<'_>>> = Vec::with_capacity(targets.len());
    for (index, slot) in slots.into_iter().enumerate() {
        let Some(lock) = slot else { continue };
        if plans[index].groups.is_empty() {
            plans[index].status = RepoStatus::Completed;
            idle_locks.push(lock);
            txns.push(None);
            continue;
        }
        let begun = RepoTransaction::begin(
            &targets[index],
            lock,
            &session.run_id,
            plans[index].groups.len(),
            respects_staging(session, &plans[index]),
        );
        match begun {
            Ok(txn) => txns.push(Some(txn)),
            Err(err) => {
                let notes = roll_back_all(txns);
                let run = RepoRun::failed(plans[index].clone(), &err);
                let mut runs = abort_atomic(targets, frozen, plans, index, run);
                for run in &mut runs {
                    run.plan.warnings.extend(notes.iter().cloned());
                }
                return runs;
            }
        }
    }

    let cancel = session.cancel.clone();
    let mut failure: Option<(usize, GroupsOutcome)> = None;
    for (index, (txn, plan)) in txns.iter_mut().zip(plans.iter_mut()).enumerate() {
        let Some(txn) = txn else { continue };
        match txn.run_groups(plan, &cancel) {
            GroupsOutcome::Completed => {}
            other => {
                failure = Some((index, other));
                break;
            }
        }
    }

    let Some((culprit, outcome)) = failure else {
        return txns
            .into_iter()
            .zip(plans)
            .map(|(txn, mut plan)| match txn {
                Some(txn) => {
                    let settled = settle(txn, GroupsOutcome::Completed, &mut plan, false, &cancel);
                    RepoRun::settled(plan, settled)
                }
                None => RepoRun::from_status(plan),
            })
            .collect();
    };

    let (status, exit_code) = match outcome {
        GroupsOutcome::Interrupted => (RepoStatus::Interrupted, exit_codes::INTERRUPTED),
        _ => (RepoStatus::Failed, exit_codes::PARTIAL),
    };
    let reason = format!(
        "rolled back: --atomic-repos run failed in {}",
        targets[culprit].name
    );
    let mut outcome = Some(outcome);
    let mut runs = Vec::with_capacity(targets.len());
    for (index, (txn, mut plan)) in txns.into_iter().zip(plans).enumerate() {
        let Some(txn) = txn else {
            runs.push(RepoRun::from_status(plan));
            continue;
        };
        if index == culprit {
            if let Some(outcome) = outcome.take() {
                let settled = settle(txn, outcome, &mut plan, true, &cancel);
                runs.push(RepoRun::settled(plan, settled));
                continue;
            }
        }
        let rolled = txn.roll_back();
        clear_commits(&mut plan);
        plan.fail(status, reason.clone());
        if let Err(err) = rolled {
            plan.errors.push(format!("rollback failed: {err:#}"));
        }
        runs.push(RepoRun {
            plan,
            exit_code,
            groups_failed: 0,
        });
    }
    drop(idle_locks);
    runs
}

/// Every repository but the culprit is reported as not executed.
fn abort_atomic(
    targets: &[RepoTarget],
    frozen: &[Option<RepoPlan>],
    planned: Vec<RepoPlan>,
    culprit: usize,
    culprit_run: RepoRun,
) -> Vec<RepoRun> {
    let reason = format!(
        "not executed: --atomic-repos aborted because {} failed",
        targets[culprit].name
    );
    let exit_code = culprit_run.exit_code;
    let mut culprit_run = Some(culprit_run);
    let mut planned = planned.into_iter();
    let mut runs = Vec::with_capacity(targets.len());
    for (index, target) in targets.iter().enumerate() {
        let plan = planned.next();
        if index == culprit {
            runs.extend(culprit_run.take());
            continue;
        }
        let mut plan = plan.unwrap_or_else(|| base_plan(target, frozen[index].as_ref()));
        plan.fail(RepoStatus::Failed, reason.clone());
        runs.push(RepoRun {
            plan,
            exit_code,
            groups_failed: 0,
        });
    }
    runs
}

fn roll_back_all(txns: Vec<Option<RepoTransaction<'_>>>) -> Vec<String> {
    let mut notes = Vec::new();
    for txn in txns.into_iter().flatten() {
        let name = txn.target().name.clone();
        if let Err(err) = txn.roll_back() {
            notes.push(format!("{name}: rollback failed: {err:#}"));
        }
    }
    notes
}

/// With the lock held: settle any previous run, then plan live state or
/// verify the frozen plan still matches it.
fn prepare_locked(
    session: &mut SweepSession,
    target: &RepoTarget,
    frozen: Option<&RepoPlan>,
) -> Result<RepoPlan> {
    let note = recovery::resolve(target, session.options.recovery)?;
    let mut plan = match frozen {
        None => plan_repo(session, target)?.0,
        Some(frozen) => verify_frozen(target, frozen, &session.own_paths(target))?,
    };
    plan.warnings.extend(note);
    session.cancel.check()?;
    Ok(plan)
}

/// A frozen plan is only valid against the exact state it was built from.
fn verify_frozen(target: &RepoTarget, frozen: &RepoPlan, own_paths: &[String]) -> Result<RepoPlan> {
    if frozen.status != RepoStatus::Planned {
        return Ok(frozen.clone());
    }
    let snapshot = collect(&target.git, own_paths)?;
    if snapshot.state_digest != frozen.state_digest {
        return Err(SweepError::PlanDiverged {
            repo: target.name.clone(),
        }
        .into());
    }
    Ok(frozen.clone())
}

fn frozen_targets(
    session: &SweepSession,
    path: &Path,
) -> Result<(Vec<RepoTarget>, Vec<Option<RepoPlan>>)> {
    let plan = rehydrate_plan(path)?;
    info!(run_id = %plan.run_id, repos = plan.repos.len(), "executing frozen plan");
    let mut targets = Vec::with_capacity(plan.repos.len());
    let mut frozen = Vec::with_capacity(plan.repos.len());
    for repo in plan.repos {
        targets.push(RepoTarget::resolve(Path::new(&repo.path), &session.config)?);
        frozen.push(Some(repo));
    }
    Ok((targets, frozen))
}

fn run_undo(session: &SweepSession, targets: &[RepoTarget]) -> Vec<RepoRun> {
    targets
        .iter()
        .map(|target| {
            let mut plan = empty_plan(target);
            match undo_repo(target, &session.config.lock_settings(), &session.cancel) {
                Ok(note) => {
                    plan.status = RepoStatus::Completed;
                    plan.warnings.push(note);
                    RepoRun::from_status(plan)
                }
                Err(err) => RepoRun::failed(plan, &err),
            }
        })
        .collect()
}

/// A merge, rebase, cherry-pick, revert, or bisect blocks the repository.
fn preflight(target: &RepoTarget) -> Result<()> {
    match target.git.pending_operation(&target.paths.git_dir) {
        Some(operation) => Err(SweepError::PreflightBlocked {
            repo: target.name.clone(),
            operation: operation.as_str().to_string(),
        }
        .into()),
        None => Ok(()),
    }
}

/// Entry for a repository skipped because the run was cancelled.
fn not_started(session: &SweepSession, target: &RepoTarget) -> Option<RepoRun> {
    if !session.cancel.is_cancelled() {
        return None;
    }
    let mut plan = empty_plan(target);
    plan.fail(RepoStatus::Interrupted, "not started: run interrupted");
    Some(RepoRun::from_status(plan))
}

fn respects_staging(session: &SweepSession, plan: &RepoPlan) -> bool {
    session.options.plan.respect_staging || plan.groups.iter().any(|group| group.pre_staged)
}

fn base_plan(target: &RepoTarget, frozen: Option<&RepoPlan>) -> RepoPlan {
    frozen.cloned().unwrap_or_else(|| empty_plan(target))
}

fn empty_plan(target: &RepoTarget) -> RepoPlan {
    RepoPlan::new(&target.name, target.path_string())
}

fn status_exit_code(status: RepoStatus) -> i32 {
    match status {
        RepoStatus::Planned | RepoStatus::Completed | RepoStatus::Executing => exit_codes::OK,
        RepoStatus::Partial | RepoStatus::Failed => exit_codes::PARTIAL,
        RepoStatus::SkippedConflict => exit_codes::PREFLIGHT,
        RepoStatus::Interrupted => exit_codes::INTERRUPTED,
    }
}

fn status_for(err: &anyhow::Error) -> RepoStatus {
    match err.chain().find_map(|cause| cause.downcast_ref::<SweepError>()) {
        Some(SweepError::Interrupted) => RepoStatus::Interrupted,
        _ => RepoStatus::Failed,
    }
}
