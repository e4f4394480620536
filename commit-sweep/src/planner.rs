//! Build a repository's plan from its live state.
//!
//! collect -> screen -> classify -> group -> type/scope/subject -> score.
//! Nothing here mutates the repository.

use anyhow::Result;
use tracing::{debug, info, instrument};

use crate::core::classifier::classify_all;
use crate::core::confidence::{ScoreContext, score};
use crate::core::grouper::{FileGroup, group_files, split_staged};
use crate::core::message::{build_body, build_subject, derive_type, scope_label};
use crate::core::task_id::extract_task_id;
use crate::core::types::Group;
use crate::core::validator::{PathViolation, Skipped, screen};
use crate::io::collector::{Snapshot, collect};
use crate::plan::{PlanGroup, RepoPlan, RepoStatus};
use crate::session::{Override, PlanOptions, RepoTarget, SweepSession};

/// Collect live state and plan it.
#[instrument(skip_all, fields(repo = %target.name))]
pub fn plan_repo(session: &mut SweepSession, target: &RepoTarget) -> Result<(RepoPlan, Snapshot)> {
    let snapshot = collect(&target.git, &session.own_paths(target))?;
    let plan = plan_snapshot(session, target, &snapshot)?;
    Ok((plan, snapshot))
}

/// Plan an already-collected snapshot.
pub fn plan_snapshot(
    session: &mut SweepSession,
    target: &RepoTarget,
    snapshot: &Snapshot,
) -> Result<RepoPlan> {
    let mut plan = RepoPlan::new(&target.name, target.path_string());
    plan.branch = snapshot.branch.clone();
    plan.head = snapshot.head.clone();
    plan.state_digest = snapshot.state_digest.clone();

    if !snapshot.conflicts.is_empty() {
        plan.fail(
            RepoStatus::SkippedConflict,
            format!(
                "unmerged paths present (resolve conflicts first): {}",
                snapshot.conflicts.join(", ")
            ),
        );
        return Ok(plan);
    }

    let options = session.options.plan.clone();
    if options.task_ids {
        plan.task_id = snapshot.branch.as_deref().and_then(extract_task_id);
    }
    if let Some(task_id) = plan.task_id.clone() {
        let (title, warning) = session
            .task_cache
            .resolve(session.tracker.as_ref(), &task_id);
        plan.task_title = title;
        plan.warnings.extend(warning);
    }

    let screened = screen(snapshot.changes.clone(), &session.denylist, options.include);
    let mut violations = screened.violations;
    violations.extend(
        snapshot
            .invalid_encoding
            .iter()
            .map(|path| format!("{path:?}: {}", PathViolation::InvalidEncoding)),
    );
    if !violations.is_empty() {
        for violation in violations {
            plan.fail(RepoStatus::Failed, format!("unsafe path {violation}"));
        }
        return Ok(plan);
    }
    plan.warnings.extend(skip_warnings(&screened.skipped));
    plan.skipped = screened.skipped;

    let mut kept = screened.kept;
    classify_all(&mut kept);

    let file_groups = if options.respect_staging {
        let split = split_staged(kept);
        for path in &split.overlap {
            plan.warnings.push(format!(
                "{path}: staged and unstaged edits overlap; only the staged version is committed"
            ));
        }
        group_files(split.unstaged, split.staged)
    } else {
        group_files(kept, Vec::new())
    };

    let groups = build_groups(&file_groups, &options, plan.task_id.as_deref(), plan.task_title.as_deref())?;
    plan.groups = groups.iter().map(PlanGroup::from).collect();
    apply_message_override(&mut plan, &options.overrides);

    info!(
        groups = plan.groups.len(),
        skipped = plan.skipped.total(),
        task_id = ?plan.task_id,
        "repository planned"
    );
    Ok(plan)
}

/// Derive type, scope, subject, body, and confidence for each group.
pub fn build_groups(
    file_groups: &[FileGroup],
    options: &PlanOptions,
    task_id: Option<&str>,
    task_title: Option<&str>,
) -> Result<Vec<Group>> {
    let mut groups = Vec::with_capacity(file_groups.len());
    for (index, file_group) in file_groups.iter().enumerate() {
        let decision = derive_type(file_group);
        let mut commit_type = decision.commit_type;
        let mut scope = scope_label(file_group.scope.as_deref());
        for item in &options.overrides {
            match item {
                Override::Type(forced) => commit_type = *forced,
                Override::Scope(forced) => scope = forced.clone(),
                Override::Message(_) => {}
            }
        }

        let confidence = score(
            &file_group.files,
            ScoreContext {
                has_task_id: task_id.is_some(),
                ambiguous_type: decision.ambiguous,
            },
        );
        let message = build_subject(commit_type, &scope, file_group, task_id);
        let body = if options.with_body {
            Some(build_body(
                &options.body_template,
                &file_group.files,
                task_id,
                task_title,
            )?)
        } else {
            None
        };
        debug!(id = index + 1, %message, score = confidence.score, "group derived");

        groups.push(Group {
            id: format!("g{}", index + 1),
            commit_type,
            scope,
            files: file_group.files.clone(),
            confidence,
            message,
            body,
            pre_staged: file_group.pre_staged,
        });
    }
    Ok(groups)
}

/// `--message` only makes sense when exactly one commit will be made.
fn apply_message_override(plan: &mut RepoPlan, overrides: &[Override]) {
    let Some(message) = overrides.iter().find_map(|item| match item {
        Override::Message(message) => Some(message),
        _ => None,
    }) else {
        return;
    };
    match plan.groups.as_mut_slice() {
        [] => {}
        [only] => only.message = message.clone(),
        many => plan.warnings.push(format!(
            "--message ignored: {} groups planned, it applies only to a single group",
            many.len()
        )),
    }
}

fn skip_warnings(skipped: &Skipped) -> Vec<String> {
    [
        ("excluded by denylist", &skipped.excluded),
        ("binary", &skipped.binary),
        ("submodule", &skipped.submodules),
        ("broken symlink", &skipped.broken_symlinks),
    ]
    .into_iter()
    .filter(|(_, paths)| !paths.is_empty())
    .map(|(reason, paths)| format!("skipped {} {reason} path(s): {}", paths.len(), paths.join(", ")))
    .collect()
}
