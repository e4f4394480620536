//! Human-readable `key=value` report printed to stdout.

use std::fmt::Write;

use crate::doctor::DoctorReport;
use crate::plan::Plan;

/// One line per fact; free text is Debug-quoted so it stays on one line.
pub fn render_plan(plan: &Plan) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "run_id={}", plan.run_id);
    for repo in &plan.repos {
        let _ = writeln!(
            out,
            "repo={} path={} status={} branch={} head={} task_id={}",
            repo.repo,
            repo.path,
            repo.status.as_str(),
            repo.branch.as_deref().unwrap_or("-"),
            repo.head.as_deref().map(short_sha).unwrap_or("-"),
            repo.task_id.as_deref().unwrap_or("-"),
        );
        if let Some(title) = &repo.task_title {
            let _ = writeln!(out, "  task_title={title:?}");
        }
        for group in &repo.groups {
            let _ = writeln!(
                out,
                "  group={} type={} scope={} confidence={} score={} files={} commit={} message={:?}",
                group.id,
                group.commit_type,
                group.scope,
                group.confidence.level.as_str(),
                group.confidence.score,
                group.files.len(),
                group.commit.as_deref().map(short_sha).unwrap_or("-"),
                group.message,
            );
            for path in &group.files {
                let status = group.file_statuses.get(path).map(String::as_str).unwrap_or("??");
                let _ = writeln!(out, "    file={path:?} status={status:?}");
            }
        }
        if !repo.skipped.is_empty() {
            let _ = writeln!(
                out,
                "  skipped excluded={} binary={} submodules={} broken_symlinks={}",
                repo.skipped.excluded.len(),
                repo.skipped.binary.len(),
                repo.skipped.submodules.len(),
                repo.skipped.broken_symlinks.len(),
            );
        }
        for warning in &repo.warnings {
            let _ = writeln!(out, "  warning={warning:?}");
        }
        for error in &repo.errors {
            let _ = writeln!(out, "  error={error:?}");
        }
    }
    let summary = &plan.summary;
    let _ = writeln!(
        out,
        "summary repos_scanned={} repos_dirty={} groups_planned={} groups_executed={} groups_failed={}",
        summary.repos_scanned,
        summary.repos_dirty,
        summary.groups_planned,
        summary.groups_executed,
        summary.groups_failed,
    );
    let _ = writeln!(out, "exit_code={}", plan.meta.exit_code);
    out
}

pub fn render_doctor(report: &DoctorReport) -> String {
    let mut out = String::new();
    for check in &report.checks {
        let _ = writeln!(
            out,
            "check={:?} level={} detail={:?}",
            check.name,
            check.level.as_str(),
            check.detail
        );
    }
    let _ = writeln!(out, "exit_code={}", report.exit_code);
    out
}

fn short_sha(sha: &str) -> &str {
    sha.get(..12).unwrap_or(sha)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CommitType, Confidence, ConfidenceLevel};
    use crate::plan::{PlanGroup, RepoPlan};

    #[test]
    fn report_lists_groups_warnings_and_exit_code() {
        let mut repo = RepoPlan::new("api", "/work/api");
        repo.branch = Some("feature/br-7".to_string());
        repo.task_id = Some("br-7".to_string());
        repo.warnings.push("skipped 1 binary path(s): logo.png".to_string());
        repo.groups.push(PlanGroup {
            id: "g1".to_string(),
            commit_type: CommitType::Feat,
            scope: "src".to_string(),
            message: "feat(src): add app.rs (br-7)".to_string(),
            body: None,
            files: vec!["src/app.rs".to_string()],
            file_statuses: [("src/app.rs".to_string(), "??".to_string())].into(),
            renames: Default::default(),
            pre_staged: false,
            confidence: Confidence {
                level: ConfidenceLevel::High,
                score: 4,
                factors: vec!["task_id".to_string()],
            },
            commit: Some("0123456789abcdef0123".to_string()),
        });
        let mut plan = Plan::new("run-9", vec![repo]);
        plan.meta.exit_code = 0;

        let text = render_plan(&plan);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "run_id=run-9");
        assert_eq!(
            lines[1],
            "repo=api path=/work/api status=planned branch=feature/br-7 head=- task_id=br-7"
        );
        assert!(lines[2].starts_with("  group=g1 type=feat scope=src confidence=high score=4 files=1 commit=0123456789ab"));
        assert!(lines[2].ends_with("message=\"feat(src): add app.rs (br-7)\""));
        assert!(text.contains("warning=\"skipped 1 binary path(s): logo.png\""));
        assert!(text.contains("groups_planned=1"));
        assert!(text.ends_with("exit_code=0\n"));
    }
}
