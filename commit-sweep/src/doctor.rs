//! `--doctor`: environment and repository health checks. Read-only.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::error::exit_code_for;
use crate::exit_codes::{self, most_severe};
use crate::io::config::SweepConfig;
use crate::io::git::{MIN_GIT_VERSION, ensure_git_supported};
use crate::recovery::unresolved_state;
use crate::session::RepoTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckLevel {
    Ok,
    /// Degraded but usable.
    Warn,
    Fail,
}

impl CheckLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckLevel::Ok => "ok",
            CheckLevel::Warn => "warn",
            CheckLevel::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: String,
    pub level: CheckLevel,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoctorReport {
    pub checks: Vec<Check>,
    pub exit_code: i32,
}

impl DoctorReport {
    fn push(&mut self, name: impl Into<String>, level: CheckLevel, detail: impl Into<String>) {
        self.checks.push(Check {
            name: name.into(),
            level,
            detail: detail.into(),
        });
    }

    fn fail(&mut self, name: impl Into<String>, err: &anyhow::Error) {
        self.exit_code = most_severe(self.exit_code, exit_code_for(err));
        self.push(name, CheckLevel::Fail, format!("{err:#}"));
    }
}

/// Run every check. Git missing or too old exits 3; a bad config exits 4.
pub fn run_doctor(config: &Result<SweepConfig>, repo_args: &[PathBuf]) -> DoctorReport {
    let mut report = DoctorReport {
        checks: Vec::new(),
        exit_code: exit_codes::OK,
    };
    let defaults = SweepConfig::default();
    let effective = match config {
        Ok(config) => {
            report.push("config", CheckLevel::Ok, "valid");
            config
        }
        Err(err) => {
            report.fail("config", err);
            &defaults
        }
    };

    match ensure_git_supported(effective.git_timeout()) {
        Ok(version) => report.push(
            "git",
            CheckLevel::Ok,
            format!("{version} (>= {MIN_GIT_VERSION})"),
        ),
        Err(err) => report.fail("git", &err),
    }

    check_tracker(&mut report, effective);
    for path in repo_args {
        check_repo(&mut report, path, effective);
    }
    report
}

fn check_tracker(report: &mut DoctorReport, config: &SweepConfig) {
    if !config.tracker.enabled {
        report.push("tracker", CheckLevel::Ok, "disabled");
        return;
    }
    let Some(program) = config.tracker.command.first() else {
        report.push("tracker", CheckLevel::Warn, "command is empty");
        return;
    };
    match find_on_path(program) {
        Some(found) => report.push("tracker", CheckLevel::Ok, found.display().to_string()),
        None => report.push(
            "tracker",
            CheckLevel::Warn,
            format!("{program} not found on PATH; task titles will be omitted"),
        ),
    }
}

fn check_repo(report: &mut DoctorReport, path: &Path, config: &SweepConfig) {
    let name = format!("repo {}", path.display());
    let target = match RepoTarget::resolve(path, config) {
        Ok(target) => target,
        Err(err) => {
            report.fail(name, &err);
            return;
        }
    };
    if let Some(operation) = target.git.pending_operation(&target.paths.git_dir) {
        report.push(
            name,
            CheckLevel::Warn,
            format!("{} in progress", operation.as_str()),
        );
        return;
    }
    if target.paths.lock_path.exists() {
        report.push(
            name,
            CheckLevel::Warn,
            format!("lock file present at {}", target.paths.lock_path.display()),
        );
        return;
    }
    match unresolved_state(&target) {
        Ok(Some(state)) => report.push(
            name,
            CheckLevel::Warn,
            format!(
                "previous sweep {} is {}; run with --resume or --restart",
                state.run_id,
                state.status.as_str()
            ),
        ),
        Ok(None) => report.push(name, CheckLevel::Ok, target.path_string()),
        Err(err) => report.fail(name, &err),
    }
}

/// First executable match for `program`, mirroring how the tracker is spawned.
fn find_on_path(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
}
