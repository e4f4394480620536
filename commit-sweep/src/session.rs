//! Run-scoped context threaded through planning and execution.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::core::types::CommitType;
use crate::core::validator::{Denylist, IncludePolicy};
use crate::error::SweepError;
use crate::io::config::SweepConfig;
use crate::io::git::{Git, GitVersion};
use crate::io::paths::SweepPaths;
use crate::io::signal::CancelToken;
use crate::io::tracker::{CliTaskTracker, NoTracker, TaskCache, TaskTracker};

/// What the invocation does. Exactly one per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Doctor,
    Undo,
    /// Dry run; optionally freeze the plan to a file.
    Plan { save: Option<PathBuf> },
    Execute { source: PlanSource },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanSource {
    Live,
    Frozen(PathBuf),
}

/// How to treat an unresolved record from a previous run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    Resume,
    Restart,
}

/// Operator-supplied replacement for a derived field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Override {
    Type(CommitType),
    Scope(String),
    Message(String),
}

/// Planning knobs resolved from config and flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOptions {
    pub respect_staging: bool,
    pub include: IncludePolicy,
    pub with_body: bool,
    pub task_ids: bool,
    pub body_template: String,
    pub overrides: Vec<Override>,
    /// Extra `--exclude` patterns on top of the configured denylist.
    pub excludes: Vec<String>,
}

impl PlanOptions {
    pub fn from_config(config: &SweepConfig) -> Self {
        Self {
            respect_staging: false,
            include: IncludePolicy {
                binary: config.include.binary,
                submodules: config.include.submodules,
                broken_symlinks: config.include.broken_symlinks,
            },
            with_body: config.commit.body,
            task_ids: config.commit.task_id,
            body_template: config.commit.body_template.clone(),
            overrides: Vec::new(),
            excludes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepOptions {
    pub mode: Mode,
    /// Roll back the whole repository when any group fails.
    pub atomic: bool,
    /// Roll back every repository when any repository fails.
    pub atomic_repos: bool,
    pub recovery: Option<Recovery>,
    pub plan: PlanOptions,
}

/// One repository selected for the run.
#[derive(Debug, Clone)]
pub struct RepoTarget {
    pub name: String,
    pub root: PathBuf,
    pub git: Git,
    pub paths: SweepPaths,
}

impl RepoTarget {
    /// Resolve a user-supplied path to its worktree root.
    pub fn resolve(path: &Path, config: &SweepConfig) -> Result<Self> {
        let git = Git::new(path, config.git_timeout());
        let root = git.toplevel().map_err(|err| {
            SweepError::InvalidArguments(format!(
                "{} is not a git working tree: {err:#}",
                path.display()
            ))
        })?;
        let git = Git::new(&root, config.git_timeout());
        let git_dir = git
            .git_dir()
            .with_context(|| format!("locate git dir for {}", root.display()))?;
        let name = root
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| root.display().to_string());
        Ok(Self {
            name,
            root,
            git,
            paths: SweepPaths::new(git_dir),
        })
    }

    pub fn path_string(&self) -> String {
        self.root.display().to_string()
    }

    /// `path` relative to the worktree root with `/` separators, when it lies
    /// inside the worktree. The file itself need not exist yet.
    pub fn relative_path(&self, path: &Path) -> Option<String> {
        let file_name = path.file_name()?;
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let absolute = parent.canonicalize().ok()?.join(file_name);
        let root = self.root.canonicalize().ok()?;
        let relative = absolute.strip_prefix(&root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|part| part.as_os_str().to_string_lossy().into_owned())
            .collect();
        (!parts.is_empty()).then(|| parts.join("/"))
    }
}

/// Resolve and de-duplicate repository arguments, keeping first-seen order.
pub fn resolve_targets(paths: &[PathBuf], config: &SweepConfig) -> Result<Vec<RepoTarget>> {
    let mut targets: Vec<RepoTarget> = Vec::new();
    for path in paths {
        let target = RepoTarget::resolve(path, config)?;
        if targets.iter().all(|existing| existing.root != target.root) {
            targets.push(target);
        }
    }
    Ok(targets)
}

/// Everything one invocation shares across repositories.
pub struct SweepSession {
    pub run_id: String,
    pub config: SweepConfig,
    pub options: SweepOptions,
    pub cancel: CancelToken,
    pub denylist: Denylist,
    pub tracker: Box<dyn TaskTracker>,
    pub task_cache: TaskCache,
    pub git_version: Option<GitVersion>,
    started: Instant,
}

impl SweepSession {
    pub fn new(config: SweepConfig, options: SweepOptions, cancel: CancelToken) -> Result<Self> {
        let tracker: Box<dyn TaskTracker> = if config.tracker.enabled {
            Box::new(CliTaskTracker {
                command: config.tracker.command.clone(),
                timeout: config.tracker_timeout(),
            })
        } else {
            Box::new(NoTracker)
        };
        Self::with_tracker(config, options, cancel, tracker)
    }

    /// Construct with an explicit tracker (tests use fakes here).
    pub fn with_tracker(
        config: SweepConfig,
        options: SweepOptions,
        cancel: CancelToken,
        tracker: Box<dyn TaskTracker>,
    ) -> Result<Self> {
        let mut patterns = config.denylist.clone();
        patterns.extend(options.plan.excludes.iter().cloned());
        let denylist = Denylist::new(&patterns)
            .map_err(|err| SweepError::InvalidArguments(format!("{err:#}")))?;
        Ok(Self {
            run_id: new_run_id(),
            config,
            options,
            cancel,
            denylist,
            tracker,
            task_cache: TaskCache::default(),
            git_version: None,
            started: Instant::now(),
        })
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// The plan file this run writes (`--save-plan`) or reads (`--execute-plan`).
    pub fn plan_file(&self) -> Option<&Path> {
        match &self.options.mode {
            Mode::Plan { save } => save.as_deref(),
            Mode::Execute {
                source: PlanSource::Frozen(path),
            } => Some(path),
            _ => None,
        }
    }

    /// Worktree paths owned by the run itself; never part of a change set.
    pub fn own_paths(&self, target: &RepoTarget) -> Vec<String> {
        self.plan_file()
            .and_then(|path| target.relative_path(path))
            .into_iter()
            .collect()
    }
}

/// Timestamp plus pid: unique per invocation and sortable.
pub fn new_run_id() -> String {
    format!(
        "{}-{}",
        Utc::now().format("%Y%m%dT%H%M%S%.3fZ"),
        std::process::id()
    )
}
