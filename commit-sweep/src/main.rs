//! commit-sweep: turn a dirty git working tree into atomic conventional commits.
//!
//! Dry run by default. `--execute` commits group by group under a
//! per-repository lock and checkpoint; `--undo` rewinds the last sweep.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};

use commit_sweep::core::types::CommitType;
use commit_sweep::doctor::run_doctor;
use commit_sweep::error::exit_code_for;
use commit_sweep::exit_codes;
use commit_sweep::io::config::{SweepConfig, load_config};
use commit_sweep::io::git::ensure_git_supported;
use commit_sweep::io::signal::CancelToken;
use commit_sweep::logging;
use commit_sweep::report::{render_doctor, render_plan};
use commit_sweep::session::{
    Mode, Override, PlanOptions, PlanSource, Recovery, SweepOptions, SweepSession,
};
use commit_sweep::sweep::run_sweep;

#[derive(Parser, Debug)]
#[command(
    name = "commit-sweep",
    version,
    about = "Turn a dirty git working tree into atomic conventional commits",
    group(ArgGroup::new("executing").args(["execute", "execute_plan"]).multiple(true))
)]
struct Cli {
    /// Repository paths (default: the current directory).
    #[arg(value_name = "REPO")]
    repos: Vec<PathBuf>,

    /// Create the commits.
    #[arg(long, conflicts_with = "dry_run")]
    execute: bool,

    /// Only print the plan (default).
    #[arg(long)]
    dry_run: bool,

    /// Roll back the whole repository if any group fails.
    #[arg(long, requires = "executing")]
    atomic: bool,

    /// Roll back every repository if any repository fails.
    #[arg(long, requires = "executing")]
    atomic_repos: bool,

    /// Freeze the dry-run plan to FILE.
    #[arg(long, value_name = "FILE", conflicts_with_all = ["execute", "execute_plan"])]
    save_plan: Option<PathBuf>,

    /// Execute a plan previously frozen with --save-plan.
    #[arg(long, value_name = "FILE", conflicts_with = "dry_run")]
    execute_plan: Option<PathBuf>,

    /// Keep commits from an unfinished previous sweep and re-plan the rest.
    #[arg(long, conflicts_with = "restart")]
    resume: bool,

    /// Roll an unfinished previous sweep back to its checkpoint, then re-plan.
    #[arg(long)]
    restart: bool,

    /// Rewind the last completed sweep.
    #[arg(long, conflicts_with_all = ["execute", "dry_run", "save_plan", "execute_plan"])]
    undo: bool,

    /// Check git, the task tracker, config, and the given repositories.
    #[arg(long, conflicts_with_all = ["execute", "dry_run", "save_plan", "execute_plan", "undo"])]
    doctor: bool,

    /// Commit the manually staged index as its own first group.
    #[arg(long)]
    respect_staging: bool,

    /// Exclude paths matching PATTERN (repeatable).
    #[arg(long, value_name = "PATTERN")]
    exclude: Vec<String>,

    /// Force the commit type of every group.
    #[arg(long = "type", value_name = "TYPE")]
    commit_type: Option<CommitType>,

    /// Force the scope of every group.
    #[arg(long, value_name = "SCOPE")]
    scope: Option<String>,

    /// Use MESSAGE as the subject when exactly one group is planned.
    #[arg(long, value_name = "MESSAGE")]
    message: Option<String>,

    /// TOML configuration file.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print the plan as JSON instead of the text report.
    #[arg(long)]
    json: bool,

    #[arg(long)]
    include_binary: bool,

    #[arg(long)]
    include_submodules: bool,

    #[arg(long)]
    include_broken_symlinks: bool,

    /// Add a body listing each file and the task reference.
    #[arg(long)]
    body: bool,

    /// Do not derive a task identifier from the branch name.
    #[arg(long)]
    no_task_id: bool,
}

impl Cli {
    fn mode(&self) -> Mode {
        if self.doctor {
            Mode::Doctor
        } else if self.undo {
            Mode::Undo
        } else if let Some(path) = &self.execute_plan {
            Mode::Execute {
                source: PlanSource::Frozen(path.clone()),
            }
        } else if self.execute {
            Mode::Execute {
                source: PlanSource::Live,
            }
        } else {
            Mode::Plan {
                save: self.save_plan.clone(),
            }
        }
    }

    fn recovery(&self) -> Option<Recovery> {
        match (self.resume, self.restart) {
            (true, _) => Some(Recovery::Resume),
            (_, true) => Some(Recovery::Restart),
            _ => None,
        }
    }

    fn sweep_options(&self, config: &SweepConfig) -> SweepOptions {
        let mut plan = PlanOptions::from_config(config);
        plan.respect_staging = self.respect_staging;
        plan.include.binary |= self.include_binary;
        plan.include.submodules |= self.include_submodules;
        plan.include.broken_symlinks |= self.include_broken_symlinks;
        plan.with_body |= self.body;
        plan.task_ids &= !self.no_task_id;
        plan.excludes = self.exclude.clone();
        plan.overrides = self
            .commit_type
            .map(Override::Type)
            .into_iter()
            .chain(self.scope.clone().map(Override::Scope))
            .chain(self.message.clone().map(Override::Message))
            .collect();
        SweepOptions {
            mode: self.mode(),
            atomic: self.atomic,
            atomic_repos: self.atomic_repos,
            recovery: self.recovery(),
            plan,
        }
    }

    fn repo_args(&self) -> Vec<PathBuf> {
        if self.repos.is_empty() {
            vec![PathBuf::from(".")]
        } else {
            self.repos.clone()
        }
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                exit_codes::INVALID
            } else {
                exit_codes::OK
            };
            err.print().ok();
            std::process::exit(code);
        }
    };
    logging::init();

    let code = match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("commit-sweep: {err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn run(cli: &Cli) -> Result<i32> {
    let config = load_config(cli.config.as_deref());
    if cli.doctor {
        let report = run_doctor(&config, &cli.repos);
        print!("{}", render_doctor(&report));
        return Ok(report.exit_code);
    }

    let config = config?;
    let git_version = ensure_git_supported(config.git_timeout())?;
    let options = cli.sweep_options(&config);
    let cancel = CancelToken::new();
    cancel.install_handler()?;
    let mut session = SweepSession::new(config, options, cancel)?;
    session.git_version = Some(git_version);

    let outcome = run_sweep(&mut session, &cli.repo_args())?;
    if cli.json {
        let json = serde_json::to_string_pretty(&outcome.plan).context("serialize plan")?;
        println!("{json}");
    } else {
        print!("{}", render_plan(&outcome.plan));
    }
    Ok(outcome.exit_code)
}
