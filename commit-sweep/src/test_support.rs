//! Test-only helpers: scratch repositories and a ready-made session.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tempfile::TempDir;

use crate::io::config::SweepConfig;
use crate::io::git::Git;
use crate::io::signal::CancelToken;
use crate::io::tracker::NoTracker;
use crate::session::{Mode, PlanOptions, RepoTarget, SweepOptions, SweepSession};

const TEST_GIT_TIMEOUT: Duration = Duration::from_secs(30);

/// A throwaway git repository under a temp directory.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    /// Repository with one commit holding `README.md`.
    pub fn new() -> Result<Self> {
        let repo = Self::empty()?;
        repo.commit_file("README.md", "hi\n")?;
        Ok(repo)
    }

    /// Repository on an unborn `main` branch.
    pub fn empty() -> Result<Self> {
        let repo = Self {
            dir: tempfile::tempdir().context("create temp dir")?,
        };
        repo.run_git(&["init", "-q", "-b", "main"])?;
        repo.run_git(&["config", "user.email", "sweep@example.com"])?;
        repo.run_git(&["config", "user.name", "Sweep Test"])?;
        repo.run_git(&["config", "commit.gpgsign", "false"])?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn git(&self) -> Git {
        Git::new(self.path(), TEST_GIT_TIMEOUT)
    }

    pub fn target(&self) -> Result<RepoTarget> {
        RepoTarget::resolve(self.path(), &SweepConfig::default())
    }

    pub fn git_dir(&self) -> PathBuf {
        self.path().join(".git")
    }

    pub fn write(&self, rel: &str, contents: &str) -> Result<()> {
        self.write_bytes(rel, contents.as_bytes())
    }

    pub fn write_bytes(&self, rel: &str, contents: &[u8]) -> Result<()> {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    pub fn remove(&self, rel: &str) -> Result<()> {
        let path = self.path().join(rel);
        fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))
    }

    /// Write and commit a single file with a fixed message.
    pub fn commit_file(&self, rel: &str, contents: &str) -> Result<()> {
        self.write(rel, contents)?;
        self.run_git(&["add", "--", rel])?;
        self.run_git(&["commit", "-q", "-m", &format!("seed {rel}")])?;
        Ok(())
    }

    pub fn checkout_new_branch(&self, name: &str) -> Result<()> {
        self.run_git(&["checkout", "-q", "-b", name])?;
        Ok(())
    }

    /// Install an executable hook script under `.git/hooks`.
    pub fn install_hook(&self, name: &str, script: &str) -> Result<()> {
        let path = self.git_dir().join("hooks").join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, script)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        }
        Ok(())
    }

    pub fn last_subject(&self) -> Result<String> {
        Ok(self.run_git(&["log", "-1", "--format=%s"])?.trim().to_string())
    }

    /// The newest `count` subjects, newest first.
    pub fn subjects(&self, count: usize) -> Result<Vec<String>> {
        let out = self.run_git(&["log", &format!("-{count}"), "--format=%s"])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    pub fn commit_count(&self) -> Result<usize> {
        let out = self.run_git(&["rev-list", "--count", "HEAD"])?;
        out.trim().parse().context("parse rev-list count")
    }

    pub fn status_porcelain(&self) -> Result<String> {
        Ok(self
            .run_git(&["status", "--porcelain", "--untracked-files=all"])?
            .trim()
            .to_string())
    }

    pub fn ref_exists(&self, name: &str) -> bool {
        self.run_git(&["rev-parse", "--verify", "-q", name]).is_ok()
    }

    /// Run git in the repository and return stdout.
    pub fn run_git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .with_context(|| format!("spawn git {args:?}"))?;
        if !output.status.success() {
            bail!(
                "git {args:?} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Dry-run session with default config and no task tracker.
pub fn test_session() -> SweepSession {
    let config = SweepConfig::default();
    let options = SweepOptions {
        mode: Mode::Plan { save: None },
        atomic: false,
        atomic_repos: false,
        recovery: None,
        plan: PlanOptions::from_config(&config),
    };
    match SweepSession::with_tracker(config, options, CancelToken::new(), Box::new(NoTracker)) {
        Ok(session) => session,
        Err(err) => panic!("default session: {err:#}"),
    }
}
