//! Git adapter for commit-sweep.
//!
//! Every call goes through [`run_command_with_timeout`] with literal
//! pathspecs and a fixed locale. Paths are never passed as arguments: they
//! travel NUL-delimited on stdin via `--pathspec-from-file=- --pathspec-file-nul`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::error::SweepError;
use crate::io::process::{
    CommandOutput, DEFAULT_OUTPUT_LIMIT_BYTES, is_not_found, run_command_with_timeout,
};

/// Oldest git that supports `--pathspec-from-file` on `add` and `reset`.
pub const MIN_GIT_VERSION: GitVersion = GitVersion {
    major: 2,
    minor: 26,
    patch: 0,
};

const PATHSPEC_STDIN: [&str; 2] = ["--pathspec-from-file=-", "--pathspec-file-nul"];

/// Parsed `git --version` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GitVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl GitVersion {
    /// Parse `git version 2.43.0` (vendor suffixes like `.windows.1` ignored).
    pub fn parse(output: &str) -> Option<Self> {
        let version = output.trim().strip_prefix("git version ")?;
        let mut parts = version
            .split(|c: char| !c.is_ascii_digit())
            .filter(|part| !part.is_empty())
            .map(|part| part.parse::<u32>().ok());
        let major = parts.next()??;
        let minor = parts.next()??;
        let patch = parts.next().flatten().unwrap_or(0);
        Some(Self {
            major,
            minor,
            patch,
        })
    }
}

impl fmt::Display for GitVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Query the installed git version, mapping absence to a dependency error.
#[instrument(skip_all)]
pub fn git_version(timeout: Duration) -> Result<GitVersion> {
    let mut cmd = Command::new("git");
    cmd.arg("--version").env("LC_ALL", "C");
    let out = match run_command_with_timeout(cmd, None, timeout, 4096) {
        Ok(out) => out,
        Err(err) if is_not_found(&err) => {
            return Err(SweepError::DependencyMissing {
                tool: "git".to_string(),
                detail: "not found on PATH".to_string(),
            }
            .into());
        }
        Err(err) => return Err(err).context("run git --version"),
    };
    if !out.success() {
        return Err(SweepError::DependencyMissing {
            tool: "git".to_string(),
            detail: out.stderr_lossy().trim().to_string(),
        }
        .into());
    }
    let text = out.stdout_lossy();
    let version = GitVersion::parse(&text)
        .ok_or_else(|| anyhow!("unrecognized git version output: '{}'", text.trim()))?;
    debug!(%version, "git version");
    Ok(version)
}

/// Fail with a dependency error unless git is new enough.
pub fn ensure_git_supported(timeout: Duration) -> Result<GitVersion> {
    let version = git_version(timeout)?;
    if version < MIN_GIT_VERSION {
        return Err(SweepError::DependencyTooOld {
            found: version.to_string(),
            required: MIN_GIT_VERSION.to_string(),
        }
        .into());
    }
    Ok(version)
}

/// A multi-step git operation left half-finished in the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOperation {
    Merge,
    Rebase,
    CherryPick,
    Revert,
    Bisect,
}

impl PendingOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            PendingOperation::Merge => "merge",
            PendingOperation::Rebase => "rebase",
            PendingOperation::CherryPick => "cherry-pick",
            PendingOperation::Revert => "revert",
            PendingOperation::Bisect => "bisect",
        }
    }
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    timeout: Duration,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Absolute top-level directory of the working tree.
    pub fn toplevel(&self) -> Result<PathBuf> {
        let out = self.run_capture(&["rev-parse", "--show-toplevel"])?;
        Ok(PathBuf::from(out.trim()))
    }

    /// Absolute path of the repository's git directory.
    pub fn git_dir(&self) -> Result<PathBuf> {
        let out = self.run_capture(&["rev-parse", "--absolute-git-dir"])?;
        Ok(PathBuf::from(out.trim()))
    }

    /// Current branch, `None` on a detached HEAD.
    pub fn current_branch(&self) -> Result<Option<String>> {
        let out = self.run(&["symbolic-ref", "--quiet", "--short", "HEAD"], None)?;
        if !out.success() {
            debug!("detached HEAD");
            return Ok(None);
        }
        Ok(Some(out.stdout_lossy().trim().to_string()))
    }

    /// Commit HEAD points at, `None` on an unborn branch.
    pub fn head(&self) -> Result<Option<String>> {
        let out = self.run(&["rev-parse", "--verify", "--quiet", "HEAD^{commit}"], None)?;
        if !out.success() {
            return Ok(None);
        }
        Ok(Some(out.stdout_lossy().trim().to_string()))
    }

    /// Detect merge/rebase/cherry-pick/revert/bisect state markers.
    pub fn pending_operation(&self, git_dir: &Path) -> Option<PendingOperation> {
        let markers = [
            ("MERGE_HEAD", PendingOperation::Merge),
            ("rebase-merge", PendingOperation::Rebase),
            ("rebase-apply", PendingOperation::Rebase),
            ("CHERRY_PICK_HEAD", PendingOperation::CherryPick),
            ("REVERT_HEAD", PendingOperation::Revert),
            ("BISECT_LOG", PendingOperation::Bisect),
        ];
        markers
            .into_iter()
            .find(|(marker, _)| git_dir.join(marker).exists())
            .map(|(_, op)| op)
    }

    /// Raw NUL-delimited status bytes, untracked files and submodules included.
    #[instrument(skip_all)]
    pub fn status_raw(&self) -> Result<Vec<u8>> {
        let out = self.run_checked(
            &[
                "status",
                "--porcelain=v1",
                "-z",
                "--untracked-files=all",
                "--ignore-submodules=none",
            ],
            None,
        )?;
        Ok(out.stdout)
    }

    /// Every path currently recorded in the index.
    pub fn index_paths(&self) -> Result<Vec<String>> {
        let out = self.run_checked(&["ls-files", "-z", "--cached"], None)?;
        Ok(split_nul(&out.stdout))
    }

    /// Paths with staged changes relative to HEAD.
    pub fn staged_paths(&self) -> Result<Vec<String>> {
        let out = self.run_checked(&["diff", "--cached", "--name-only", "-z"], None)?;
        Ok(split_nul(&out.stdout))
    }

    /// Stage additions and modifications for an explicit path list.
    #[instrument(skip_all, fields(count = paths.len()))]
    pub fn add_paths(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        self.run_pathspec(&["add"], paths)
    }

    /// Stage removals of tracked paths that no longer exist in the worktree.
    #[instrument(skip_all, fields(count = paths.len()))]
    pub fn add_tracked_removals(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        self.run_pathspec(&["add", "-u"], paths)
    }

    /// Unstage an explicit path list back to HEAD.
    #[instrument(skip_all, fields(count = paths.len()))]
    pub fn reset_paths(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        self.run_pathspec(&["reset", "-q"], paths)
    }

    /// Reset the whole index to HEAD (or empty it on an unborn branch).
    pub fn reset_index(&self, head: Option<&str>) -> Result<()> {
        match head {
            Some(_) => self.run_checked(&["reset", "-q"], None)?,
            None => self.run_checked(&["read-tree", "--empty"], None)?,
        };
        Ok(())
    }

    /// Commit the index with a message fed on stdin. Hooks run.
    #[instrument(skip_all)]
    pub fn commit(&self, message: &str) -> Result<String> {
        self.run_checked(&["commit", "-q", "-F", "-"], Some(message.as_bytes()))?;
        self.head()?
            .ok_or_else(|| anyhow!("commit succeeded but HEAD is unborn"))
    }

    /// Write the index as a tree object.
    pub fn write_tree(&self) -> Result<String> {
        Ok(self.run_capture(&["write-tree"])?.trim().to_string())
    }

    /// Snapshot tracked worktree changes as a dangling stash commit, if any.
    pub fn stash_create(&self) -> Result<Option<String>> {
        let sha = self.run_capture(&["stash", "create"])?.trim().to_string();
        Ok((!sha.is_empty()).then_some(sha))
    }

    pub fn update_ref(&self, name: &str, target: &str) -> Result<()> {
        self.run_checked(&["update-ref", name, target], None)?;
        Ok(())
    }

    /// Delete a ref; a missing ref is not an error.
    pub fn delete_ref(&self, name: &str) -> Result<()> {
        let out = self.run(&["update-ref", "-d", name], None)?;
        if !out.success() {
            warn!(name, stderr = %out.stderr_lossy().trim(), "update-ref -d failed");
        }
        Ok(())
    }

    /// Move the current branch to `target` without touching index or worktree.
    pub fn reset_soft(&self, target: &str) -> Result<()> {
        self.run_checked(&["reset", "-q", "--soft", target], None)?;
        Ok(())
    }

    /// Delete the branch HEAD points at, returning it to unborn.
    pub fn unborn_head(&self) -> Result<()> {
        self.run_checked(&["update-ref", "-d", "HEAD"], None)?;
        Ok(())
    }

    /// Replace the index with a tree object.
    pub fn read_tree(&self, tree: &str) -> Result<()> {
        self.run_checked(&["read-tree", tree], None)?;
        Ok(())
    }

    /// Refresh cached stat data after the index was replaced.
    pub fn refresh_index(&self) -> Result<()> {
        // Exit status is non-zero when entries need updating, which is expected here.
        self.run(&["update-index", "-q", "--refresh"], None)?;
        Ok(())
    }

    fn run_pathspec(&self, args: &[&str], paths: &[String]) -> Result<()> {
        let mut full: Vec<&str> = args.to_vec();
        full.extend(PATHSPEC_STDIN);
        let stdin = nul_join(paths);
        self.run_checked(&full, Some(&stdin))?;
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args, None)?;
        Ok(output.stdout_lossy())
    }

    fn run_checked(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<CommandOutput> {
        let output = self.run(args, stdin)?;
        if output.timed_out {
            return Err(anyhow!(
                "git {} timed out after {}s",
                args.join(" "),
                self.timeout.as_secs()
            ));
        }
        if !output.status.success() {
            let stderr = output.stderr_lossy();
            let stdout = output.stdout_lossy();
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(anyhow!("git {} failed: {}", args.join(" "), detail));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<CommandOutput> {
        debug!(args = %args.join(" "), "git");
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.workdir)
            .env("GIT_LITERAL_PATHSPECS", "1")
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_OPTIONAL_LOCKS", "0")
            .env("LC_ALL", "C");
        run_command_with_timeout(cmd, stdin, self.timeout, DEFAULT_OUTPUT_LIMIT_BYTES)
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn nul_join(paths: &[String]) -> Vec<u8> {
    let mut buf = Vec::new();
    for path in paths {
        buf.extend_from_slice(path.as_bytes());
        buf.push(0);
    }
    buf
}

fn split_nul(raw: &[u8]) -> Vec<String> {
    raw.split(|b| *b == 0)
        .filter(|field| !field.is_empty())
        .map(|field| String::from_utf8_lossy(field).to_string())
        .collect()
}
