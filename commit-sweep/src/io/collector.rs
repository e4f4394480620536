//! Capture a repository's change set from one NUL-delimited status call.

use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::core::status::{StatusEntry, parse_status_z};
use crate::core::types::{ChangeKind, FileChange, FileFlags};
use crate::io::git::Git;

/// Bytes inspected when sniffing for binary content.
const BINARY_SNIFF_BYTES: usize = 8000;

/// Everything the planner needs from the live repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub branch: Option<String>,
    pub head: Option<String>,
    /// Status order; flags set, buckets not yet classified.
    pub changes: Vec<FileChange>,
    /// Unmerged paths; any entry here is a hard stop.
    pub conflicts: Vec<String>,
    /// Paths git reported that are not valid UTF-8 (lossy rendering).
    pub invalid_encoding: Vec<String>,
    /// SHA-256 over HEAD, the status records, and changed file contents.
    pub state_digest: String,
}

impl Snapshot {
    pub fn is_clean(&self) -> bool {
        self.changes.is_empty() && self.conflicts.is_empty() && self.invalid_encoding.is_empty()
    }
}

/// Paths listed in `ignored` (worktree-relative) are dropped from both the
/// change set and the digest.
#[instrument(skip_all, fields(repo = %git.workdir().display()))]
pub fn collect(git: &Git, ignored: &[String]) -> Result<Snapshot> {
    let branch = git.current_branch()?;
    let head = git.head()?;
    let raw = git.status_raw()?;
    let entries: Vec<StatusEntry> = parse_status_z(&raw)
        .context("parse git status")?
        .into_iter()
        .filter(|entry| !ignored.contains(&entry.path))
        .collect();

    let mut changes = Vec::new();
    let mut conflicts = Vec::new();
    let mut invalid_encoding = Vec::new();
    for entry in &entries {
        if entry.is_unmerged() {
            conflicts.push(entry.path.clone());
            continue;
        }
        if !entry.utf8 {
            invalid_encoding.push(entry.path.clone());
            continue;
        }
        let mut change = FileChange::new(entry.path.clone(), entry.code.clone());
        change.orig_path = entry.orig_path.clone();
        change.flags = inspect(git.workdir(), &change);
        changes.push(change);
    }

    let state_digest = state_digest(git.workdir(), head.as_deref(), &entries, &changes)?;
    debug!(
        changes = changes.len(),
        conflicts = conflicts.len(),
        digest = %state_digest,
        "collected change set"
    );
    Ok(Snapshot {
        branch,
        head,
        changes,
        conflicts,
        invalid_encoding,
        state_digest,
    })
}

/// Discover binary, submodule, and broken-symlink flags. Deleted paths are not inspected.
fn inspect(root: &Path, change: &FileChange) -> FileFlags {
    let mut flags = FileFlags::default();
    if change.kind() == ChangeKind::Deleted {
        return flags;
    }
    let full = root.join(change.path.trim_end_matches('/'));
    let Ok(meta) = fs::symlink_metadata(&full) else {
        return flags;
    };
    let file_type = meta.file_type();
    if file_type.is_symlink() {
        flags.broken_symlink = fs::metadata(&full).is_err();
    } else if file_type.is_dir() {
        flags.submodule = change.path.ends_with('/') || full.join(".git").exists();
    } else if file_type.is_file() {
        flags.binary = looks_binary(&full);
    }
    flags
}

fn looks_binary(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    let mut head = Vec::with_capacity(BINARY_SNIFF_BYTES);
    if file
        .take(BINARY_SNIFF_BYTES as u64)
        .read_to_end(&mut head)
        .is_err()
    {
        return false;
    }
    head.contains(&0)
}

fn state_digest(
    root: &Path,
    head: Option<&str>,
    entries: &[StatusEntry],
    changes: &[FileChange],
) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(head.unwrap_or("unborn").as_bytes());
    hasher.update([0]);
    for entry in entries {
        hasher.update(entry.code.as_bytes());
        hasher.update(entry.path.as_bytes());
        hasher.update([0]);
        hasher.update(entry.orig_path.as_deref().unwrap_or("").as_bytes());
        hasher.update([0]);
    }

    let mut paths: Vec<&str> = changes.iter().map(|c| c.path.as_str()).collect();
    paths.sort_unstable();
    for path in paths {
        let full = root.join(path);
        let is_regular = fs::symlink_metadata(&full).is_ok_and(|meta| meta.is_file());
        if !is_regular {
            continue;
        }
        let contents = fs::read(&full).with_context(|| format!("read {}", full.display()))?;
        hasher.update(path.as_bytes());
        hasher.update([0]);
        hasher.update(&contents);
        hasher.update([0]);
    }
    Ok(hex::encode(hasher.finalize()))
}
