//! Path safety rules and exclusion policy.
//!
//! Unsafe paths fail the whole repository before anything is staged.
//! Denylisted, binary, submodule, and broken-symlink entries are excluded from
//! grouping and reported under `skipped`, never folded into a commit.

use std::fmt;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::core::types::FileChange;

/// Default denylist: secrets and build artifacts.
pub const DEFAULT_DENYLIST: [&str; 17] = [
    ".env",
    ".env.*",
    "*.pem",
    "*.key",
    "*.p12",
    "*.pfx",
    "*.keystore",
    "id_rsa*",
    "id_ed25519*",
    "credentials.json",
    "**/node_modules/**",
    "**/__pycache__/**",
    "*.pyc",
    "*.o",
    "*.so",
    "*.class",
    ".DS_Store",
];

/// Reason a path is refused outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathViolation {
    NulByte,
    LeadingDash,
    Absolute,
    ParentTraversal,
    InvalidEncoding,
    Empty,
}

impl fmt::Display for PathViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PathViolation::NulByte => "contains a null byte",
            PathViolation::LeadingDash => "starts with '-' (flag injection)",
            PathViolation::Absolute => "is absolute",
            PathViolation::ParentTraversal => "contains a '..' component",
            PathViolation::InvalidEncoding => "is not valid UTF-8",
            PathViolation::Empty => "is empty",
        };
        f.write_str(text)
    }
}

/// Check a repository-relative path for injection and traversal risks.
pub fn check_path(path: &str) -> Result<(), PathViolation> {
    if path.is_empty() {
        return Err(PathViolation::Empty);
    }
    if path.contains('\0') {
        return Err(PathViolation::NulByte);
    }
    if path.starts_with('-') {
        return Err(PathViolation::LeadingDash);
    }
    if path.starts_with('/') || path.starts_with('\\') || has_drive_prefix(path) {
        return Err(PathViolation::Absolute);
    }
    if path.split(['/', '\\']).any(|part| part == "..") {
        return Err(PathViolation::ParentTraversal);
    }
    Ok(())
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Compiled glob patterns matched against full paths and file names.
#[derive(Debug, Clone)]
pub struct Denylist {
    set: GlobSet,
}

impl Denylist {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = Glob::new(pattern).with_context(|| format!("invalid pattern '{pattern}'"))?;
            builder.add(glob);
        }
        let set = builder.build().context("compile denylist")?;
        Ok(Self { set })
    }

    pub fn is_denied(&self, path: &str) -> bool {
        let name = path.rsplit('/').next().unwrap_or(path);
        self.set.is_match(path) || self.set.is_match(name)
    }
}

/// Which flagged categories the operator opted back in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IncludePolicy {
    pub binary: bool,
    pub submodules: bool,
    pub broken_symlinks: bool,
}

/// Paths excluded from grouping, by reason.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skipped {
    pub binary: Vec<String>,
    pub submodules: Vec<String>,
    pub excluded: Vec<String>,
    pub broken_symlinks: Vec<String>,
}

impl Skipped {
    pub fn is_empty(&self) -> bool {
        self.binary.is_empty()
            && self.submodules.is_empty()
            && self.excluded.is_empty()
            && self.broken_symlinks.is_empty()
    }

    pub fn total(&self) -> usize {
        self.binary.len() + self.submodules.len() + self.excluded.len() + self.broken_symlinks.len()
    }
}

/// Result of screening a change set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Screened {
    pub kept: Vec<FileChange>,
    pub skipped: Skipped,
    /// `path: reason` for every unsafe path; non-empty fails the repository.
    pub violations: Vec<String>,
}

/// Apply path safety, the denylist, and flag-based exclusion.
pub fn screen(changes: Vec<FileChange>, denylist: &Denylist, include: IncludePolicy) -> Screened {
    let mut screened = Screened::default();
    for mut change in changes {
        let paths = std::iter::once(change.path.as_str()).chain(change.orig_path.as_deref());
        let violation = paths
            .filter_map(|path| check_path(path).err().map(|err| (path.to_string(), err)))
            .next();
        if let Some((path, err)) = violation {
            screened.violations.push(format!("{path:?}: {err}"));
            continue;
        }

        if denylist.is_denied(&change.path) {
            change.flags.denylisted = true;
            screened.skipped.excluded.push(change.path);
            continue;
        }
        if change.flags.submodule && !include.submodules {
            screened.skipped.submodules.push(change.path);
            continue;
        }
        if change.flags.broken_symlink && !include.broken_symlinks {
            screened.skipped.broken_symlinks.push(change.path);
            continue;
        }
        if change.flags.binary && !include.binary {
            screened.skipped.binary.push(change.path);
            continue;
        }
        screened.kept.push(change);
    }
    screened
}
