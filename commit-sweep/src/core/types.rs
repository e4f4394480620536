//! Shared deterministic types for commit-sweep core logic.
//!
//! These types define stable contracts between the collector, classifier,
//! grouper, and message builder. They hold no I/O handles and serialize to the
//! stable names used in the plan document.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Scope label used when a group only touches top-level files.
pub const ROOT_SCOPE: &str = "root";

/// Semantic bucket assigned to each changed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Source,
    Test,
    Doc,
    Config,
}

impl Bucket {
    pub fn as_str(self) -> &'static str {
        match self {
            Bucket::Source => "source",
            Bucket::Test => "test",
            Bucket::Doc => "doc",
            Bucket::Config => "config",
        }
    }
}

/// Kind of change a two-character status code describes.
///
/// Declaration order is the tie-break precedence used for type derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Renamed,
    Deleted,
    Modified,
}

impl ChangeKind {
    /// Derive the change kind from an `XY` porcelain code.
    pub fn from_code(code: &str) -> Self {
        if code == "??" {
            return ChangeKind::Added;
        }
        let has = |c: char| code.chars().any(|ch| ch == c);
        if has('R') {
            ChangeKind::Renamed
        } else if has('A') || has('C') {
            ChangeKind::Added
        } else if has('D') {
            ChangeKind::Deleted
        } else {
            ChangeKind::Modified
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Renamed => "renamed",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Modified => "modified",
        }
    }
}

/// Exclusion-relevant properties discovered while collecting a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFlags {
    pub binary: bool,
    pub submodule: bool,
    pub broken_symlink: bool,
    pub denylisted: bool,
}

/// One changed path in the working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    /// Prior path for renames and copies.
    pub orig_path: Option<String>,
    /// Two-character `XY` status code (index half, worktree half).
    pub code: String,
    pub bucket: Bucket,
    pub flags: FileFlags,
}

impl FileChange {
    pub fn new(path: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            orig_path: None,
            code: code.into(),
            bucket: Bucket::Source,
            flags: FileFlags::default(),
        }
    }

    pub fn kind(&self) -> ChangeKind {
        ChangeKind::from_code(&self.code)
    }

    /// Top-level directory, or `None` for files at the repository root.
    pub fn top_level(&self) -> Option<&str> {
        top_level_dir(&self.path)
    }

    /// True when the index half records a change (manually staged).
    pub fn is_staged(&self) -> bool {
        index_half(&self.code) != ' ' && self.code != "??"
    }

    /// True when the worktree half records a change not yet staged.
    pub fn has_unstaged(&self) -> bool {
        self.code == "??" || worktree_half(&self.code) != ' '
    }

    /// File name component of the path.
    pub fn file_name(&self) -> &str {
        file_name(&self.path)
    }
}

pub fn index_half(code: &str) -> char {
    code.chars().next().unwrap_or(' ')
}

pub fn worktree_half(code: &str) -> char {
    code.chars().nth(1).unwrap_or(' ')
}

pub fn top_level_dir(path: &str) -> Option<&str> {
    path.split_once('/').map(|(head, _)| head)
}

pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Conventional-commit type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitType {
    Feat,
    Fix,
    Test,
    Docs,
    Chore,
    Refactor,
}

impl CommitType {
    pub fn as_str(self) -> &'static str {
        match self {
            CommitType::Feat => "feat",
            CommitType::Fix => "fix",
            CommitType::Test => "test",
            CommitType::Docs => "docs",
            CommitType::Chore => "chore",
            CommitType::Refactor => "refactor",
        }
    }
}

impl fmt::Display for CommitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommitType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "feat" => Ok(CommitType::Feat),
            "fix" => Ok(CommitType::Fix),
            "test" => Ok(CommitType::Test),
            "docs" => Ok(CommitType::Docs),
            "chore" => Ok(CommitType::Chore),
            "refactor" => Ok(CommitType::Refactor),
            other => Err(format!(
                "unknown commit type '{other}' (expected feat, fix, test, docs, chore, refactor)"
            )),
        }
    }
}

/// Confidence level derived from the additive score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn from_score(score: i32) -> Self {
        if score >= 3 {
            ConfidenceLevel::High
        } else if score >= 1 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceLevel::High => "high",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::Low => "low",
        }
    }
}

/// Confidence score plus the factor codes that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confidence {
    pub level: ConfidenceLevel,
    pub score: i32,
    pub factors: Vec<String>,
}

/// An atomic commit group ready for message rendering and execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: String,
    pub commit_type: CommitType,
    pub scope: String,
    /// Sorted by path, never empty.
    pub files: Vec<FileChange>,
    pub confidence: Confidence,
    pub message: String,
    pub body: Option<String>,
    /// Group built from the manually staged index.
    pub pre_staged: bool,
}
