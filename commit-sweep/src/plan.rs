//! The versioned plan document (schema v1).
//!
//! A plan is built fresh from live repository state, optionally frozen to a
//! file with an integrity checksum, and updated in place as groups execute.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::types::{CommitType, Confidence, Group};
use crate::core::validator::Skipped;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub schema_version: u32,
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub repos: Vec<RepoPlan>,
    pub summary: Summary,
    #[serde(rename = "_meta")]
    pub meta: Meta,
    /// SHA-256 of the document serialized with this field absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoStatus {
    Planned,
    Executing,
    Partial,
    Completed,
    Failed,
    Interrupted,
    SkippedConflict,
}

impl RepoStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RepoStatus::Planned => "planned",
            RepoStatus::Executing => "executing",
            RepoStatus::Partial => "partial",
            RepoStatus::Completed => "completed",
            RepoStatus::Failed => "failed",
            RepoStatus::Interrupted => "interrupted",
            RepoStatus::SkippedConflict => "skipped_conflict",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoPlan {
    /// Display name (directory name of the worktree root).
    pub repo: String,
    /// Absolute worktree root.
    pub path: String,
    pub branch: Option<String>,
    pub head: Option<String>,
    pub task_id: Option<String>,
    pub task_title: Option<String>,
    pub status: RepoStatus,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub groups: Vec<PlanGroup>,
    pub skipped: Skipped,
    /// Digest of the live state the plan was built from.
    pub state_digest: String,
}

impl RepoPlan {
    pub fn new(repo: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            path: path.into(),
            branch: None,
            head: None,
            task_id: None,
            task_title: None,
            status: RepoStatus::Planned,
            errors: Vec::new(),
            warnings: Vec::new(),
            groups: Vec::new(),
            skipped: Skipped::default(),
            state_digest: String::new(),
        }
    }

    /// Record a failure on both channels: the status and the errors array.
    pub fn fail(&mut self, status: RepoStatus, error: impl Into<String>) {
        self.status = status;
        self.errors.push(error.into());
    }

    pub fn committed_groups(&self) -> usize {
        self.groups.iter().filter(|g| g.commit.is_some()).count()
    }

    pub fn is_dirty(&self) -> bool {
        !self.groups.is_empty()
            || !self.skipped.is_empty()
            || self.status == RepoStatus::SkippedConflict
            || !self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanGroup {
    pub id: String,
    #[serde(rename = "type")]
    pub commit_type: CommitType,
    pub scope: String,
    pub message: String,
    pub body: Option<String>,
    pub files: Vec<String>,
    /// Path to two-character status code.
    pub file_statuses: BTreeMap<String, String>,
    /// New path to prior path, for renames and copies.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub renames: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pre_staged: bool,
    pub confidence: Confidence,
    /// Commit created for this group, once executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

impl PlanGroup {
    /// Full commit message: subject, then the body after a blank line.
    pub fn commit_message(&self) -> String {
        match self.body.as_deref().filter(|body| !body.is_empty()) {
            Some(body) => format!("{}\n\n{body}\n", self.message),
            None => format!("{}\n", self.message),
        }
    }

    /// Every path the group touches, prior rename paths included, sorted and unique.
    pub fn pathspecs(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .files
            .iter()
            .chain(self.renames.values())
            .cloned()
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }
}

impl From<&Group> for PlanGroup {
    fn from(group: &Group) -> Self {
        Self {
            id: group.id.clone(),
            commit_type: group.commit_type,
            scope: group.scope.clone(),
            message: group.message.clone(),
            body: group.body.clone(),
            files: group.files.iter().map(|f| f.path.clone()).collect(),
            file_statuses: group
                .files
                .iter()
                .map(|f| (f.path.clone(), f.code.clone()))
                .collect(),
            renames: group
                .files
                .iter()
                .filter_map(|f| f.orig_path.clone().map(|orig| (f.path.clone(), orig)))
                .collect(),
            pre_staged: group.pre_staged,
            confidence: group.confidence.clone(),
            commit: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Summary {
    pub repos_scanned: usize,
    pub repos_dirty: usize,
    pub groups_planned: usize,
    pub groups_executed: usize,
    pub groups_failed: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Meta {
    /// Wall-clock seconds, millisecond precision.
    pub duration_seconds: f64,
    pub exit_code: i32,
    pub git_version: String,
    pub task_cache_hits: u64,
    pub task_cache_misses: u64,
}

impl Plan {
    pub fn new(run_id: impl Into<String>, repos: Vec<RepoPlan>) -> Self {
        let mut plan = Self {
            schema_version: SCHEMA_VERSION,
            run_id: run_id.into(),
            generated_at: Utc::now(),
            repos,
            summary: Summary::default(),
            meta: Meta::default(),
            checksum: None,
        };
        plan.refresh_summary();
        plan
    }

    /// Recompute summary counters from the repository entries.
    pub fn refresh_summary(&mut self) {
        self.summary.repos_scanned = self.repos.len();
        self.summary.repos_dirty = self.repos.iter().filter(|r| r.is_dirty()).count();
        self.summary.groups_planned = self.repos.iter().map(|r| r.groups.len()).sum();
        self.summary.groups_executed = self.repos.iter().map(RepoPlan::committed_groups).sum();
    }

    pub fn set_duration(&mut self, seconds: f64) {
        self.meta.duration_seconds = (seconds * 1000.0).round() / 1000.0;
    }

    /// Checksum over the canonical serialization with `checksum` cleared.
    pub fn compute_checksum(&self) -> Result<String> {
        let mut unsigned = self.clone();
        unsigned.checksum = None;
        let bytes = serde_json::to_vec(&unsigned).context("serialize plan for checksum")?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    pub fn seal(&mut self) -> Result<()> {
        self.checksum = Some(self.compute_checksum()?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ConfidenceLevel, FileChange};

    fn sample_group() -> PlanGroup {
        let mut renamed = FileChange::new("src/new.rs", "R ");
        renamed.orig_path = Some("src/old.rs".to_string());
        let group = Group {
            id: "g1".to_string(),
            commit_type: CommitType::Refactor,
            scope: "src".to_string(),
            files: vec![renamed, FileChange::new("src/util.rs", " M")],
            confidence: Confidence {
                level: ConfidenceLevel::Medium,
                score: 1,
                factors: vec!["small_group".to_string()],
            },
            message: "refactor(src): rename 2 source files".to_string(),
            body: None,
            pre_staged: false,
        };
        PlanGroup::from(&group)
    }

    #[test]
    fn group_serializes_with_type_key_and_optional_fields_elided() {
        let value = serde_json::to_value(sample_group()).expect("json");
        assert_eq!(value["type"], "refactor");
        assert_eq!(value["renames"]["src/new.rs"], "src/old.rs");
        assert!(value.get("pre_staged").is_none());
        assert!(value.get("commit").is_none());
    }

    #[test]
    fn pathspecs_include_rename_sources() {
        assert_eq!(
            sample_group().pathspecs(),
            vec!["src/new.rs", "src/old.rs", "src/util.rs"]
        );
    }

    #[test]
    fn commit_message_appends_body() {
        let mut group = sample_group();
        assert_eq!(group.commit_message(), "refactor(src): rename 2 source files\n");
        group.body = Some("- renamed: src/old.rs -> src/new.rs".to_string());
        assert_eq!(
            group.commit_message(),
            "refactor(src): rename 2 source files\n\n- renamed: src/old.rs -> src/new.rs\n"
        );
    }

    #[test]
    fn checksum_ignores_itself_and_detects_edits() {
        let mut repo = RepoPlan::new("api", "/tmp/api");
        repo.groups.push(sample_group());
        let mut plan = Plan::new("run-1", vec![repo]);
        plan.set_duration(0.123_456);
        plan.seal().expect("seal");
        let sealed = plan.checksum.clone().expect("checksum");
        assert_eq!(plan.compute_checksum().expect("checksum"), sealed);

        plan.repos[0].groups[0].message = "chore(src): tampered".to_string();
        assert_ne!(plan.compute_checksum().expect("checksum"), sealed);
    }

    #[test]
    fn summary_counts_groups() {
        let mut repo = RepoPlan::new("api", "/tmp/api");
        repo.groups.push(sample_group());
        repo.groups[0].commit = Some("abc".to_string());
        let plan = Plan::new("run-1", vec![repo, RepoPlan::new("web", "/tmp/web")]);
        assert_eq!(plan.summary.repos_scanned, 2);
        assert_eq!(plan.summary.repos_dirty, 1);
        assert_eq!(plan.summary.groups_planned, 1);
        assert_eq!(plan.summary.groups_executed, 1);
        assert_eq!(plan.meta.duration_seconds, 0.0);
    }
}
