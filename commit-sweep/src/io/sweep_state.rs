//! Persisted per-repository progress marker (`state.json`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::io::paths::{remove_if_exists, write_atomic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStatus {
    InProgress,
    Interrupted,
    Completed,
}

impl SweepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SweepStatus::InProgress => "in_progress",
            SweepStatus::Interrupted => "interrupted",
            SweepStatus::Completed => "completed",
        }
    }

    /// Records that block a new run until the operator chooses resume or restart.
    pub fn is_unresolved(self) -> bool {
        matches!(self, SweepStatus::InProgress | SweepStatus::Interrupted)
    }
}

/// Bookkeeping for one repository's run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SweepState {
    pub run_id: String,
    pub status: SweepStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub groups_total: usize,
    pub groups_completed: usize,
}

impl SweepState {
    pub fn begin(run_id: &str, groups_total: usize) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.to_string(),
            status: SweepStatus::InProgress,
            started_at: now,
            updated_at: now,
            groups_total,
            groups_completed: 0,
        }
    }

    pub fn advance(&mut self) {
        self.groups_completed += 1;
        self.updated_at = Utc::now();
    }

    pub fn mark(&mut self, status: SweepStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Load the state record, `None` when no run left one behind.
pub fn load_sweep_state(path: &Path) -> Result<Option<SweepState>> {
    if !path.exists() {
        return Ok(None);
    }
    debug!(path = %path.display(), "loading sweep state");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read sweep state {}", path.display()))?;
    let state: SweepState = serde_json::from_str(&contents)
        .with_context(|| format!("parse sweep state {}", path.display()))?;
    debug!(run_id = %state.run_id, status = state.status.as_str(), "sweep state loaded");
    Ok(Some(state))
}

/// Atomically write the state record.
pub fn write_sweep_state(path: &Path, state: &SweepState) -> Result<()> {
    debug!(
        path = %path.display(),
        status = state.status.as_str(),
        completed = state.groups_completed,
        "writing sweep state"
    );
    let mut buf = serde_json::to_string_pretty(state)?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub fn clear_sweep_state(path: &Path) -> Result<()> {
    remove_if_exists(path)
}
