//! Task-title lookup through an external tracker CLI.
//!
//! The lookup is best-effort: a missing tool, a timeout, or unparseable output
//! yields no title and the sweep continues.

use std::collections::HashMap;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::io::process::{is_not_found, run_command_with_timeout};

const TRACKER_OUTPUT_LIMIT_BYTES: usize = 64 * 1024;

pub trait TaskTracker {
    /// Fetch the human-readable title for a task identifier.
    fn title(&self, task_id: &str) -> Result<Option<String>>;
}

/// Runs `<command...> <task-id>` and parses its stdout.
#[derive(Debug, Clone)]
pub struct CliTaskTracker {
    pub command: Vec<String>,
    pub timeout: Duration,
}

impl TaskTracker for CliTaskTracker {
    #[instrument(skip_all, fields(task_id))]
    fn title(&self, task_id: &str) -> Result<Option<String>> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("tracker command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).arg(task_id);

        let out = match run_command_with_timeout(cmd, None, self.timeout, TRACKER_OUTPUT_LIMIT_BYTES)
        {
            Ok(out) => out,
            Err(err) if is_not_found(&err) => {
                debug!(program = %program, "tracker not installed");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        if out.timed_out {
            return Err(anyhow!(
                "tracker lookup timed out after {}s",
                self.timeout.as_secs()
            ));
        }
        if !out.status.success() {
            debug!(stderr = %out.stderr_lossy().trim(), "tracker lookup failed");
            return Ok(None);
        }
        Ok(parse_title(&out.stdout_lossy()))
    }
}

/// Tracker used when lookups are disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTracker;

impl TaskTracker for NoTracker {
    fn title(&self, _task_id: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Extract a title from JSON (`{"title":..}` or `[{"title":..}]`) or plain text.
pub fn parse_title(stdout: &str) -> Option<String> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let record = match &value {
            Value::Array(items) => items.first()?,
            other => other,
        };
        let title = match record {
            Value::String(text) => Some(text.as_str()),
            Value::Object(_) => record.get("title").and_then(Value::as_str),
            other => {
                debug!(output = %other, "tracker JSON is neither an object nor a string");
                return None;
            }
        };
        if title.is_none() {
            debug!("tracker JSON has no string title");
        }
        return title
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .map(str::to_string);
    }
    trimmed
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Per-run memo of title lookups with hit/miss counters.
#[derive(Debug, Default)]
pub struct TaskCache {
    titles: HashMap<String, Option<String>>,
    pub hits: u64,
    pub misses: u64,
}

impl TaskCache {
    /// Resolve a title, consulting the tracker once per identifier.
    ///
    /// Failures degrade to `None` plus a warning string for the plan.
    pub fn resolve(
        &mut self,
        tracker: &dyn TaskTracker,
        task_id: &str,
    ) -> (Option<String>, Option<String>) {
        if let Some(title) = self.titles.get(task_id) {
            self.hits += 1;
            return (title.clone(), None);
        }
        self.misses += 1;
        let (title, warning) = match tracker.title(task_id) {
            Ok(title) => (title, None),
            Err(err) => {
                warn!(task_id, err = %err, "task title lookup failed");
                (None, Some(format!("task title lookup for {task_id} failed: {err}")))
            }
        };
        self.titles.insert(task_id.to_string(), title.clone());
        (title, warning)
    }
}
