//! Freeze a plan to disk and rehydrate it with schema + checksum validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use jsonschema::Draft;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::SweepError;
use crate::io::paths::write_atomic;
use crate::plan::Plan;

const PLAN_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/plan/v1.schema.json"
));

/// Seal the plan with its checksum and write it atomically.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn freeze_plan(path: &Path, plan: &mut Plan) -> Result<()> {
    plan.seal()?;
    let mut buf = serde_json::to_string_pretty(plan).context("serialize plan")?;
    buf.push('\n');
    write_atomic(path, &buf)?;
    debug!(checksum = ?plan.checksum, "plan frozen");
    Ok(())
}

/// Load a frozen plan. Fails closed on schema violations or a checksum mismatch.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn rehydrate_plan(path: &Path) -> Result<Plan> {
    let integrity = |reason: String| SweepError::PlanIntegrity {
        path: path.to_path_buf(),
        reason,
    };

    let contents = fs::read_to_string(path).map_err(|err| integrity(format!("read: {err}")))?;
    let value: Value =
        serde_json::from_str(&contents).map_err(|err| integrity(format!("parse: {err}")))?;
    validate_schema(&value).map_err(|err| integrity(format!("{err:#}")))?;
    let plan: Plan =
        serde_json::from_value(value).map_err(|err| integrity(format!("deserialize: {err}")))?;

    let recorded = plan
        .checksum
        .clone()
        .ok_or_else(|| integrity("missing checksum".to_string()))?;
    let actual = plan.compute_checksum()?;
    if recorded != actual {
        return Err(integrity(format!(
            "checksum mismatch (recorded {recorded}, computed {actual})"
        ))
        .into());
    }
    debug!(run_id = %plan.run_id, repos = plan.repos.len(), "plan rehydrated");
    Ok(plan)
}

/// Validate a plan document against the embedded v1 schema (Draft 2020-12).
pub fn validate_schema(instance: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(PLAN_SCHEMA).context("parse plan schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile plan schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        anyhow::bail!("schema validation failed: {}", messages.join("; "));
    }
    Ok(())
}
