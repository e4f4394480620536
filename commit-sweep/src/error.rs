//! Classified failures that decide the process exit code.
//!
//! Plumbing errors travel as `anyhow::Error`; the variants here are attached
//! at the point of failure and recovered with `downcast_ref` at the CLI
//! boundary.

use std::path::PathBuf;

use thiserror::Error;

use crate::exit_codes;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("{repo}: {operation} in progress (finish or abort it before sweeping)")]
    PreflightBlocked { repo: String, operation: String },

    #[error("{repo}: working tree changed since the plan was frozen (re-run with --save-plan)")]
    PlanDiverged { repo: String },

    #[error(
        "timed out after {waited_secs}s waiting for {path} (held by {holder}); inspect the holder or remove the lock file if it is gone"
    )]
    LockTimeout {
        path: PathBuf,
        holder: String,
        waited_secs: u64,
    },

    #[error("{tool} is not available: {detail}")]
    DependencyMissing { tool: String, detail: String },

    #[error("git {found} is too old (commit-sweep needs {required} or newer)")]
    DependencyTooOld { found: String, required: String },

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error(
        "{repo}: previous sweep {run_id} is {status}; pass --resume to continue or --restart to roll it back first"
    )]
    ResumeRequired {
        repo: String,
        run_id: String,
        status: String,
    },

    #[error("plan file {path}: {reason}")]
    PlanIntegrity { path: PathBuf, reason: String },

    #[error("interrupted")]
    Interrupted,
}

impl SweepError {
    pub fn exit_code(&self) -> i32 {
        match self {
            SweepError::PreflightBlocked { .. } | SweepError::PlanDiverged { .. } => {
                exit_codes::PREFLIGHT
            }
            SweepError::LockTimeout { .. }
            | SweepError::DependencyMissing { .. }
            | SweepError::DependencyTooOld { .. } => exit_codes::DEPENDENCY,
            SweepError::InvalidArguments(_)
            | SweepError::ResumeRequired { .. }
            | SweepError::PlanIntegrity { .. } => exit_codes::INVALID,
            SweepError::Interrupted => exit_codes::INTERRUPTED,
        }
    }
}

/// Exit code for any error: the first classified cause wins, else partial failure.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<SweepError>())
        .map(SweepError::exit_code)
        .unwrap_or(exit_codes::PARTIAL)
}
