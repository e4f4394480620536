//! Turn a dirty git working tree into atomic conventional commits.
//!
//! The crate keeps a strict separation:
//!
//! - **[`core`]**: pure, deterministic logic (status parsing, path screening,
//!   classification, grouping, message derivation, confidence scoring).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: side-effecting operations (git, locks, checkpoints, state
//!   files, plan files, the task tracker, signals).
//!
//! Orchestration modules ([`planner`], [`execute`], [`recovery`], [`sweep`],
//! [`undo`], [`doctor`]) combine the two to implement the CLI modes.

pub mod core;
pub mod doctor;
pub mod error;
pub mod execute;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod plan;
pub mod planner;
pub mod recovery;
pub mod report;
pub mod session;
pub mod sweep;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod undo;
