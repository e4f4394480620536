//! Deterministic, pure logic shared by commit-sweep.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! change sets and return deterministic outputs suitable for tests: planning
//! the same tree twice yields identical groups, messages, and scores.

pub mod classifier;
pub mod confidence;
pub mod grouper;
pub mod message;
pub mod status;
pub mod task_id;
pub mod types;
pub mod validator;
